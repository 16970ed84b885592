//! # Bitemporal Axes
//!
//! Every stored version carries two orthogonal time axes:
//!
//! - **Valid time** (`ValidInterval`): when the fact is true in the world.
//!   Half-open `[from, to)`; `to = None` is open-ended. Edges only.
//! - **Transaction time** (`TxRange`): which tenant sequence numbers the
//!   version was current for. Half-open `[from, to)` in sequence space.
//!
//! Queries select on both independently: `TimeFilter` picks valid time,
//! `TxView` picks transaction time.

use crate::types::{Seq, StrataError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// VALID TIME
// =============================================================================

/// Half-open valid-time interval `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidInterval {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

impl ValidInterval {
    /// Build an interval, rejecting `from > to`.
    pub fn new(from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> Result<Self, StrataError> {
        match to {
            Some(end) if from > end => Err(StrataError::BadRequest(format!(
                "valid_from {} is after valid_to {}",
                from.to_rfc3339(),
                end.to_rfc3339()
            ))),
            _ => Ok(Self { from, to }),
        }
    }

    /// Whether `t` lies inside `[from, to)`.
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.from <= t && self.to.is_none_or(|to| t < to)
    }

    /// Whether this interval overlaps `[from, to)`.
    ///
    /// An empty query range (`from == to`) overlaps nothing.
    #[must_use]
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        if from >= to {
            return false;
        }
        self.from < to && self.to.is_none_or(|end| from < end)
    }
}

// =============================================================================
// TRANSACTION TIME
// =============================================================================

/// Range of sequence numbers during which a version was current.
///
/// `to = None` means the version is current at the tenant head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRange {
    pub from: Seq,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Seq>,
}

impl TxRange {
    #[must_use]
    pub fn open(from: Seq) -> Self {
        Self { from, to: None }
    }

    #[must_use]
    pub fn is_current(&self) -> bool {
        self.to.is_none()
    }

    /// Whether the version was current after `seq` had been applied.
    #[must_use]
    pub fn visible_at(&self, seq: Seq) -> bool {
        self.from <= seq && self.to.is_none_or(|to| seq < to)
    }
}

/// Transaction-time view of a tenant graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxView {
    /// State at the tenant head.
    #[default]
    Current,
    /// State as recorded right after the given sequence number.
    AsOf(Seq),
}

impl TxView {
    #[must_use]
    pub fn from_option(seq: Option<Seq>) -> Self {
        seq.map_or(Self::Current, Self::AsOf)
    }

    #[must_use]
    pub fn sees(&self, range: &TxRange) -> bool {
        match self {
            Self::Current => range.is_current(),
            Self::AsOf(seq) => range.visible_at(*seq),
        }
    }
}

// =============================================================================
// TIME FILTER
// =============================================================================

/// Valid-time selection for edge queries.
///
/// ```json
/// {"as_of": "2024-06-01T00:00:00Z"}
/// {"between": {"from": "2024-01-01T00:00:00Z", "to": "2025-01-01T00:00:00Z"}}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilter {
    AsOf(DateTime<Utc>),
    Between {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

impl TimeFilter {
    /// Reject inverted ranges.
    pub fn validate(&self) -> Result<(), StrataError> {
        match self {
            Self::AsOf(_) => Ok(()),
            Self::Between { from, to } if from > to => Err(StrataError::BadRequest(format!(
                "time range is inverted: {} > {}",
                from.to_rfc3339(),
                to.to_rfc3339()
            ))),
            Self::Between { .. } => Ok(()),
        }
    }

    #[must_use]
    pub fn matches(&self, interval: &ValidInterval) -> bool {
        match self {
            Self::AsOf(t) => interval.contains(*t),
            Self::Between { from, to } => interval.overlaps(*from, *to),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
