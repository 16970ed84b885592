//! # Tenant Registry
//!
//! Tenant records, their partitions, and the concurrent map that holds them.
//!
//! Each tenant owns one `Partition`:
//! - a write section (`parking_lot::Mutex`) taken by every mutation, batch,
//!   status change and deletion of that tenant
//! - the published snapshot (`Arc<TenantGraph>`), swapped atomically after a
//!   successful commit
//!
//! Partitions live in a `DashMap`; no lock spanning more than one tenant is
//! ever taken on a data path.

use crate::graph::TenantGraph;
use crate::types::{StrataError, TenantId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// =============================================================================
// TENANT RECORD
// =============================================================================

/// How a tenant's data is separated from other tenants' in the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationModel {
    /// Shared schema, partitioned by a tenant property.
    #[default]
    #[serde(alias = "shared-schema-property")]
    Property,
    /// Dedicated database per tenant.
    Database,
    /// Shared schema with label namespacing.
    Label,
}

impl fmt::Display for IsolationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property => write!(f, "property"),
            Self::Database => write!(f, "database"),
            Self::Label => write!(f, "label"),
        }
    }
}

impl std::str::FromStr for IsolationModel {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "property" | "shared-schema-property" => Ok(Self::Property),
            "database" => Ok(Self::Database),
            "label" => Ok(Self::Label),
            _ => Err(StrataError::BadRequest(format!(
                "unknown isolation model '{}'",
                s
            ))),
        }
    }
}

/// Lifecycle state of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantStatus {
    Active,
    /// Read-only: graph writes fail with `Conflict`.
    Suspended,
    Creating,
    Deleting,
    Deleted,
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "Active",
            Self::Suspended => "Suspended",
            Self::Creating => "Creating",
            Self::Deleting => "Deleting",
            Self::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// A tenant record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub isolation_model: IsolationModel,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Tenant {
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Body of a tenant creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTenant {
    pub id: TenantId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub isolation_model: IsolationModel,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewTenant {
    #[must_use]
    pub fn new(id: TenantId) -> Self {
        Self {
            id,
            name: None,
            description: None,
            isolation_model: IsolationModel::default(),
            metadata: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Materialize the record, stamped `Active` at `now`.
    #[must_use]
    pub fn into_tenant(self, now: DateTime<Utc>) -> Tenant {
        Tenant {
            id: self.id,
            name: self.name,
            description: self.description,
            isolation_model: self.isolation_model,
            status: TenantStatus::Active,
            created_at: now,
            updated_at: now,
            metadata: self.metadata,
        }
    }
}

/// Partial update of a tenant. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantPatch {
    /// If present, must equal the addressed tenant id.
    #[serde(default)]
    pub id: Option<TenantId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// If present, must equal the current model.
    #[serde(default)]
    pub isolation_model: Option<IsolationModel>,
    /// Only `Active` and `Suspended` are accepted.
    #[serde(default)]
    pub status: Option<TenantStatus>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl TenantPatch {
    /// Apply to `tenant`, bumping `updated_at`.
    pub fn apply_to(self, tenant: &mut Tenant, now: DateTime<Utc>) -> Result<(), StrataError> {
        if let Some(id) = &self.id
            && *id != tenant.id
        {
            return Err(StrataError::BadRequest(format!(
                "tenant id is immutable ({} != {})",
                id, tenant.id
            )));
        }
        if let Some(model) = self.isolation_model
            && model != tenant.isolation_model
        {
            return Err(StrataError::BadRequest(
                "isolation_model is immutable after creation".into(),
            ));
        }
        if let Some(status) = self.status
            && !matches!(status, TenantStatus::Active | TenantStatus::Suspended)
        {
            return Err(StrataError::BadRequest(format!(
                "status can only be set to Active or Suspended, not {}",
                status
            )));
        }

        if let Some(name) = self.name {
            tenant.name = Some(name);
        }
        if let Some(description) = self.description {
            tenant.description = Some(description);
        }
        if let Some(status) = self.status {
            tenant.status = status;
        }
        if let Some(metadata) = self.metadata {
            tenant.metadata = metadata;
        }
        tenant.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// PARTITION
// =============================================================================

/// One tenant's record, write section and published snapshot.
pub struct Partition {
    tenant: RwLock<Tenant>,
    write: Mutex<()>,
    snapshot: RwLock<Arc<TenantGraph>>,
    retired: AtomicBool,
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("tenant", &self.tenant.read().id)
            .field("head", &self.snapshot.read().head())
            .field("retired", &self.is_retired())
            .finish()
    }
}

impl Partition {
    #[must_use]
    pub fn new(tenant: Tenant, graph: TenantGraph) -> Self {
        Self {
            tenant: RwLock::new(tenant),
            write: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(graph)),
            retired: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn tenant(&self) -> Tenant {
        self.tenant.read().clone()
    }

    /// Replace the tenant record. Callers hold the write section.
    pub fn set_tenant(&self, tenant: Tenant) {
        *self.tenant.write() = tenant;
    }

    /// The current published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TenantGraph> {
        self.snapshot.read().clone()
    }

    /// Publish a new snapshot. Callers hold the write section.
    pub fn publish(&self, graph: TenantGraph) {
        *self.snapshot.write() = Arc::new(graph);
    }

    /// Enter the write section, waiting at most `timeout`.
    ///
    /// # Errors
    /// - `Timeout` if the section stays held past `timeout`
    /// - `NotFound` if the tenant was deleted while waiting
    pub fn lock_write(&self, timeout: Duration) -> Result<MutexGuard<'_, ()>, StrataError> {
        let guard = self.write.try_lock_for(timeout).ok_or_else(|| {
            StrataError::Timeout(format!(
                "write section of tenant {} busy for more than {}ms",
                self.tenant.read().id,
                timeout.as_millis()
            ))
        })?;
        if self.is_retired() {
            return Err(StrataError::NotFound(format!(
                "tenant {}",
                self.tenant.read().id
            )));
        }
        Ok(guard)
    }

    /// Mark the partition dead. Callers hold the write section.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Concurrent map from tenant id to partition.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    partitions: DashMap<TenantId, Arc<Partition>>,
}

impl TenantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tenant.
    ///
    /// The id is reserved with a `Creating` partition whose write section is
    /// already held; `persist` then runs with no map lock taken. Writers
    /// reaching the partition early wait on its write section, and see
    /// `NotFound` if `persist` fails.
    ///
    /// # Errors
    /// - `Conflict` if the id is taken
    /// - whatever `persist` returns
    pub fn create<F>(&self, tenant: Tenant, persist: F) -> Result<Arc<Partition>, StrataError>
    where
        F: FnOnce(&Tenant) -> Result<(), StrataError>,
    {
        let mut pending = tenant.clone();
        pending.status = TenantStatus::Creating;
        let partition = Arc::new(Partition::new(
            pending,
            TenantGraph::new(tenant.id.clone()),
        ));
        let guard = partition.write.lock();

        match self.partitions.entry(tenant.id.clone()) {
            Entry::Occupied(_) => {
                return Err(StrataError::Conflict(format!(
                    "tenant {} already exists",
                    tenant.id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&partition));
            }
        }

        if let Err(e) = persist(&tenant) {
            partition.retire();
            self.remove(&tenant.id, &partition);
            return Err(e);
        }
        partition.set_tenant(tenant);
        drop(guard);
        Ok(partition)
    }

    /// Insert an already-built partition, e.g. during journal replay.
    pub fn restore(&self, partition: Partition) -> Arc<Partition> {
        let id = partition.tenant.read().id.clone();
        let partition = Arc::new(partition);
        self.partitions.insert(id, Arc::clone(&partition));
        partition
    }

    pub fn get(&self, id: &TenantId) -> Result<Arc<Partition>, StrataError> {
        self.partitions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StrataError::NotFound(format!("tenant {}", id)))
    }

    /// Remove `partition` from the map if it is still the one registered.
    pub fn remove(&self, id: &TenantId, partition: &Arc<Partition>) {
        self.partitions
            .remove_if(id, |_, current| Arc::ptr_eq(current, partition));
    }

    /// All tenants, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<Tenant> {
        let mut tenants: Vec<Tenant> = self
            .partitions
            .iter()
            .map(|entry| entry.value().tenant())
            .collect();
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        tenants
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
