//! Object store access: the backend trait, an in-memory implementation,
//! and the typed, serialized gateway the orchestrator goes through.
//!
//! The declarative store itself is an external collaborator; this module
//! only fixes its contract.  [`ObjectStore`] is an untyped record CRUD over
//! `(kind, namespace, name)` keys with a distinguishable not-found signal.
//! [`StoreGateway`] layers typed Volume / AvailableCapacity operations on
//! top and serializes every call with a single mutual-exclusion lock, so no
//! caller ever observes a partially applied batch.  The gateway never
//! retries; callers decide retry policy.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::{
    capacity_key, AvailableCapacityRecord, CapacityReservationRecord, NodeId, VolumeId,
    VolumeRecord,
};

/// Record kind for volume records.
pub const VOLUME_KIND: &str = "Volume";
/// Record kind for available capacity records.
pub const CAPACITY_KIND: &str = "AvailableCapacity";
/// Record kind for capacity reservation records.
pub const RESERVATION_KIND: &str = "AvailableCapacityReservation";

/// Errors surfaced by the object store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Record kind.
        kind: String,
        /// Record name.
        name: String,
    },

    /// A record with this key already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Record kind.
        kind: String,
        /// Record name.
        name: String,
    },

    /// The backend failed.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(String),
}

impl StoreError {
    /// Whether this error is the not-found signal.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_owned(),
            name: name.to_owned(),
        }
    }

    fn already_exists(kind: &str, name: &str) -> Self {
        Self::AlreadyExists {
            kind: kind.to_owned(),
            name: name.to_owned(),
        }
    }
}

/// Declarative object store contract: typed-record CRUD keyed by
/// `(kind, namespace, name)`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read one record.  Not-found is signaled via
    /// [`StoreError::NotFound`].
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<Value, StoreError>;

    /// List every record of `kind` within `namespace`.
    async fn list(&self, kind: &str, namespace: &str) -> Result<Vec<Value>, StoreError>;

    /// Create a record.  Fails with [`StoreError::AlreadyExists`] if the
    /// key is taken.
    async fn create(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Replace an existing record.
    async fn update(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Delete a record.
    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory [`ObjectStore`] backed by a concurrent map.
///
/// Used by the test suite and usable as a single-process store for local
/// development.
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<(String, String, String), Value>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: &str, namespace: &str, name: &str) -> (String, String, String) {
        (kind.to_owned(), namespace.to_owned(), name.to_owned())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<Value, StoreError> {
        self.objects
            .get(&Self::key(kind, namespace, name))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found(kind, name))
    }

    async fn list(&self, kind: &str, namespace: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == kind && entry.key().1 == namespace)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        match self.objects.entry(Self::key(kind, namespace, name)) {
            Entry::Occupied(_) => Err(StoreError::already_exists(kind, name)),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    async fn update(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        match self.objects.get_mut(&Self::key(kind, namespace, name)) {
            Some(mut entry) => {
                *entry.value_mut() = value;
                Ok(())
            }
            None => Err(StoreError::not_found(kind, name)),
        }
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.objects
            .remove(&Self::key(kind, namespace, name))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(kind, name))
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Namespace-scoped typed adapter over an [`ObjectStore`].
///
/// Every operation holds the store lock for its full duration.  `create_*`
/// is idempotent on "already exists": an existing record is treated as
/// success.
pub struct StoreGateway {
    store: Arc<dyn ObjectStore>,
    namespace: String,
    lock: Mutex<()>,
}

impl StoreGateway {
    /// Wrap `store`, scoping all operations to `namespace`.
    pub fn new(store: Arc<dyn ObjectStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            lock: Mutex::new(()),
        }
    }

    /// The namespace this gateway operates in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn read<T: DeserializeOwned>(&self, kind: &str, name: &str) -> Result<T, StoreError> {
        let _guard = self.lock.lock().await;
        let value = self.store.get(kind, &self.namespace, name).await?;
        serde_json::from_value(value).map_err(|e| StoreError::Codec(e.to_string()))
    }

    async fn list_all<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>, StoreError> {
        let _guard = self.lock.lock().await;
        let values = self.store.list(kind, &self.namespace).await?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|e| StoreError::Codec(e.to_string())))
            .collect()
    }

    async fn create_record<T: Serialize>(
        &self,
        kind: &str,
        name: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        match self.store.get(kind, &self.namespace, name).await {
            Ok(_) => {
                debug!(kind, name, "record already exists, create is a no-op");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let value =
                    serde_json::to_value(record).map_err(|e| StoreError::Codec(e.to_string()))?;
                self.store.create(kind, &self.namespace, name, value).await
            }
            Err(e) => Err(e),
        }
    }

    async fn update_record<T: Serialize>(
        &self,
        kind: &str,
        name: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let value = serde_json::to_value(record).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.store.update(kind, &self.namespace, name, value).await
    }

    async fn delete_record(&self, kind: &str, name: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.store.delete(kind, &self.namespace, name).await
    }

    // --- Volume records ----------------------------------------------------

    /// Read a volume record by id.
    pub async fn read_volume(&self, id: &VolumeId) -> Result<VolumeRecord, StoreError> {
        self.read(VOLUME_KIND, &id.0).await
    }

    /// List every volume record in the namespace.
    pub async fn list_volumes(&self) -> Result<Vec<VolumeRecord>, StoreError> {
        self.list_all(VOLUME_KIND).await
    }

    /// Persist a new volume record.  An existing record with the same id is
    /// treated as success.
    pub async fn create_volume(&self, volume: &VolumeRecord) -> Result<(), StoreError> {
        self.create_record(VOLUME_KIND, &volume.id.0, volume).await
    }

    /// Replace an existing volume record.
    pub async fn update_volume(&self, volume: &VolumeRecord) -> Result<(), StoreError> {
        self.update_record(VOLUME_KIND, &volume.id.0, volume).await
    }

    /// Delete a volume record by id.
    pub async fn delete_volume(&self, id: &VolumeId) -> Result<(), StoreError> {
        self.delete_record(VOLUME_KIND, &id.0).await
    }

    // --- Available capacity records ----------------------------------------

    /// Read one capacity record by its store key.
    pub async fn read_capacity(&self, key: &str) -> Result<AvailableCapacityRecord, StoreError> {
        self.read(CAPACITY_KIND, key).await
    }

    /// List every capacity record in the namespace.
    pub async fn list_capacity(&self) -> Result<Vec<AvailableCapacityRecord>, StoreError> {
        self.list_all(CAPACITY_KIND).await
    }

    /// Persist a capacity record under its derived key.  An existing record
    /// is treated as success.
    pub async fn create_capacity(&self, ac: &AvailableCapacityRecord) -> Result<(), StoreError> {
        self.create_record(CAPACITY_KIND, &ac.key(), ac).await
    }

    /// Delete the capacity record for `location` on `node_id`.
    pub async fn delete_capacity(
        &self,
        node_id: &NodeId,
        location: &str,
    ) -> Result<(), StoreError> {
        self.delete_record(CAPACITY_KIND, &capacity_key(node_id, location))
            .await
    }

    // --- Capacity reservation records ---------------------------------------

    /// Read one reservation record by its key.
    pub async fn read_reservation(
        &self,
        key: &str,
    ) -> Result<CapacityReservationRecord, StoreError> {
        self.read(RESERVATION_KIND, key).await
    }

    /// Persist a reservation record.  An existing record with the same key
    /// is treated as success.
    pub async fn create_reservation(
        &self,
        reservation: &CapacityReservationRecord,
    ) -> Result<(), StoreError> {
        self.create_record(RESERVATION_KIND, &reservation.name, reservation)
            .await
    }

    /// Replace an existing reservation record.
    pub async fn update_reservation(
        &self,
        reservation: &CapacityReservationRecord,
    ) -> Result<(), StoreError> {
        self.update_record(RESERVATION_KIND, &reservation.name, reservation)
            .await
    }

    /// Delete a reservation record by its key.
    pub async fn delete_reservation(&self, key: &str) -> Result<(), StoreError> {
        self.delete_record(RESERVATION_KIND, key).await
    }
}
