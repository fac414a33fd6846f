//! StateStore: redb-backed platform state for dbgrid.
//!
//! Provides typed CRUD operations over cluster specs, role-group resources
//! and replicas. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(ROLE_GROUPS).map_err(map_err!(Table))?;
        txn.open_table(REPLICAS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert or update a cluster spec.
    pub fn put_cluster(&self, spec: &ClusterSpec) -> StateResult<()> {
        let key = spec.table_key();
        let value = serde_json::to_vec(spec).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "cluster stored");
        Ok(())
    }

    /// Get a cluster by namespace/name key.
    pub fn get_cluster(&self, key: &str) -> StateResult<Option<ClusterSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let spec: ClusterSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    /// List all clusters.
    pub fn list_clusters(&self) -> StateResult<Vec<ClusterSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let spec: ClusterSpec =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(spec);
        }
        Ok(results)
    }

    /// Delete a cluster by key. Returns true if it existed.
    pub fn delete_cluster(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "cluster deleted");
        Ok(existed)
    }

    // ── Role-group resources ───────────────────────────────────────

    /// Create or overwrite a role-group resource unconditionally.
    ///
    /// Used by the collaborator that forms the cluster; the autoscaler
    /// itself only goes through [`StateStore::update_role_group`].
    pub fn put_role_group(&self, resource: &RoleGroupResource) -> StateResult<()> {
        let key = resource.table_key();
        let value = serde_json::to_vec(resource).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLE_GROUPS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the resource backing a role group.
    pub fn get_role_group(
        &self,
        cluster_id: &str,
        role_group: &str,
    ) -> StateResult<Option<RoleGroupResource>> {
        let key = role_group_key(cluster_id, role_group);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLE_GROUPS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let resource: RoleGroupResource =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(resource))
            }
            None => Ok(None),
        }
    }

    /// Like [`StateStore::get_role_group`], but a missing resource is an error.
    pub fn require_role_group(
        &self,
        cluster_id: &str,
        role_group: &str,
    ) -> StateResult<RoleGroupResource> {
        self.get_role_group(cluster_id, role_group)?
            .ok_or_else(|| StateError::NotFound(role_group_key(cluster_id, role_group)))
    }

    /// Set the desired replica count (and zone targets) of a role group.
    ///
    /// The write is rejected with [`StateError::Conflict`] when
    /// `expected_version` no longer matches the stored resource. A write
    /// that changes nothing returns the stored resource without bumping
    /// its version.
    pub fn update_role_group(
        &self,
        cluster_id: &str,
        role_group: &str,
        expected_version: u64,
        desired_replicas: u32,
        zone_replicas: &ZoneDistribution,
    ) -> StateResult<RoleGroupResource> {
        let key = role_group_key(cluster_id, role_group);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(ROLE_GROUPS).map_err(map_err!(Table))?;
            let mut resource: RoleGroupResource = match table
                .get(key.as_str())
                .map_err(map_err!(Read))?
            {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key)),
            };

            if resource.resource_version != expected_version {
                return Err(StateError::Conflict {
                    key,
                    expected: expected_version,
                    actual: resource.resource_version,
                });
            }

            if resource.desired_replicas == desired_replicas
                && &resource.zone_replicas == zone_replicas
            {
                // Dropping the transaction aborts it; nothing was written.
                return Ok(resource);
            }

            resource.desired_replicas = desired_replicas;
            resource.zone_replicas = zone_replicas.clone();
            resource.resource_version += 1;
            resource.updated_at = epoch_secs();

            let value = serde_json::to_vec(&resource).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            resource
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %key,
            desired = updated.desired_replicas,
            version = updated.resource_version,
            "role group updated"
        );
        Ok(updated)
    }

    // ── Replicas ───────────────────────────────────────────────────

    /// Insert or update a replica.
    pub fn put_replica(&self, replica: &ReplicaState) -> StateResult<()> {
        let key = replica.table_key();
        let value = serde_json::to_vec(replica).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REPLICAS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all replicas of one role group.
    pub fn list_replicas(
        &self,
        cluster_id: &str,
        role_group: &str,
    ) -> StateResult<Vec<ReplicaState>> {
        let prefix = format!("{cluster_id}:{role_group}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPLICAS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let replica: ReplicaState =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(replica);
            }
        }
        Ok(results)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
