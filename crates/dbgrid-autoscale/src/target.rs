//! Write seam for role-group scalable resources.

use std::future::Future;
use std::pin::Pin;

use dbgrid_state::{RoleGroupResource, StateResult, StateStore, ZoneDistribution};

/// Boxed future alias for scalable-resource operations.
pub type TargetFuture<'a, T> = Pin<Box<dyn Future<Output = StateResult<T>> + Send + 'a>>;

/// Reads and resizes the externally owned per-role scalable resource.
///
/// Writes are optimistic: they carry the `resource_version` they were
/// computed against and must fail with a conflict when it is stale.
pub trait ScaleTarget: Send + Sync {
    fn read<'a>(&'a self, cluster_id: &'a str, role_group: &'a str)
    -> TargetFuture<'a, RoleGroupResource>;

    fn write<'a>(
        &'a self,
        current: &'a RoleGroupResource,
        desired_replicas: u32,
        zone_replicas: &'a ZoneDistribution,
    ) -> TargetFuture<'a, RoleGroupResource>;
}

impl ScaleTarget for StateStore {
    fn read<'a>(
        &'a self,
        cluster_id: &'a str,
        role_group: &'a str,
    ) -> TargetFuture<'a, RoleGroupResource> {
        Box::pin(async move { self.require_role_group(cluster_id, role_group) })
    }

    fn write<'a>(
        &'a self,
        current: &'a RoleGroupResource,
        desired_replicas: u32,
        zone_replicas: &'a ZoneDistribution,
    ) -> TargetFuture<'a, RoleGroupResource> {
        Box::pin(async move {
            self.update_role_group(
                &current.cluster_id,
                &current.role_group,
                current.resource_version,
                desired_replicas,
                zone_replicas,
            )
        })
    }
}
