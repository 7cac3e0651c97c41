//! Resource pools: the bookkeeping for one (cloud account, resource type) slice of capacity.
//!
//! A pool's state only ever changes inside short critical sections. Cloud calls happen with the
//! lock released, so anything observed before a call is re-checked after it.

pub mod compute;
pub mod network;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use cal::{CalError, CloudAdapter};
use models::{
    ComputeModifyRequest, PoolSnapshot, PoolStatus, PoolType, ResourceInfo, ResourceOrigin,
    ResourcePoolInfo, ResourceRequest, ResourceType, VduRequest,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::ResMgrError;

pub use compute::ComputeBackend;
pub use network::NetworkBackend;

/// A resource known to a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub resource_id: String,
    pub origin: ResourceOrigin,
    /// The compute request it was last allocated for, used to derive readiness
    pub request: Option<VduRequest>,
}

impl Resource {
    fn new(resource_id: impl Into<String>, origin: ResourceOrigin) -> Self {
        Self {
            resource_id: resource_id.into(),
            origin,
            request: None,
        }
    }
}

/// Resource type specific cloud bindings of a pool.
#[async_trait]
pub trait PoolBackend: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Whether the existing resource satisfies `request`. A resource the cloud no longer knows
    /// about never matches.
    async fn matches(
        &self,
        cal: &dyn CloudAdapter,
        resource_id: &str,
        request: &ResourceRequest,
    ) -> Result<bool, ResMgrError>;

    /// Creates a resource for `request` and returns its id
    async fn create(
        &self,
        cal: &dyn CloudAdapter,
        request: &ResourceRequest,
    ) -> Result<String, ResMgrError>;

    async fn delete(&self, cal: &dyn CloudAdapter, resource_id: &str) -> Result<(), CalError>;

    /// Checks that the cloud still has the resource
    async fn confirm(&self, cal: &dyn CloudAdapter, resource_id: &str) -> Result<(), CalError>;

    async fn resource_info(
        &self,
        cal: &dyn CloudAdapter,
        pool_name: &str,
        resource: &Resource,
    ) -> Result<ResourceInfo, ResMgrError>;

    async fn modify(
        &self,
        _cal: &dyn CloudAdapter,
        resource: &Resource,
        _modify: &ComputeModifyRequest,
    ) -> Result<(), ResMgrError> {
        Err(ResMgrError::conflict(format!(
            "{} resource {} can't be modified",
            self.resource_type(),
            resource.resource_id
        )))
    }
}

#[derive(Debug, Default)]
struct PoolState {
    status: PoolStatus,
    all_resources: HashMap<String, Resource>,
    free_resources: VecDeque<String>,
    allocated_resources: HashSet<String>,
    /// Dynamic creates still waiting on the cloud
    pending_creates: usize,
}

impl PoolState {
    fn take_free(&mut self, resource_id: &str) -> bool {
        match self.free_resources.iter().position(|r| r == resource_id) {
            Some(pos) => {
                self.free_resources.remove(pos);
                true
            }
            None => false,
        }
    }
}

pub struct ResourcePool {
    info: ResourcePoolInfo,
    cloud_account: String,
    cal: Arc<dyn CloudAdapter>,
    backend: Box<dyn PoolBackend>,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("info", &self.info)
            .field("cloud_account", &self.cloud_account)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl ResourcePool {
    /// Builds a pool and registers the static members listed in `info`.
    pub fn new(
        info: ResourcePoolInfo,
        cloud_account: impl Into<String>,
        cal: Arc<dyn CloudAdapter>,
        backend: Box<dyn PoolBackend>,
    ) -> Result<Self, ResMgrError> {
        if backend.resource_type() != info.resource_type {
            return Err(ResMgrError::conflict(format!(
                "pool {} holds {} resources but was given a {} backend",
                info.name,
                info.resource_type,
                backend.resource_type()
            )));
        }

        let pool = Self {
            cloud_account: cloud_account.into(),
            cal,
            backend,
            state: Mutex::new(PoolState::default()),
            info,
        };
        for resource_id in pool.info.resources.clone() {
            pool.add_resource_id(&resource_id)?;
        }

        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn pool_type(&self) -> PoolType {
        self.info.pool_type
    }

    pub fn resource_type(&self) -> ResourceType {
        self.info.resource_type
    }

    pub fn status(&self) -> PoolStatus {
        self.state.lock().status
    }

    pub fn lock(&self) {
        self.state.lock().status = PoolStatus::Locked;
        info!("Locked pool {} on {}", self.info.name, self.cloud_account);
    }

    pub fn unlock(&self) {
        self.state.lock().status = PoolStatus::Unlocked;
        info!("Unlocked pool {} on {}", self.info.name, self.cloud_account);
    }

    /// A pool is in use while anything is allocated from it or a create is still in flight.
    pub fn in_use(&self) -> bool {
        let state = self.state.lock();
        !state.allocated_resources.is_empty() || state.pending_creates > 0
    }

    pub fn is_allocated(&self, resource_id: &str) -> bool {
        self.state.lock().allocated_resources.contains(resource_id)
    }

    pub fn is_free(&self, resource_id: &str) -> bool {
        self.state
            .lock()
            .free_resources
            .iter()
            .any(|r| r == resource_id)
    }

    pub fn knows(&self, resource_id: &str) -> bool {
        self.state.lock().all_resources.contains_key(resource_id)
    }

    /// The current bookkeeping for an allocated resource.
    pub fn allocated_resource(&self, resource_id: &str) -> Option<Resource> {
        let state = self.state.lock();
        if !state.allocated_resources.contains(resource_id) {
            return None;
        }
        state.all_resources.get(resource_id).cloned()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        PoolSnapshot {
            name: self.info.name.clone(),
            cloud_account: self.cloud_account.clone(),
            pool_type: self.info.pool_type,
            resource_type: self.info.resource_type,
            status: state.status,
            max_size: self.info.max_size,
            total: state.all_resources.len(),
            free: state.free_resources.len(),
            allocated: state.allocated_resources.len(),
            in_use: !state.allocated_resources.is_empty() || state.pending_creates > 0,
        }
    }

    /// Hands out a free resource that matches `request`, or creates one if the pool is dynamic.
    pub async fn allocate_resource(
        &self,
        request: &ResourceRequest,
    ) -> Result<Resource, ResMgrError> {
        if request.resource_type() != self.info.resource_type {
            return Err(ResMgrError::conflict(format!(
                "pool {} can't serve a {} request",
                self.info.name,
                request.resource_type()
            )));
        }

        let candidates: Vec<String> = {
            let state = self.state.lock();
            if state.status == PoolStatus::Locked {
                return Err(ResMgrError::unavailable(format!(
                    "pool {} is locked",
                    self.info.name
                )));
            }
            state.free_resources.iter().cloned().collect()
        };

        for resource_id in candidates {
            if !self
                .backend
                .matches(&*self.cal, &resource_id, request)
                .await?
            {
                continue;
            }

            let mut state = self.state.lock();
            if !state.take_free(&resource_id) {
                debug!("{resource_id} was taken while it was being matched, moving on");
                continue;
            }
            state.allocated_resources.insert(resource_id.clone());
            if let Some(resource) = state.all_resources.get_mut(&resource_id) {
                resource.request = request.as_compute().cloned();
                info!(
                    "Allocated {} {resource_id} from pool {}",
                    self.info.resource_type, self.info.name
                );
                return Ok(resource.clone());
            }
        }

        if self.info.pool_type == PoolType::Static {
            return Err(ResMgrError::unavailable(format!(
                "no free resource in static pool {} matches the request",
                self.info.name
            )));
        }

        self.create_resource(request).await
    }

    async fn create_resource(&self, request: &ResourceRequest) -> Result<Resource, ResMgrError> {
        {
            let mut state = self.state.lock();
            if state.all_resources.len() + state.pending_creates >= self.info.max_size {
                return Err(ResMgrError::unavailable(format!(
                    "pool {} is at its limit of {} resources",
                    self.info.name, self.info.max_size
                )));
            }
            state.pending_creates += 1;
        }

        let created = self.backend.create(&*self.cal, request).await;

        let mut state = self.state.lock();
        state.pending_creates -= 1;
        let resource_id = created?;

        let mut resource = Resource::new(resource_id.clone(), ResourceOrigin::Dynamic);
        resource.request = request.as_compute().cloned();
        state
            .all_resources
            .insert(resource_id.clone(), resource.clone());
        state.allocated_resources.insert(resource_id.clone());
        info!(
            "Created {} {resource_id} in pool {}",
            self.info.resource_type, self.info.name
        );

        Ok(resource)
    }

    /// Static resources go back on the free list, dynamic ones are deleted from the cloud.
    pub async fn release_resource(&self, resource_id: &str) -> Result<(), ResMgrError> {
        let origin = {
            let mut state = self.state.lock();
            let origin = state
                .all_resources
                .get(resource_id)
                .map(|r| r.origin)
                .ok_or_else(|| ResMgrError::not_found("resource", resource_id))?;
            if !state.allocated_resources.contains(resource_id) {
                return Err(ResMgrError::conflict(format!(
                    "resource {resource_id} is not allocated"
                )));
            }

            if origin == ResourceOrigin::Static {
                state.allocated_resources.remove(resource_id);
                if let Some(resource) = state.all_resources.get_mut(resource_id) {
                    resource.request = None;
                }
                state.free_resources.push_back(resource_id.to_owned());
                info!("Returned {resource_id} to pool {}", self.info.name);
                return Ok(());
            }
            origin
        };
        debug!("deleting {origin} resource {resource_id}");

        match self.backend.delete(&*self.cal, resource_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!("{resource_id} was already gone from {}", self.cloud_account)
            }
            Err(e) => {
                return Err(ResMgrError::operational(
                    format!("deleting {resource_id}"),
                    e,
                ))
            }
        }

        let mut state = self.state.lock();
        state.allocated_resources.remove(resource_id);
        state.all_resources.remove(resource_id);
        info!("Deleted {resource_id} from pool {}", self.info.name);

        Ok(())
    }

    /// Live info for a resource someone currently holds.
    pub async fn read_resource_info(&self, resource_id: &str) -> Result<ResourceInfo, ResMgrError> {
        let resource = {
            let state = self.state.lock();
            let resource = state
                .all_resources
                .get(resource_id)
                .ok_or_else(|| ResMgrError::not_found("resource", resource_id))?;
            if !state.allocated_resources.contains(resource_id) {
                return Err(ResMgrError::conflict(format!(
                    "resource {resource_id} is not allocated"
                )));
            }
            resource.clone()
        };

        self.get_resource_info(&resource).await
    }

    pub async fn get_resource_info(&self, resource: &Resource) -> Result<ResourceInfo, ResMgrError> {
        self.backend
            .resource_info(&*self.cal, &self.info.name, resource)
            .await
    }

    pub fn add_resource_id(&self, resource_id: &str) -> Result<(), ResMgrError> {
        let mut state = self.state.lock();
        if state.all_resources.contains_key(resource_id) {
            return Err(ResMgrError::conflict(format!(
                "{resource_id} is already in pool {}",
                self.info.name
            )));
        }
        if state.all_resources.len() + state.pending_creates >= self.info.max_size {
            return Err(ResMgrError::conflict(format!(
                "pool {} is full ({} resources)",
                self.info.name, self.info.max_size
            )));
        }

        state.all_resources.insert(
            resource_id.to_owned(),
            Resource::new(resource_id, ResourceOrigin::Static),
        );
        state.free_resources.push_back(resource_id.to_owned());
        debug!("added {resource_id} to pool {}", self.info.name);

        Ok(())
    }

    pub fn delete_resource_id(&self, resource_id: &str) -> Result<(), ResMgrError> {
        let mut state = self.state.lock();
        if state.allocated_resources.contains(resource_id) {
            return Err(ResMgrError::conflict(format!(
                "{resource_id} in pool {} is busy",
                self.info.name
            )));
        }
        if state.all_resources.remove(resource_id).is_none() {
            return Err(ResMgrError::not_found("resource", resource_id));
        }
        state.take_free(resource_id);
        debug!("removed {resource_id} from pool {}", self.info.name);

        Ok(())
    }

    pub async fn confirm_resource(&self, resource_id: &str) -> Result<(), ResMgrError> {
        self.backend
            .confirm(&*self.cal, resource_id)
            .await
            .map_err(|e| ResMgrError::from_cal(format!("confirming {resource_id}"), e))
    }

    /// Takes an existing, confirmed resource straight into `allocated`, bypassing matching and
    /// the pool lock. Used when rebuilding state after a restart. A resource someone already
    /// holds can't be adopted a second time.
    pub fn adopt_resource(
        &self,
        resource_id: &str,
        request: &ResourceRequest,
    ) -> Result<Resource, ResMgrError> {
        let mut state = self.state.lock();

        if state.allocated_resources.contains(resource_id) {
            return Err(ResMgrError::conflict(format!(
                "{resource_id} in pool {} is already allocated",
                self.info.name
            )));
        }

        let origin = if state.take_free(resource_id) || self.info.pool_type == PoolType::Static {
            ResourceOrigin::Static
        } else {
            ResourceOrigin::Dynamic
        };

        let resource = state
            .all_resources
            .entry(resource_id.to_owned())
            .or_insert_with(|| Resource::new(resource_id, origin));
        resource.origin = origin;
        resource.request = request.as_compute().cloned();
        let resource = resource.clone();
        state.allocated_resources.insert(resource_id.to_owned());
        info!("Adopted {origin} {resource_id} into pool {}", self.info.name);

        Ok(resource)
    }

    /// Attaches and detaches connection points on an allocated compute resource. The cached
    /// request follows the change so readiness reflects the new set.
    pub async fn modify_compute(
        &self,
        resource_id: &str,
        modify: &ComputeModifyRequest,
    ) -> Result<ResourceInfo, ResMgrError> {
        let resource = self
            .allocated_resource(resource_id)
            .ok_or_else(|| ResMgrError::not_found("allocated resource", resource_id))?;

        self.backend.modify(&*self.cal, &resource, modify).await?;

        let resource = {
            let mut state = self.state.lock();
            let Some(resource) = state.all_resources.get_mut(resource_id) else {
                return Err(ResMgrError::not_found("resource", resource_id));
            };
            if let Some(request) = resource.request.as_mut() {
                request
                    .connection_points
                    .retain(|cp| !modify.connection_points_remove.contains(&cp.name));
                request
                    .connection_points
                    .extend(modify.connection_points_add.iter().cloned());
            }
            resource.clone()
        };

        self.get_resource_info(&resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cal::mock::{MockCal, MockOp};
    use models::{VirtualLinkInfo, VirtualLinkRequest, VirtualLinkState};
    use pretty_assertions::assert_eq;

    fn link(id: &str) -> VirtualLinkInfo {
        VirtualLinkInfo {
            virtual_link_id: id.to_owned(),
            name: id.to_owned(),
            subnet: None,
            state: VirtualLinkState::Active,
            provider_network: None,
        }
    }

    fn network_pool(pool_type: PoolType, members: &[&str], max_size: usize) -> (ResourcePool, Arc<MockCal>) {
        let mock = Arc::new(MockCal::new("acct1"));
        for id in members {
            mock.add_virtual_link(link(id));
        }
        let info = ResourcePoolInfo::new("links", pool_type, ResourceType::Network, max_size)
            .with_resources(members.iter().copied());
        let pool = ResourcePool::new(info, "acct1", mock.clone(), Box::new(NetworkBackend)).unwrap();
        (pool, mock)
    }

    fn any_link() -> ResourceRequest {
        VirtualLinkRequest::default().into()
    }

    #[tokio::test]
    async fn test_static_pool_exhaustion() {
        let (pool, _) = network_pool(PoolType::Static, &["vl-1", "vl-2"], 2);

        pool.allocate_resource(&any_link()).await.unwrap();
        pool.allocate_resource(&any_link()).await.unwrap();
        let err = pool.allocate_resource(&any_link()).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_static_release_returns_to_free() {
        let (pool, mock) = network_pool(PoolType::Static, &["vl-1"], 4);

        let resource = pool.allocate_resource(&any_link()).await.unwrap();
        assert_eq!(resource.origin, ResourceOrigin::Static);
        assert!(!pool.is_free("vl-1"));

        pool.release_resource("vl-1").await.unwrap();
        assert!(pool.is_free("vl-1"));
        assert_eq!(mock.call_count(MockOp::DeleteLink), 0);

        let again = pool.allocate_resource(&any_link()).await.unwrap();
        assert_eq!(again.resource_id, "vl-1");
    }

    #[tokio::test]
    async fn test_dynamic_release_deletes() {
        let (pool, mock) = network_pool(PoolType::Dynamic, &[], 4);

        let resource = pool.allocate_resource(&any_link()).await.unwrap();
        assert_eq!(resource.origin, ResourceOrigin::Dynamic);
        assert_eq!(mock.link_count(), 1);

        pool.release_resource(&resource.resource_id).await.unwrap();
        assert_eq!(mock.link_count(), 0);
        assert!(!pool.knows(&resource.resource_id));
        assert!(pool
            .read_resource_info(&resource.resource_id)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_dynamic_pool_respects_max_size() {
        let (pool, _) = network_pool(PoolType::Dynamic, &[], 1);

        pool.allocate_resource(&any_link()).await.unwrap();
        assert!(pool.allocate_resource(&any_link()).await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_failed_create_frees_the_slot() {
        let (pool, mock) = network_pool(PoolType::Dynamic, &[], 1);
        mock.fail(MockOp::CreateLink);

        assert!(matches!(
            pool.allocate_resource(&any_link()).await,
            Err(ResMgrError::Operational { .. })
        ));
        mock.succeed(MockOp::CreateLink);
        pool.allocate_resource(&any_link()).await.unwrap();
    }

    #[tokio::test]
    async fn test_locked_pool_blocks_new_allocations_only() {
        let (pool, _) = network_pool(PoolType::Static, &["vl-1", "vl-2"], 2);
        pool.allocate_resource(&any_link()).await.unwrap();

        pool.lock();
        assert!(pool.allocate_resource(&any_link()).await.unwrap_err().is_unavailable());
        assert!(pool.in_use());
        pool.read_resource_info("vl-1").await.unwrap();

        pool.unlock();
        pool.allocate_resource(&any_link()).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_of_free_resource_is_refused() {
        let (pool, _) = network_pool(PoolType::Static, &["vl-1"], 2);
        assert!(matches!(
            pool.read_resource_info("vl-1").await,
            Err(ResMgrError::Conflict(_))
        ));
        assert!(pool.read_resource_info("vl-9").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_membership_edits() {
        let (pool, _) = network_pool(PoolType::Static, &["vl-1"], 2);

        assert!(matches!(
            pool.add_resource_id("vl-1"),
            Err(ResMgrError::Conflict(_))
        ));
        pool.add_resource_id("vl-2").unwrap();
        assert!(matches!(
            pool.add_resource_id("vl-3"),
            Err(ResMgrError::Conflict(_))
        ));

        let taken = pool.allocate_resource(&any_link()).await.unwrap();
        assert!(matches!(
            pool.delete_resource_id(&taken.resource_id),
            Err(ResMgrError::Conflict(_))
        ));
        pool.delete_resource_id("vl-2").unwrap();
        assert!(pool.delete_resource_id("vl-2").unwrap_err().is_not_found());
        assert_eq!(pool.snapshot().total, 1);
    }

    #[tokio::test]
    async fn test_adopt_free_static_member() {
        let (pool, _) = network_pool(PoolType::Dynamic, &["vl-1"], 4);

        let adopted = pool.adopt_resource("vl-1", &any_link()).unwrap();
        assert_eq!(adopted.origin, ResourceOrigin::Static);
        assert!(pool.is_allocated("vl-1"));
        assert!(!pool.is_free("vl-1"));

        let unknown = pool.adopt_resource("vl-7", &any_link()).unwrap();
        assert_eq!(unknown.origin, ResourceOrigin::Dynamic);
        assert_eq!(pool.snapshot().allocated, 2);
    }

    #[tokio::test]
    async fn test_allocated_resource_cannot_be_adopted_again() {
        let (pool, _) = network_pool(PoolType::Static, &["vl-1"], 4);
        let held = pool.allocate_resource(&any_link()).await.unwrap();

        assert!(matches!(
            pool.adopt_resource(&held.resource_id, &any_link()),
            Err(ResMgrError::Conflict(_))
        ));
        assert_eq!(pool.snapshot().allocated, 1);
    }

    #[test]
    fn test_backend_must_match_pool_type() {
        let mock: Arc<dyn CloudAdapter> = Arc::new(MockCal::new("acct1"));
        let info = ResourcePoolInfo::new("vms", PoolType::Dynamic, ResourceType::Compute, 4);
        assert!(ResourcePool::new(info, "acct1", mock, Box::new(NetworkBackend)).is_err());
    }
}
