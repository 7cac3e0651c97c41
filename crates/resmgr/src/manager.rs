//! The resource manager: cloud accounts, their pools and the event registry.

use std::{collections::BTreeMap, sync::Arc};

use cal::{AdapterFactory, CloudAdapter};
use config::{CloudAccountConfig, ResourceManagerConfig};
use itertools::Itertools;
use models::{
    CloudAccount, ComputeModifyRequest, PoolSnapshot, PoolType, ResourceInfo, ResourceOrigin,
    ResourcePoolInfo, ResourceRequest, ResourceType, ResourceUpdate,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::{
    monitor::spawn_monitor,
    pool::{ComputeBackend, NetworkBackend, PoolBackend, Resource, ResourcePool},
    registry::{EventRecord, EventRegistry},
    ResMgrError,
};

struct AccountEntry {
    account: CloudAccount,
    cal: Arc<dyn CloudAdapter>,
    /// Serializes flavor selection across the account's compute pools
    flavor_lock: Arc<tokio::sync::Mutex<()>>,
    pools: RwLock<BTreeMap<String, Arc<ResourcePool>>>,
}

impl AccountEntry {
    fn pool(&self, name: &str) -> Result<Arc<ResourcePool>, ResMgrError> {
        self.pools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ResMgrError::not_found("resource pool", name))
    }

    fn build_pool(&self, info: ResourcePoolInfo) -> Result<ResourcePool, ResMgrError> {
        let backend: Box<dyn PoolBackend> = match info.resource_type {
            ResourceType::Compute => Box::new(ComputeBackend::new(self.flavor_lock.clone())),
            ResourceType::Network => Box::new(NetworkBackend),
        };
        ResourcePool::new(info, self.account.name.clone(), self.cal.clone(), backend)
    }

    fn insert_pool(&self, info: ResourcePoolInfo) -> Result<(), ResMgrError> {
        let name = info.name.clone();
        if self.pools.read().contains_key(&name) {
            return Err(ResMgrError::conflict(format!(
                "pool {name} already exists on {}",
                self.account.name
            )));
        }

        let pool = Arc::new(self.build_pool(info)?);

        let mut pools = self.pools.write();
        if pools.contains_key(&name) {
            return Err(ResMgrError::conflict(format!(
                "pool {name} already exists on {}",
                self.account.name
            )));
        }
        pools.insert(name, pool);
        Ok(())
    }

    /// Unlocked pools of `resource_type`, static pools first, then by name.
    fn allocation_candidates(&self, resource_type: ResourceType) -> Vec<Arc<ResourcePool>> {
        self.pools
            .read()
            .values()
            .filter(|p| p.resource_type() == resource_type)
            .filter(|p| p.status() == models::PoolStatus::Unlocked)
            .sorted_by_key(|p| (p.pool_type() != PoolType::Static, p.name().to_owned()))
            .cloned()
            .collect()
    }
}

pub struct ResourceMgrCore {
    config: ResourceManagerConfig,
    factory: Arc<dyn AdapterFactory>,
    accounts: RwLock<BTreeMap<String, Arc<AccountEntry>>>,
    registry: Mutex<EventRegistry>,
    updates: UnboundedSender<ResourceUpdate>,
}

impl ResourceMgrCore {
    /// Returns the core along with the receiving end of its readiness updates.
    pub fn new(
        config: ResourceManagerConfig,
        factory: Arc<dyn AdapterFactory>,
    ) -> (Self, UnboundedReceiver<ResourceUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                factory,
                accounts: RwLock::new(BTreeMap::new()),
                registry: Mutex::new(EventRegistry::default()),
                updates,
            },
            rx,
        )
    }

    fn account(&self, name: &str) -> Result<Arc<AccountEntry>, ResMgrError> {
        self.accounts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ResMgrError::not_found("cloud account", name))
    }

    fn pool(&self, account: &str, pool: &str) -> Result<Arc<ResourcePool>, ResMgrError> {
        self.account(account)?.pool(pool)
    }

    pub fn cloud_account_names(&self) -> Vec<String> {
        self.accounts.read().keys().cloned().collect()
    }

    /// Registers an account and seeds its two unlocked dynamic pools.
    pub fn add_cloud_account(&self, account: CloudAccount) -> Result<(), ResMgrError> {
        if self.accounts.read().contains_key(&account.name) {
            return Err(ResMgrError::conflict(format!(
                "cloud account {} already exists",
                account.name
            )));
        }

        let cal = self.factory.create(&account).map_err(|e| {
            ResMgrError::operational(format!("creating adapter for {}", account.name), e)
        })?;

        let entry = AccountEntry {
            cal,
            flavor_lock: Arc::new(tokio::sync::Mutex::new(())),
            pools: RwLock::new(BTreeMap::new()),
            account,
        };
        for resource_type in [ResourceType::Compute, ResourceType::Network] {
            entry.insert_pool(ResourcePoolInfo::default_for_account(
                &entry.account.name,
                resource_type,
                self.config.default_pool_size,
            ))?;
        }

        let mut accounts = self.accounts.write();
        if accounts.contains_key(&entry.account.name) {
            return Err(ResMgrError::conflict(format!(
                "cloud account {} already exists",
                entry.account.name
            )));
        }
        info!(
            "Added {} cloud account {}",
            entry.account.account_type, entry.account.name
        );
        accounts.insert(entry.account.name.clone(), Arc::new(entry));

        Ok(())
    }

    /// Adds an account and then every pool configured for it.
    pub fn configure_cloud_account(&self, config: &CloudAccountConfig) -> Result<(), ResMgrError> {
        self.add_cloud_account(config.account())?;
        for pool in &config.pools {
            self.add_resource_pool(&config.name, pool.clone())?;
        }
        Ok(())
    }

    /// With `dry_run` only checks that the account could be deleted.
    pub fn delete_cloud_account(&self, name: &str, dry_run: bool) -> Result<(), ResMgrError> {
        let mut accounts = self.accounts.write();
        let entry = accounts
            .get(name)
            .ok_or_else(|| ResMgrError::not_found("cloud account", name))?;

        let busy: Vec<String> = entry
            .pools
            .read()
            .values()
            .filter(|p| p.in_use())
            .map(|p| p.name().to_owned())
            .collect();
        if !busy.is_empty() {
            return Err(ResMgrError::conflict(format!(
                "cloud account {name} has pools in use: {}",
                busy.join(", ")
            )));
        }
        if dry_run {
            debug!("cloud account {name} can be deleted");
            return Ok(());
        }

        entry.pools.write().clear();
        accounts.remove(name);
        info!("Deleted cloud account {name}");

        Ok(())
    }

    pub fn add_resource_pool(&self, account: &str, info: ResourcePoolInfo) -> Result<(), ResMgrError> {
        let entry = self.account(account)?;
        let name = info.name.clone();
        entry.insert_pool(info)?;
        info!("Added pool {name} to {account}");
        Ok(())
    }

    /// Deleting an unknown or busy pool is a no-op. Returns whether the pool was removed.
    pub fn delete_resource_pool(&self, account: &str, pool: &str) -> bool {
        let Ok(entry) = self.account(account) else {
            warn!("Can't delete pool {pool}: cloud account {account} doesn't exist");
            return false;
        };

        let mut pools = entry.pools.write();
        match pools.get(pool) {
            None => {
                warn!("Can't delete pool {pool} on {account}: no such pool");
                false
            }
            Some(p) if p.in_use() => {
                warn!("Not deleting pool {pool} on {account}: it is still in use");
                false
            }
            Some(_) => {
                pools.remove(pool);
                info!("Deleted pool {pool} from {account}");
                true
            }
        }
    }

    pub fn lock_resource_pool(&self, account: &str, pool: &str) -> Result<(), ResMgrError> {
        self.pool(account, pool)?.lock();
        Ok(())
    }

    pub fn unlock_resource_pool(&self, account: &str, pool: &str) -> Result<(), ResMgrError> {
        self.pool(account, pool)?.unlock();
        Ok(())
    }

    pub fn add_resource(&self, account: &str, pool: &str, resource_id: &str) -> Result<(), ResMgrError> {
        self.pool(account, pool)?.add_resource_id(resource_id)
    }

    pub fn delete_resource(
        &self,
        account: &str,
        pool: &str,
        resource_id: &str,
    ) -> Result<(), ResMgrError> {
        self.pool(account, pool)?.delete_resource_id(resource_id)
    }

    pub fn pool_status(&self, account: &str, pool: &str) -> Result<PoolSnapshot, ResMgrError> {
        Ok(self.pool(account, pool)?.snapshot())
    }

    pub fn list_pools(&self, account: &str) -> Result<Vec<PoolSnapshot>, ResMgrError> {
        Ok(self
            .account(account)?
            .pools
            .read()
            .values()
            .map(|p| p.snapshot())
            .collect())
    }

    pub fn event_record(&self, event_id: &str) -> Option<EventRecord> {
        self.registry.lock().get(event_id).cloned()
    }

    pub fn event_count(&self) -> usize {
        self.registry.lock().len()
    }

    fn record_for(
        &self,
        event_id: &str,
        resource_type: ResourceType,
    ) -> Result<EventRecord, ResMgrError> {
        let record = self
            .event_record(event_id)
            .ok_or_else(|| ResMgrError::not_found("event", event_id))?;
        if record.resource_type != resource_type {
            return Err(ResMgrError::conflict(format!(
                "event {event_id} holds a {} resource, not {resource_type}",
                record.resource_type
            )));
        }
        Ok(record)
    }

    /// Live info for the resource an already known event id is bound to.
    async fn existing_allocation(
        &self,
        record: EventRecord,
        resource_type: ResourceType,
    ) -> Result<ResourceInfo, ResMgrError> {
        if record.resource_type != resource_type {
            return Err(ResMgrError::conflict(format!(
                "duplicate event id {}: bound to a {} resource, requested {resource_type}",
                record.event_id, record.resource_type
            )));
        }
        debug!(
            "event {} already holds {}, returning it",
            record.event_id, record.resource_id
        );
        self.pool(&record.cloud_account, &record.pool_name)?
            .read_resource_info(&record.resource_id)
            .await
    }

    /// Binds `resource` to the event. If another allocation for the same event id won the
    /// race, the new resource is released again and the winner is returned instead.
    async fn bind_event(
        &self,
        event_id: &str,
        account: &str,
        pool: &Arc<ResourcePool>,
        resource: &Resource,
        resource_type: ResourceType,
    ) -> Result<Option<ResourceInfo>, ResMgrError> {
        let record = EventRecord::new(
            event_id,
            resource.resource_id.clone(),
            account,
            pool.name(),
            resource_type,
        );
        let inserted = self.registry.lock().insert(record);

        match inserted {
            Ok(()) => Ok(None),
            Err(existing) => {
                warn!(
                    "event {event_id} was bound to {} concurrently, releasing {}",
                    existing.resource_id, resource.resource_id
                );
                pool.release_resource(&resource.resource_id).await?;
                self.existing_allocation(existing, resource_type)
                    .await
                    .map(Some)
            }
        }
    }

    /// Allocates one resource for `event_id` on `account`. Repeated calls with the same event id
    /// return the resource bound by the first.
    pub async fn allocate_virtual_resource(
        &self,
        event_id: &str,
        account: &str,
        request: ResourceRequest,
    ) -> Result<ResourceInfo, ResMgrError> {
        let resource_type = request.resource_type();
        if let Some(record) = self.event_record(event_id) {
            return self.existing_allocation(record, resource_type).await;
        }

        let entry = self.account(account)?;
        let candidates = entry.allocation_candidates(resource_type);
        if candidates.is_empty() {
            return Err(ResMgrError::unavailable(format!(
                "no unlocked {resource_type} pool on {account}"
            )));
        }

        let mut last_err = None;
        let mut allocated = None;
        for pool in candidates {
            match pool.allocate_resource(&request).await {
                Ok(resource) => {
                    allocated = Some((pool, resource));
                    break;
                }
                Err(e @ ResMgrError::Unavailable(_)) => {
                    debug!("pool {} couldn't serve event {event_id}: {e}", pool.name());
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        let Some((pool, resource)) = allocated else {
            return Err(last_err.unwrap_or_else(|| {
                ResMgrError::unavailable(format!("no {resource_type} pool on {account} fits"))
            }));
        };

        if let Some(existing) = self
            .bind_event(event_id, account, &pool, &resource, resource_type)
            .await?
        {
            return Ok(existing);
        }
        info!(
            "Event {event_id} allocated {resource_type} {} from {}/{}",
            resource.resource_id,
            account,
            pool.name()
        );

        let info = pool.get_resource_info(&resource).await?;
        if resource_type == ResourceType::Compute
            && resource.origin == ResourceOrigin::Dynamic
            && !info.resource_state().is_terminal()
        {
            spawn_monitor(
                pool.clone(),
                event_id.to_owned(),
                resource.resource_id.clone(),
                self.config.monitor,
                self.updates.clone(),
            );
        }

        Ok(info)
    }

    /// Rebuilds the binding for `event_id` from a resource that was allocated before a restart.
    ///
    /// The prior resource is adopted only if the cloud confirms it exists; if the cloud reports
    /// it gone a fresh allocation is made. Any other failure to confirm is returned as is, and a
    /// resource already bound to another event is a `Conflict`.
    pub async fn reallocate_virtual_resource(
        &self,
        event_id: &str,
        account: &str,
        request: ResourceRequest,
        prior_resource_id: &str,
    ) -> Result<ResourceInfo, ResMgrError> {
        let resource_type = request.resource_type();
        if let Some(record) = self.event_record(event_id) {
            return self.existing_allocation(record, resource_type).await;
        }

        let entry = self.account(account)?;
        let pool = {
            let pools = entry.pools.read();
            let of_type: Vec<&Arc<ResourcePool>> = pools
                .values()
                .filter(|p| p.resource_type() == resource_type)
                .collect();
            let default_pool =
                ResourcePoolInfo::default_for_account(account, resource_type, 0).name;

            let chosen = of_type
                .iter()
                .find(|p| p.knows(prior_resource_id))
                .or_else(|| of_type.iter().find(|p| p.name() == default_pool))
                .or_else(|| of_type.first())
                .map(|p| Arc::clone(p));
            chosen
        };
        let Some(pool) = pool else {
            return Err(ResMgrError::unavailable(format!(
                "no {resource_type} pool on {account}"
            )));
        };

        match pool.confirm_resource(prior_resource_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!("{prior_resource_id} for event {event_id} is gone, allocating a new one");
                return self
                    .allocate_virtual_resource(event_id, account, request)
                    .await;
            }
            Err(e) => return Err(e),
        }

        let resource = match pool.adopt_resource(prior_resource_id, &request) {
            Ok(resource) => resource,
            Err(e @ ResMgrError::Conflict(_)) => {
                // a concurrent reallocation for this event may have adopted it first
                return match self.event_record(event_id) {
                    Some(record) => self.existing_allocation(record, resource_type).await,
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        };
        if let Some(existing) = self
            .bind_event(event_id, account, &pool, &resource, resource_type)
            .await?
        {
            return Ok(existing);
        }
        info!(
            "Event {event_id} re-bound to {prior_resource_id} in {account}/{}",
            pool.name()
        );

        pool.get_resource_info(&resource).await
    }

    pub async fn release_virtual_resource(
        &self,
        event_id: &str,
        resource_type: ResourceType,
    ) -> Result<(), ResMgrError> {
        let record = {
            let mut registry = self.registry.lock();
            let record = registry
                .remove(event_id)
                .ok_or_else(|| ResMgrError::not_found("event", event_id))?;
            if record.resource_type != resource_type {
                let held = record.resource_type;
                registry.restore(record);
                return Err(ResMgrError::conflict(format!(
                    "event {event_id} holds a {held} resource, not {resource_type}"
                )));
            }
            record
        };

        let pool = self.pool(&record.cloud_account, &record.pool_name)?;
        match pool.release_resource(&record.resource_id).await {
            Ok(()) => {
                info!("Event {event_id} released {}", record.resource_id);
                Ok(())
            }
            Err(e @ ResMgrError::Operational { .. }) => {
                warn!("Failed to release {} for event {event_id}: {e}", record.resource_id);
                self.registry.lock().restore(record);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn read_virtual_resource(
        &self,
        event_id: &str,
        resource_type: ResourceType,
    ) -> Result<ResourceInfo, ResMgrError> {
        let record = self.record_for(event_id, resource_type)?;
        self.pool(&record.cloud_account, &record.pool_name)?
            .read_resource_info(&record.resource_id)
            .await
    }

    /// Attaches and detaches connection points on the compute resource bound to `event_id`.
    /// A failure part way through is not rolled back.
    pub async fn modify_virtual_compute(
        &self,
        event_id: &str,
        modify: &ComputeModifyRequest,
    ) -> Result<ResourceInfo, ResMgrError> {
        let record = self.record_for(event_id, ResourceType::Compute)?;
        self.pool(&record.cloud_account, &record.pool_name)?
            .modify_compute(&record.resource_id, modify)
            .await
    }
}
