use std::sync::Arc;

use async_trait::async_trait;
use cal::{CalError, CloudAdapter};
use models::{
    ComputeModifyRequest, ComputeResourceInfo, ResourceInfo, ResourceRequest, ResourceType,
    VduInitParams, VduModifyParams, VduRequest,
};
use tracing::{debug, info};

use super::{PoolBackend, Resource};
use crate::{
    matcher::match_epa,
    readiness::{derive_resource_state, resource_state_from_vdu},
    ResMgrError,
};

/// Compute bindings. Flavor selection is serialized per cloud account through `flavor_lock`,
/// which every compute pool of the account shares.
pub struct ComputeBackend {
    flavor_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ComputeBackend {
    pub fn new(flavor_lock: Arc<tokio::sync::Mutex<()>>) -> Self {
        Self { flavor_lock }
    }

    fn request(request: &ResourceRequest) -> Result<&VduRequest, ResMgrError> {
        request.as_compute().ok_or_else(|| {
            ResMgrError::conflict(format!(
                "compute pool can't serve a {} request",
                request.resource_type()
            ))
        })
    }

    /// Picks an existing flavor matching the request, creating one if none does.
    async fn select_flavor(
        &self,
        cal: &dyn CloudAdapter,
        request: &VduRequest,
    ) -> Result<String, ResMgrError> {
        let _lock = self.flavor_lock.lock().await;

        let flavors = cal
            .get_flavor_list()
            .await
            .map_err(|e| ResMgrError::operational("listing flavors", e))?;
        if let Some(flavor) = flavors.iter().find(|f| match_epa(&request.epa, &f.epa)) {
            debug!("using flavor {} for {}", flavor.id, request.name);
            return Ok(flavor.id.clone());
        }

        let name = format!("{}-{}", request.name, uuid::Uuid::new_v4().simple());
        let flavor_id = cal
            .create_flavor(&name, &request.epa.normalized())
            .await
            .map_err(|e| {
                ResMgrError::unavailable(format!(
                    "no flavor on {} matches {} and one couldn't be created: {e}",
                    cal.account_name(),
                    request.name
                ))
            })?;
        info!("Created flavor {name} ({flavor_id}) on {}", cal.account_name());

        Ok(flavor_id)
    }

    async fn resolve_image(
        &self,
        cal: &dyn CloudAdapter,
        request: &VduRequest,
    ) -> Result<Option<String>, ResMgrError> {
        if let Some(image_id) = &request.image_id {
            return Ok(Some(image_id.clone()));
        }
        let Some(name) = &request.image_name else {
            return Ok(None);
        };

        cal.get_image_id_from_image_info(name, request.image_checksum.as_deref())
            .await
            .map(Some)
            .map_err(|e| ResMgrError::operational(format!("resolving image {name}"), e))
    }
}

#[async_trait]
impl PoolBackend for ComputeBackend {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Compute
    }

    async fn matches(
        &self,
        cal: &dyn CloudAdapter,
        resource_id: &str,
        request: &ResourceRequest,
    ) -> Result<bool, ResMgrError> {
        let request = Self::request(request)?;

        let vdu = match cal.get_vdu(resource_id).await {
            Ok(vdu) => vdu,
            Err(e) if e.is_not_found() => {
                debug!("static member {resource_id} is missing from the cloud");
                return Ok(false);
            }
            Err(e) => return Err(ResMgrError::operational(format!("reading {resource_id}"), e)),
        };

        if let Some(image_id) = &request.image_id {
            if vdu.image_id.as_ref() != Some(image_id) {
                return Ok(false);
            }
        }

        let Some(flavor_id) = vdu.flavor_id else {
            return Ok(false);
        };
        let flavors = cal
            .get_flavor_list()
            .await
            .map_err(|e| ResMgrError::operational("listing flavors", e))?;

        Ok(flavors
            .iter()
            .find(|f| f.id == flavor_id)
            .is_some_and(|f| match_epa(&request.epa, &f.epa)))
    }

    async fn create(
        &self,
        cal: &dyn CloudAdapter,
        request: &ResourceRequest,
    ) -> Result<String, ResMgrError> {
        let request = Self::request(request)?;

        let flavor_id = self.select_flavor(cal, request).await?;
        let image_id = self.resolve_image(cal, request).await?;
        let params = VduInitParams::from_request(request, flavor_id, image_id);

        cal.create_vdu(&params)
            .await
            .map_err(|e| ResMgrError::operational(format!("creating vdu {}", request.name), e))
    }

    async fn delete(&self, cal: &dyn CloudAdapter, resource_id: &str) -> Result<(), CalError> {
        cal.delete_vdu(resource_id).await
    }

    async fn confirm(&self, cal: &dyn CloudAdapter, resource_id: &str) -> Result<(), CalError> {
        cal.get_vdu(resource_id).await.map(|_| ())
    }

    async fn resource_info(
        &self,
        cal: &dyn CloudAdapter,
        pool_name: &str,
        resource: &Resource,
    ) -> Result<ResourceInfo, ResMgrError> {
        let vdu = cal
            .get_vdu(&resource.resource_id)
            .await
            .map_err(|e| ResMgrError::from_cal(format!("reading {}", resource.resource_id), e))?;

        let resource_state = match &resource.request {
            Some(request) => derive_resource_state(&vdu, request),
            None => resource_state_from_vdu(vdu.state),
        };

        Ok(ResourceInfo::Compute(ComputeResourceInfo {
            vdu,
            pool_name: pool_name.to_owned(),
            resource_state,
        }))
    }

    async fn modify(
        &self,
        cal: &dyn CloudAdapter,
        resource: &Resource,
        modify: &ComputeModifyRequest,
    ) -> Result<(), ResMgrError> {
        let vdu = cal
            .get_vdu(&resource.resource_id)
            .await
            .map_err(|e| ResMgrError::from_cal(format!("reading {}", resource.resource_id), e))?;

        let mut remove = Vec::with_capacity(modify.connection_points_remove.len());
        for name in &modify.connection_points_remove {
            let cp = vdu
                .connection_points
                .iter()
                .find(|cp| &cp.name == name)
                .ok_or_else(|| ResMgrError::not_found("connection point", name))?;
            remove.push(cp.connection_point_id.clone());
        }

        cal.modify_vdu(&VduModifyParams {
            vdu_id: resource.resource_id.clone(),
            connection_points_add: modify.connection_points_add.clone(),
            connection_points_remove: remove,
        })
        .await
        .map_err(|e| ResMgrError::operational(format!("modifying {}", resource.resource_id), e))
    }
}
