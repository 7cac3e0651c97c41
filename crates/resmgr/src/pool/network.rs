use async_trait::async_trait;
use cal::{CalError, CloudAdapter};
use models::{
    NetworkResourceInfo, ResourceInfo, ResourceRequest, ResourceType, VirtualLinkParams,
    VirtualLinkRequest,
};
use tracing::debug;

use super::{PoolBackend, Resource};
use crate::{matcher::match_virtual_link, ResMgrError};

pub struct NetworkBackend;

impl NetworkBackend {
    fn request(request: &ResourceRequest) -> Result<&VirtualLinkRequest, ResMgrError> {
        request.as_network().ok_or_else(|| {
            ResMgrError::conflict(format!(
                "network pool can't serve a {} request",
                request.resource_type()
            ))
        })
    }
}

#[async_trait]
impl PoolBackend for NetworkBackend {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Network
    }

    async fn matches(
        &self,
        cal: &dyn CloudAdapter,
        resource_id: &str,
        request: &ResourceRequest,
    ) -> Result<bool, ResMgrError> {
        let request = Self::request(request)?;

        match cal.get_virtual_link(resource_id).await {
            Ok(link) => Ok(match_virtual_link(request, &link)),
            Err(e) if e.is_not_found() => {
                debug!("static member {resource_id} is missing from the cloud");
                Ok(false)
            }
            Err(e) => Err(ResMgrError::operational(format!("reading {resource_id}"), e)),
        }
    }

    async fn create(
        &self,
        cal: &dyn CloudAdapter,
        request: &ResourceRequest,
    ) -> Result<String, ResMgrError> {
        let request = Self::request(request)?;
        let params = VirtualLinkParams {
            name: request
                .name
                .clone()
                .unwrap_or_else(|| format!("vl-{}", uuid::Uuid::new_v4().simple())),
            subnet: request.subnet.clone(),
            provider_network: request.provider_network.clone(),
        };

        cal.create_virtual_link(&params)
            .await
            .map_err(|e| ResMgrError::operational(format!("creating virtual link {}", params.name), e))
    }

    async fn delete(&self, cal: &dyn CloudAdapter, resource_id: &str) -> Result<(), CalError> {
        cal.delete_virtual_link(resource_id).await
    }

    async fn confirm(&self, cal: &dyn CloudAdapter, resource_id: &str) -> Result<(), CalError> {
        cal.get_virtual_link(resource_id).await.map(|_| ())
    }

    async fn resource_info(
        &self,
        cal: &dyn CloudAdapter,
        pool_name: &str,
        resource: &Resource,
    ) -> Result<ResourceInfo, ResMgrError> {
        let link = cal
            .get_virtual_link(&resource.resource_id)
            .await
            .map_err(|e| ResMgrError::from_cal(format!("reading {}", resource.resource_id), e))?;

        Ok(ResourceInfo::Network(NetworkResourceInfo {
            resource_state: link.state.resource_state(),
            link,
            pool_name: pool_name.to_owned(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cal::mock::MockCal;
    use models::{OverlayType, ProviderNetwork, ResourceState};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_tags_the_link() {
        let mock = MockCal::new("acct1");
        let request = ResourceRequest::Network(VirtualLinkRequest {
            name: None,
            subnet: Some("10.1.0.0/24".to_owned()),
            provider_network: Some(ProviderNetwork {
                physical_network: Some("physnet1".to_owned()),
                overlay_type: Some(OverlayType::Vlan),
                segmentation_id: Some(42),
            }),
        });

        let id = NetworkBackend.create(&mock, &request).await.unwrap();
        assert!(NetworkBackend.matches(&mock, &id, &request).await.unwrap());

        let resource = Resource::new(id, models::ResourceOrigin::Dynamic);
        let info = NetworkBackend
            .resource_info(&mock, "links", &resource)
            .await
            .unwrap();
        assert_eq!(info.resource_state(), ResourceState::Active);
        assert_eq!(info.pool_name(), "links");
        let ResourceInfo::Network(info) = info else {
            panic!("expected network info");
        };
        assert!(info.link.name.starts_with("vl-"));
        assert_eq!(
            info.link.provider_network.and_then(|p| p.segmentation_id),
            Some(42)
        );
    }

    #[tokio::test]
    async fn test_compute_request_is_refused() {
        let mock = MockCal::new("acct1");
        let request: ResourceRequest = models::VduRequest::default().into();
        assert!(matches!(
            NetworkBackend.create(&mock, &request).await,
            Err(ResMgrError::Conflict(_))
        ));
    }
}
