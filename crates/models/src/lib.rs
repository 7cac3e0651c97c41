//! Data model shared by the resource manager, the cloud adapters and the configuration layer.

pub mod account;
pub mod compute;
pub mod epa;
pub mod network;
pub mod pool;

pub use account::{AccountType, CloudAccount, ImageInfo};
pub use compute::{
    ComputeModifyRequest, ComputeResourceInfo, ConnectionPointInfo, ConnectionPointRequest,
    ConnectionPointState, Flavor, VduInfo, VduInitParams, VduModifyParams, VduRequest, VduState,
};
pub use epa::EpaAttributes;
pub use network::{
    NetworkResourceInfo, OverlayType, ProviderNetwork, VirtualLinkInfo, VirtualLinkParams,
    VirtualLinkRequest, VirtualLinkState,
};
pub use pool::{
    PoolSnapshot, PoolStatus, PoolType, ResourceOrigin, ResourcePoolInfo, DEFAULT_POOL_SIZE,
};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceType {
    Compute,
    Network,
}

/// Derived readiness of an allocated resource.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceState {
    Pending,
    Active,
    Failed,
}

impl ResourceState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResourceState::Pending)
    }
}

/// A request for one resource, tagged by resource type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(tag = "resource_type", rename_all = "lowercase")]
pub enum ResourceRequest {
    Compute(VduRequest),
    Network(VirtualLinkRequest),
}

impl ResourceRequest {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceRequest::Compute(_) => ResourceType::Compute,
            ResourceRequest::Network(_) => ResourceType::Network,
        }
    }

    pub fn as_compute(&self) -> Option<&VduRequest> {
        match self {
            ResourceRequest::Compute(r) => Some(r),
            ResourceRequest::Network(_) => None,
        }
    }

    pub fn as_network(&self) -> Option<&VirtualLinkRequest> {
        match self {
            ResourceRequest::Network(r) => Some(r),
            ResourceRequest::Compute(_) => None,
        }
    }
}

impl From<VduRequest> for ResourceRequest {
    fn from(value: VduRequest) -> Self {
        ResourceRequest::Compute(value)
    }
}

impl From<VirtualLinkRequest> for ResourceRequest {
    fn from(value: VirtualLinkRequest) -> Self {
        ResourceRequest::Network(value)
    }
}

/// Live information about an allocated resource, annotated by its pool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(tag = "resource_type", rename_all = "lowercase")]
pub enum ResourceInfo {
    Compute(ComputeResourceInfo),
    Network(NetworkResourceInfo),
}

impl ResourceInfo {
    pub fn resource_id(&self) -> &str {
        match self {
            ResourceInfo::Compute(c) => &c.vdu.vdu_id,
            ResourceInfo::Network(n) => &n.link.virtual_link_id,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceInfo::Compute(_) => ResourceType::Compute,
            ResourceInfo::Network(_) => ResourceType::Network,
        }
    }

    pub fn resource_state(&self) -> ResourceState {
        match self {
            ResourceInfo::Compute(c) => c.resource_state,
            ResourceInfo::Network(n) => n.resource_state,
        }
    }

    pub fn pool_name(&self) -> &str {
        match self {
            ResourceInfo::Compute(c) => &c.pool_name,
            ResourceInfo::Network(n) => &n.pool_name,
        }
    }
}

/// Outcome of asynchronous readiness tracking, published once per allocation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResourceUpdate {
    pub event_id: String,
    pub resource_id: String,
    pub resource_state: ResourceState,
    /// Last observed info, absent when polling gave up without a usable sample
    pub info: Option<ResourceInfo>,
    pub published_at: DateTime<Utc>,
}
