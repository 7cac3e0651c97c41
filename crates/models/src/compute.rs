use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{epa::EpaAttributes, ResourceState};

/// A connection point asked for on a compute request, attached to an existing virtual link.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct ConnectionPointRequest {
    pub name: String,
    pub virtual_link_id: String,
    #[serde(default)]
    pub port_security_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_ip_address: Option<String>,
}

/// Compute (VDU) request parameters.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub struct VduRequest {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(flatten)]
    pub epa: EpaAttributes,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_points: Vec<ConnectionPointRequest>,

    #[serde(default)]
    pub allocate_public_address: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mgmt_network: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl VduRequest {
    pub fn new(name: impl Into<String>, epa: EpaAttributes) -> Self {
        Self {
            name: name.into(),
            epa,
            ..Default::default()
        }
    }
}

/// A flavor as advertised by a cloud account.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub struct Flavor {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub epa: EpaAttributes,
}

#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Hash,
    Eq,
    PartialEq,
    Default,
    EnumString,
    Display,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VduState {
    #[default]
    Init,
    Active,
    Inactive,
    Failed,
    Unknown,
}

#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Hash,
    Eq,
    PartialEq,
    Default,
    EnumString,
    Display,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionPointState {
    #[default]
    Inactive,
    Active,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct ConnectionPointInfo {
    pub name: String,
    pub connection_point_id: String,
    pub virtual_link_id: String,
    pub state: ConnectionPointState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Live VDU information as reported by the cloud account.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub struct VduInfo {
    pub vdu_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub state: VduState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_points: Vec<ConnectionPointInfo>,
}

/// What a cloud account needs to boot an instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct VduInitParams {
    pub name: String,
    pub flavor_id: String,
    pub image_id: Option<String>,
    pub connection_points: Vec<ConnectionPointRequest>,
    pub allocate_public_address: bool,
    pub mgmt_network: Option<String>,
    pub node_id: Option<String>,
}

impl VduInitParams {
    pub fn from_request(request: &VduRequest, flavor_id: String, image_id: Option<String>) -> Self {
        Self {
            name: request.name.clone(),
            flavor_id,
            image_id,
            connection_points: request.connection_points.clone(),
            allocate_public_address: request.allocate_public_address,
            mgmt_network: request.mgmt_network.clone(),
            node_id: request.node_id.clone(),
        }
    }
}

/// Cloud-level connection point changes, by connection point id for removals.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub struct VduModifyParams {
    pub vdu_id: String,
    pub connection_points_add: Vec<ConnectionPointRequest>,
    pub connection_points_remove: Vec<String>,
}

/// Caller-facing connection point changes on an allocated compute resource.
/// Removals are given by connection point name.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub struct ComputeModifyRequest {
    #[serde(default)]
    pub connection_points_add: Vec<ConnectionPointRequest>,
    #[serde(default)]
    pub connection_points_remove: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct ComputeResourceInfo {
    #[serde(flatten)]
    pub vdu: VduInfo,
    pub pool_name: String,
    pub resource_state: ResourceState,
}
