use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::ResourceState;

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OverlayType {
    Local,
    Flat,
    Vlan,
    Vxlan,
    Gre,
}

/// Provider network tags. These describe a network, they are not consumable capacity.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(default)]
pub struct ProviderNetwork {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_type: Option<OverlayType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmentation_id: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(default)]
pub struct VirtualLinkRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_network: Option<ProviderNetwork>,
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
pub enum VirtualLinkState {
    #[default]
    Inactive,
    Active,
    Failed,
    Unknown,
}

impl VirtualLinkState {
    pub fn resource_state(self) -> ResourceState {
        match self {
            VirtualLinkState::Active => ResourceState::Active,
            VirtualLinkState::Failed => ResourceState::Failed,
            VirtualLinkState::Inactive | VirtualLinkState::Unknown => ResourceState::Pending,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub struct VirtualLinkInfo {
    pub virtual_link_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    pub state: VirtualLinkState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_network: Option<ProviderNetwork>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct VirtualLinkParams {
    pub name: String,
    pub subnet: Option<String>,
    pub provider_network: Option<ProviderNetwork>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct NetworkResourceInfo {
    #[serde(flatten)]
    pub link: VirtualLinkInfo,
    pub pool_name: String,
    pub resource_state: ResourceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_mapping() {
        assert_eq!(
            VirtualLinkState::Active.resource_state(),
            ResourceState::Active
        );
        assert_eq!(
            VirtualLinkState::Failed.resource_state(),
            ResourceState::Failed
        );
        assert_eq!(
            VirtualLinkState::Unknown.resource_state(),
            ResourceState::Pending
        );
    }

    #[test]
    fn test_overlay_type_names() {
        let provider: ProviderNetwork =
            serde_json::from_str(r#"{"overlay_type": "VXLAN", "segmentation_id": 42}"#).unwrap();
        assert_eq!(provider.overlay_type, Some(OverlayType::Vxlan));
        assert_eq!(provider.physical_network, None);
    }
}
