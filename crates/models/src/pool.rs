use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::ResourceType;

/// Size given to pools that don't configure one, including the two seeded per account.
pub const DEFAULT_POOL_SIZE: usize = 128;

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PoolType {
    /// Membership is fixed by configuration
    Static,
    /// Creates resources on demand when nothing static fits
    Dynamic,
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
pub enum PoolStatus {
    Locked,
    #[default]
    Unlocked,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceOrigin {
    Static,
    Dynamic,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

/// Pool identity and policy. `resources` lists the static members registered at creation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct ResourcePoolInfo {
    pub name: String,
    pub pool_type: PoolType,
    pub resource_type: ResourceType,
    #[serde(default = "default_pool_size")]
    pub max_size: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
}

impl ResourcePoolInfo {
    pub fn new(
        name: impl Into<String>,
        pool_type: PoolType,
        resource_type: ResourceType,
        max_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            pool_type,
            resource_type,
            max_size,
            resources: Vec::new(),
        }
    }

    /// The unlocked dynamic pool every cloud account starts out with, one per resource type.
    pub fn default_for_account(account: &str, resource_type: ResourceType, max_size: usize) -> Self {
        Self::new(
            format!("{account}-dynamic-{resource_type}"),
            PoolType::Dynamic,
            resource_type,
            max_size,
        )
    }

    pub fn with_resources(mut self, resources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }
}

/// Read-only view of a pool's bookkeeping.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct PoolSnapshot {
    pub name: String,
    pub cloud_account: String,
    pub pool_type: PoolType,
    pub resource_type: ResourceType,
    pub status: PoolStatus,
    pub max_size: usize,
    pub total: usize,
    pub free: usize,
    pub allocated: usize,
    pub in_use: bool,
}
