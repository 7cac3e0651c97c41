use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, EnumString, Display, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccountType {
    /// In-memory adapter, used for dry runs and tests
    Mock,
    Openstack,
    Aws,
    Openmano,
    Vsphere,
}

/// One configured cloud target. `options` are handed to the adapter as-is.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct CloudAccount {
    pub name: String,
    pub account_type: AccountType,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, String>,
}

impl CloudAccount {
    pub fn new(name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            name: name.into(),
            account_type,
            options: HashMap::new(),
        }
    }

    pub fn mock(name: impl Into<String>) -> Self {
        Self::new(name, AccountType::Mock)
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct ImageInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}
