//! Cloud Abstraction Layer (CAL): the asynchronous boundary between the resource manager and a
//! single cloud account.
//!
//! Real provider plugins live outside this workspace; they only need to implement
//! [`CloudAdapter`] and be produced by an [`AdapterFactory`]. The [`mock`] module ships an
//! in-memory adapter used by the CLI and the test suite.

pub mod error;
pub mod mock;

pub use error::CalError;

use async_trait::async_trait;
use models::{
    AccountType, CloudAccount, EpaAttributes, Flavor, ImageInfo, VduInfo, VduInitParams,
    VduModifyParams, VirtualLinkInfo, VirtualLinkParams,
};
use std::sync::Arc;

/// Per-account cloud operations. Every call may suspend; none of them may assume exclusive
/// access to the account.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    fn account_name(&self) -> &str;

    async fn get_vdu_list(&self) -> Result<Vec<VduInfo>, CalError>;

    async fn get_vdu(&self, vdu_id: &str) -> Result<VduInfo, CalError>;

    /// Returns the id of the new instance
    async fn create_vdu(&self, params: &VduInitParams) -> Result<String, CalError>;

    /// Attaches and detaches connection points on a running instance
    async fn modify_vdu(&self, params: &VduModifyParams) -> Result<(), CalError>;

    async fn delete_vdu(&self, vdu_id: &str) -> Result<(), CalError>;

    async fn get_flavor_list(&self) -> Result<Vec<Flavor>, CalError>;

    /// Returns the id of the new flavor
    async fn create_flavor(&self, name: &str, epa: &EpaAttributes) -> Result<String, CalError>;

    async fn get_virtual_link_list(&self) -> Result<Vec<VirtualLinkInfo>, CalError>;

    async fn get_virtual_link(&self, link_id: &str) -> Result<VirtualLinkInfo, CalError>;

    /// Returns the id of the new virtual link
    async fn create_virtual_link(&self, params: &VirtualLinkParams) -> Result<String, CalError>;

    async fn delete_virtual_link(&self, link_id: &str) -> Result<(), CalError>;

    async fn get_image_list(&self) -> Result<Vec<ImageInfo>, CalError>;

    async fn get_image(&self, image_id: &str) -> Result<ImageInfo, CalError>;

    /// Resolves an image id from its name, using `checksum` to pick between images that
    /// share a name.
    async fn get_image_id_from_image_info(
        &self,
        name: &str,
        checksum: Option<&str>,
    ) -> Result<String, CalError> {
        let images = self.get_image_list().await?;
        resolve_image_id(&images, name, checksum)
    }
}

/// Picks the image called `name` out of `images`.
///
/// A single match wins outright. Several matches are narrowed by `checksum` when one is
/// given; whatever remains must agree on a checksum, otherwise the name is ambiguous.
pub fn resolve_image_id(
    images: &[ImageInfo],
    name: &str,
    checksum: Option<&str>,
) -> Result<String, CalError> {
    let named: Vec<&ImageInfo> = images.iter().filter(|i| i.name == name).collect();

    let candidates = match (named.as_slice(), checksum) {
        ([], _) => {
            return Err(CalError::InvalidImage {
                name: name.to_owned(),
                reason: "no image with this name".to_owned(),
            })
        }
        ([only], _) => return Ok(only.id.clone()),
        (many, Some(sum)) => many
            .iter()
            .copied()
            .filter(|i| i.checksum.as_deref() == Some(sum))
            .collect::<Vec<_>>(),
        (many, None) => many.to_vec(),
    };

    let Some(first) = candidates.first() else {
        return Err(CalError::InvalidImage {
            name: name.to_owned(),
            reason: format!("no image matches checksum {checksum:?}"),
        });
    };

    if candidates.iter().all(|i| i.checksum == first.checksum) {
        Ok(first.id.clone())
    } else {
        Err(CalError::InvalidImage {
            name: name.to_owned(),
            reason: format!(
                "{} images share this name with differing checksums",
                candidates.len()
            ),
        })
    }
}

/// Builds the adapter for a cloud account when the account is registered.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, account: &CloudAccount) -> Result<Arc<dyn CloudAdapter>, CalError>;
}

/// Hands out a fresh in-memory adapter for `mock` accounts and refuses every other type.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAdapterFactory;

impl AdapterFactory for DefaultAdapterFactory {
    fn create(&self, account: &CloudAccount) -> Result<Arc<dyn CloudAdapter>, CalError> {
        match account.account_type {
            AccountType::Mock => Ok(Arc::new(mock::MockCal::from_account(account))),
            other => Err(CalError::Unsupported(other.to_string())),
        }
    }
}
