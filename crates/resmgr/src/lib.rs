//! Resource-pool allocation and capability matching for NFV workloads.
//!
//! [`ResourceMgrCore`] owns the cloud accounts, the pools carved out of each account and the
//! registry binding event ids to allocated resources. Pools hand out pre-registered static
//! resources when one matches a request and, if the pool is dynamic, create new ones through
//! the account's [`cal::CloudAdapter`].

pub mod error;
pub mod manager;
pub mod matcher;
pub mod monitor;
pub mod pool;
pub mod readiness;
pub mod registry;

pub use error::ResMgrError;
pub use manager::ResourceMgrCore;
pub use pool::{Resource, ResourcePool};
pub use registry::EventRecord;
