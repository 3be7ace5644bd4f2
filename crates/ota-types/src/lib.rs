//! Foundation types for the OTA update store.
//!
//! This crate provides the entity records, identifier format, and error
//! taxonomy shared by the entity store, the cache/metrics service, and the
//! operator tooling. Every other crate in the workspace depends on
//! `ota-types`.
//!
//! # Key Types
//!
//! - [`EntityId`]: `id_{n}` identifier minted by the entity store
//! - [`Account`], [`App`], [`Deployment`], [`Package`], [`AccessKey`]: entity records
//! - [`Permission`]: collaborator role on an app (exactly one `Owner`)
//! - [`StorageError`]: recoverable kinds plus integrity faults
//! - [`ErrorCode`]: recoverable kind, mapped to a transport status by callers

pub mod error;
pub mod id;
pub mod keys;
pub mod model;

pub use error::{ErrorCode, StorageError, StorageResult};
pub use id::EntityId;
pub use keys::{fold_email, is_reserved_key, RESERVED_KEYS};
pub use model::{
    AccessKey, AccessKeyPointer, AccessKeyUpdate, Account, AccountUpdate, App, BlobInfo,
    CollaboratorMap, CollaboratorProperties, Deployment, DeploymentInfo, DeploymentUpdate,
    Package, Permission,
};

/// Current wall-clock time in epoch milliseconds.
///
/// Access key expiry and creation timestamps use this unit throughout.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
