//! Entity store for the OTA update store.
//!
//! This crate owns the canonical graph of accounts, apps, deployments,
//! packages, and access keys. It provides:
//! - `EntityStore` with add/get/update/remove operations that keep every
//!   reverse index consistent, including the app-removal cascade
//! - Snapshot replication through the `StateReplicator` seam
//!   (`KvReplicator` stores the whole graph as one JSON value)
//! - A periodic reload task (last snapshot wins)
//! - Blob side table over an external `BlobStore`
//! - `Graph::verify` integrity checking

pub mod access_keys;
pub mod accounts;
pub mod apps;
pub mod blobs;
pub mod config;
pub mod deployments;
pub mod graph;
pub mod integrity;
pub mod packages;
pub mod replicator;
pub mod store;

pub use config::EntityStoreConfig;
pub use graph::{Graph, GraphSummary};
pub use integrity::{IntegrityReport, Violation, ViolationKind};
pub use replicator::{KvReplicator, StateReplicator};
pub use store::EntityStore;

/// Message attached to NotFound when a collaborator email has no account.
pub const COLLABORATOR_NOT_FOUND: &str =
    "The specified e-mail address doesn't represent a registered user";
