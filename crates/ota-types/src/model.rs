//! Entity records exchanged between the entity store and its callers.
//!
//! Field names serialize in camelCase, matching the snapshot wire format and
//! the DTOs the API layer returns.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::EntityId;

/// A registered user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: EntityId,
    /// Display form, case preserved. Lookups fold case.
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub created_time: i64,
}

impl Account {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: EntityId::unassigned(),
            email: email.into(),
            name: name.into(),
            created_time: crate::now_millis(),
        }
    }
}

/// Partial update applied by `update_account`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Collaborator role on an app.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Owner,
    Collaborator,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Owner => f.write_str("Owner"),
            Permission::Collaborator => f.write_str("Collaborator"),
        }
    }
}

/// One entry of an app's collaborator map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorProperties {
    pub account_id: EntityId,
    pub permission: Permission,
    /// Read-only annotation set on copies handed to the requesting account.
    /// Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_current_account: Option<bool>,
}

impl CollaboratorProperties {
    pub fn new(account_id: EntityId, permission: Permission) -> Self {
        Self {
            account_id,
            permission,
            is_current_account: None,
        }
    }
}

/// Collaborators keyed by the account's display email.
pub type CollaboratorMap = BTreeMap<String, CollaboratorProperties>;

/// A mobile application registered by an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub collaborators: CollaboratorMap,
    #[serde(default)]
    pub created_time: i64,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EntityId::unassigned(),
            name: name.into(),
            description: None,
            collaborators: CollaboratorMap::new(),
            created_time: crate::now_millis(),
        }
    }

    pub fn is_owner(&self, email: &str) -> bool {
        self.collaborators
            .get(email)
            .is_some_and(|c| c.permission == Permission::Owner)
    }

    pub fn is_collaborator(&self, email: &str) -> bool {
        self.collaborators
            .get(email)
            .is_some_and(|c| c.permission == Permission::Collaborator)
    }

    /// Number of collaborator entries holding [`Permission::Owner`].
    pub fn owner_count(&self) -> usize {
        self.collaborators
            .values()
            .filter(|c| c.permission == Permission::Owner)
            .count()
    }

    /// Mark the entry belonging to `account_id` with `is_current_account`.
    pub fn mark_current_account(&mut self, account_id: &EntityId) {
        for props in self.collaborators.values_mut() {
            if &props.account_id == account_id {
                props.is_current_account = Some(true);
            }
        }
    }

    /// Drop every `is_current_account` annotation.
    pub fn strip_current_account(&mut self) {
        for props in self.collaborators.values_mut() {
            props.is_current_account = None;
        }
    }
}

/// Size and location of a diff archive against an older package hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobInfo {
    pub size: u64,
    pub url: String,
}

/// One release in a deployment's history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    /// `v{n}` where `n` is the 1-based position in history. Stamped on commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub app_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub is_disabled: bool,
    /// Percentage of clients eligible (1-100). Unset means everyone.
    #[serde(default)]
    pub rollout: Option<u8>,
    /// Email of the committing account. Stamped on commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_by: Option<String>,
    pub blob_url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub upload_time: i64,
    pub package_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_blob_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_deployment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_package_map: Option<HashMap<String, BlobInfo>>,
}

impl Package {
    pub fn new(
        app_version: impl Into<String>,
        package_hash: impl Into<String>,
        blob_url: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            app_version: app_version.into(),
            package_hash: package_hash.into(),
            blob_url: blob_url.into(),
            size,
            upload_time: crate::now_millis(),
            ..Default::default()
        }
    }
}

/// A release channel of an app (e.g. "Staging", "Production").
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: EntityId,
    pub name: String,
    /// Globally unique external lookup token.
    pub key: String,
    /// Denormalized copy of the last history entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<Package>,
    #[serde(default)]
    pub package_history: Vec<Package>,
    #[serde(default)]
    pub created_time: i64,
}

impl Deployment {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: EntityId::unassigned(),
            name: name.into(),
            key: key.into(),
            package: None,
            package_history: Vec::new(),
            created_time: crate::now_millis(),
        }
    }
}

/// Partial update applied by `update_deployment`.
///
/// `package` is accepted for wire compatibility and always discarded:
/// releases only change through commit and history updates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentUpdate {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<Package>,
}

/// Result of resolving a deployment key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub app_id: EntityId,
    pub deployment_id: EntityId,
}

/// An access credential held by one account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
    pub id: EntityId,
    /// The secret token itself; unique across the system.
    pub name: String,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_time: i64,
    /// Epoch milliseconds after which the key is rejected.
    pub expires: i64,
    #[serde(default)]
    pub is_session: bool,
}

impl AccessKey {
    pub fn new(name: impl Into<String>, friendly_name: impl Into<String>, expires: i64) -> Self {
        Self {
            id: EntityId::unassigned(),
            name: name.into(),
            friendly_name: friendly_name.into(),
            created_time: crate::now_millis(),
            expires,
            ..Default::default()
        }
    }
}

/// Partial update applied by `update_access_key`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKeyUpdate {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
}

/// Side-index entry resolving an access key name to its holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKeyPointer {
    pub account_id: EntityId,
    pub expires: i64,
}
