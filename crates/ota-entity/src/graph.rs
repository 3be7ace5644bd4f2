//! The canonical entity graph: primary records plus reverse-lookup indices.
//!
//! A [`Graph`] is also the snapshot format. Its serialized field names match
//! the replicated `state` value, and every field defaults to an empty
//! container when a snapshot omits it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ota_types::{AccessKey, AccessKeyPointer, Account, App, Deployment, EntityId};

/// All entity records and index tables owned by one store instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Graph {
    /// Next value of the id counter. Local to one instance.
    #[serde(rename = "NextIdNumber")]
    pub next_id_number: u64,

    pub accounts: BTreeMap<EntityId, Account>,
    pub apps: BTreeMap<EntityId, App>,
    pub deployments: BTreeMap<EntityId, Deployment>,
    pub access_keys: BTreeMap<EntityId, AccessKey>,
    /// Blob id to public URL.
    pub blobs: BTreeMap<String, String>,

    /// Apps each account can see (owned or collaborating).
    pub account_to_apps_map: BTreeMap<EntityId, Vec<EntityId>>,
    /// Owner-of-record used for ownership checks on removal.
    pub app_to_account_map: BTreeMap<EntityId, EntityId>,
    /// Case-folded email to account id.
    pub email_to_account_map: BTreeMap<String, EntityId>,
    pub app_to_deployments_map: BTreeMap<EntityId, Vec<EntityId>>,
    pub deployment_to_app_map: BTreeMap<EntityId, EntityId>,
    pub deployment_key_to_deployment_map: BTreeMap<String, EntityId>,
    pub account_to_access_keys_map: BTreeMap<EntityId, Vec<EntityId>>,
    pub access_key_to_account_map: BTreeMap<EntityId, EntityId>,
    pub access_key_name_to_account_id_map: BTreeMap<String, AccessKeyPointer>,
}

/// Entity counts for operator output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub next_id_number: u64,
    pub accounts: usize,
    pub apps: usize,
    pub deployments: usize,
    pub packages: usize,
    pub access_keys: usize,
    pub blobs: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next `id_{n}` identifier.
    pub fn mint_id(&mut self) -> EntityId {
        let id = EntityId::from_sequence(self.next_id_number);
        self.next_id_number += 1;
        id
    }

    /// Record that `account_id` can see `app_id`. No-op if already present.
    pub fn add_app_pointer(&mut self, account_id: &EntityId, app_id: &EntityId) {
        let apps = self
            .account_to_apps_map
            .entry(account_id.clone())
            .or_default();
        if !apps.contains(app_id) {
            apps.push(app_id.clone());
        }
    }

    /// Drop `app_id` from the apps visible to `account_id`.
    pub fn remove_app_pointer(&mut self, account_id: &EntityId, app_id: &EntityId) {
        if let Some(apps) = self.account_to_apps_map.get_mut(account_id) {
            apps.retain(|id| id != app_id);
        }
    }

    /// Purge a deployment and every index entry that references it.
    ///
    /// Callers verify the parent link first; this only unlinks.
    pub(crate) fn detach_deployment(&mut self, app_id: &EntityId, deployment_id: &EntityId) {
        if let Some(deployment) = self.deployments.remove(deployment_id) {
            self.deployment_key_to_deployment_map.remove(&deployment.key);
        }
        self.deployment_to_app_map.remove(deployment_id);
        if let Some(deployments) = self.app_to_deployments_map.get_mut(app_id) {
            deployments.retain(|id| id != deployment_id);
        }
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            next_id_number: self.next_id_number,
            accounts: self.accounts.len(),
            apps: self.apps.len(),
            deployments: self.deployments.len(),
            packages: self
                .deployments
                .values()
                .map(|d| d.package_history.len())
                .sum(),
            access_keys: self.access_keys.len(),
            blobs: self.blobs.len(),
        }
    }
}
