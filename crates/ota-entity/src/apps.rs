//! App and collaborator operations.
//!
//! Apps carry a collaborator map keyed by display email. Exactly one entry
//! holds [`Permission::Owner`]; every collaborator's account lists the app
//! in `account_to_apps_map`. Removing an app cascades to its deployments.

use std::collections::BTreeSet;

use tracing::debug;

use ota_types::{
    fold_email, is_reserved_key, App, CollaboratorMap, CollaboratorProperties, EntityId,
    Permission, StorageError, StorageResult,
};

use crate::graph::Graph;
use crate::store::EntityStore;
use crate::COLLABORATOR_NOT_FOUND;

fn reject_reserved(email: &str) -> StorageResult<()> {
    if is_reserved_key(email) {
        return Err(StorageError::invalid("Invalid email parameter"));
    }
    Ok(())
}

fn collaborator_not_found() -> StorageError {
    StorageError::NotFound(Some(COLLABORATOR_NOT_FOUND.into()))
}

/// Resolve `email` to a registered account and its canonical display email.
fn resolve_account(graph: &Graph, email: &str) -> Option<(EntityId, String)> {
    let id = graph.email_to_account_map.get(&fold_email(email))?;
    let account = graph.accounts.get(id)?;
    Some((id.clone(), account.email.clone()))
}

/// Every entry must name a registered account under that account's email,
/// and no account may appear twice.
fn check_collaborators(graph: &Graph, collaborators: &CollaboratorMap) -> StorageResult<()> {
    let mut seen = BTreeSet::new();
    for (email, props) in collaborators {
        reject_reserved(email)?;
        let account = graph
            .accounts
            .get(&props.account_id)
            .ok_or_else(collaborator_not_found)?;
        if fold_email(&account.email) != fold_email(email) {
            return Err(StorageError::invalid(format!(
                "collaborator {email} does not match account {}",
                props.account_id
            )));
        }
        if !seen.insert(&props.account_id) {
            return Err(StorageError::invalid(format!(
                "account {} is listed twice",
                props.account_id
            )));
        }
    }
    Ok(())
}

impl Graph {
    pub(crate) fn require_account_and_app(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
    ) -> StorageResult<()> {
        if !self.accounts.contains_key(account_id) || !self.apps.contains_key(app_id) {
            return Err(StorageError::not_found());
        }
        Ok(())
    }

    fn annotated_app(&self, account_id: &EntityId, app_id: &EntityId) -> StorageResult<App> {
        self.require_account_and_app(account_id, app_id)?;
        let mut app = self
            .apps
            .get(app_id)
            .cloned()
            .ok_or_else(StorageError::not_found)?;
        app.mark_current_account(account_id);
        Ok(app)
    }
}

impl EntityStore {
    /// Create an app owned by `account_id`.
    ///
    /// The creating account becomes the sole Owner and the owner of record.
    pub async fn add_app(&self, account_id: &EntityId, mut app: App) -> StorageResult<App> {
        let mut graph = self.write_graph()?;
        let owner_email = graph
            .accounts
            .get(account_id)
            .map(|a| a.email.clone())
            .ok_or_else(StorageError::not_found)?;

        app.id = graph.mint_id();
        app.collaborators = CollaboratorMap::from([(
            owner_email,
            CollaboratorProperties::new(account_id.clone(), Permission::Owner),
        )]);

        let app_id = app.id.clone();
        graph.add_app_pointer(account_id, &app_id);
        graph.app_to_deployments_map.entry(app_id.clone()).or_default();
        graph
            .app_to_account_map
            .insert(app_id.clone(), account_id.clone());
        graph.apps.insert(app_id.clone(), app.clone());
        self.schedule_save(&graph);
        debug!(account_id = %account_id, app_id = %app_id, "app added");
        Ok(app)
    }

    /// Every app `account_id` owns or collaborates on.
    pub async fn get_apps(&self, account_id: &EntityId) -> StorageResult<Vec<App>> {
        let graph = self.read_graph()?;
        let app_ids = graph
            .account_to_apps_map
            .get(account_id)
            .ok_or_else(StorageError::not_found)?;
        Ok(app_ids
            .iter()
            .filter_map(|id| graph.apps.get(id))
            .map(|app| {
                let mut app = app.clone();
                app.mark_current_account(account_id);
                app
            })
            .collect())
    }

    pub async fn get_app(&self, account_id: &EntityId, app_id: &EntityId) -> StorageResult<App> {
        self.read_graph()?.annotated_app(account_id, app_id)
    }

    /// Remove an app together with all of its deployments.
    ///
    /// Fails with an integrity fault when `account_id` is not the app's
    /// owner of record, or when one of the app's deployments names a
    /// different parent. Nothing is removed unless every check passes.
    pub async fn remove_app(&self, account_id: &EntityId, app_id: &EntityId) -> StorageResult<()> {
        let mut graph = self.write_graph()?;
        graph.require_account_and_app(account_id, app_id)?;
        if graph.app_to_account_map.get(app_id) != Some(account_id) {
            return Err(StorageError::Integrity(format!(
                "wrong account id {account_id} for app {app_id}"
            )));
        }

        let deployment_ids = graph
            .app_to_deployments_map
            .get(app_id)
            .cloned()
            .unwrap_or_default();
        for deployment_id in &deployment_ids {
            if !graph.deployments.contains_key(deployment_id) {
                return Err(StorageError::not_found());
            }
            if graph.deployment_to_app_map.get(deployment_id) != Some(app_id) {
                return Err(StorageError::Integrity(format!(
                    "wrong app id {app_id} for deployment {deployment_id}"
                )));
            }
        }

        for deployment_id in &deployment_ids {
            graph.detach_deployment(app_id, deployment_id);
        }
        graph.app_to_deployments_map.remove(app_id);

        if let Some(app) = graph.apps.remove(app_id) {
            for props in app.collaborators.values() {
                graph.remove_app_pointer(&props.account_id, app_id);
            }
        }
        graph.app_to_account_map.remove(app_id);
        graph.remove_app_pointer(account_id, app_id);

        self.schedule_save(&graph);
        debug!(
            account_id = %account_id,
            app_id = %app_id,
            deployments = deployment_ids.len(),
            "app removed"
        );
        Ok(())
    }

    /// Merge `app` into the stored record with the same id.
    ///
    /// Replaces the name, the description when given, and the collaborator
    /// map when non-empty. `is_current_account` annotations are dropped
    /// before storing. A replacement collaborator map must hold exactly one
    /// Owner and only registered accounts; app pointers follow the
    /// accounts added and dropped.
    pub async fn update_app(&self, account_id: &EntityId, mut app: App) -> StorageResult<()> {
        app.strip_current_account();
        if !app.collaborators.is_empty() && app.owner_count() != 1 {
            return Err(StorageError::invalid("An app must have exactly one owner"));
        }

        let mut graph = self.write_graph()?;
        graph.require_account_and_app(account_id, &app.id)?;
        let replaced = if app.collaborators.is_empty() {
            None
        } else {
            check_collaborators(&graph, &app.collaborators)?;
            let before: BTreeSet<EntityId> = graph
                .apps
                .get(&app.id)
                .ok_or_else(StorageError::not_found)?
                .collaborators
                .values()
                .map(|c| c.account_id.clone())
                .collect();
            let after: BTreeSet<EntityId> = app
                .collaborators
                .values()
                .map(|c| c.account_id.clone())
                .collect();
            Some((before, after))
        };

        let stored = graph
            .apps
            .get_mut(&app.id)
            .ok_or_else(StorageError::not_found)?;
        stored.name = app.name;
        if app.description.is_some() {
            stored.description = app.description;
        }
        if let Some((before, after)) = replaced {
            stored.collaborators = app.collaborators;
            for dropped in before.difference(&after) {
                graph.remove_app_pointer(dropped, &app.id);
            }
            for added in after.difference(&before) {
                graph.add_app_pointer(added, &app.id);
            }
        }
        self.schedule_save(&graph);
        debug!(account_id = %account_id, app_id = %app.id, "app updated");
        Ok(())
    }

    /// Make the account registered under `email` the Owner of an app.
    ///
    /// The requesting account is demoted to Collaborator. A target that
    /// already collaborates is promoted in place; otherwise it is added and
    /// gains an app pointer. The owner of record does not change.
    pub async fn transfer_app(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        email: &str,
    ) -> StorageResult<()> {
        reject_reserved(email)?;
        let mut graph = self.write_graph()?;
        graph.require_account_and_app(account_id, app_id)?;

        let requester_email = graph
            .accounts
            .get(account_id)
            .map(|a| a.email.clone())
            .ok_or_else(StorageError::not_found)?;
        let (target_id, target_email) =
            resolve_account(&graph, email).ok_or_else(collaborator_not_found)?;

        let app = graph
            .apps
            .get(app_id)
            .ok_or_else(StorageError::not_found)?;
        if app.is_owner(&target_email) {
            return Err(StorageError::already_exists());
        }
        if !app.collaborators.contains_key(&requester_email) {
            return Err(StorageError::NotFound(Some(
                "requesting account is not a collaborator on this app".into(),
            )));
        }
        let promote_in_place = app.is_collaborator(&target_email);

        let app = graph
            .apps
            .get_mut(app_id)
            .ok_or_else(StorageError::not_found)?;
        if let Some(requester) = app.collaborators.get_mut(&requester_email) {
            requester.permission = Permission::Collaborator;
        }
        if promote_in_place {
            if let Some(target) = app.collaborators.get_mut(&target_email) {
                target.permission = Permission::Owner;
            }
        } else {
            app.collaborators.insert(
                target_email,
                CollaboratorProperties::new(target_id.clone(), Permission::Owner),
            );
            graph.add_app_pointer(&target_id, app_id);
        }

        self.schedule_save(&graph);
        debug!(app_id = %app_id, from = %account_id, to = %target_id, "app transferred");
        Ok(())
    }

    /// Add the account registered under `email` as a Collaborator.
    pub async fn add_collaborator(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        email: &str,
    ) -> StorageResult<()> {
        reject_reserved(email)?;
        let mut graph = self.write_graph()?;
        graph.require_account_and_app(account_id, app_id)?;

        let app = graph
            .apps
            .get(app_id)
            .ok_or_else(StorageError::not_found)?;
        if app.collaborators.contains_key(email) {
            return Err(StorageError::already_exists());
        }
        let (target_id, target_email) =
            resolve_account(&graph, email).ok_or_else(collaborator_not_found)?;
        if app.collaborators.contains_key(&target_email) {
            return Err(StorageError::already_exists());
        }

        if let Some(app) = graph.apps.get_mut(app_id) {
            app.collaborators.insert(
                target_email,
                CollaboratorProperties::new(target_id.clone(), Permission::Collaborator),
            );
        }
        graph.add_app_pointer(&target_id, app_id);
        self.schedule_save(&graph);
        debug!(app_id = %app_id, collaborator = %target_id, "collaborator added");
        Ok(())
    }

    /// Collaborator map of an app, annotated for `account_id`.
    pub async fn get_collaborators(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
    ) -> StorageResult<CollaboratorMap> {
        Ok(self
            .read_graph()?
            .annotated_app(account_id, app_id)?
            .collaborators)
    }

    /// Drop a Collaborator entry. The Owner cannot be removed this way.
    ///
    /// Whether the caller may manage membership is checked by the calling
    /// layer, not here.
    pub async fn remove_collaborator(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        email: &str,
    ) -> StorageResult<()> {
        reject_reserved(email)?;
        let mut graph = self.write_graph()?;
        graph.require_account_and_app(account_id, app_id)?;

        let resolved = resolve_account(&graph, email);
        let app = graph
            .apps
            .get(app_id)
            .ok_or_else(StorageError::not_found)?;
        let entry_key = if app.collaborators.contains_key(email) {
            email.to_string()
        } else {
            match &resolved {
                Some((_, canonical)) => canonical.clone(),
                None => return Err(StorageError::not_found()),
            }
        };
        if app.is_owner(&entry_key) {
            return Err(StorageError::already_exists());
        }
        if resolved.is_none() || !app.is_collaborator(&entry_key) {
            return Err(StorageError::not_found());
        }

        let removed = graph
            .apps
            .get_mut(app_id)
            .and_then(|app| app.collaborators.remove(&entry_key));
        if let Some(props) = removed {
            graph.remove_app_pointer(&props.account_id, app_id);
        }
        self.schedule_save(&graph);
        debug!(app_id = %app_id, collaborator = %entry_key, "collaborator removed");
        Ok(())
    }
}
