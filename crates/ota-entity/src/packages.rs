//! Release history of a deployment.
//!
//! `Deployment::package` always mirrors the last history entry. Commits
//! stamp labels `v1, v2, ...` by position and clear the previous entry's
//! rollout so a percentage only ever applies to the newest release.

use tracing::debug;

use ota_types::{EntityId, Package, StorageError, StorageResult};

use crate::store::EntityStore;

impl EntityStore {
    /// Append `package` to a deployment's history and make it current.
    ///
    /// Returns the stored release with its label and `released_by` stamped.
    pub async fn commit_package(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        deployment_id: &EntityId,
        mut package: Package,
    ) -> StorageResult<Package> {
        if let Some(rollout) = package.rollout {
            if !(1..=100).contains(&rollout) {
                return Err(StorageError::invalid(format!(
                    "rollout must be between 1 and 100, got {rollout}"
                )));
            }
        }

        let mut graph = self.write_graph()?;
        graph.require_deployment(account_id, app_id, deployment_id)?;
        let released_by = graph
            .accounts
            .get(account_id)
            .map(|a| a.email.clone())
            .ok_or_else(StorageError::not_found)?;
        let deployment = graph
            .deployments
            .get_mut(deployment_id)
            .ok_or_else(StorageError::not_found)?;

        if let Some(previous) = deployment.package_history.last_mut() {
            previous.rollout = None;
        }
        package.label = Some(format!("v{}", deployment.package_history.len() + 1));
        package.released_by = Some(released_by);
        deployment.package_history.push(package.clone());
        deployment.package = Some(package.clone());

        self.schedule_save(&graph);
        debug!(
            deployment_id = %deployment_id,
            label = package.label.as_deref().unwrap_or_default(),
            "package committed"
        );
        Ok(package)
    }

    /// Empty the history and unset the current release.
    pub async fn clear_package_history(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        deployment_id: &EntityId,
    ) -> StorageResult<()> {
        let mut graph = self.write_graph()?;
        graph.require_deployment(account_id, app_id, deployment_id)?;
        let deployment = graph
            .deployments
            .get_mut(deployment_id)
            .ok_or_else(StorageError::not_found)?;
        deployment.package = None;
        deployment.package_history.clear();
        self.schedule_save(&graph);
        debug!(deployment_id = %deployment_id, "package history cleared");
        Ok(())
    }

    pub async fn get_package_history(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        deployment_id: &EntityId,
    ) -> StorageResult<Vec<Package>> {
        let graph = self.read_graph()?;
        graph.require_deployment(account_id, app_id, deployment_id)?;
        graph
            .deployments
            .get(deployment_id)
            .map(|d| d.package_history.clone())
            .ok_or_else(StorageError::not_found)
    }

    /// Release history of the deployment behind an external key.
    pub async fn get_package_history_from_deployment_key(
        &self,
        deployment_key: &str,
    ) -> StorageResult<Vec<Package>> {
        let graph = self.read_graph()?;
        graph
            .deployment_key_to_deployment_map
            .get(deployment_key)
            .and_then(|id| graph.deployments.get(id))
            .map(|d| d.package_history.clone())
            .ok_or_else(StorageError::not_found)
    }

    /// Replace the history wholesale; the last entry becomes current.
    ///
    /// An empty history is rejected: clearing goes through
    /// [`clear_package_history`](Self::clear_package_history).
    pub async fn update_package_history(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        deployment_id: &EntityId,
        history: Vec<Package>,
    ) -> StorageResult<()> {
        let Some(current) = history.last().cloned() else {
            return Err(StorageError::invalid(
                "Cannot clear package history from an update operation",
            ));
        };

        let mut graph = self.write_graph()?;
        graph.require_deployment(account_id, app_id, deployment_id)?;
        let deployment = graph
            .deployments
            .get_mut(deployment_id)
            .ok_or_else(StorageError::not_found)?;
        let entries = history.len();
        deployment.package = Some(current);
        deployment.package_history = history;
        self.schedule_save(&graph);
        debug!(deployment_id = %deployment_id, entries, "package history replaced");
        Ok(())
    }
}
