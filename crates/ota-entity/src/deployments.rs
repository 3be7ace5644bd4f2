use tracing::debug;

use ota_types::{
    Deployment, DeploymentInfo, DeploymentUpdate, EntityId, StorageError, StorageResult,
};

use crate::graph::Graph;
use crate::store::EntityStore;

impl Graph {
    pub(crate) fn require_deployment(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        deployment_id: &EntityId,
    ) -> StorageResult<()> {
        self.require_account_and_app(account_id, app_id)?;
        if !self.deployments.contains_key(deployment_id) {
            return Err(StorageError::not_found());
        }
        Ok(())
    }
}

impl EntityStore {
    /// Create a deployment under an app and return its id.
    ///
    /// The deployment starts with an empty history. Deployment keys are
    /// global; a key already in use fails `AlreadyExists`.
    pub async fn add_deployment(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        mut deployment: Deployment,
    ) -> StorageResult<EntityId> {
        let mut graph = self.write_graph()?;
        graph.require_account_and_app(account_id, app_id)?;
        if graph
            .deployment_key_to_deployment_map
            .contains_key(&deployment.key)
        {
            return Err(StorageError::already_exists());
        }

        deployment.id = graph.mint_id();
        deployment.package = None;
        deployment.package_history.clear();
        let id = deployment.id.clone();

        let siblings = graph
            .app_to_deployments_map
            .entry(app_id.clone())
            .or_default();
        if !siblings.contains(&id) {
            siblings.push(id.clone());
        }
        graph.deployment_to_app_map.insert(id.clone(), app_id.clone());
        graph
            .deployment_key_to_deployment_map
            .insert(deployment.key.clone(), id.clone());
        graph.deployments.insert(id.clone(), deployment);
        self.schedule_save(&graph);
        debug!(app_id = %app_id, deployment_id = %id, "deployment added");
        Ok(id)
    }

    /// Resolve a deployment key to its app and deployment ids.
    pub async fn get_deployment_info(&self, deployment_key: &str) -> StorageResult<DeploymentInfo> {
        let graph = self.read_graph()?;
        let deployment_id = graph
            .deployment_key_to_deployment_map
            .get(deployment_key)
            .filter(|id| graph.deployments.contains_key(*id))
            .ok_or_else(StorageError::not_found)?;
        let app_id = graph
            .deployment_to_app_map
            .get(deployment_id)
            .ok_or_else(StorageError::not_found)?;
        Ok(DeploymentInfo {
            app_id: app_id.clone(),
            deployment_id: deployment_id.clone(),
        })
    }

    pub async fn get_deployment(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        deployment_id: &EntityId,
    ) -> StorageResult<Deployment> {
        let graph = self.read_graph()?;
        graph.require_deployment(account_id, app_id, deployment_id)?;
        graph
            .deployments
            .get(deployment_id)
            .cloned()
            .ok_or_else(StorageError::not_found)
    }

    pub async fn get_deployments(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
    ) -> StorageResult<Vec<Deployment>> {
        let graph = self.read_graph()?;
        let ids = graph
            .app_to_deployments_map
            .get(app_id)
            .filter(|_| graph.accounts.contains_key(account_id))
            .ok_or_else(StorageError::not_found)?;
        Ok(ids
            .iter()
            .filter_map(|id| graph.deployments.get(id))
            .cloned()
            .collect())
    }

    /// Remove a deployment and every index entry pointing at it.
    pub async fn remove_deployment(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        deployment_id: &EntityId,
    ) -> StorageResult<()> {
        let mut graph = self.write_graph()?;
        graph.require_deployment(account_id, app_id, deployment_id)?;
        if graph.deployment_to_app_map.get(deployment_id) != Some(app_id) {
            return Err(StorageError::Integrity(format!(
                "wrong app id {app_id} for deployment {deployment_id}"
            )));
        }
        graph.detach_deployment(app_id, deployment_id);
        self.schedule_save(&graph);
        debug!(app_id = %app_id, deployment_id = %deployment_id, "deployment removed");
        Ok(())
    }

    /// Merge name and key changes into a deployment.
    ///
    /// A `package` in the update is discarded; releases change only through
    /// [`commit_package`](Self::commit_package) and the history operations.
    pub async fn update_deployment(
        &self,
        account_id: &EntityId,
        app_id: &EntityId,
        update: DeploymentUpdate,
    ) -> StorageResult<()> {
        let mut graph = self.write_graph()?;
        graph.require_deployment(account_id, app_id, &update.id)?;
        if update.package.is_some() {
            debug!(deployment_id = %update.id, "ignoring package in deployment update");
        }

        let old_key = graph
            .deployments
            .get(&update.id)
            .map(|d| d.key.clone())
            .ok_or_else(StorageError::not_found)?;
        let new_key = update.key.filter(|key| *key != old_key);
        if let Some(key) = &new_key {
            if graph.deployment_key_to_deployment_map.contains_key(key) {
                return Err(StorageError::already_exists());
            }
        }

        let deployment = graph
            .deployments
            .get_mut(&update.id)
            .ok_or_else(StorageError::not_found)?;
        if let Some(name) = update.name {
            deployment.name = name;
        }
        if let Some(key) = new_key {
            deployment.key = key.clone();
            graph.deployment_key_to_deployment_map.remove(&old_key);
            graph
                .deployment_key_to_deployment_map
                .insert(key, update.id.clone());
        }
        self.schedule_save(&graph);
        debug!(deployment_id = %update.id, "deployment updated");
        Ok(())
    }
}
