use tracing::debug;

use ota_types::{fold_email, Account, AccountUpdate, EntityId, StorageError, StorageResult};

use crate::store::EntityStore;

impl EntityStore {
    /// Register an account and return its minted id.
    ///
    /// Fails `AlreadyExists` when the case-folded email is taken. The id is
    /// consumed even on failure.
    pub async fn add_account(&self, mut account: Account) -> StorageResult<EntityId> {
        let mut graph = self.write_graph()?;
        account.id = graph.mint_id();
        let email = fold_email(&account.email);

        if graph.accounts.contains_key(&account.id)
            || graph.account_to_apps_map.contains_key(&account.id)
            || graph.email_to_account_map.contains_key(&email)
        {
            return Err(StorageError::already_exists());
        }

        let id = account.id.clone();
        graph.account_to_apps_map.insert(id.clone(), Vec::new());
        graph.email_to_account_map.insert(email, id.clone());
        graph.accounts.insert(id.clone(), account);
        self.schedule_save(&graph);
        debug!(account_id = %id, "account added");
        Ok(id)
    }

    pub async fn get_account(&self, account_id: &EntityId) -> StorageResult<Account> {
        self.read_graph()?
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(StorageError::not_found)
    }

    /// Look an account up by email, ignoring case.
    pub async fn get_account_by_email(&self, email: &str) -> StorageResult<Account> {
        let graph = self.read_graph()?;
        graph
            .email_to_account_map
            .get(&fold_email(email))
            .and_then(|id| graph.accounts.get(id))
            .cloned()
            .ok_or_else(StorageError::not_found)
    }

    /// Merge `updates` into the account registered under `email`.
    pub async fn update_account(&self, email: &str, updates: AccountUpdate) -> StorageResult<()> {
        if email.is_empty() {
            return Err(StorageError::invalid("No account email"));
        }
        let mut graph = self.write_graph()?;
        let id = graph
            .email_to_account_map
            .get(&fold_email(email))
            .cloned()
            .ok_or_else(StorageError::not_found)?;
        let account = graph
            .accounts
            .get_mut(&id)
            .ok_or_else(StorageError::not_found)?;
        if let Some(name) = updates.name {
            account.name = name;
        }
        self.schedule_save(&graph);
        debug!(account_id = %id, "account updated");
        Ok(())
    }
}
