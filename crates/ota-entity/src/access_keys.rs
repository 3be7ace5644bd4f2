use tracing::debug;

use ota_types::{
    now_millis, AccessKey, AccessKeyPointer, AccessKeyUpdate, EntityId, StorageError,
    StorageResult,
};

use crate::store::EntityStore;

impl EntityStore {
    /// Store a new access key for `account_id` and return its id.
    ///
    /// If the minted id is already listed for the account the call succeeds
    /// with an unassigned (empty) id and stores nothing. Key names are
    /// unique; reusing a name fails `AlreadyExists`.
    pub async fn add_access_key(
        &self,
        account_id: &EntityId,
        mut access_key: AccessKey,
    ) -> StorageResult<EntityId> {
        let mut graph = self.write_graph()?;
        if !graph.accounts.contains_key(account_id) {
            return Err(StorageError::not_found());
        }
        if graph
            .access_key_name_to_account_id_map
            .contains_key(&access_key.name)
        {
            return Err(StorageError::already_exists());
        }

        access_key.id = graph.mint_id();
        let id = access_key.id.clone();
        let keys = graph
            .account_to_access_keys_map
            .entry(account_id.clone())
            .or_default();
        if keys.contains(&id) {
            return Ok(EntityId::unassigned());
        }
        keys.push(id.clone());

        graph
            .access_key_to_account_map
            .insert(id.clone(), account_id.clone());
        graph.access_key_name_to_account_id_map.insert(
            access_key.name.clone(),
            AccessKeyPointer {
                account_id: account_id.clone(),
                expires: access_key.expires,
            },
        );
        graph.access_keys.insert(id.clone(), access_key);
        self.schedule_save(&graph);
        debug!(account_id = %account_id, access_key_id = %id, "access key added");
        Ok(id)
    }

    /// Resolve an access key name to the account holding it.
    pub async fn get_account_id_from_access_key(&self, name: &str) -> StorageResult<EntityId> {
        self.get_account_id_from_access_key_at(name, now_millis())
    }

    /// [`get_account_id_from_access_key`](Self::get_account_id_from_access_key)
    /// evaluated at `now_ms`. A key is expired from its `expires` instant on.
    pub fn get_account_id_from_access_key_at(
        &self,
        name: &str,
        now_ms: i64,
    ) -> StorageResult<EntityId> {
        let graph = self.read_graph()?;
        let pointer = graph
            .access_key_name_to_account_id_map
            .get(name)
            .ok_or_else(StorageError::not_found)?;
        if now_ms >= pointer.expires {
            return Err(StorageError::Expired(Some(
                "The access key has expired.".into(),
            )));
        }
        Ok(pointer.account_id.clone())
    }

    pub async fn get_access_key(
        &self,
        account_id: &EntityId,
        access_key_id: &EntityId,
    ) -> StorageResult<AccessKey> {
        let graph = self.read_graph()?;
        if graph.access_key_to_account_map.get(access_key_id) != Some(account_id) {
            return Err(StorageError::not_found());
        }
        graph
            .access_keys
            .get(access_key_id)
            .cloned()
            .ok_or_else(StorageError::not_found)
    }

    /// All keys of an account. `NotFound` if the account never held one.
    pub async fn get_access_keys(&self, account_id: &EntityId) -> StorageResult<Vec<AccessKey>> {
        let graph = self.read_graph()?;
        let ids = graph
            .account_to_access_keys_map
            .get(account_id)
            .ok_or_else(StorageError::not_found)?;
        Ok(ids
            .iter()
            .filter_map(|id| graph.access_keys.get(id))
            .cloned()
            .collect())
    }

    /// Merge `update` into a key held by `account_id`, refreshing the
    /// name index's expiry.
    pub async fn update_access_key(
        &self,
        account_id: &EntityId,
        update: AccessKeyUpdate,
    ) -> StorageResult<()> {
        let mut graph = self.write_graph()?;
        if update.id.is_unassigned()
            || graph.access_key_to_account_map.get(&update.id) != Some(account_id)
        {
            return Err(StorageError::not_found());
        }

        let key = graph
            .access_keys
            .get_mut(&update.id)
            .ok_or_else(StorageError::not_found)?;
        if let Some(friendly_name) = update.friendly_name {
            key.friendly_name = friendly_name;
        }
        if let Some(description) = update.description {
            key.description = Some(description);
        }
        if let Some(expires) = update.expires {
            key.expires = expires;
        }
        let (name, expires) = (key.name.clone(), key.expires);

        graph
            .access_key_name_to_account_id_map
            .entry(name)
            .and_modify(|pointer| pointer.expires = expires)
            .or_insert_with(|| AccessKeyPointer {
                account_id: account_id.clone(),
                expires,
            });
        self.schedule_save(&graph);
        debug!(account_id = %account_id, access_key_id = %update.id, "access key updated");
        Ok(())
    }

    pub async fn remove_access_key(
        &self,
        account_id: &EntityId,
        access_key_id: &EntityId,
    ) -> StorageResult<()> {
        let mut graph = self.write_graph()?;
        if graph.access_key_to_account_map.get(access_key_id) != Some(account_id) {
            return Err(StorageError::not_found());
        }

        if let Some(key) = graph.access_keys.remove(access_key_id) {
            graph.access_key_name_to_account_id_map.remove(&key.name);
        }
        graph.access_key_to_account_map.remove(access_key_id);
        if let Some(keys) = graph.account_to_access_keys_map.get_mut(account_id) {
            keys.retain(|id| id != access_key_id);
        }
        self.schedule_save(&graph);
        debug!(account_id = %account_id, access_key_id = %access_key_id, "access key removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testing::{account, fixture};
    use ota_types::{AccessKey, AccessKeyUpdate, EntityId, ErrorCode};

    const HOUR_MS: i64 = 3_600_000;

    #[tokio::test]
    async fn add_and_resolve_key() {
        let f = fixture();
        let owner = account(&f.store, "a@x.io").await;
        let key_id = f
            .store
            .add_access_key(&owner, AccessKey::new("secret-1", "laptop", i64::MAX))
            .await
            .unwrap();
        assert_eq!(key_id, EntityId::from("id_1"));
        assert_eq!(
            f.store.get_account_id_from_access_key("secret-1").await.unwrap(),
            owner
        );
        let keys = f.store.get_access_keys(&owner).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].friendly_name, "laptop");
    }

    #[tokio::test]
    async fn add_for_unknown_account_is_not_found() {
        let f = fixture();
        let err = f
            .store
            .add_access_key(&EntityId::from("id_4"), AccessKey::new("k", "k", 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let f = fixture();
        let a = account(&f.store, "a@x.io").await;
        let b = account(&f.store, "b@x.io").await;
        f.store
            .add_access_key(&a, AccessKey::new("shared", "a", i64::MAX))
            .await
            .unwrap();
        let err = f
            .store
            .add_access_key(&b, AccessKey::new("shared", "b", i64::MAX))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::AlreadyExists));
        assert_eq!(f.store.get_account_id_from_access_key("shared").await.unwrap(), a);
    }

    #[tokio::test]
    async fn duplicate_id_succeeds_with_empty_id() {
        let f = fixture();
        let owner = account(&f.store, "a@x.io").await;
        {
            // Simulate a counter that lags behind an id already listed.
            let mut graph = f.store.write_graph().unwrap();
            graph
                .account_to_access_keys_map
                .insert(owner.clone(), vec![EntityId::from("id_1")]);
        }
        let id = f
            .store
            .add_access_key(&owner, AccessKey::new("k", "k", i64::MAX))
            .await
            .unwrap();
        assert!(id.is_unassigned());
        assert!(f.store.get_account_id_from_access_key("k").await.is_err());
    }

    #[tokio::test]
    async fn expiry_boundary() {
        let f = fixture();
        let owner = account(&f.store, "a@x.io").await;
        let expires = 1_700_000_000_000;
        f.store
            .add_access_key(&owner, AccessKey::new("k", "k", expires))
            .await
            .unwrap();

        assert_eq!(
            f.store.get_account_id_from_access_key_at("k", expires - 1).unwrap(),
            owner
        );
        for now in [expires, expires + 1] {
            let err = f.store.get_account_id_from_access_key_at("k", now).unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::Expired));
            assert_eq!(err.message(), Some("The access key has expired."));
        }
        let err = f.store.get_account_id_from_access_key_at("nope", 0).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn other_accounts_cannot_touch_a_key() {
        let f = fixture();
        let a = account(&f.store, "a@x.io").await;
        let b = account(&f.store, "b@x.io").await;
        let key_id = f
            .store
            .add_access_key(&a, AccessKey::new("k", "k", i64::MAX))
            .await
            .unwrap();

        let not_found = |e: ota_types::StorageError| e.code() == Some(ErrorCode::NotFound);
        assert!(not_found(f.store.get_access_key(&b, &key_id).await.unwrap_err()));
        assert!(not_found(f.store.remove_access_key(&b, &key_id).await.unwrap_err()));
        let update = AccessKeyUpdate {
            id: key_id.clone(),
            expires: Some(0),
            ..Default::default()
        };
        assert!(not_found(f.store.update_access_key(&b, update).await.unwrap_err()));
        assert!(not_found(f.store.get_access_keys(&b).await.unwrap_err()));
        assert!(f.store.get_access_key(&a, &key_id).await.is_ok());
    }

    #[tokio::test]
    async fn update_refreshes_name_index_expiry() {
        let f = fixture();
        let owner = account(&f.store, "a@x.io").await;
        let now = ota_types::now_millis();
        let key_id = f
            .store
            .add_access_key(&owner, AccessKey::new("k", "old", now + HOUR_MS))
            .await
            .unwrap();

        f.store
            .update_access_key(
                &owner,
                AccessKeyUpdate {
                    id: key_id.clone(),
                    friendly_name: Some("new".into()),
                    expires: Some(now - HOUR_MS),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let key = f.store.get_access_key(&owner, &key_id).await.unwrap();
        assert_eq!(key.friendly_name, "new");
        assert_eq!(key.name, "k");
        let err = f.store.get_account_id_from_access_key("k").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Expired));
    }

    #[tokio::test]
    async fn update_without_id_is_not_found() {
        let f = fixture();
        let owner = account(&f.store, "a@x.io").await;
        let err = f
            .store
            .update_access_key(&owner, AccessKeyUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn remove_purges_all_indices() {
        let f = fixture();
        let owner = account(&f.store, "a@x.io").await;
        let key_id = f
            .store
            .add_access_key(&owner, AccessKey::new("k", "k", i64::MAX))
            .await
            .unwrap();
        f.store.remove_access_key(&owner, &key_id).await.unwrap();

        assert!(f.store.get_access_keys(&owner).await.unwrap().is_empty());
        assert!(f.store.get_account_id_from_access_key("k").await.is_err());
        assert!(f.store.verify().unwrap().is_valid());

        // The name is free again.
        f.store
            .add_access_key(&owner, AccessKey::new("k", "again", i64::MAX))
            .await
            .unwrap();
    }
}
