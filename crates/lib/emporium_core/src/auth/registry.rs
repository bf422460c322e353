//! Server-side refresh-token registry.
//!
//! Holds at most one live refresh token per user. Only the SHA-256 digest of
//! a token is persisted; every lookup digests the presented value first.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::TokenRecord;
use crate::store::{Result, Store, StoreError};

/// SHA-256 hex digest of a refresh token.
pub fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct TokenRegistry {
    store: Arc<dyn Store>,
}

impl TokenRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Make `refresh_token` the live token of `user_id`, replacing any
    /// previous one in place.
    pub async fn save(&self, user_id: i64, refresh_token: &str) -> Result<TokenRecord> {
        debug!(user_id, "storing refresh token");
        self.store.insert_token(user_id, &digest(refresh_token)).await
    }

    /// Swap `presented` for `replacement`, but only while `presented` is still
    /// the user's live token. Of two rotations racing on the same token, one
    /// gets `NotFound`.
    pub async fn rotate(
        &self,
        user_id: i64,
        presented: &str,
        replacement: &str,
    ) -> Result<TokenRecord> {
        let record = self
            .store
            .rotate_token(user_id, &digest(presented), &digest(replacement))
            .await?;
        debug!(user_id, token_id = record.id, "refresh token rotated");
        Ok(record)
    }

    pub async fn find_by_value(&self, refresh_token: &str) -> Result<TokenRecord> {
        self.store.find_token_by_digest(&digest(refresh_token)).await
    }

    pub async fn find_by_user(&self, user_id: i64) -> Result<TokenRecord> {
        self.store.find_token_by_user(user_id).await
    }

    /// Delete the record holding `refresh_token`.
    pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
        if refresh_token.is_empty() {
            return Err(StoreError::NotFound("refresh token"));
        }
        let deleted = self
            .store
            .delete_token_by_digest(&digest(refresh_token))
            .await?;
        if deleted == 0 {
            return Err(StoreError::NotFound("refresh token"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn registry() -> TokenRegistry {
        TokenRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn digest_is_hex_sha256() {
        let d = digest("abc");
        assert_eq!(d.len(), 64);
        assert_eq!(
            d,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn save_then_find() {
        let reg = registry();
        let saved = reg.save(1, "t1").await.unwrap();
        assert_eq!(saved.refresh_token, digest("t1"));

        let by_value = reg.find_by_value("t1").await.unwrap();
        let by_user = reg.find_by_user(1).await.unwrap();
        assert_eq!(by_value, by_user);
        assert_eq!(by_value.user_id, 1);
    }

    #[tokio::test]
    async fn second_save_replaces_in_place() {
        let reg = registry();
        let first = reg.save(1, "t1").await.unwrap();
        let second = reg.save(1, "t2").await.unwrap();
        assert_eq!(first.id, second.id);

        assert!(matches!(
            reg.find_by_value("t1").await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(reg.find_by_value("t2").await.unwrap().user_id, 1);
    }

    #[tokio::test]
    async fn rotate_requires_the_live_token() {
        let reg = registry();
        reg.save(1, "t1").await.unwrap();

        let rotated = reg.rotate(1, "t1", "t2").await.unwrap();
        assert_eq!(rotated.refresh_token, digest("t2"));
        assert!(matches!(
            reg.rotate(1, "t1", "t3").await,
            Err(StoreError::NotFound(_))
        ));
        // Another user's live token can not be rotated.
        assert!(matches!(
            reg.rotate(2, "t2", "t3").await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(reg.find_by_user(1).await.unwrap().refresh_token, digest("t2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_rotations_of_one_token_have_one_winner() {
        let reg = registry();
        reg.save(1, "t0").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let reg = reg.clone();
                tokio::spawn(async move { reg.rotate(1, "t0", &format!("next-{n}")).await })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(StoreError::NotFound(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
        assert!(matches!(
            reg.find_by_value("t0").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn users_are_independent() {
        let reg = registry();
        reg.save(1, "a").await.unwrap();
        reg.save(2, "b").await.unwrap();
        reg.revoke("a").await.unwrap();
        assert!(reg.find_by_user(1).await.is_err());
        assert_eq!(reg.find_by_user(2).await.unwrap().user_id, 2);
    }

    #[tokio::test]
    async fn revoke_removes_the_record() {
        let reg = registry();
        reg.save(1, "t1").await.unwrap();
        reg.revoke("t1").await.unwrap();
        assert!(matches!(
            reg.find_by_user(1).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn revoking_unknown_or_empty_token_is_not_found() {
        let reg = registry();
        reg.save(1, "t1").await.unwrap();
        assert!(matches!(
            reg.revoke("other").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(reg.revoke("").await, Err(StoreError::NotFound(_))));
        // The live token survives failed revocations.
        assert!(reg.find_by_value("t1").await.is_ok());
    }

    #[tokio::test]
    async fn revoking_twice_fails_the_second_time() {
        let reg = registry();
        reg.save(1, "t1").await.unwrap();
        reg.revoke("t1").await.unwrap();
        assert!(matches!(
            reg.revoke("t1").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
