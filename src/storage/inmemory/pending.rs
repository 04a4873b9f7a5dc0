//! In-memory pending-authorization store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::errors::StorageError;
use crate::oauth::types::PendingAuthorization;
use crate::storage::traits::{PendingAuthorizationStore, Result};

/// In-memory implementation of [`PendingAuthorizationStore`]
#[derive(Default)]
pub struct MemoryPendingAuthorizationStore {
    entries: Mutex<Entries>,
}

type Entries = HashMap<String, (PendingAuthorization, Option<DateTime<Utc>>)>;

impl MemoryPendingAuthorizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>> {
        self.entries.lock().map_err(|e| {
            StorageError::LockPoisoned(format!("Pending authorization lock error: {}", e))
        })
    }

    /// Drop entries whose consent never arrived, returning how many went.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| expires_at.is_none_or(|expires_at| expires_at > now));
        Ok(before - entries.len())
    }
}

#[async_trait]
impl PendingAuthorizationStore for MemoryPendingAuthorizationStore {
    async fn put(
        &self,
        key: &str,
        data: PendingAuthorization,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidArgument(
                "Pending authorization key must not be empty".to_string(),
            ));
        }
        self.lock()?.insert(key.to_string(), (data, expires_at));
        Ok(())
    }

    async fn pop(&self, key: &str) -> Result<PendingAuthorization> {
        match self.lock()?.remove(key) {
            Some((_, Some(expires_at))) if expires_at <= Utc::now() => Err(
                StorageError::NotFound(format!("Pending authorization '{}' has expired", key)),
            ),
            Some((data, _)) => Ok(data),
            None => Err(StorageError::NotFound(format!(
                "No pending authorization for '{}'",
                key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::scope::Scope;
    use crate::oauth::types::ResponseType;
    use chrono::Duration;

    fn pending() -> PendingAuthorization {
        PendingAuthorization {
            client_id: "client".to_string(),
            response_type: ResponseType::Code,
            scope: Scope::parse("read").unwrap(),
            redirect_uri: "https://a.example/cb".to_string(),
            redirect_uri_supplied: true,
            state: Some("S".to_string()),
        }
    }

    #[tokio::test]
    async fn test_pop_is_exactly_once() {
        let store = MemoryPendingAuthorizationStore::new();
        store.put("key", pending(), None).await.unwrap();

        assert_eq!(store.pop("key").await.unwrap(), pending());
        assert!(matches!(
            store.pop("key").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pop_missing() {
        let store = MemoryPendingAuthorizationStore::new();
        assert!(matches!(
            store.pop("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed_and_not_found() {
        let store = MemoryPendingAuthorizationStore::new();
        store
            .put("key", pending(), Some(Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();

        assert!(matches!(
            store.pop("key").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unexpired_entry_pops() {
        let store = MemoryPendingAuthorizationStore::new();
        store
            .put("key", pending(), Some(Utc::now() + Duration::minutes(5)))
            .await
            .unwrap();
        assert!(store.pop("key").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_drops_abandoned_entries() {
        let store = MemoryPendingAuthorizationStore::new();
        let expired = Some(Utc::now() - Duration::seconds(1));
        for n in 0..1000 {
            store
                .put(&format!("abandoned-{}", n), pending(), expired)
                .await
                .unwrap();
        }
        store
            .put("live", pending(), Some(Utc::now() + Duration::minutes(5)))
            .await
            .unwrap();
        store.put("forever", pending(), None).await.unwrap();
        assert_eq!(store.len(), 1002);

        assert_eq!(store.purge_expired().await.unwrap(), 1000);
        assert_eq!(store.len(), 2);
        assert!(store.pop("live").await.is_ok());
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_pops_single_winner() {
        let store = std::sync::Arc::new(MemoryPendingAuthorizationStore::new());
        store.put("key", pending(), None).await.unwrap();

        let pops = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.pop("key").await.is_ok() })
        });
        let wins = futures::future::join_all(pops)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(wins, 1);
    }
}
