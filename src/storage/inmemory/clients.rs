//! In-memory client registry

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::StorageError;
use crate::oauth::types::Client;
use crate::storage::traits::{ClientRegistry, Result};

/// In-memory implementation of [`ClientRegistry`]
#[derive(Default)]
pub struct MemoryClientRegistry {
    clients: Mutex<HashMap<String, Client>>,
}

impl MemoryClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Client>>> {
        self.clients
            .lock()
            .map_err(|e| StorageError::LockPoisoned(format!("Client registry lock error: {}", e)))
    }

    /// Replace a registered client, failing `NotFound` if the id is unknown
    pub async fn update(&self, client: Client) -> Result<()> {
        client.validate()?;
        let mut clients = self.lock()?;
        match clients.get_mut(&client.id) {
            Some(existing) => {
                *existing = client;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "Client '{}' is not registered",
                client.id
            ))),
        }
    }

    /// Remove a client; removing an unknown id is a no-op
    pub async fn remove(&self, client_id: &str) -> Result<()> {
        self.lock()?.remove(client_id);
        Ok(())
    }

    /// All registered clients, ordered by id
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<Client>> {
        let clients = self.lock()?;
        let mut result: Vec<_> = clients.values().cloned().collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }
}

#[async_trait]
impl ClientRegistry for MemoryClientRegistry {
    async fn get(&self, client_id: &str) -> Result<Client> {
        self.lock()?
            .get(client_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("Client '{}' is not registered", client_id)))
    }

    async fn add(&self, client: Client) -> Result<()> {
        client.validate()?;
        let mut clients = self.lock()?;
        if clients.contains_key(&client.id) {
            return Err(StorageError::AlreadyExists(format!(
                "Client '{}' is already registered",
                client.id
            )));
        }
        clients.insert(client.id.clone(), client);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::types::{ClientAuthMode, GrantType};

    fn test_client(id: &str) -> Client {
        Client::new(
            id,
            "Test Client",
            vec!["https://clientserver.example/return".to_string()],
            vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            ClientAuthMode::Confidential {
                secret: "test_secret".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let registry = MemoryClientRegistry::new();
        registry.add(test_client("test")).await.unwrap();

        let client = registry.get("test").await.unwrap();
        assert_eq!(client, test_client("test"));
    }

    #[tokio::test]
    async fn test_get_unknown_client() {
        let registry = MemoryClientRegistry::new();
        assert!(matches!(
            registry.get("missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_duplicate_rejected() {
        let registry = MemoryClientRegistry::new();
        registry.add(test_client("test")).await.unwrap();
        assert!(matches!(
            registry.add(test_client("test")).await,
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_add_invalid_client_rejected() {
        let registry = MemoryClientRegistry::new();
        let mut client = test_client("test");
        client.redirect_uris.clear();
        assert!(matches!(
            registry.add(client).await,
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(registry.get("test").await.is_err());
    }

    #[tokio::test]
    async fn test_update_remove_list() {
        let registry = MemoryClientRegistry::new();
        registry.add(test_client("b")).await.unwrap();
        registry.add(test_client("a")).await.unwrap();

        let mut updated = test_client("a");
        updated.name = "Renamed".to_string();
        registry.update(updated).await.unwrap();
        assert_eq!(registry.get("a").await.unwrap().name, "Renamed");
        assert!(matches!(
            registry.update(test_client("zzz")).await,
            Err(StorageError::NotFound(_))
        ));

        let ids: Vec<_> = registry
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(registry.list(Some(1)).await.unwrap().len(), 1);

        registry.remove("a").await.unwrap();
        registry.remove("a").await.unwrap();
        assert!(registry.get("a").await.is_err());
    }
}
