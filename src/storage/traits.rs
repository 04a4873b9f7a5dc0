//! Storage trait definitions for clients, tokens and pending authorizations.
//!
//! Every operation is async and may suspend on I/O. Implementations must make each
//! call appear atomic per key; `TokenStore::take` and `PendingAuthorizationStore::pop`
//! are the compare-and-delete primitives the grant engine relies on for single use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StorageError;
use crate::oauth::scope::Scope;
use crate::oauth::types::{Client, PendingAuthorization, TokenRecord};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Registry of OAuth clients
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Retrieve a client by id, failing `NotFound` if it is not registered
    async fn get(&self, client_id: &str) -> Result<Client>;

    /// Register a client, failing `AlreadyExists` if the id is taken
    async fn add(&self, client: Client) -> Result<()>;
}

/// Persistence for issued tokens, keyed by the opaque token string.
///
/// Expiry is evaluated lazily on every read: an expired record behaves exactly like
/// an absent one.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or entirely replace the record for `token`
    async fn store(&self, token: &str, record: TokenRecord) -> Result<()>;

    /// True iff a non-expired record exists
    async fn contains(&self, token: &str) -> Result<bool>;

    /// Fetch the record, `None` if absent or expired
    async fn get(&self, token: &str) -> Result<Option<TokenRecord>>;

    /// Atomically remove and return the record, `None` if absent or expired.
    /// Of two concurrent calls for the same key at most one observes `Some`.
    async fn take(&self, token: &str) -> Result<Option<TokenRecord>>;

    /// Idempotent removal
    async fn revoke(&self, token: &str) -> Result<()>;

    /// Remember the grant `code` started when it was redeemed
    async fn record_redemption(
        &self,
        code: &str,
        grant_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Remove and return the grant recorded for `code`, `None` if nothing is recorded
    async fn take_redemption(&self, code: &str) -> Result<Option<String>>;

    /// Remove every token carrying `grant_id`, returning how many went.
    /// Tokens minted later by refreshing a token of the grant carry the same id.
    async fn revoke_grant(&self, grant_id: &str) -> Result<usize>;

    /// True iff every element of `required` is in the stored scope; `NotFound` if absent
    async fn has_access(&self, token: &str, required: &Scope) -> Result<bool> {
        match self.get(token).await? {
            Some(record) => Ok(required.is_subset_of(&record.scope)),
            None => Err(StorageError::NotFound(
                "Token is unknown or expired".to_string(),
            )),
        }
    }

    /// Scope and owner payload of a token; `NotFound` if absent
    async fn get_data(&self, token: &str) -> Result<(Scope, Option<serde_json::Value>)> {
        match self.get(token).await? {
            Some(record) => Ok((record.scope, record.additional_data)),
            None => Err(StorageError::NotFound(
                "Token is unknown or expired".to_string(),
            )),
        }
    }
}

/// Short-lived staging between the authorize and confirm steps
#[async_trait]
pub trait PendingAuthorizationStore: Send + Sync {
    /// Stage `data` under `key`
    async fn put(
        &self,
        key: &str,
        data: PendingAuthorization,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Remove and return the entry; `NotFound` if missing or expired. Exactly once per key.
    async fn pop(&self, key: &str) -> Result<PendingAuthorization>;
}
