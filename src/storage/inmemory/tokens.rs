//! In-memory token store
//!
//! All tables sit behind one mutex, so every operation is linearizable with respect
//! to every other. Expired records are dropped when a read finds them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::errors::StorageError;
use crate::oauth::types::TokenRecord;
use crate::storage::traits::{Result, TokenStore};

struct Redemption {
    grant_id: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Tables {
    tokens: HashMap<String, TokenRecord>,
    redemptions: HashMap<String, Redemption>,
}

impl Tables {
    /// Look up a live record, evicting it if it has expired.
    fn live(&mut self, token: &str, now: DateTime<Utc>) -> Option<&TokenRecord> {
        if self.tokens.get(token)?.is_expired_at(now) {
            self.tokens.remove(token);
            return None;
        }
        self.tokens.get(token)
    }
}

/// In-memory implementation of [`TokenStore`]
#[derive(Default)]
pub struct MemoryTokenStore {
    tables: Mutex<Tables>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| StorageError::LockPoisoned(format!("Token store lock error: {}", e)))
    }

    /// Drop every expired token and redemption record, returning how many tokens went.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut tables = self.lock()?;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, record| !record.is_expired_at(now));
        tables
            .redemptions
            .retain(|_, r| r.expires_at.is_none_or(|expires_at| expires_at > now));
        Ok(before - tables.tokens.len())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store(&self, token: &str, record: TokenRecord) -> Result<()> {
        if token.is_empty() {
            return Err(StorageError::InvalidArgument(
                "Token key must not be empty".to_string(),
            ));
        }
        self.lock()?.tokens.insert(token.to_string(), record);
        Ok(())
    }

    async fn contains(&self, token: &str) -> Result<bool> {
        Ok(self.lock()?.live(token, Utc::now()).is_some())
    }

    async fn get(&self, token: &str) -> Result<Option<TokenRecord>> {
        Ok(self.lock()?.live(token, Utc::now()).cloned())
    }

    async fn take(&self, token: &str) -> Result<Option<TokenRecord>> {
        let now = Utc::now();
        Ok(self
            .lock()?
            .tokens
            .remove(token)
            .filter(|record| !record.is_expired_at(now)))
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        self.lock()?.tokens.remove(token);
        Ok(())
    }

    async fn record_redemption(
        &self,
        code: &str,
        grant_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.lock()?.redemptions.insert(
            code.to_string(),
            Redemption {
                grant_id: grant_id.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn take_redemption(&self, code: &str) -> Result<Option<String>> {
        let now = Utc::now();
        Ok(self
            .lock()?
            .redemptions
            .remove(code)
            .filter(|r| r.expires_at.is_none_or(|expires_at| expires_at > now))
            .map(|r| r.grant_id))
    }

    async fn revoke_grant(&self, grant_id: &str) -> Result<usize> {
        let mut tables = self.lock()?;
        let before = tables.tokens.len();
        tables
            .tokens
            .retain(|_, record| record.grant_id.as_deref() != Some(grant_id));
        Ok(before - tables.tokens.len())
    }
}
