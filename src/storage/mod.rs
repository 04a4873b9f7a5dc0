//! Trait-based storage abstractions with in-memory reference implementations.

pub mod inmemory;
pub mod traits;

pub use inmemory::{MemoryClientRegistry, MemoryPendingAuthorizationStore, MemoryTokenStore};
pub use traits::*;

use std::future::Future;
use std::time::Duration;

use crate::errors::StorageError;

/// Run a store operation with an upper bound on how long it may take.
///
/// An elapsed bound surfaces as [`StorageError::Timeout`], which callers treat as a
/// transient failure. The operation itself is dropped; anything it already committed stands.
pub async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> traits::Result<T>
where
    F: Future<Output = traits::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(format!(
            "{} did not complete within {:?}",
            operation, limit
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let result = bounded(Duration::from_secs(1), "noop", async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: traits::Result<()> = bounded(Duration::from_millis(10), "stall", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StorageError::Timeout(_))));
    }
}
