//! In-memory storage implementations
//!
//! Reference implementations of the storage traits, suitable for development,
//! tests, and single-process deployments.

mod clients;
mod pending;
mod tokens;

pub use clients::MemoryClientRegistry;
pub use pending::MemoryPendingAuthorizationStore;
pub use tokens::MemoryTokenStore;
