//! Token string generation.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::RngCore;
use uuid::Uuid;

/// Produces unguessable token strings.
///
/// Implementations must draw from a cryptographically strong source; outputs must
/// not be derivable from earlier ones.
pub trait TokenFactory: Send + Sync {
    fn new_token(&self) -> String;
}

/// 256 bits from the OS-seeded thread RNG, base64url encoded without padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenFactory;

impl TokenFactory for RandomTokenFactory {
    fn new_token(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        BASE64_URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Random (v4) UUIDs in hyphenated form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTokenFactory;

impl TokenFactory for UuidTokenFactory {
    fn new_token(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
