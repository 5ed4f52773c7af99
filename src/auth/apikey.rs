//! API key wire format: a prefixed opaque token, compared only by its
//! one-way hash. The raw secret is surfaced exactly once at issuance.

use rand::RngCore;
use sha2::{Digest, Sha256};

pub const API_KEY_PREFIX: &str = "rl_live_";

/// Generate a fresh raw key: `rl_live_` + 48 hex chars (24 random bytes).
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, hex::encode(bytes))
}

/// Deterministic sha256 hex digest of a raw key.
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_prefix_and_length() {
        let key = generate_api_key();
        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.len(), API_KEY_PREFIX.len() + 48);
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(generate_api_key(), generate_api_key());
    }

    #[test]
    fn hash_is_deterministic_and_hides_the_secret() {
        let key = "rl_live_deadbeef";
        let hash = hash_api_key(key);
        assert_eq!(hash, hash_api_key(key));
        assert_eq!(hash.len(), 64);
        assert!(!hash.contains("deadbeef"));
    }
}
