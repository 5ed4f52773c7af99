pub mod chunking;
pub mod indexer;
pub mod ingest;
pub mod manifest;
pub mod registry;

use sha2::{Digest, Sha256};

/// Deterministic repository identifier: the first 16 hex chars of
/// sha256(repo_url). The same URL always maps to the same id, which is what
/// makes registration idempotent.
pub fn repo_id(repo_url: &str) -> String {
    hex::encode(Sha256::digest(repo_url.as_bytes()))[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_id_is_deterministic() {
        let a = repo_id("https://github.com/example/project");
        let b = repo_id("https://github.com/example/project");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn distinct_urls_get_distinct_ids() {
        assert_ne!(
            repo_id("https://github.com/example/a"),
            repo_id("https://github.com/example/b")
        );
    }
}
