use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// 64-char hex key used to envelope-encrypt stored upstream credentials.
    pub encryption_key: String,
    /// Directory where repositories are cloned for indexing.
    pub repos_dir: PathBuf,
    /// Base URL of the OpenAI-compatible LLM endpoint (embeddings + chat).
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub chat_model: String,
    pub embed_model: String,
    /// Base URL of the GitHub API, overridable for tests.
    pub github_api_url: String,
    /// Bound on the usage-log queue; events past it are dropped, not queued.
    pub usage_queue_capacity: usize,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let encryption_key = std::env::var("REPOLENS_ENCRYPTION_KEY")
        .unwrap_or_else(|_| "CHANGE_ME_32_BYTE_HEX_KEY".into());

    if encryption_key == "CHANGE_ME_32_BYTE_HEX_KEY" {
        let env_mode = std::env::var("REPOLENS_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "REPOLENS_ENCRYPTION_KEY is still the insecure placeholder. \
                 Set a proper 64-char hex key before running in production."
            );
        }
        eprintln!("⚠️  REPOLENS_ENCRYPTION_KEY is not set - using insecure placeholder. Set a 64-char hex key for production.");
    }

    Ok(Config {
        port: std::env::var("REPOLENS_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/repolens".into()),
        encryption_key,
        repos_dir: std::env::var("REPOLENS_REPOS_DIR")
            .unwrap_or_else(|_| "repos".into())
            .into(),
        llm_base_url: std::env::var("REPOLENS_LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
        llm_api_key: std::env::var("REPOLENS_LLM_API_KEY").ok(),
        chat_model: std::env::var("REPOLENS_CHAT_MODEL")
            .unwrap_or_else(|_| "gpt-4o-mini".into()),
        embed_model: std::env::var("REPOLENS_EMBED_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".into()),
        github_api_url: std::env::var("REPOLENS_GITHUB_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".into()),
        usage_queue_capacity: std::env::var("REPOLENS_USAGE_QUEUE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1024),
    })
}
