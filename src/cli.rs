use clap::{Parser, Subcommand};

/// RepoLens - authenticated repository indexing and chat gateway
#[derive(Parser)]
#[command(name = "repolens", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Manage API keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Issue a new API key (the raw secret is printed once)
    Create {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "API Key")]
        name: String,
        #[arg(long)]
        environment: Option<String>,
        /// Comma-separated scopes, e.g. repo:read,repo:explain
        #[arg(long, value_delimiter = ',')]
        scopes: Option<Vec<String>>,
        /// RFC 3339 expiry timestamp
        #[arg(long)]
        expires_at: Option<String>,
    },
    /// List keys for an owner
    List {
        #[arg(long)]
        email: String,
    },
    /// Revoke a key by id
    Revoke {
        #[arg(long)]
        key_id: String,
    },
}
