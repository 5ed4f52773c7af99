use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod api;
mod auth;
mod chat;
mod cli;
mod config;
mod errors;
mod llm;
mod repo;
mod store;
mod vault;

use auth::{AuthGateway, UsageLogger};
use chat::{ChatEngine, ConversationStore};
use llm::{ChatClient, Embedder, HttpEmbedder};
use repo::indexer::{IndexCache, IndexingScheduler};
use repo::registry::RepoRegistry;
use store::postgres::PgStore;
use store::{ScopeSet, Store};
use vault::github::GithubClient;
use vault::CredentialVault;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: config::Config,
    pub store: Arc<dyn Store>,
    pub usage: UsageLogger,
    pub gateway: AuthGateway,
    pub registry: RepoRegistry,
    pub scheduler: Arc<IndexingScheduler>,
    pub conversations: Arc<ConversationStore>,
    pub engine: ChatEngine,
    pub vault: Arc<CredentialVault>,
    pub github: GithubClient,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "repolens=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Key { command }) => handle_key_command(cfg, command).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let store: Arc<dyn Store> = Arc::new(db);
    let state = Arc::new(build_state(cfg, store)?);

    let app = api::router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("RepoLens gateway listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn build_state(cfg: config::Config, store: Arc<dyn Store>) -> anyhow::Result<AppState> {
    let usage = UsageLogger::spawn(store.clone(), cfg.usage_queue_capacity);
    let gateway = AuthGateway::new(store.clone(), usage.clone());
    let registry = RepoRegistry::new(store.clone());
    let vault = Arc::new(CredentialVault::new(&cfg.encryption_key, store.clone())?);

    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
        cfg.llm_base_url.clone(),
        cfg.llm_api_key.clone(),
        cfg.embed_model.clone(),
    ));
    let scheduler = Arc::new(IndexingScheduler::new(
        store.clone(),
        vault.clone(),
        embedder.clone(),
        IndexCache::new(),
        cfg.repos_dir.clone(),
    ));

    let conversations = Arc::new(ConversationStore::new());
    let chat_client = ChatClient::new(
        cfg.llm_base_url.clone(),
        cfg.llm_api_key.clone(),
        cfg.chat_model.clone(),
    );
    let engine = ChatEngine::new(
        conversations.clone(),
        scheduler.clone(),
        store.clone(),
        embedder,
        chat_client,
    );

    let github = GithubClient::new(cfg.github_api_url.clone());

    Ok(AppState {
        config: cfg,
        store,
        usage,
        gateway,
        registry,
        scheduler,
        conversations,
        engine,
        vault,
        github,
    })
}

async fn handle_key_command(cfg: config::Config, cmd: cli::KeyCommands) -> anyhow::Result<()> {
    let db = PgStore::connect(&cfg.database_url).await?;
    let store: Arc<dyn Store> = Arc::new(db);
    let usage = UsageLogger::spawn(store.clone(), cfg.usage_queue_capacity);
    let gateway = AuthGateway::new(store.clone(), usage);

    match cmd {
        cli::KeyCommands::Create {
            email,
            name,
            environment,
            scopes,
            expires_at,
        } => {
            let scopes = ScopeSet(scopes.unwrap_or_default().into_iter().collect());
            let issued = gateway
                .issue(auth::gateway::IssueKeyRequest {
                    email,
                    name,
                    environment,
                    scopes,
                    expires_at,
                    ip_allowlist: None,
                })
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;

            println!(
                "API key created:\n  ID:  {}\n  Use: Authorization: Bearer {}",
                issued.key_id, issued.api_key
            );
            println!("The raw key is shown once and cannot be recovered.");
        }
        cli::KeyCommands::List { email } => {
            let keys = store.list_api_keys(&email).await?;
            if keys.is_empty() {
                println!("No API keys found.");
            } else {
                println!("{:<38} {:<20} {:<10} LAST USED", "ID", "NAME", "STATUS");
                for k in keys {
                    println!(
                        "{:<38} {:<20} {:<10} {}",
                        k.id,
                        k.name,
                        k.status.as_str(),
                        k.last_used_at
                            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "never".to_string())
                    );
                }
            }
        }
        cli::KeyCommands::Revoke { key_id } => {
            let id = Uuid::parse_str(&key_id)?;
            if store.revoke_api_key_if_active(id).await? {
                println!("API key revoked.");
            } else {
                println!("API key not found or already revoked.");
            }
        }
    }
    Ok(())
}
