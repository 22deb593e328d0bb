//! memvault - search your memories, online or off.
//!
//! A thin command-line front end over `memvault-core`: sign in, keep an
//! offline replica of your records, search it, and warm the asset cache.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use chrono::Local;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use memvault_core::api::{ApiClient, RemoteSource, UnconfiguredSource};
use memvault_core::auth::CredentialStore;
use memvault_core::cache::{JsonFileStore, ReplicaStore};
use memvault_core::network::NetworkMonitor;
use memvault_core::search::{OfflineSearchEngine, SearchRouter};
use memvault_core::sync::{ReplicaStatus, SyncManager};
use memvault_core::utils::{format_age, format_date, truncate_string};
use memvault_core::worker::{
    AssetRequest, AssetWorker, DiskCacheStorage, HttpFetcher, Url, WorkerConfig,
};
use memvault_core::Config;

// ============================================================================
// Constants
// ============================================================================

/// Directory for a daily-rolling log file, in addition to stderr
const ENV_LOG_DIR: &str = "MEMVAULT_LOG_DIR";

const LOG_FILE_PREFIX: &str = "memvault.log";

/// Width of the content column in search output
const CONTENT_PREVIEW_CHARS: usize = 80;

/// Asset buckets live under the per-user cache directory
const ASSET_CACHE_DIR: &str = "assets";

#[derive(Parser)]
#[command(name = "memvault")]
#[command(about = "Search your memories, online or off")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store an access token and download your memories
    Login {
        /// Remote user id
        user_id: String,
    },
    /// Forget the token and delete the local replica
    Logout,
    /// Refresh the local replica
    Sync {
        /// Always download, even if a replica exists
        #[arg(short, long)]
        force: bool,
    },
    /// Search memories (`key:value` for tag search)
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Show replica and sync status
    Status {
        /// Print the sync state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Force offline mode on or off
    Offline {
        #[arg(value_parser = ["on", "off"])]
        mode: String,
    },
    /// Fetch URLs through the asset cache
    Assets {
        /// Absolute URLs or paths relative to the app URL
        #[arg(required = true, num_args = 1..)]
        urls: Vec<String>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // RUST_LOG controls the level (e.g., RUST_LOG=memvault_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let cli = Cli::parse();
    debug!(command = ?cli.command, "memvault starting");

    match cli.command {
        Commands::Login { user_id } => login(user_id).await,
        Commands::Logout => logout().await,
        Commands::Sync { force } => sync(force).await,
        Commands::Search { query } => search(&query.join(" ")).await,
        Commands::Status { json } => status(json).await,
        Commands::Offline { mode } => set_offline(mode == "on"),
        Commands::Assets { urls } => assets(&urls).await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Everything a command needs, built from the current config.
struct App {
    config: Config,
    store: ReplicaStore,
    remote: Arc<dyn RemoteSource>,
    network: NetworkMonitor,
}

impl App {
    async fn load() -> Result<Self> {
        let config = Config::load()?;
        let store = replica_store(&config.cache_dir()?);
        let remote = remote_source(&config)?;

        // One probe per invocation; offline mode always wins.
        let online = !config.offline_mode && remote.ping().await;
        info!(online, offline_mode = config.offline_mode, "Connectivity checked");

        Ok(Self {
            config,
            store,
            remote,
            network: NetworkMonitor::new(online),
        })
    }

    fn sync_manager(&self) -> SyncManager {
        SyncManager::new(
            Arc::clone(&self.remote),
            self.store.clone(),
            self.network.clone(),
        )
    }
}

fn replica_store(cache_dir: &Path) -> ReplicaStore {
    let kv = JsonFileStore::in_dir(cache_dir, ReplicaStore::namespace());
    ReplicaStore::new(Arc::new(kv))
}

fn remote_source(config: &Config) -> Result<Arc<dyn RemoteSource>> {
    let Some(api_url) = config.api_url.as_deref() else {
        debug!("No API URL configured, running against the local replica only");
        return Ok(Arc::new(UnconfiguredSource));
    };

    let mut client = ApiClient::new(api_url).context("Failed to create API client")?;
    if let Some(key) = config.api_key.clone() {
        client.set_api_key(key);
    }
    if let Some(user_id) = config.user_id.as_deref() {
        if CredentialStore::has_token(user_id) {
            client = client.with_token(CredentialStore::get_token(user_id)?);
        }
    }
    Ok(Arc::new(client))
}

/// Edit the config file without persisting environment overrides.
fn update_config(edit: impl FnOnce(&mut Config)) -> Result<Config> {
    let path = Config::config_path()?;
    let mut config = Config::load_from(&path)?;
    edit(&mut config);
    config.save_to(&path)?;
    Ok(config)
}

// ============================================================================
// Commands
// ============================================================================

async fn login(user_id: String) -> Result<()> {
    let token = rpassword::prompt_password("Access token: ").context("Failed to read token")?;
    let token = token.trim();
    if token.is_empty() {
        bail!("Token cannot be empty");
    }

    CredentialStore::store_token(&user_id, token)?;
    update_config(|c| c.user_id = Some(user_id.clone()))?;
    println!("Signed in as {}", user_id);

    let ctx = App::load().await?;
    if !ctx.network.is_online() {
        println!("Offline - the replica will be downloaded on the next sync");
        return Ok(());
    }

    match ctx.sync_manager().ensure_replica_present(&user_id).await {
        Ok(ReplicaStatus::AlreadyPresent) => println!("Local replica is up to date"),
        Ok(ReplicaStatus::Synced(report)) => {
            println!("Downloaded {} memories", report.record_count)
        }
        Err(e) => eprintln!("Initial sync failed: {}", e),
    }
    Ok(())
}

async fn logout() -> Result<()> {
    let config = Config::load()?;
    let user_id = config.require_user()?.to_string();

    // The cache dir is per user, so resolve it before forgetting the user.
    replica_store(&config.cache_dir()?).clear().await;
    CredentialStore::delete(&user_id)?;
    update_config(|c| c.user_id = None)?;

    println!("Signed out {}", user_id);
    Ok(())
}

async fn sync(force: bool) -> Result<()> {
    let ctx = App::load().await?;
    let user_id = ctx.config.require_user()?.to_string();
    let manager = ctx.sync_manager();

    let _progress = manager.subscribe(|state| {
        if state.is_syncing() {
            eprintln!("[{:>3}%] syncing", state.progress);
        }
    });

    let report = if force {
        manager.force_synchronize(&user_id).await?
    } else {
        manager.synchronize(&user_id).await?
    };

    println!(
        "Synced {} memories at {}",
        report.record_count,
        report.synced_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    Ok(())
}

async fn search(query: &str) -> Result<()> {
    let ctx = App::load().await?;
    let user_id = ctx.config.require_user()?.to_string();
    let online = ctx.network.is_online();

    let router = SearchRouter::new(
        Arc::clone(&ctx.remote),
        OfflineSearchEngine::new(ctx.store.clone()),
    );
    let hits = router.search(&user_id, query, online).await?;

    if !online {
        eprintln!("(offline - searching local replica)");
    }
    if hits.is_empty() {
        println!("No memories found");
        return Ok(());
    }

    for hit in hits {
        let record = &hit.record;
        let score = hit
            .score
            .map(|s| format!("  [{:.3}]", s))
            .unwrap_or_default();
        println!(
            "{}  {}{}",
            format_date(&record.event_date),
            truncate_string(&record.content, CONTENT_PREVIEW_CHARS),
            score
        );
        if !record.tags.is_empty() {
            println!("             {}", record.tag_summary());
        }
    }
    Ok(())
}

async fn status(json: bool) -> Result<()> {
    let ctx = App::load().await?;
    let manager = ctx.sync_manager();
    manager.restore().await;
    let state = manager.state();

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let user = ctx.config.user_id.as_deref().unwrap_or("(not signed in)");
    let owned = match ctx.config.user_id.as_deref() {
        Some(id) => ctx.store.matches_owner(id).await,
        None => false,
    };
    let count = if owned { ctx.store.load().await.len() } else { 0 };

    println!("User:        {}", user);
    println!(
        "Network:     {}{}",
        if ctx.network.is_online() { "online" } else { "offline" },
        if ctx.config.offline_mode { " (forced)" } else { "" }
    );
    println!("Replica:     {} memories", count);
    match state.last_synced_at {
        Some(at) => println!("Last sync:   {}", format_age(at)),
        None => println!("Last sync:   never"),
    }
    Ok(())
}

fn set_offline(on: bool) -> Result<()> {
    update_config(|c| c.offline_mode = on)?;
    println!("Offline mode {}", if on { "on" } else { "off" });
    Ok(())
}

async fn assets(urls: &[String]) -> Result<()> {
    let config = Config::load()?;
    let app_url = config
        .app_url
        .as_deref()
        .context("No app URL configured (set MEMVAULT_APP_URL or app_url in config.json)")?;
    let origin = Url::parse(app_url).with_context(|| format!("Invalid app URL {}", app_url))?;
    let version = config
        .app_version
        .clone()
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    let storage = DiskCacheStorage::new(config.cache_dir()?.join(ASSET_CACHE_DIR));
    let fetcher = HttpFetcher::new().context("Failed to create HTTP client")?;
    let handle = AssetWorker::new(
        WorkerConfig::new(origin.clone(), version),
        Arc::new(storage),
        Arc::new(fetcher),
    )
    .spawn();

    // Requests made before activation would go straight to the network.
    let state = match handle.settled().await {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Asset worker not ready: {}", e);
            handle.state().await?
        }
    };
    eprintln!("Asset worker {} ({})", handle.get_version().await.unwrap_or_default(), state);

    for raw in urls {
        let url = origin
            .join(raw)
            .with_context(|| format!("Invalid URL {}", raw))?;
        match handle.fetch(AssetRequest::get(url.clone())).await? {
            Some(resp) => println!(
                "{} {:<24} {:>8} bytes  {}",
                resp.status,
                resp.content_type.as_deref().unwrap_or("-"),
                resp.body.len(),
                url
            ),
            None => println!("--- not intercepted            {}", url),
        }
    }
    Ok(())
}
