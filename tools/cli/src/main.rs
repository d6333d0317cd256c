//! FieldSync CLI - Command line interface for sync operations.
//!
//! Runs sync cycles against a SQLite database, shows sync state and
//! manages the persisted server session.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fieldsync_store::{LocalStore, SqliteStore};
use fieldsync_sync::{
    AuthSessionProvider, OAuthSessionProvider, Session, SessionFile, StaticSessionProvider,
    SyncConfig, SyncEngine, SyncOutcome, SyncStateStore, TableRegistry,
};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "FieldSync - Offline-first sync for field data")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (JSON).
    #[arg(short, long, default_value = "fieldsync.json")]
    config: PathBuf,

    /// Local SQLite database.
    #[arg(short, long, default_value = "fieldsync.db")]
    database: PathBuf,

    /// Persisted session file.
    #[arg(short, long, default_value = "fieldsync-session.json")]
    session: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle.
    Sync,

    /// Run sync cycles one after another until interrupted.
    Watch {
        /// Seconds to wait between cycles.
        #[arg(short, long, default_value_t = 300)]
        interval: u64,
    },

    /// Show cursor, timestamps and per-table row counts.
    Status,

    /// Force a full resync on the next run.
    ResetCursor,

    /// Store a session for the sync server.
    Login {
        /// Bearer token for the sync server.
        #[arg(long)]
        access_token: String,

        /// Refresh token for the configured token endpoint.
        #[arg(long)]
        refresh_token: Option<String>,
    },

    /// Forget the stored session.
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&cli.config).await?;
    let session_file = SessionFile::new(&cli.session);

    match cli.command {
        Commands::Sync => cmd_sync(config, &cli.database, session_file).await,

        Commands::Watch { interval } => {
            cmd_watch(config, &cli.database, session_file, interval).await
        }

        Commands::Status => cmd_status(&config, &cli.database).await,

        Commands::ResetCursor => cmd_reset_cursor(&config, &cli.database).await,

        Commands::Login {
            access_token,
            refresh_token,
        } => cmd_login(&config, session_file, access_token, refresh_token).await,

        Commands::Logout => cmd_logout(&config, session_file).await,
    }
}

/// Load the configuration file, falling back to defaults when absent.
async fn load_config(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        warn!("No config at {}, using defaults", path.display());
        return Ok(SyncConfig::default());
    }

    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = SyncConfig::from_json(&json)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_store(config: &SyncConfig, database: &Path) -> Result<Arc<SqliteStore>> {
    let mut registry = TableRegistry::builtin();
    registry.apply_caps(&config.table_caps)?;
    let store = SqliteStore::open(database, &registry.specs())
        .with_context(|| format!("Failed to open database {}", database.display()))?;
    Ok(Arc::new(store))
}

/// Session provider for the configured auth mode.
async fn session_provider(
    config: &SyncConfig,
    file: SessionFile,
) -> Result<Arc<dyn AuthSessionProvider>> {
    match &config.oauth {
        Some(oauth) => Ok(Arc::new(
            OAuthSessionProvider::with_file(oauth.clone(), file)
                .await
                .context("Failed to load session")?,
        )),
        None => {
            let session = file.load().await.context("Failed to load session")?;
            Ok(Arc::new(StaticSessionProvider::new(session)))
        }
    }
}

async fn build_engine(
    config: SyncConfig,
    database: &Path,
    session_file: SessionFile,
) -> Result<SyncEngine> {
    let store = open_store(&config, database)?;
    let auth = session_provider(&config, session_file).await?;
    SyncEngine::builder(config, store, auth)
        .build()
        .context("Failed to create sync engine")
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(report) => {
            println!("Sync completed in {:?}", report.duration);
            println!("  Pushed:  {}", report.pushed);
            println!("  Pulled:  {}", report.pulled);
            println!("  Applied: {}", report.applied);
            if report.skipped > 0 {
                println!("  Skipped: {}", report.skipped);
            }
            println!("  Cursor:  {}", report.cursor);
            if report.self_healed {
                println!("  Cursor was reset: full resync performed");
            }
        }
        SyncOutcome::Failed {
            stage,
            error,
            pushed,
        } => {
            println!("Sync failed during {}: {}", stage, error);
            if *pushed > 0 {
                println!("  {} rows were pushed before the failure", pushed);
            }
        }
    }
}

/// Run a single sync cycle.
async fn cmd_sync(config: SyncConfig, database: &Path, session_file: SessionFile) -> Result<()> {
    let engine = build_engine(config, database, session_file).await?;

    let outcome = engine.run_sync().await;
    print_outcome(&outcome);

    match outcome {
        SyncOutcome::Completed(_) => Ok(()),
        SyncOutcome::Failed { stage, error, .. } => {
            Err(anyhow::Error::new(error).context(format!("Sync failed during {}", stage)))
        }
    }
}

/// Run sync cycles sequentially; a cycle never overlaps the previous one.
async fn cmd_watch(
    config: SyncConfig,
    database: &Path,
    session_file: SessionFile,
    interval: u64,
) -> Result<()> {
    let engine = build_engine(config, database, session_file).await?;
    let interval = Duration::from_secs(interval.max(1));
    info!("Watching, one sync every {:?}. Press Ctrl-C to stop.", interval);

    loop {
        let outcome = engine.run_sync().await;
        if let SyncOutcome::Failed { stage, error, .. } = &outcome {
            error!("Sync failed during {}: {}", stage, error);
            if matches!(error, fieldsync_common::Error::AuthRequired) {
                anyhow::bail!("Not signed in. Run `fieldsync login` first.");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                return Ok(());
            }
        }
    }
}

/// Show sync state and row counts.
async fn cmd_status(config: &SyncConfig, database: &Path) -> Result<()> {
    let store = open_store(config, database)?;
    let snapshot = SyncStateStore::new(store.as_ref())
        .snapshot()
        .await
        .context("Failed to read sync state")?;

    println!("Server:          {}", config.base_url);
    println!("Cursor:          {}", snapshot.cursor);
    println!(
        "Last sync:       {}",
        snapshot
            .last_sync_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "Last applied:    {}",
        snapshot
            .last_applied_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "Client id:       {}",
        config
            .client_id
            .clone()
            .or(snapshot.client_id)
            .unwrap_or_else(|| "(not assigned)".to_string())
    );

    println!();
    println!(
        "{:<24} {:>8} {:>8} {:>8} {:>8}",
        "TABLE", "PENDING", "SYNCED", "ERROR", "TOTAL"
    );
    let registry = TableRegistry::builtin();
    for spec in registry.specs() {
        let counts = store.count_by_status(spec).await?;
        println!(
            "{:<24} {:>8} {:>8} {:>8} {:>8}",
            spec.id.as_str(),
            counts.pending,
            counts.synced,
            counts.error,
            counts.total()
        );
    }

    Ok(())
}

/// Reset the pull cursor to zero.
async fn cmd_reset_cursor(config: &SyncConfig, database: &Path) -> Result<()> {
    let store = open_store(config, database)?;
    SyncStateStore::new(store.as_ref())
        .set_cursor(0)
        .await
        .context("Failed to reset cursor")?;

    println!("Cursor reset. The next sync pulls everything.");
    Ok(())
}

/// Persist a session.
async fn cmd_login(
    config: &SyncConfig,
    file: SessionFile,
    access_token: String,
    refresh_token: Option<String>,
) -> Result<()> {
    if access_token.trim().is_empty() {
        anyhow::bail!("Access token cannot be empty");
    }
    if refresh_token.is_some() && config.oauth.is_none() {
        warn!("No oauth section configured; the refresh token will not be used");
    }

    file.save(&Session::new(access_token, refresh_token))
        .await
        .context("Failed to save session")?;

    println!("Session saved to {}", file.path().display());
    Ok(())
}

/// Remove the persisted session.
async fn cmd_logout(config: &SyncConfig, file: SessionFile) -> Result<()> {
    let path = file.path().to_path_buf();
    let provider = session_provider(config, file.clone()).await?;
    provider.clear_session().await;
    file.remove().await.context("Failed to remove session")?;

    println!("Signed out ({} removed)", path.display());
    Ok(())
}
