use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use worldsync::health::CheckResult;
use worldsync::notify::{self, StatusMessage};
use worldsync::{
    BindingDocument, BindingStore, Config, DirectoryScanner, GitClient, GitHubCatalog,
    HealthCheck, Notifier, ReconcileReport, ReconciliationEngine, RetryableFileOps, Severity,
    StateDb, SyncOperation,
};

#[derive(Parser)]
#[command(name = "worldsync")]
#[command(about = "Keeps game save folders mirrored to private GitHub repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file and optionally store a GitHub token
    Init {
        /// Directory holding one folder per world
        #[arg(short, long)]
        saves_dir: Option<String>,

        /// Token stored in the bindings file (the environment variable still wins)
        #[arg(long)]
        token: Option<String>,
    },

    /// Full reconciliation of local worlds, GitHub and the bindings file
    Reconcile,

    /// Pull the latest backup of every enabled world
    Refresh,

    /// Start backing up a world
    Enable { name: String },

    /// Stop backing up a world and remove its git metadata
    Disable { name: String },

    /// Push a world now, as when the game closes it
    Push { name: String },

    /// Forget a world that was deleted locally
    Delete { name: String },

    /// Show every known world and its backup state
    List,

    /// Show recent sync events
    History {
        /// Only events for this world
        #[arg(long)]
        world: Option<String>,

        /// Number of events to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,

        /// Only events not yet marked as read
        #[arg(long)]
        unread: bool,

        /// Mark every event as read afterwards
        #[arg(long)]
        ack: bool,
    },

    /// System health check and diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match (&cli.command, &cli.config) {
        (Commands::Init { .. }, Some(path)) if !path.exists() => Config::default(),
        _ => load_config(cli.config.clone())?,
    };
    init_logging(&config, cli.verbose)?;
    debug!("Starting worldsync v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Init { saves_dir, token } => cmd_init(saves_dir, token, cli.config, &config),
        Commands::Reconcile => {
            let mut session = Session::open(&config)?;
            let report = session.engine.on_startup(&mut session.doc).await;
            finish_pass(session, report)
        }
        Commands::Refresh => {
            let mut session = Session::open(&config)?;
            let report = session.engine.on_browse_opened(&mut session.doc).await;
            finish_pass(session, report)
        }
        Commands::Enable { name } => {
            let mut session = Session::open(&config)?;
            let changed = session.engine.on_enable(&mut session.doc, &name).await;
            session.finish(changed)
        }
        Commands::Disable { name } => {
            let mut session = Session::open(&config)?;
            let changed = session.engine.on_disable(&mut session.doc, &name).await;
            session.finish(changed)
        }
        Commands::Push { name } => {
            let mut session = Session::open(&config)?;
            let changed = session.engine.on_shutdown(&mut session.doc, &name).await;
            session.finish(changed)
        }
        Commands::Delete { name } => {
            let mut session = Session::open(&config)?;
            let changed = session.engine.on_delete(&mut session.doc, &name).await;
            session.finish(changed)
        }
        Commands::List => cmd_list(&config).await,
        Commands::History {
            world,
            limit,
            unread,
            ack,
        } => cmd_history(&config, world, limit, unread, ack),
        Commands::Doctor => cmd_doctor(&config).await,
    }
}

/// Configured level, `--verbose` forces debug, `RUST_LOG` overrides both
fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

fn cmd_init(
    saves_dir: Option<String>,
    token: Option<String>,
    config_path: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    info!("Initializing worldsync...");

    let mut new_config = config.clone();
    if let Some(dir) = saves_dir {
        new_config.saves_directory = dir;
    }
    new_config.expand_paths()?;
    std::fs::create_dir_all(new_config.saves_path()).with_context(|| {
        format!(
            "Failed to create saves directory: {}",
            new_config.saves_directory
        )
    })?;

    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        if new_config.bindings_file.is_none() {
            new_config.bindings_file = Some(parent.join("bindings.json").to_string_lossy().into_owned());
        }
    }
    new_config.save(&config_path)?;

    let store = BindingStore::new(new_config.bindings_path()?);
    if let Some(token) = token {
        let mut doc = store.load()?;
        doc.access_token = token.trim().to_string();
        store.save(&doc)?;
    }

    println!("✅ worldsync initialized");
    println!("   Config: {}", config_path.display());
    println!("   Saves directory: {}", new_config.saves_directory);
    println!("   Bindings: {}", store.path().display());
    println!("   Next: run 'worldsync reconcile'");

    Ok(())
}

/// Environment variable first, then the token stored in the bindings file
fn resolve_token(config: &Config, doc: &BindingDocument) -> Option<String> {
    config
        .token_from_env()
        .or_else(|| Some(doc.access_token.trim().to_string()).filter(|t| !t.is_empty()))
}

fn build_engine(config: &Config, token: Option<String>) -> Result<ReconciliationEngine> {
    let catalog = Arc::new(GitHubCatalog::new(config, token.clone())?);
    let vcs = Arc::new(GitClient::new(config, token));
    let operation = SyncOperation::new(
        vcs,
        catalog.clone(),
        RetryableFileOps::new(config.sync.delete_attempts, config.delete_backoff()),
        config.github.git_base_url.clone(),
    );

    let mut notifier = Notifier::new();
    if config.state.enabled {
        notifier = notifier.with_event_log(open_state_db(config)?);
    }

    Ok(ReconciliationEngine::new(
        DirectoryScanner::new(config.saves_path()),
        catalog,
        operation,
        notifier,
        config.sync.max_parallel,
    ))
}

/// Open the event log and prune acknowledged events past retention
fn open_state_db(config: &Config) -> Result<StateDb> {
    let db = match &config.state.db_path {
        Some(path) => StateDb::open_at(PathBuf::from(path))?,
        None => StateDb::open()?,
    };
    if config.state.retention_days > 0 {
        let pruned = db.cleanup_old_events(config.state.retention_days)?;
        if pruned > 0 {
            debug!("Pruned {} old events", pruned);
        }
    }
    Ok(db)
}

/// Bindings, the engine built from them, and a subscription to its messages
struct Session {
    store: BindingStore,
    doc: BindingDocument,
    engine: ReconciliationEngine,
    messages: Receiver<StatusMessage>,
}

impl Session {
    fn open(config: &Config) -> Result<Self> {
        let store = BindingStore::new(config.bindings_path()?);
        let doc = store.load()?;
        let engine = build_engine(config, resolve_token(config, &doc))?;
        let messages = engine.notifier().subscribe();
        Ok(Self {
            store,
            doc,
            engine,
            messages,
        })
    }

    /// Print what happened and save the bindings when they changed
    fn finish(mut self, changed: bool) -> Result<()> {
        print_messages(&mut self.messages);
        if changed {
            self.store.save(&self.doc)?;
            debug!("Saved bindings to {}", self.store.path().display());
        }
        Ok(())
    }
}

fn finish_pass(session: Session, report: ReconcileReport) -> Result<()> {
    let failed = report.failed.clone();
    session.finish(report.changed)?;
    if !failed.is_empty() {
        println!("\n❌ Failed: {}", failed.join(", "));
    }
    Ok(())
}

fn print_messages(messages: &mut Receiver<StatusMessage>) {
    for message in notify::drain(messages) {
        let icon = match message.level {
            Severity::Info => "✅",
            Severity::Warning => "⚠️ ",
            Severity::Error => "❌",
        };
        println!("{} {}", icon, message.text);
    }
}

async fn cmd_list(config: &Config) -> Result<()> {
    let store = BindingStore::new(config.bindings_path()?);
    let doc = store.load()?;
    let local = DirectoryScanner::new(config.saves_path())
        .list_local_directories()
        .await
        .context("Failed to scan saves directory")?;

    let db = if config.state.enabled {
        open_state_db(config).ok()
    } else {
        None
    };

    println!("Worlds in {}:", config.saves_directory);

    let mut names: Vec<&String> = doc.backed_up_worlds.keys().chain(local.iter()).collect();
    names.sort();
    names.dedup();

    for name in names {
        let here = if local.contains(name) { "local" } else { "remote only" };
        match doc.backed_up_worlds.get(name) {
            Some(binding) if binding.enabled => {
                println!("  🟢 {} [{}] → {}", name, here, display_repo(&binding.repo_full_name));
            }
            Some(binding) => {
                println!("  ⚪ {} [{}] → {} (disabled)", name, here, display_repo(&binding.repo_full_name));
            }
            None if doc.no_backup_worlds.contains(name) => {
                println!("  🚫 {} [{}] excluded", name, here);
            }
            None => println!("  ⚪ {} [{}] not backed up", name, here),
        }
        if let Some(state) = db.as_ref().and_then(|db| db.get_world(name).ok().flatten()) {
            println!(
                "      last: {} at {}{}",
                state.last_status.as_str(),
                state.updated_at.format("%Y-%m-%d %H:%M:%S"),
                state
                    .last_message
                    .map(|m| format!(" ({})", m))
                    .unwrap_or_default()
            );
        }
    }

    let excluded_remote: Vec<_> = doc
        .no_backup_worlds
        .iter()
        .filter(|name| !local.contains(*name))
        .collect();
    for name in excluded_remote {
        println!("  🚫 {} [remote only] excluded", name);
    }

    Ok(())
}

fn display_repo(full_name: &str) -> &str {
    if full_name.is_empty() {
        "(no repository yet)"
    } else {
        full_name
    }
}

fn cmd_history(
    config: &Config,
    world: Option<String>,
    limit: u32,
    unread: bool,
    ack: bool,
) -> Result<()> {
    let db = open_state_db(config)?;
    let events = match (&world, unread) {
        (_, true) => db
            .unacknowledged_events()?
            .into_iter()
            .filter(|e| world.is_none() || e.world == world)
            .take(limit as usize)
            .collect(),
        (Some(world), false) => db.events_for_world(world, Some(limit))?,
        (None, false) => db.recent_events(limit)?,
    };

    if events.is_empty() {
        println!("No sync events recorded");
        return Ok(());
    }

    for event in events.iter().rev() {
        println!(
            "{} [{}] {}{}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.severity.as_str(),
            event
                .world
                .as_deref()
                .map(|w| format!("{}: ", w))
                .unwrap_or_default(),
            event.summary
        );
        if let Some(details) = &event.details {
            println!("    {}", details);
        }
    }

    let (_, warnings, errors) = db.unacknowledged_counts()?;
    if ack {
        let marked = db.acknowledge_all_events()?;
        println!("\nMarked {} events as read", marked);
    } else if warnings + errors > 0 {
        println!("\n{} errors and {} warnings unread", errors, warnings);
    }

    Ok(())
}

async fn cmd_doctor(config: &Config) -> Result<()> {
    let store = BindingStore::new(config.bindings_path()?);
    let doc = store.load()?;
    let health = HealthCheck::run(config, resolve_token(config, &doc)).await;
    print_health_report(&health);
    Ok(())
}

fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 worldsync diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
