//! vault-search CLI - semantic search over a Markdown vault.
//!
//! Usage:
//!   vault-search index                 # Full rebuild of the index
//!   vault-search update                # Incremental update (daemon if running)
//!   vault-search search <query>        # Ranked search
//!   vault-search serve                 # Start the background daemon
//!   vault-search stop                  # Stop the background daemon
//!   vault-search status                # Daemon and index status
//!   vault-search config --vault <dir>  # Set the vault path

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vault_search::daemon::{self, Route};
use vault_search::indexer::tracking;
use vault_search::{build_direct, Config, DaemonController, SearchHit, StartOutcome};

const PREVIEW_CHARS: usize = 200;

#[derive(Parser)]
#[command(name = "vault-search")]
#[command(about = "Semantic search over a Markdown vault", long_about = None)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from scratch
    Index,

    /// Re-index only what changed since the last build
    Update,

    /// Search the vault
    Search {
        /// Free-text query
        query: String,

        /// Number of results (default from config)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Skip the reranking stage
        #[arg(long)]
        no_rerank: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start the background daemon
    Serve,

    /// Stop the background daemon
    Stop,

    /// Show daemon and index status
    Status,

    /// Show or change configuration
    Config {
        /// Set the vault directory
        #[arg(long)]
        vault: Option<PathBuf>,
    },

    /// Run the daemon in the foreground (used by `serve`)
    #[command(hide = true)]
    Daemon,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    let is_daemon = matches!(cli.command, Commands::Daemon);
    let default = match (is_daemon, cli.verbose) {
        (true, _) => "info",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!is_daemon)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;

    match cli.command {
        Commands::Index => {
            let root = config.vault_root()?;
            println!("Building index for: {}", root.display());
            let stats = build_direct(&config, false)?;
            println!("  Indexed {} documents", stats.changed);
            println!("  Index saved to {}", config.index_dir().display());
        }

        Commands::Update => {
            let controller = DaemonController::new(&config)?;
            let routed = controller.update()?;
            let via = match routed.route {
                Route::Daemon => "via daemon",
                Route::Direct => "direct",
            };
            println!(
                "{} changed, {} deleted ({})",
                routed.value.changed, routed.value.deleted, via
            );
        }

        Commands::Search {
            query,
            limit,
            no_rerank,
            json,
        } => {
            let limit = limit.unwrap_or(config.default_limit);
            let controller = DaemonController::new(&config)?;
            let routed = controller.search(&query, limit, !no_rerank)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&routed.value)?);
            } else {
                print_results(&query, &routed.value);
            }
        }

        Commands::Serve => {
            let controller = DaemonController::new(&config)?;
            match controller.start()? {
                StartOutcome::Started { pid } => println!("Daemon started (PID {})", pid),
                StartOutcome::AlreadyRunning { pid } => {
                    println!("Daemon already running (PID {})", pid)
                }
                StartOutcome::Busy => println!("Another process is starting the daemon"),
                StartOutcome::Failed { log } => {
                    anyhow::bail!("daemon failed to start, see {}", log.display())
                }
            }
        }

        Commands::Stop => {
            if daemon::stop_daemon(&config)? {
                println!("Daemon stopped");
            } else {
                println!("Daemon not running");
            }
        }

        Commands::Status => {
            match daemon::lifecycle::daemon_pid(&config) {
                Some(pid) => println!("Daemon:    running (PID {})", pid),
                None => println!("Daemon:    not running"),
            }
            if config.snapshot_exists() {
                let documents = tracking::load(&config.metadata_path()).len();
                println!("Index:     {} documents", documents);
            } else {
                println!("Index:     not built (run `vault-search index`)");
            }
            match &config.vault_path {
                Some(path) => println!("Vault:     {}", path.display()),
                None => println!("Vault:     (not set)"),
            }
        }

        Commands::Config { vault: Some(path) } => {
            let resolved = config.set_vault_path(&path)?;
            config.save()?;
            println!("Vault path set to: {}", resolved.display());
        }

        Commands::Config { vault: None } => {
            println!("Current configuration:");
            println!("  Config file:     {}", config.config_path().display());
            println!("  Data directory:  {}", config.data_dir.display());
            println!("  Index directory: {}", config.index_dir().display());
            match &config.vault_path {
                Some(path) => println!("  Vault path:      {}", path.display()),
                None => println!("  Vault path:      (not set)"),
            }
            println!("  Embedding:       {:?}", config.embedding.backend);
            println!("  Update interval: {}s", config.update_interval_secs);
            println!("  Index exists:    {}", config.snapshot_exists());
            println!("  Daemon running:  {}", daemon::daemon_running(&config));
        }

        Commands::Daemon => {
            daemon::run_daemon(config)?;
        }
    }

    Ok(())
}

fn print_results(query: &str, hits: &[SearchHit]) {
    let rule = "─".repeat(60);
    println!();
    println!("{}", rule);
    println!("Results for: {}", query);
    println!("{}", rule);
    println!();

    if hits.is_empty() {
        println!("No results");
        return;
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. {}", i + 1, hit.title);
        println!("   {}", hit.path);
        println!("   Score: {:.3}", hit.score);
        let preview = preview(&hit.text);
        if !preview.is_empty() {
            println!("   {}", preview);
        }
        println!();
    }
}

/// First characters of `text` on one line.
fn preview(text: &str) -> String {
    let mut out: String = text
        .chars()
        .take(PREVIEW_CHARS)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}
