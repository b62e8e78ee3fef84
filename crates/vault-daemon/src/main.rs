//! vault-daemon: watch, diff, and merge local vault directories.
//!
//! Uses vault-core's change subscriptions and tree diff over a native
//! filesystem.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use vault_core::diff::{self, ChangeKind, DiffOptions};
use vault_core::{Vault, watch};
use vault_daemon::config::{Config, expand_tilde};
use vault_daemon::native_fs::NativeFs;

#[derive(Parser, Debug)]
#[command(name = "vault-daemon")]
#[command(about = "Watch, diff, and merge vault directories")]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every change under a directory as a JSON line until Ctrl+C
    Watch {
        /// Directory to watch (defaults to $VAULT_ROOT)
        dir: Option<String>,

        /// Only report paths matching this glob (repeatable)
        #[arg(short, long = "pattern")]
        patterns: Vec<String>,

        /// Debounce in milliseconds (defaults to $VAULT_WATCH_DEBOUNCE_MS or 200)
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
    /// Print the changes that would make RIGHT mirror LEFT
    Diff(DiffArgs),
    /// Apply the changes that make RIGHT mirror LEFT
    Merge(DiffArgs),
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// Source directory
    left: String,

    /// Target directory
    right: String,

    /// Subtree of the source to compare
    #[arg(long, default_value = "/")]
    left_path: String,

    /// Subtree of the target to compare
    #[arg(long, default_value = "/")]
    right_path: String,

    /// Do not descend into folders that exist on one side only
    #[arg(long)]
    shallow: bool,

    /// Compare file bytes instead of size and mtime
    #[arg(long)]
    compare_content: bool,

    /// Limit to these paths and their descendants (repeatable)
    #[arg(long = "path")]
    paths: Vec<String>,

    /// Keep only these change kinds: add, mod, del (repeatable)
    #[arg(long = "op")]
    ops: Vec<ChangeKind>,
}

impl DiffArgs {
    fn options(&self) -> DiffOptions {
        DiffOptions {
            compare_content: self.compare_content,
            shallow: self.shallow,
            filter: None,
            paths: self.paths.clone(),
            ops: self.ops.clone(),
        }
    }

    fn vaults(&self) -> (Vault, Vault) {
        (open(&self.left), open(&self.right))
    }
}

fn open(dir: &str) -> Vault {
    Vault::filesystem(NativeFs::new(expand_tilde(dir)))
}

async fn run_watch(dir: Option<String>, patterns: Vec<String>, debounce_ms: Option<u64>) -> Result<()> {
    let config = Config::resolve(dir, debounce_ms)?;
    let root: PathBuf = config
        .root
        .canonicalize()
        .with_context(|| format!("Cannot watch {:?}", config.root))?;

    info!("Watching {:?}", root);
    if !patterns.is_empty() {
        info!("Patterns: {:?}", patterns);
    }

    let vault = Vault::filesystem(NativeFs::with_watch_config(root, config.watch));
    let mut changes = watch(&vault, &patterns[..])?;

    info!("Daemon running. Press Ctrl+C to stop.");
    loop {
        tokio::select! {
            Some(event) = changes.recv() => {
                println!("{}", serde_json::to_string(&event)?);
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    changes.close();
    info!("Shutting down");
    Ok(())
}

async fn run_diff(args: DiffArgs, apply: bool) -> Result<()> {
    let (left, right) = args.vaults();
    let options = args.options();
    debug!("Diff options: {:?}", options);

    let changes = if apply {
        diff::merge(&left, &args.left_path, &right, &args.right_path, &options).await?
    } else {
        diff::diff(&left, &args.left_path, &right, &args.right_path, &options).await?
    };

    println!("{}", serde_json::to_string_pretty(&changes)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if cli.verbose {
        "info,vault_daemon=debug,vault_core=debug"
    } else {
        "info,vault_daemon=info,vault_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Watch {
            dir,
            patterns,
            debounce_ms,
        } => run_watch(dir, patterns, debounce_ms).await,
        Command::Diff(args) => run_diff(args, false).await,
        Command::Merge(args) => run_diff(args, true).await,
    }
}
