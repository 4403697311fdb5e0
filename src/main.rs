use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use convtree::files::validate;
use convtree::files::FileStore;
use convtree::llm::{LlmGateway, OpenAiCompatClient};
use convtree::server::{self, AppState};
use convtree::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "convtree")]
#[command(version, about = "Conversation file registry and LLM gateway")]
struct Cli {
    /// Config file (defaults to ./convtree.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Register every tracked file under the storage root
    Migrate,
    /// Classify the JSON files under ROOT (defaults to the storage root)
    Check { root: Option<PathBuf> },
    /// Rewrite stored paths to the root-relative convention
    NormalizePaths,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let store = FileStore::new(&config).context("Failed to open file store")?;
            let client = OpenAiCompatClient::new(&config.llm)?;
            if config.llm.api_key.is_none() {
                warn!("GROQ_API_KEY is not set; LLM endpoints will fail with an authentication error");
            }
            info!(
                root = %store.resolver().root().display(),
                model = %config.llm.model,
                "Starting convtree"
            );
            let state = Arc::new(AppState {
                store,
                llm: LlmGateway::new(Arc::new(client)),
            });
            server::serve(state, &config.server).await
        }
        Command::Migrate => {
            let store = FileStore::new(&config)?;
            let report = store.registry().reconcile(None)?;
            info!(
                registered = report.registered,
                removed = report.removed,
                failed = report.failed.len(),
                "Migration finished"
            );
            for path in &report.failed {
                warn!("Could not register {}", path);
            }
            Ok(())
        }
        Command::Check { root } => {
            let root = root.unwrap_or_else(|| config.storage_root());
            let verdicts = validate::scan(&root);
            if verdicts.is_empty() {
                println!("No JSON files found.");
                return Ok(());
            }
            for (path, verdict) in &verdicts {
                match verdict {
                    validate::Verdict::Unreadable(reason) => {
                        println!("{} -> {} ({}): {}", path, verdict.code(), verdict.label(), reason)
                    }
                    _ => println!("{} -> {} ({})", path, verdict.code(), verdict.label()),
                }
            }
            std::process::exit(validate::overall_code(&verdicts));
        }
        Command::NormalizePaths => {
            let store = FileStore::new(&config)?;
            let report = store.registry().normalize_paths()?;
            for update in &report.updated {
                info!(id = update.id, "{}: {} -> {}", update.name, update.old, update.new);
            }
            for name in &report.missing {
                warn!("No file found on disk for {}", name);
            }
            info!(
                updated = report.updated.len(),
                missing = report.missing.len(),
                "Path normalization finished"
            );
            Ok(())
        }
    }
}
