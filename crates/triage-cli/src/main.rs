mod config;
mod repl;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Overrides, Settings};
use triage_core::session::{numbered_transcript_text, to_backend_history};
use triage_core::{ControllerConfig, FileKeyValueStore, MessageStore, TriageBackend, TriageSessionController};

#[derive(Parser, Debug)]
#[command(name = "triage")]
#[command(about = "Conversational symptom triage client", long_about = None)]
struct Cli {
    /// Triage backend base URL (env: TRIAGE_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Per-request timeout in seconds (env: TRIAGE_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Message store directory (env: TRIAGE_STORE_DIR)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Debug logging for every crate
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive triage chat (default)
    Chat {
        /// Start a new session instead of resuming the stored one
        #[arg(long)]
        new: bool,
    },
    /// Probe the backend's /health endpoint
    Health,
    /// Print the numbered transcript of a stored session
    History {
        /// Session id (defaults to the current session)
        session: Option<String>,
    },
    /// Message store statistics
    Stats,
    /// Write the whole message store as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace the message store with a previous export
    Import { file: PathBuf },
    /// Extract symptoms with an LLM (needs OPENROUTER_API_KEY)
    Extract {
        #[command(subcommand)]
        source: ExtractSource,

        /// Model id (env: OPENROUTER_MODEL)
        #[arg(long, global = true)]
        model: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ExtractSource {
    /// A lab report text file
    Lab { file: PathBuf },
    /// A stored triage conversation (defaults to the current session)
    Conversation { session: Option<String> },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "triage=debug,triage_core=debug,triage_client=debug,llm=debug"
    } else {
        "triage=info,triage_core=warn,triage_client=warn,llm=warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_store(settings: &Settings) -> Result<MessageStore<FileKeyValueStore>> {
    let kv = FileKeyValueStore::open(&settings.store_dir)
        .with_context(|| format!("cannot open message store at {}", settings.store_dir.display()))?;
    let store = MessageStore::open(kv).context("message store is unreadable; export it or point TRIAGE_STORE_DIR elsewhere")?;
    Ok(store)
}

fn backend(settings: &Settings) -> Result<triage_client::Client> {
    Ok(triage_client::Client::new(settings.api_url.clone(), settings.request_timeout)?)
}

fn session_or_current(store: &MessageStore<FileKeyValueStore>, session: Option<String>) -> Result<String> {
    match session.or_else(|| store.current_session().map(str::to_string)) {
        Some(id) => Ok(id),
        None => bail!("no current session; pass a session id"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut overrides = Overrides {
        api_url: cli.api_url,
        timeout_secs: cli.timeout_secs,
        store_dir: cli.store_dir,
        model: None,
    };
    if let Some(Command::Extract { model, .. }) = &cli.command {
        overrides.model = model.clone();
    }
    let settings = Settings::from_env(overrides)?;
    info!(api_url = %settings.api_url, store = %settings.store_dir.display(), "settings loaded");

    match cli.command.unwrap_or(Command::Chat { new: false }) {
        Command::Chat { new } => {
            let controller = TriageSessionController::new(
                backend(&settings)?,
                open_store(&settings)?,
                ControllerConfig { request_timeout: settings.request_timeout },
            );
            let mut repl = repl::Repl::new(controller);
            repl.open(new).await?;
            repl.run().await?;
        }
        Command::Health => {
            let health = backend(&settings)?.health().await?;
            println!("{}: {}", health.status, health.message.unwrap_or_default());
            if !health.healthy {
                bail!("backend at {} is not healthy", settings.api_url);
            }
        }
        Command::History { session } => {
            let store = open_store(&settings)?;
            let id = session_or_current(&store, session)?;
            println!("{}", numbered_transcript_text(&store.session_messages(&id)));
        }
        Command::Stats => {
            let store = open_store(&settings)?;
            println!("{}", serde_json::to_string_pretty(&store.global_stats())?);
            if let Some(id) = store.current_session() {
                let s = store.stats(id);
                println!("current session {}: {} messages, last #{}", id, s.count, s.last_sequence_number);
            }
        }
        Command::Export { output } => {
            let json = open_store(&settings)?.export_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json).with_context(|| format!("cannot write {}", path.display()))?;
                    info!(path = %path.display(), "history exported");
                }
                None => println!("{}", json),
            }
        }
        Command::Import { file } => {
            let json = std::fs::read_to_string(&file).with_context(|| format!("cannot read {}", file.display()))?;
            let mut store = open_store(&settings)?;
            store.import_json(&json).context("import rejected")?;
            let stats = store.global_stats();
            println!("imported {} messages in {} sessions", stats.total_messages, stats.sessions);
        }
        Command::Extract { source, .. } => {
            let client = llm::Client::from_env_openrouter(settings.openrouter_model.as_deref())?;
            let out = match source {
                ExtractSource::Lab { file } => {
                    let report = std::fs::read_to_string(&file).with_context(|| format!("cannot read {}", file.display()))?;
                    serde_json::to_value(client.extract_lab_symptoms(&report).await?)?
                }
                ExtractSource::Conversation { session } => {
                    let store = open_store(&settings)?;
                    let id = session_or_current(&store, session)?;
                    let history = to_backend_history(&store.session_messages(&id));
                    if history.is_empty() {
                        bail!("session {} has no messages", id);
                    }
                    serde_json::to_value(client.extract_history_symptoms(&history).await?)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
