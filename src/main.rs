//! # ragchat CLI
//!
//! Ingest documents into per-owner indexes, inspect retrieval, and ask
//! questions answered from those documents.
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat ingest <owner> <file>` | Chunk, embed and index a text file |
//! | `ragchat search <owner> "<query>"` | Show the top-k chunks with scores |
//! | `ragchat ask <owner> "<query>"` | Answer from the owner's documents |
//! | `ragchat docs <owner>` | List indexed documents |
//! | `ragchat remove <owner> <id>` | Remove one document |
//! | `ragchat reset <owner>` | Delete everything stored for an owner |
//!
//! Logs go to stderr; set `RUST_LOG=ragchat=debug` for detail.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use ragchat::config::{self, Config};
use ragchat::conversation::{ConversationStore, FileConversationStore};
use ragchat::embedding::{create_embedder, Embedder};
use ragchat::indexes::OwnerIndexes;
use ragchat::ingest::{new_document, IngestionPipeline};
use ragchat::llm::create_llm;
use ragchat::query::QueryPipeline;
use ragchat::retrieve::Retriever;
use ragchat::storage::Storage;

/// ragchat: chat with your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragchat",
    about = "ragchat: retrieval-augmented chat over per-user document indexes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index a UTF-8 text file for an owner.
    Ingest {
        owner: String,
        file: PathBuf,

        /// Document title. Defaults to the file name.
        #[arg(long)]
        title: Option<String>,

        /// Document id. A UUID is generated when omitted.
        #[arg(long)]
        id: Option<String>,
    },

    /// Show the chunks most similar to a query.
    Search {
        owner: String,
        query: String,

        /// Number of chunks to return. Defaults to `retrieval.top_k`.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Answer a question from the owner's documents.
    Ask {
        owner: String,
        query: String,

        /// Conversation id. History is read from and the turn appended to
        /// this conversation's transcript.
        #[arg(long)]
        conversation: Option<String>,

        /// Number of chunks to retrieve. Defaults to `retrieval.top_k`.
        #[arg(short, long)]
        k: Option<usize>,

        /// Print the assembled prompt instead of calling the model.
        #[arg(long)]
        dry_run: bool,
    },

    /// List an owner's documents.
    Docs { owner: String },

    /// Remove one document and all its chunks.
    Remove { owner: String, document_id: String },

    /// Delete the owner's index, chunk store and conversations.
    Reset { owner: String },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

struct App {
    config: Config,
    embedder: Arc<dyn Embedder>,
    indexes: Arc<OwnerIndexes>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let indexes = Arc::new(OwnerIndexes::new(Storage::new(&config.storage.root)));
        Ok(Self {
            config,
            embedder,
            indexes,
        })
    }

    fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.config.embedding.timeout_secs)
    }

    fn retriever(&self) -> Retriever {
        Retriever::new(
            self.embedder.clone(),
            self.indexes.clone(),
            self.embed_timeout(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.log_json);

    let cfg = config::load_config(&cli.config)?;
    let app = App::new(cfg)?;

    match cli.command {
        Commands::Ingest {
            owner,
            file,
            title,
            id,
        } => run_ingest(&app, &owner, &file, title, id).await?,
        Commands::Search { owner, query, k } => run_search(&app, &owner, &query, k).await?,
        Commands::Ask {
            owner,
            query,
            conversation,
            k,
            dry_run,
        } => run_ask(&app, &owner, &query, conversation.as_deref(), k, dry_run).await?,
        Commands::Docs { owner } => run_docs(&app, &owner).await?,
        Commands::Remove { owner, document_id } => {
            match app.indexes.remove_document(&owner, &document_id).await? {
                Some(n) => {
                    println!("remove {}", document_id);
                    println!("  vectors removed: {}", n);
                    println!("ok");
                }
                None => bail!("No document '{}' for owner '{}'", document_id, owner),
            }
        }
        Commands::Reset { owner } => {
            let existed = app.indexes.reset(&owner).await?;
            if existed {
                println!("reset {}: ok", owner);
            } else {
                println!("reset {}: nothing stored", owner);
            }
        }
    }

    Ok(())
}

async fn run_ingest(
    app: &App,
    owner: &str,
    file: &Path,
    title: Option<String>,
    id: Option<String>,
) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read document: {}", file.display()))?;
    let title = title.or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
    });
    let document = new_document(owner, text, title, id);

    let pipeline = IngestionPipeline::new(
        app.embedder.clone(),
        app.indexes.clone(),
        &app.config.chunking,
        app.embed_timeout(),
    );
    let report = pipeline.ingest(&document).await?;

    println!("ingest {}", owner);
    println!("  document: {}", report.document_id);
    println!("  chunks written: {}", report.chunks);
    println!("  total vectors: {}", report.total_vectors);
    println!("ok");
    Ok(())
}

async fn run_search(app: &App, owner: &str, query: &str, k: Option<usize>) -> Result<()> {
    let k = k.unwrap_or(app.config.retrieval.top_k);
    let results = app.retriever().retrieve(owner, query, k).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, r.score, r.chunk_ref);
        println!("    {}", snippet(&r.text, 160));
    }
    Ok(())
}

async fn run_ask(
    app: &App,
    owner: &str,
    query: &str,
    conversation: Option<&str>,
    k: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let k = k.unwrap_or(app.config.retrieval.top_k);
    let store = FileConversationStore::new(app.indexes.storage().clone());
    let pipeline = QueryPipeline::new(app.retriever(), &app.config).with_top_k(k);

    if dry_run {
        let history = match conversation {
            Some(c) => {
                store
                    .recent_turns(owner, c, app.config.prompt.history_turns)
                    .await?
            }
            None => Vec::new(),
        };
        let prepared = pipeline.prepare(owner, query, &history).await?;
        println!("{}", prepared.prompt.text);
        println!();
        println!("sources: {}", prepared.prompt.chunks_used.join(", "));
        return Ok(());
    }

    let pipeline = pipeline.with_llm(create_llm(&app.config.llm)?);
    let answer = match conversation {
        Some(c) => pipeline.chat(&store, owner, c, query).await?,
        None => pipeline.answer(owner, query, &[]).await?,
    };

    println!("{}", answer.completion.trim());
    println!();
    println!("sources: {}", answer.provenance.join(", "));
    Ok(())
}

async fn run_docs(app: &App, owner: &str) -> Result<()> {
    let docs = app.indexes.documents(owner).await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("{:<38} {:<30} {:<20} CHUNKS", "ID", "TITLE", "CREATED");
    for d in docs {
        println!(
            "{:<38} {:<30} {:<20} {}",
            d.id,
            snippet(d.title.as_deref().unwrap_or("-"), 30),
            d.created_at.format("%Y-%m-%d %H:%M:%S"),
            d.chunk_count
        );
    }
    Ok(())
}

/// First `max` characters of `text` on one line.
fn snippet(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
