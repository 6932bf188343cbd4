use anyhow::{bail, Context};
use awsdoc_rag_core::config::{DEFAULT_GEMINI_BASE_URL, DEFAULT_QDRANT_URL, DEFAULT_TOP_K};
use awsdoc_rag_core::{
    delete_service, render_event_ndjson, AnswerService, AskRequest, BuildIndexRequest,
    BuildStatus, CharacterNgramEmbedder, ChatMessage, DocumentationAgent, Embedder, GeminiClient,
    GeminiConfig, InMemoryVectorStore, IndexBuilder, PartitionName, QdrantConfig, QdrantStore,
    RagConfig, RawSourceStore, Retriever, SitemapClient, StorageConfig, VectorIndex,
};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "awsdoc-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Google API key used for embeddings and generation
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    google_api_key: Option<String>,

    /// Gemini REST base URL
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    gemini_url: String,

    #[arg(long, env = "GEMINI_EMBEDDING_MODEL_ID", default_value = "text-embedding-004")]
    embedding_model: String,

    #[arg(long, env = "GEMINI_RAG_MODEL_ID", default_value = "gemini-2.0-flash")]
    rag_model: String,

    #[arg(long, env = "GEMINI_AGENT_MODEL_ID", default_value = "gemini-2.0-flash")]
    agent_model: String,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = DEFAULT_QDRANT_URL)]
    qdrant_url: String,

    /// Directory holding one raw markdown source per service
    #[arg(long, env = "RAW_DATA_DIR", default_value = "data/raw")]
    raw_data_dir: PathBuf,

    /// Vector index backend. `memory` lives for a single invocation and cannot serve `agent`.
    #[arg(long, value_enum, default_value_t = StoreKind::Qdrant)]
    store: StoreKind,

    /// Embedding backend. Index and query must use the same one.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Gemini)]
    embedder: EmbedderKind,

    /// Concurrent embedding calls during an index build
    #[arg(long, env = "EMBED_CONCURRENCY", default_value_t = 1)]
    embed_concurrency: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Qdrant,
    Memory,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    Gemini,
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// List indexed services.
    Services,
    /// List services discoverable from the AWS documentation sitemap.
    Available,
    /// List the documentation page URLs of one service from its sitemap.
    Pages {
        #[arg(long)]
        service: String,
        /// Only print the first N URLs in sorted order.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Rebuild the index of a service from its raw source.
    Index {
        #[arg(long)]
        service: String,
    },
    /// Delete the index and the raw source of a service.
    Delete {
        #[arg(long)]
        service: String,
    },
    /// List the distinct section paths of an indexed service.
    Topics {
        #[arg(long)]
        service: String,
    },
    /// Retrieve matching chunks without generating an answer.
    Search {
        #[arg(long)]
        service: String,
        #[arg(long)]
        query: String,
        /// Exact section path to restrict the search to. Repeatable.
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Answer a question from one service's documentation.
    Ask {
        #[arg(long)]
        service: String,
        #[arg(long)]
        question: String,
        /// JSON file with prior messages: `[{"role": "user", "content": "..."}]`
        #[arg(long)]
        history: Option<PathBuf>,
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Print the answer as it is generated.
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
    /// Let the documentation agent explore the index and answer.
    Agent {
        #[arg(long)]
        query: String,
        /// Emit NDJSON events as the agent works.
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
}

impl Cli {
    /// An in-memory index is only built for commands that name one service.
    fn validate(&self) -> anyhow::Result<()> {
        if self.store == StoreKind::Memory && matches!(self.command, Command::Agent { .. }) {
            bail!("`agent` needs a persistent index; use `--store qdrant`");
        }
        Ok(())
    }
}

struct App {
    config: RagConfig,
    gemini: Arc<GeminiClient>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    raw_sources: RawSourceStore,
    in_memory: bool,
}

impl App {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let gemini = Arc::new(GeminiClient::new(GeminiConfig {
            api_key: cli.google_api_key.clone(),
            base_url: cli.gemini_url.clone(),
            embedding_model: cli.embedding_model.clone(),
            rag_model: cli.rag_model.clone(),
            agent_model: cli.agent_model.clone(),
            ..GeminiConfig::default()
        })?);
        if !gemini.is_configured() {
            warn!("GOOGLE_API_KEY is not set; generation will report a configuration error");
        }

        let embedder: Arc<dyn Embedder> = match cli.embedder {
            EmbedderKind::Gemini => gemini.clone(),
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder::default()),
        };
        let index: Arc<dyn VectorIndex> = match cli.store {
            StoreKind::Qdrant => Arc::new(QdrantStore::new(&QdrantConfig {
                url: cli.qdrant_url.clone(),
                ..QdrantConfig::default()
            })?),
            StoreKind::Memory => Arc::new(InMemoryVectorStore::new()),
        };
        let storage = StorageConfig {
            raw_data_dir: cli.raw_data_dir.clone(),
        };

        Ok(Self {
            config: RagConfig {
                embed_concurrency: cli.embed_concurrency.max(1),
                ..RagConfig::default()
            },
            gemini,
            embedder,
            index,
            raw_sources: RawSourceStore::new(storage.raw_data_dir),
            in_memory: cli.store == StoreKind::Memory,
        })
    }

    fn index_builder(&self) -> anyhow::Result<IndexBuilder> {
        Ok(IndexBuilder::new(
            Arc::new(self.raw_sources.clone()),
            self.embedder.clone(),
            self.index.clone(),
            &self.config,
        )?)
    }

    fn retriever(&self) -> Arc<Retriever> {
        Arc::new(Retriever::new(
            self.embedder.clone(),
            self.index.clone(),
            &self.config,
        ))
    }

    /// An in-memory index starts empty, so read commands build the partition first.
    async fn warm(&self, service: &str) -> anyhow::Result<()> {
        if self.in_memory {
            let summary = self.index_builder()?.build_index(service).await?;
            info!(partition = %summary.partition, documents = summary.documents_indexed, "in-memory partition built");
        }
        Ok(())
    }
}

async fn read_history(path: Option<PathBuf>) -> anyhow::Result<Vec<ChatMessage>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading history {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing history {}", path.display()))
}

/// Prints items from `stream` until it ends or Ctrl-C drops it.
async fn drain<S, F>(mut stream: S, mut emit: F) -> anyhow::Result<()>
where
    S: futures::Stream + Unpin,
    F: FnMut(S::Item) -> anyhow::Result<()>,
{
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(item) => emit(item)?,
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling stream");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    cli.validate()?;
    let app = App::from_cli(&cli)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        embedder = app.embedder.name(),
        "awsdoc-rag boot"
    );

    match cli.command {
        Command::Services => {
            for service in app.index.list_partitions().await? {
                println!("{service}");
            }
        }
        Command::Available => {
            let sitemap = SitemapClient::new(None)?;
            for service in sitemap.available_services().await? {
                println!("{service}");
            }
        }
        Command::Pages { service, limit } => {
            let sitemap = SitemapClient::new(None)?;
            let urls = sitemap.page_urls(&service, limit).await?;
            if urls.is_empty() {
                warn!(%service, "no documentation pages found");
            }
            for url in urls {
                println!("{url}");
            }
        }
        Command::Index { service } => {
            let report = app
                .index_builder()?
                .build_report(&BuildIndexRequest { partition: service })
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status == BuildStatus::Error {
                bail!(
                    "indexing {} failed: {}",
                    report.partition,
                    report.error_message.unwrap_or_default()
                );
            }
        }
        Command::Delete { service } => {
            let report = delete_service(app.index.as_ref(), &app.raw_sources, &service).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.errors.is_empty() {
                bail!("deleting {service} finished with {} error(s)", report.errors.len());
            }
        }
        Command::Topics { service } => {
            app.warm(&service).await?;
            let partition = PartitionName::new(&service)?;
            for topic in app.index.scroll_distinct_contexts(&partition).await? {
                println!("{topic}");
            }
        }
        Command::Search {
            service,
            query,
            filters,
            top_k,
        } => {
            app.warm(&service).await?;
            let retriever = Retriever::new(app.embedder.clone(), app.index.clone(), &app.config)
                .with_top_k(top_k);
            let filters = (!filters.is_empty()).then_some(filters.as_slice());

            let results = retriever.retrieve(&service, &query, filters).await?;
            if results.is_empty() {
                println!("no results");
            }
            for (position, result) in results.iter().enumerate() {
                println!(
                    "[{}] score={:.4} context={}",
                    position + 1,
                    result.score,
                    result.context_path
                );
                println!("  source={}", result.source_url);
                println!("{}\n", result.body_text);
            }
        }
        Command::Ask {
            service,
            question,
            history,
            filters,
            stream,
        } => {
            app.warm(&service).await?;
            let request = AskRequest {
                service_name: service,
                question,
                history: read_history(history).await?,
                context_filters: filters,
                stream,
            };
            let answers = AnswerService::new(app.retriever(), app.gemini.clone(), &app.config);

            if request.stream {
                let mut stdout = std::io::stdout();
                drain(answers.ask_stream(&request), |fragment| {
                    write!(stdout, "{fragment}")?;
                    stdout.flush()?;
                    Ok(())
                })
                .await?;
                println!();
            } else {
                println!("{}", answers.ask(&request).await);
            }
        }
        Command::Agent { query, stream } => {
            let agent = DocumentationAgent::new(app.gemini.clone(), app.retriever(), &app.config);

            if stream {
                let mut stdout = std::io::stdout();
                drain(agent.run_stream(&query), |event| {
                    write!(stdout, "{}", render_event_ndjson(&event)?)?;
                    stdout.flush()?;
                    Ok(())
                })
                .await?;
            } else {
                println!("{}", agent.run(&query).await?);
            }
        }
    }

    Ok(())
}
