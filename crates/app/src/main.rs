use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_tutor_core::{
    BatchProgress, CharacterNgramEmbedder, ChatModel, ChatSession, ChatSettings, ChunkStrategy,
    Embedder, ExtractionStrategy, FileOutcome, Focus, GroundingMode, OpenAiChatModel,
    OpenAiEmbedder, PipelineConfig, PipelineCoordinator, QdrantStore, ResponseStyle, Stage,
    Turn, VectorIndex,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-tutor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder with the source PDFs
    #[arg(long, env = "PDF_FOLDER", default_value = "data/pdfs")]
    pdf_folder: PathBuf,

    /// Folder for extracted table text files
    #[arg(long, env = "TABLE_FOLDER", default_value = "data/tables")]
    table_folder: PathBuf,

    /// JSON file with the stage flags of vectorized documents
    #[arg(long, env = "STATUS_FILE", default_value = "data/status.json")]
    status_file: PathBuf,

    /// Append-only log file
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Embedding model; also selects the chunking tokenizer
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Chat model used for answers
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    openai_model: String,

    /// API key for embeddings and chat; without it embeddings fall back to
    /// the offline n-gram embedder
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com")]
    openai_base_url: String,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "pdf_tutor")]
    qdrant_collection: String,
}

#[derive(Subcommand)]
enum Command {
    /// List documents with their stage flags and next enabled stage.
    Documents,
    /// Run the outstanding stages of one document.
    Process {
        file: String,
        /// Last stage to run.
        #[arg(long, default_value = "vectorize")]
        through: Stage,
        /// Extraction strategy: simple or layout.
        #[arg(long, default_value = "layout")]
        loader: ExtractionStrategy,
        /// Chunking strategy: token or char.
        #[arg(long, default_value = "token")]
        chunking: ChunkStrategy,
    },
    /// Process the selected documents, by default every one not yet vectorized.
    ProcessAll {
        #[arg(long = "file")]
        files: Vec<String>,
        #[arg(long, default_value = "layout")]
        loader: ExtractionStrategy,
        #[arg(long, default_value = "token")]
        chunking: ChunkStrategy,
    },
    /// Delete the status file, every table artifact and the index collection.
    ClearAll,
    /// Interactive chat over the indexed documents.
    Chat {
        #[command(flatten)]
        settings: SettingsArgs,
        /// Print the retrieved context after each answer.
        #[arg(long, default_value_t = false)]
        show_context: bool,
    },
    /// Answer one question and exit.
    Ask {
        question: String,
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

#[derive(clap::Args)]
struct SettingsArgs {
    #[arg(long, default_value = "")]
    name: String,
    /// normal, explain, summarize or step-by-step
    #[arg(long, default_value = "normal")]
    style: ResponseStyle,
    /// poker-basics, expected-value or bluffing
    #[arg(long, default_value = "poker-basics")]
    focus: Focus,
    /// rag or general
    #[arg(long, default_value = "rag")]
    mode: GroundingMode,
}

impl From<&SettingsArgs> for ChatSettings {
    fn from(args: &SettingsArgs) -> Self {
        ChatSettings {
            name: args.name.clone(),
            style: args.style,
            focus: args.focus,
            mode: args.mode,
        }
    }
}

fn init_tracing(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

impl Cli {
    fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        match &self.openai_api_key {
            Some(key) => Ok(Arc::new(OpenAiEmbedder::new(
                &self.openai_base_url,
                key.clone(),
                &self.embedding_model,
            )?)),
            None => {
                warn!("OPENAI_API_KEY is not set, using the offline n-gram embedder");
                Ok(Arc::new(CharacterNgramEmbedder::default()))
            }
        }
    }

    fn index(&self) -> anyhow::Result<Arc<dyn VectorIndex>> {
        Ok(Arc::new(QdrantStore::new(
            &self.qdrant_url,
            &self.qdrant_collection,
            self.embedder()?,
        )?))
    }

    fn chat_model(&self) -> anyhow::Result<Arc<dyn ChatModel>> {
        let Some(key) = &self.openai_api_key else {
            bail!("OPENAI_API_KEY is required for chat");
        };
        Ok(Arc::new(OpenAiChatModel::new(
            &self.openai_base_url,
            key.clone(),
            &self.openai_model,
        )?))
    }

    fn coordinator(&self, chunk_strategy: ChunkStrategy) -> anyhow::Result<PipelineCoordinator> {
        let config = PipelineConfig {
            documents_dir: self.pdf_folder.clone(),
            tables_dir: self.table_folder.clone(),
            status_file: self.status_file.clone(),
            embedding_model: self.embedding_model.clone(),
            chunk_strategy,
            ..PipelineConfig::default()
        };
        Ok(PipelineCoordinator::new(config, self.index()?)?)
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "x"
    } else {
        "-"
    }
}

fn print_documents(coordinator: &PipelineCoordinator) {
    println!("{:<40} load clean chunk annot vect  next", "file");
    for (file_name, status) in coordinator.status_table() {
        let [loaded, cleaned, chunked, annotated, vectorized] = status.as_flags();
        let next = status
            .next_stage()
            .map_or_else(|| "done".to_string(), |stage| stage.to_string());
        println!(
            "{:<40} {:<4} {:<5} {:<5} {:<5} {:<5} {}",
            file_name,
            flag(loaded),
            flag(cleaned),
            flag(chunked),
            flag(annotated),
            flag(vectorized),
            next
        );
    }
}

fn print_progress(progress: BatchProgress<'_>) {
    let outcome = match progress.outcome {
        FileOutcome::Completed => "done".to_string(),
        FileOutcome::Skipped => "already vectorized".to_string(),
        FileOutcome::Failed(reason) => format!("error: {reason}"),
    };
    println!(
        "{} ({} / {}) {}",
        progress.file_name, progress.index, progress.total, outcome
    );
}

async fn answer(session: &mut ChatSession, question: &str) -> anyhow::Result<String> {
    let reply = session
        .ask(question, |token| {
            print!("{token}");
            let _ = std::io::stdout().flush();
        })
        .await?;
    println!();
    Ok(reply.context)
}

async fn run_chat(mut session: ChatSession, show_context: bool) -> anyhow::Result<()> {
    for turn in session.conversation().displayed_turns() {
        if let Turn::Assistant(content) = turn {
            println!("{content}");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        match answer(&mut session, question).await {
            Ok(context) if show_context => println!("--- retrieved context ---\n{context}"),
            Ok(_) => {}
            Err(error) => eprintln!("error: {error}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_ref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-tutor boot"
    );

    match &cli.command {
        Command::Documents => {
            let coordinator = cli.coordinator(ChunkStrategy::default())?;
            print_documents(&coordinator);
        }
        Command::Process {
            file,
            through,
            loader,
            chunking,
        } => {
            let mut coordinator = cli.coordinator(*chunking)?;
            coordinator.run_through(file, *through, *loader).await?;
            let next = coordinator
                .next_stage(file)?
                .map_or_else(|| "none".to_string(), |stage| stage.to_string());
            println!("{file}: next stage {next}");
        }
        Command::ProcessAll {
            files,
            loader,
            chunking,
        } => {
            let mut coordinator = cli.coordinator(*chunking)?;
            let selection = if files.is_empty() {
                coordinator.default_selection()
            } else {
                files.clone()
            };
            let report = coordinator
                .process_all(&selection, *loader, print_progress)
                .await;
            println!(
                "process all documents done: {} completed, {} skipped, {} failed",
                report.completed.len(),
                report.skipped.len(),
                report.failed.len()
            );
        }
        Command::ClearAll => {
            let mut coordinator = cli.coordinator(ChunkStrategy::default())?;
            coordinator.reset().await?;
            println!("cleared all documents");
        }
        Command::Chat {
            settings,
            show_context,
        } => {
            let session = ChatSession::start(settings.into(), cli.index()?, cli.chat_model()?);
            run_chat(session, *show_context).await?;
        }
        Command::Ask { question, settings } => {
            let mut session = ChatSession::start(settings.into(), cli.index()?, cli.chat_model()?);
            answer(&mut session, question).await?;
        }
    }

    Ok(())
}
