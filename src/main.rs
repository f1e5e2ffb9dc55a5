use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;

use ragchat::{
    store::{ingest_pdf, ingest_text_file},
    BackendFactory, ConversationEngine, EmbeddingModelPaths, EngineConfig, InferenceBackend,
    LlamaCppBackend, LlamaCppConfig, RetrievalStore, Settings, StoreConfig,
};

#[derive(Parser)]
#[command(name = "ragchat", about = "Local retrieval-augmented chat")]
struct Cli {
    /// Optional TOML config file; environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat session streaming tokens to stdout.
    Chat {
        /// Session id used when indexing chat summaries.
        #[arg(long, default_value = "default")]
        session: String,
    },
    /// Ingest a document (PDF or plain text) into the retrieval store.
    Ingest { file: PathBuf },
    /// Show the context block retrieved for a query.
    Query {
        text: String,
        #[arg(long, default_value_t = 4)]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?.apply_env(),
        None => Settings::default().apply_env(),
    };

    let store = Arc::new(RetrievalStore::new(store_config(&settings)));
    store.initialize().await?;

    match cli.command {
        Command::Chat { session } => chat(settings, store, &session).await,
        Command::Ingest { file } => ingest(store, &file).await,
        Command::Query { text, top_k } => {
            let block = store.retrieve(&text, top_k).await?;
            if block.is_empty() {
                println!("(no matching context)");
            } else {
                println!("{block}");
            }
            Ok(())
        }
    }
}

fn store_config(settings: &Settings) -> StoreConfig {
    let embedding_model = match (
        &settings.embedding_model_path,
        &settings.embedding_tokenizer_path,
    ) {
        (Some(model), Some(tokenizer)) => Some(EmbeddingModelPaths {
            model: model.clone(),
            tokenizer: tokenizer.clone(),
        }),
        _ => None,
    };
    StoreConfig {
        data_dir: settings.data_dir.clone(),
        embedding_model,
        ..StoreConfig::default()
    }
}

async fn chat(settings: Settings, store: Arc<RetrievalStore>, session: &str) -> Result<()> {
    let llama = LlamaCppConfig {
        model_path: settings.model_path.clone(),
        context_size: settings.context_size,
        gpu_layers: settings.gpu_layers,
        batch_size: settings.batch_size,
    };
    let factory: BackendFactory = Box::new(move || {
        Ok(Arc::new(LlamaCppBackend::load(llama.clone())?) as Arc<dyn InferenceBackend>)
    });

    let engine_config = EngineConfig {
        system_prompt: settings
            .system_prompt
            .clone()
            .unwrap_or_else(|| EngineConfig::default().system_prompt),
        sampling: settings.sampling,
        ..EngineConfig::default()
    };
    let engine = ConversationEngine::new(engine_config, factory, Some(store));
    engine.initialize().await?;

    println!("ready. /reset clears the conversation, /summarize indexes a summary, /quit exits.");
    let stdin = std::io::stdin();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                engine.reset_conversation(None).await?;
                println!("(conversation reset)");
            }
            "/summarize" => {
                let summary = engine.summarize_and_index(session).await?;
                println!("(indexed summary) {summary}");
            }
            message => {
                let mut stream = engine.stream_chat(message).await?;
                print!("assistant> ");
                std::io::stdout().flush()?;
                while let Some(token) = stream.next().await {
                    print!("{token}");
                    std::io::stdout().flush()?;
                }
                println!();
            }
        }
    }

    engine.dispose().await;
    Ok(())
}

async fn ingest(store: Arc<RetrievalStore>, file: &PathBuf) -> Result<()> {
    let is_pdf = file
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    let chunks = if is_pdf {
        ingest_pdf(&store, file).await?
    } else {
        ingest_text_file(&store, file).await?
    };

    println!("indexed {chunks} chunks from {}", file.display());
    Ok(())
}
