mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragembed::config::RagConfig;

#[derive(Parser)]
#[command(name = "ragembed", version, about = "Text embeddings from local, Ollama or OpenAI models")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed texts (or stdin lines) and print the vectors as JSON
    Embed {
        /// Embed a single query instead of a document batch
        #[arg(long)]
        query: bool,
        /// Override the configured provider (local, ollama, openai)
        #[arg(long)]
        provider: Option<String>,
        /// Texts to embed; read one per line from stdin when empty
        texts: Vec<String>,
    },
    /// Manage the local embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Load the configured provider and report on it
    Doctor,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the configured model to the cache directory
    Download,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RagConfig::load()?;

    // Log to stderr so stdout stays clean for JSON output.
    let filter = EnvFilter::try_new(&config.log.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Embed {
            query,
            provider,
            texts,
        } => {
            if let Some(provider) = provider {
                config.embedding.provider = provider;
            }
            cli::embed::embed(&config, query, texts)?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding)?;
            }
        },
        Command::Doctor => {
            cli::doctor::doctor(&config)?;
        }
    }

    Ok(())
}
