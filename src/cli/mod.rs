//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "vitaq",
    version,
    about = "Resume question answering with hybrid retrieval",
    long_about = "Vitaq indexes a resume collection into a dense vector index and a \
                  keyword index, answers questions about the candidates through an \
                  OpenAI-compatible service with streaming output, and caches both \
                  embeddings and answers for fast repeat queries."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/vitaq/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a resume corpus: a directory of .txt files or a .jsonl chunk file
    Index {
        /// Corpus path
        path: PathBuf,

        /// Append to the existing index instead of rebuilding it
        #[arg(long)]
        append: bool,
    },

    /// Ask a question about the indexed resumes
    Ask {
        /// Question to ask
        question: String,

        /// Wait for the full answer instead of streaming fragments
        #[arg(long)]
        no_stream: bool,

        /// Answer as a structured JSON value
        #[arg(long)]
        structured: bool,

        /// Number of context chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Search the index directly, without invoking generation
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Metadata filter as field=value (source, section, candidate); repeatable
        #[arg(short, long)]
        filter: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show index and cache statistics
    Stats,

    /// Clear the persisted index, the cache, or both (default: both)
    Clear {
        /// Clear only the persisted index pair
        #[arg(long)]
        index: bool,

        /// Clear only the cache
        #[arg(long)]
        cache: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the configuration file path
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
