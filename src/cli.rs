use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "llm-log-store", version, about = "Transactional LLM log ingestion store")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create the database if needed and apply migrations
    Migrate,

    /// Write one JSON batch of requests, responses, assets and prompts
    Ingest {
        /// Batch file, or `-` for stdin
        input: PathBuf,
    },

    /// Build search-index rows from a JSON array of request/response bodies
    Index {
        /// Entries file, or `-` for stdin
        input: PathBuf,
    },

    /// Show row counts per table
    Stats,

    /// Find request ids whose indexed text contains every token of TERM
    Search {
        term: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the version history of a prompt
    Prompt {
        /// Organization id
        organization: String,

        /// User-defined prompt id
        prompt_id: String,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration
    Show,

    /// Validate configuration file
    Validate,
}
