use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands, ConfigCommands};
use llm_log_store::{config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let cfg = config::load_config(&args.config)?;
    init_tracing(&cfg.logging);

    match args.command {
        Commands::Migrate => commands::store::migrate(&cfg).await?,
        Commands::Ingest { input } => commands::ingest::execute(&cfg, &input).await?,
        Commands::Index { input } => commands::ingest::index(&cfg, &input).await?,
        Commands::Stats => commands::store::stats(&cfg).await?,
        Commands::Search { term, limit } => commands::store::search(&cfg, &term, limit).await?,
        Commands::Prompt {
            organization,
            prompt_id,
        } => commands::store::prompt(&cfg, &organization, &prompt_id).await?,
        Commands::Config { action } => match action {
            ConfigCommands::Show => commands::config::show(&cfg)?,
            ConfigCommands::Validate => commands::config::validate(&cfg),
        },
    }

    Ok(())
}
