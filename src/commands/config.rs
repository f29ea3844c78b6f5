use anyhow::Result;
use colored::Colorize;
use llm_log_store::config::Config;
use tracing::info;

/// Execute the config show command
///
/// Prints the effective configuration (defaults, file and environment merged)
pub fn show(cfg: &Config) -> Result<()> {
    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(cfg)?;
    println!("{}", toml_string);

    info!("Configuration displayed successfully");
    Ok(())
}

/// Execute the config validate command
///
/// Loading already validated the configuration; this prints a summary.
pub fn validate(cfg: &Config) {
    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Database: {}", cfg.database.url);
    println!("  Max Connections: {}", cfg.database.max_connections);
    println!("  Chunk Size: {}", cfg.ingest.chunk_size);
    println!("  Max Attempts: {}", cfg.ingest.max_attempts);
    println!("  Log Format: {}", cfg.logging.format);

    info!("Configuration validation successful");
}
