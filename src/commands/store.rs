//! Store inspection CLI commands

use anyhow::Result;
use colored::Colorize;
use llm_log_store::config::Config;
use llm_log_store::store::LogDb;

/// Create the database if needed and apply migrations
pub async fn migrate(cfg: &Config) -> Result<()> {
    let db = LogDb::connect(&cfg.database).await?;
    db.close().await;

    println!("{} Database ready at {}", "✓".green(), cfg.database.url);
    Ok(())
}

/// Show row counts per table
pub async fn stats(cfg: &Config) -> Result<()> {
    let db = LogDb::connect(&cfg.database).await?;
    let stats = db.get_stats().await;
    db.close().await;
    let stats = stats?;

    println!("{}", "Log Store Statistics".bold().underline());
    println!();
    println!("{:<30} {:>15}", "Requests:", format_number(stats.requests));
    println!("{:<30} {:>15}", "Responses:", format_number(stats.responses));
    println!("{:<30} {:>15}", "Assets:", format_number(stats.assets));
    println!("{:<30} {:>15}", "Prompts:", format_number(stats.prompts));
    println!("{:<30} {:>15}", "Prompt Versions:", format_number(stats.prompt_versions));
    println!("{:<30} {:>15}", "Prompt Input Keys:", format_number(stats.prompt_input_keys));
    println!(
        "{:<30} {:>15}",
        "Prompt Input Records:",
        format_number(stats.prompt_input_records)
    );
    println!("{:<30} {:>15}", "Search Rows:", format_number(stats.search_rows));
    Ok(())
}

/// Find request ids by indexed text
pub async fn search(cfg: &Config, term: &str, limit: usize) -> Result<()> {
    let db = LogDb::connect(&cfg.database).await?;
    let ids = db.search_requests(term, limit).await;
    db.close().await;
    let ids = ids?;

    if ids.is_empty() {
        println!("{}", format!("No requests match '{}'", term).yellow());
        return Ok(());
    }

    for id in &ids {
        println!("{}", id);
    }
    println!();
    println!("{} match(es)", ids.len());
    Ok(())
}

/// Show the version history of a prompt
pub async fn prompt(cfg: &Config, organization: &str, prompt_id: &str) -> Result<()> {
    let db = LogDb::connect(&cfg.database).await?;
    let result = print_prompt(&db, organization, prompt_id).await;
    db.close().await;
    result
}

async fn print_prompt(db: &LogDb, organization: &str, prompt_id: &str) -> Result<()> {
    let Some(prompt) = db.find_prompt(organization, prompt_id).await? else {
        println!(
            "{}",
            format!("No prompt '{}' in organization '{}'", prompt_id, organization).yellow()
        );
        return Ok(());
    };

    println!(
        "{} {} (created {})",
        "Prompt".bold(),
        prompt.user_defined_id.cyan(),
        prompt.created_at.to_rfc3339()
    );
    println!();

    for version in db.list_prompt_versions(&prompt.id).await? {
        let keys = db.list_input_keys(&version.id).await?;
        let records = db.list_input_records(&version.id).await?;

        println!(
            "  v{}.{}  {}  model={}  inputs=[{}]  records={}",
            version.major_version,
            version.minor_version,
            version.created_at.to_rfc3339(),
            version.model.as_deref().unwrap_or("-"),
            keys.join(", "),
            records.len()
        );
    }
    Ok(())
}

/// Format a count with thousands separators
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }
}
