// ABOUTME: CLI hosts command - list configured host aliases and their pooling identities

use anyhow::Result;
use serde::Serialize;

use super::OutputFormat;
use rinspect::config::{AppConfig, AuthMethod, HostDirectory};

/// One configured alias as displayed
#[derive(Debug, Clone, Serialize)]
pub struct HostRow {
    pub alias: String,
    pub identity: Option<String>,
    pub auth: String,
    pub error: Option<String>,
}

/// Execute the hosts command
pub fn execute(config: &AppConfig, format: OutputFormat) -> Result<()> {
    let rows = host_rows(&HostDirectory::from_config(config));

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => output_text(&rows),
    }
    Ok(())
}

/// Resolve every alias for display
pub fn host_rows(directory: &HostDirectory) -> Vec<HostRow> {
    directory
        .aliases()
        .map(|(alias, _)| match directory.resolve(alias) {
            Ok(resolved) => HostRow {
                alias: alias.clone(),
                identity: Some(resolved.identity.to_string()),
                auth: match resolved.auth {
                    AuthMethod::Agent => "agent".to_string(),
                    AuthMethod::KeyFile { path } => path.display().to_string(),
                },
                error: None,
            },
            Err(err) => HostRow {
                alias: alias.clone(),
                identity: None,
                auth: "-".to_string(),
                error: Some(err.to_string()),
            },
        })
        .collect()
}

fn output_text(rows: &[HostRow]) {
    if rows.is_empty() {
        println!("No hosts configured. Add [hosts.<alias>] tables to ~/.rinspect/config.toml.");
        return;
    }

    println!("{:<20} {:<40} AUTH", "ALIAS", "IDENTITY");
    println!("{}", "-".repeat(80));
    for row in rows {
        let identity = row
            .identity
            .clone()
            .or_else(|| row.error.as_ref().map(|e| format!("error: {e}")))
            .unwrap_or_default();
        println!("{:<20} {:<40} {}", row.alias, identity, row.auth);
    }
}
