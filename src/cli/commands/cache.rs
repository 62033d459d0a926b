//! Cache command - inspect and clear the cache store

use crate::audit::AuditLog;
use crate::cache::{format_bytes, CacheEntry, CacheState, CacheStore};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::{SandkitError, SandkitResult};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> SandkitResult<()> {
    let store = CacheStore::new(ConfigManager::cache_root(config));

    match args.action {
        CacheAction::List { format } => list_entries(&store, format).await,
        CacheAction::Path { key } => show_path(&store, key.as_deref()),
        CacheAction::Clear { key, all, yes } => {
            let audit = AuditLog::new(config);
            clear_entries(&store, &audit, key.as_deref(), all, yes).await
        }
    }
}

async fn list_entries(store: &CacheStore, format: OutputFormat) -> SandkitResult<()> {
    let entries = store.entries().await?;

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key);
            }
        }
        OutputFormat::Table if entries.is_empty() => {
            ui::step_info(
                &UiContext::detect(),
                &format!("No cache entries under {}", store.root().display()),
            );
        }
        OutputFormat::Table => print_table(&entries),
    }
    Ok(())
}

fn print_table(entries: &[CacheEntry]) {
    println!(
        "{:<32} {:<10} {:>10}  {}",
        style("KEY").bold(),
        style("STATE").bold(),
        style("SIZE").bold(),
        style("UPDATED").bold()
    );
    println!("{}", "-".repeat(76));

    let mut total = 0;
    for entry in entries {
        let state = match entry.state {
            CacheState::Complete => style("complete").green(),
            CacheState::Building => style("building").yellow(),
            CacheState::Miss => style("miss").dim(),
        };
        let updated = entry
            .updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        total += entry.size_bytes;

        println!(
            "{:<32} {:<10} {:>10}  {}",
            entry.key,
            state,
            format_bytes(entry.size_bytes),
            updated
        );
    }

    println!();
    println!("Total: {} entr{}, {}", entries.len(), if entries.len() == 1 { "y" } else { "ies" }, format_bytes(total));
}

fn print_json(entries: &[CacheEntry]) -> SandkitResult<()> {
    #[derive(Serialize)]
    struct EntryJson<'a> {
        key: &'a str,
        path: String,
        state: CacheState,
        size_bytes: u64,
        updated_at: Option<String>,
    }

    let json: Vec<EntryJson<'_>> = entries
        .iter()
        .map(|e| EntryJson {
            key: &e.key,
            path: e.path.display().to_string(),
            state: e.state,
            size_bytes: e.size_bytes,
            updated_at: e.updated_at.map(|t| t.to_rfc3339()),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn show_path(store: &CacheStore, key: Option<&str>) -> SandkitResult<()> {
    match key {
        Some(key) => println!("{}", store.path_for(key)?.display()),
        None => println!("{}", store.root().display()),
    }
    Ok(())
}

async fn clear_entries(
    store: &CacheStore,
    audit: &AuditLog,
    key: Option<&str>,
    all: bool,
    yes: bool,
) -> SandkitResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);

    let keys: Vec<String> = match key {
        Some(key) if !all => vec![key.to_string()],
        _ => store.entries().await?.into_iter().map(|e| e.key).collect(),
    };

    if keys.is_empty() {
        ui::step_info(&ctx, "No cache entries to clear");
        return Ok(());
    }

    if all {
        println!("This will remove {} cache entr{}:", keys.len(), if keys.len() == 1 { "y" } else { "ies" });
        for key in &keys {
            println!("  {} {}", style("•").red(), key);
        }
        println!();

        // Bulk removal defaults to no when nobody can answer
        if !ui::confirm(&ctx, "Are you sure?", false).await? {
            ui::step_warn(&ctx, "Aborted");
            return Ok(());
        }
    }

    let mut removed = 0;
    for key in &keys {
        if store.remove(key).await? {
            audit.cache_cleared(key).await;
            removed += 1;
        } else if !all {
            return Err(SandkitError::User(format!("No cache entry named {}", key)));
        }
    }

    ui::step_ok(&ctx, &format!("Cleared {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" }));
    Ok(())
}
