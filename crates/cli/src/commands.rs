use crate::cli_args::Commands;
use anyhow::{Context, Result, anyhow, bail};
use colored::*;
use picoclaw_store::{SessionStore, StateStore, StoreConfig, TableInspector};
use std::fs;
use std::io::Write;

/// Run one command against the stores described by `config`, writing
/// human-readable or JSON output to `out`.
pub fn run(command: &Commands, config: &StoreConfig, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Status => status(config, out),
        Commands::Tables => with_inspector(config, |inspector| {
            for table in inspector.list_tables() {
                writeln!(out, "{}", table)?;
            }
            Ok(())
        }),
        Commands::Rows { table } => with_inspector(config, |inspector| {
            let rows = inspector.rows(table)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
            Ok(())
        }),
        Commands::DeleteRow { table, id } => with_inspector(config, |inspector| {
            let removed = inspector.delete_row(table, id)?;
            if removed == 0 {
                writeln!(out, "No row with {} in {}", id.bold(), table)?;
            } else {
                writeln!(out, "Deleted {} from {}", id.bold(), table)?;
            }
            Ok(())
        }),
        Commands::Wipe { table, yes } => {
            if !yes {
                bail!("Refusing to wipe {} without --yes", table);
            }
            with_inspector(config, |inspector| {
                let removed = inspector.wipe_table(table)?;
                writeln!(out, "Wiped {} ({} rows)", table.bold(), removed)?;
                Ok(())
            })
        }
        Commands::Sessions => {
            let store = SessionStore::open(config);
            for key in store.session_keys() {
                writeln!(out, "{}", key)?;
            }
            store.close()?;
            Ok(())
        }
        Commands::History { key } => {
            let store = SessionStore::open(config);
            let history = store.get_history(key);
            writeln!(out, "{}", serde_json::to_string_pretty(&history)?)?;
            store.close()?;
            Ok(())
        }
        Commands::State => {
            let store = StateStore::open(config);
            writeln!(out, "{}", serde_json::to_string_pretty(&store.snapshot())?)?;
            store.close()?;
            Ok(())
        }
    }
}

fn status(config: &StoreConfig, out: &mut impl Write) -> Result<()> {
    let store = StateStore::open(config);
    let db_path = store.database_path();
    let size = match fs::metadata(db_path) {
        Ok(meta) => format!("{} bytes", meta.len()),
        Err(_) => "absent".to_string(),
    };

    writeln!(out, "{:<12} {}", "workspace".bold(), config.workspace.display())?;
    writeln!(out, "{:<12} {}", "persistence".bold(), store.persistence())?;
    if store.persistence() != config.persistence {
        writeln!(
            out,
            "{:<12} {}",
            "".bold(),
            format!("(requested {}, database unavailable)", config.persistence).bright_yellow()
        )?;
    }
    writeln!(out, "{:<12} {} ({})", "database".bold(), db_path.display(), size)?;
    writeln!(out, "{:<12} {}", "sessions".bold(), store.session_count()?)?;
    writeln!(out, "{:<12} {}", "messages".bold(), store.message_count()?)?;

    store.close()?;
    Ok(())
}

/// Open the state store's database for raw table access.
fn with_inspector<F>(config: &StoreConfig, f: F) -> Result<()>
where
    F: FnOnce(&TableInspector) -> Result<()>,
{
    let store = StateStore::open(config);
    let inspector = store.inspector().ok_or_else(|| {
        anyhow!(
            "Table inspection needs the sqlite backend (current: {})",
            store.persistence()
        )
    })?;
    let result = f(&inspector);
    store.close().context("Failed to close database")?;
    result
}
