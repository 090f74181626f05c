//! One-time provisioning for the worldd_init tool

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::db::Database;
use crate::objects::{EntityStore, TemplateTable};

/// Create a new world database.
///
/// Ids at or below `reserved_ids` are never allocated, leaving room for
/// the fixed ids used by snapshot and buildout data.
///
/// # Errors
/// * Database file already exists
/// * Database creation fails
pub async fn init_database(path: &Path, reserved_ids: u64) -> Result<()> {
    if path.exists() {
        bail!(
            "Database file already exists: {}. Remove it first or use a different path.",
            path.display()
        );
    }
    let Some(path_str) = path.to_str() else {
        bail!("Database path is not valid UTF-8: {}", path.display());
    };

    info!("Creating new database at {}", path.display());
    let db = Database::new(Some(path_str)).await?;

    let store = EntityStore::new(db.pool().clone());
    if reserved_ids > store.read_max().await? {
        store.write_max(reserved_ids).await?;
        info!("Reserved object ids up to {}", reserved_ids);
    }

    info!("Database initialization complete");
    Ok(())
}

/// Compile a template table from a text list.
///
/// One template per line, optionally followed by its portal cell count.
/// Blank lines and lines starting with `#` are ignored.
pub fn compile_template_table(list: &str) -> Result<TemplateTable> {
    let mut table = TemplateTable::new();
    for (number, line) in list.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };
        let cells = fields
            .next()
            .map(str::parse::<u32>)
            .transpose()
            .with_context(|| format!("line {}: bad portal cell count", number + 1))?;
        table
            .insert(name, cells)
            .with_context(|| format!("line {}", number + 1))?;
    }
    Ok(table)
}

/// Compile `list_path` and write it where the daemon expects the table
pub fn write_template_table(list_path: &Path, data_dir: &Path) -> Result<usize> {
    let list = std::fs::read_to_string(list_path)
        .with_context(|| format!("reading {}", list_path.display()))?;
    let table = compile_template_table(&list)?;

    let out = data_dir.join(crate::TEMPLATE_TABLE_PATH);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    table.write(&out)?;
    info!("Wrote {} templates to {}", table.len(), out.display());
    Ok(table.len())
}
