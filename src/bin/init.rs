//! worldd_init - One-time provisioning tool
//!
//! Creates a fresh world database and compiles the template CRC table.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// worldd provisioning tool
#[derive(Parser, Debug)]
#[command(
    name = "worldd_init",
    version,
    about = "Initialize a new worldd database and template table"
)]
struct Args {
    /// Path to SQLite database file to create (must not exist)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Highest object id reserved for fixed-id world data
    #[arg(long, default_value_t = 0)]
    reserved_ids: u64,

    /// Text list of templates to compile (one per line, optional portal cell count)
    #[arg(long, requires = "data_dir")]
    templates: Option<PathBuf>,

    /// Client data root receiving the compiled template table
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worldd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.database.is_none() && args.templates.is_none() {
        bail!("nothing to do: pass --database and/or --templates with --data-dir");
    }

    if let Some(database) = &args.database {
        worldd::init::init_database(database, args.reserved_ids).await?;
    }

    if let (Some(list), Some(data_dir)) = (&args.templates, &args.data_dir) {
        if !list.exists() {
            bail!("Template list not found: {}", list.display());
        }
        worldd::init::write_template_table(list, data_dir)?;
    }

    Ok(())
}
