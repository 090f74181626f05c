//! worldd - world object registry and lifecycle daemon
//!
//! Owns every live game object: id allocation, construction from templates,
//! containment, scheduled destruction and respawn, bulk world loading and
//! binding persisted creatures to client sessions.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod init;
pub mod lua;
pub mod objects;
pub mod service;
pub mod session;
pub mod spatial;
pub mod timers;
pub mod world;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

pub use config::{Config, LogFormat};
use db::Database;
use objects::{EntityStore, Planets, TemplateTable};
use service::ObjectService;
use session::Session;
use world::{LoadReport, WorldLoader};

/// Location of the template table under the data directory
pub const TEMPLATE_TABLE_PATH: &str = "misc/object_template_crc_string_table.bin";

/// The worldd server instance
pub struct Server {
    config: Config,
    db: Arc<Database>,
    service: Arc<ObjectService>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Open the database, start the object service and load every
    /// configured planet from the data directory.
    pub async fn new(config: Config) -> Result<Self> {
        let db = Arc::new(Database::new(config.db_path.as_deref()).await?);
        let store = Arc::new(EntityStore::new(db.pool().clone()));
        let templates = load_templates(config.data_dir.as_deref())?;

        let service = ObjectService::builder(store, templates)
            .planets(Planets::from_names(&config.planets))
            .scripts(config.scripts_dir.clone(), config.sandbox.clone())
            .disconnect_linger(config.disconnect_linger())
            .build()
            .await?;

        if let Some(dir) = &config.data_dir {
            let loader = WorldLoader::new(service.clone(), dir);
            let mut total = LoadReport::default();
            for planet in service.planets().all() {
                total += loader.load_planet(&planet).await?;
            }
            info!(
                created = total.created,
                skipped = total.skipped,
                failed = total.failed,
                resident = service.registry().len(),
                "world loaded"
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config,
            db,
            service,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    pub fn service(&self) -> Arc<ObjectService> {
        self.service.clone()
    }

    fn router(&self) -> Router {
        api::router(self.db.clone(), self.service.clone())
    }

    /// Run the scheduler and admin API until shutdown, then drain sessions
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("worldd listening on {}", local_addr);

        let scheduler = tokio::spawn(
            self.service
                .clone()
                .run_scheduler(self.config.scheduler_tick(), self.shutdown_rx.clone()),
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        if let Err(e) = scheduler.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
        self.drain(&[]);

        info!("worldd shutdown complete");
        Ok(())
    }

    /// Close `active` and every session still attached to a resident object
    pub fn drain(&self, active: &[Arc<dyn Session>]) -> usize {
        self.service.drain_sessions(active)
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

/// Load the template table from the data directory; an absent directory
/// or table yields an empty table.
fn load_templates(data_dir: Option<&Path>) -> Result<TemplateTable> {
    let Some(dir) = data_dir else {
        return Ok(TemplateTable::new());
    };
    let path = dir.join(TEMPLATE_TABLE_PATH);
    if !path.exists() {
        warn!(path = %path.display(), "no template table, every template will be rejected");
        return Ok(TemplateTable::new());
    }
    let table = TemplateTable::load(&path)?;
    info!(templates = table.len(), "template table loaded");
    Ok(table)
}
