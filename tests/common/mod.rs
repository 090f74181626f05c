//! Common test utilities: fixture templates, services and the WorldTest harness
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use reqwest::Client;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use worldd::objects::{EntityStore, Planets, TemplateTable, WorldObject};
use worldd::service::ObjectService;
use worldd::session::{Session, ZoneInHooks};
use worldd::spatial::PlacementIndex;
use worldd::{Config, Server};

pub const HUT: &str = "object/building/tatooine/shared_hut.iff";
pub const CELL: &str = "object/cell/shared_cell.iff";
pub const CHAIR: &str = "object/tangible/furniture/shared_chair.iff";
pub const CRATE: &str = "object/tangible/container/shared_crate.iff";
pub const GUARD: &str = "object/creature/npc/shared_guard.iff";
pub const PLAYER: &str = "object/player/shared_player.iff";
pub const ROCK: &str = "object/static/naboo/shared_rock.iff";
pub const FOUNTAIN: &str = "object/static/structure/naboo/shared_fountain.iff";

/// Hut portal data declares four cells including the exterior
pub const HUT_PORTAL_CELLS: u32 = 4;

pub fn templates() -> TemplateTable {
    let mut table = TemplateTable::new();
    table.insert(HUT, Some(HUT_PORTAL_CELLS)).unwrap();
    for name in [CELL, CHAIR, CRATE, GUARD, PLAYER, ROCK, FOUNTAIN] {
        table.insert(name, None).unwrap();
    }
    table
}

/// The single-connection pool behind an in-memory database
pub async fn memory_pool() -> SqlitePool {
    let db = worldd::db::Database::new(None).await.unwrap();
    db.pool().clone()
}

pub async fn memory_store() -> Arc<EntityStore> {
    Arc::new(EntityStore::new(memory_pool().await))
}

pub async fn service() -> Arc<ObjectService> {
    service_with_store(memory_store().await).await
}

pub async fn service_with_store(store: Arc<EntityStore>) -> Arc<ObjectService> {
    ObjectService::builder(store, templates())
        .planets(Planets::from_names(&["tatooine", "naboo"]))
        .build()
        .await
        .unwrap()
}

/// A service wired to a placement index and recording hooks
pub async fn observed_service(
    store: Arc<EntityStore>,
) -> (Arc<ObjectService>, Arc<PlacementIndex>, Arc<RecordingHooks>) {
    let spatial = Arc::new(PlacementIndex::new());
    let hooks = Arc::new(RecordingHooks::default());
    let service = ObjectService::builder(store, templates())
        .planets(Planets::from_names(&["tatooine", "naboo"]))
        .spatial(spatial.clone())
        .hooks(hooks.clone())
        .disconnect_linger(Duration::from_secs(30))
        .build()
        .await
        .unwrap();
    (service, spatial, hooks)
}

/// Zone-in collaborator that records every call in order
#[derive(Default)]
pub struct RecordingHooks {
    pub calls: Mutex<Vec<String>>,
    pub online: Mutex<Vec<String>>,
}

impl RecordingHooks {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl ZoneInHooks for RecordingHooks {
    fn clear_buffs(&self, creature: &Arc<WorldObject>) {
        self.record(format!("clear_buffs:{}", creature.id()));
    }

    fn load_mail_headers(&self, _session: &Arc<dyn Session>, creature: &Arc<WorldObject>) {
        self.record(format!("mail:{}", creature.id()));
    }

    fn player_status_change(&self, name: &str, online: bool) {
        self.record(format!("status:{}:{}", name, online));
    }

    fn is_online(&self, name: &str) -> bool {
        self.online.lock().iter().any(|n| n == name)
    }

    fn send_friend_status(&self, _session: &Arc<dyn Session>, friend: &str, online: bool) {
        self.record(format!("friend:{}:{}", friend, online));
    }

    fn post_zone_in(&self, _session: &Arc<dyn Session>, creature: &Arc<WorldObject>) {
        self.record(format!("post_zone_in:{}", creature.id()));
    }
}

/// Test harness that spawns a real worldd server on a random port
pub struct WorldTest {
    pub addr: SocketAddr,
    pub client: Client,
    server: Arc<Server>,
    _handle: JoinHandle<()>,
}

impl WorldTest {
    /// Start a server with an in-memory database
    pub async fn start() -> Result<Self> {
        Self::start_with(Config::default()).await
    }

    /// Start a server with `config`, overriding its bind address
    pub async fn start_with(mut config: Config) -> Result<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);
        config.bind_addr = addr;

        let server = Arc::new(Server::new(config).await?);
        let server_clone = server.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run().await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;

        // Poll until server is ready (max 2 seconds)
        let mut ready = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if client
                .get(format!("http://{}/health", addr))
                .send()
                .await
                .is_ok()
            {
                ready = true;
                break;
            }
        }
        if !ready {
            panic!("Server failed to start within 2 seconds");
        }

        Ok(Self {
            addr,
            client,
            server,
            _handle: handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn service(&self) -> Arc<ObjectService> {
        self.server.service()
    }

    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}

impl Drop for WorldTest {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}
