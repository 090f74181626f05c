//! End-to-end tests against a running server

mod common;

use std::sync::Arc;

use common::*;
use tempfile::TempDir;
use worldd::error::ObjectError;
use worldd::objects::{template_crc, Point3D, Quaternion};
use worldd::service::ObjectSpec;
use worldd::session::{ChannelSession, Session};
use worldd::world::{SnapshotRecord, WorldSnapshot};
use worldd::{Config, TEMPLATE_TABLE_PATH};

#[tokio::test]
async fn test_server_starts_and_stops() {
    let world = WorldTest::start().await.expect("Failed to start server");
    drop(world);
}

#[tokio::test]
async fn test_health_endpoint() {
    let world = WorldTest::start().await.expect("Failed to start server");

    let resp = world.get("/health").await.expect("Failed to get health");
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "ok");

    let body: serde_json::Value = world.get("/").await.unwrap().json().await.unwrap();
    assert_eq!(body["name"], "worldd");
}

#[tokio::test]
async fn test_parallel_servers() {
    let world1 = WorldTest::start().await.expect("Failed to start server 1");
    let world2 = WorldTest::start().await.expect("Failed to start server 2");
    assert_ne!(world1.addr, world2.addr);

    // Default config has no template table, so nothing can be created
    let result = world1.service().create_object(ObjectSpec::new(CHAIR)).await;
    assert!(matches!(result, Err(ObjectError::InvalidTemplate(_))));

    let stats1: serde_json::Value = world1.get("/stats").await.unwrap().json().await.unwrap();
    let stats2: serde_json::Value = world2.get("/stats").await.unwrap().json().await.unwrap();
    assert_eq!(stats1["resident"], 0);
    assert_eq!(stats2["resident"], 0);
}

#[tokio::test]
async fn test_world_loaded_at_startup() {
    let data = TempDir::new().unwrap();
    let table = data.path().join(TEMPLATE_TABLE_PATH);
    std::fs::create_dir_all(table.parent().unwrap()).unwrap();
    templates().write(&table).unwrap();

    std::fs::create_dir_all(data.path().join("snapshot")).unwrap();
    WorldSnapshot {
        names: vec![HUT.to_string(), CHAIR.to_string()],
        records: vec![
            SnapshotRecord {
                id: 42,
                parent_id: 41,
                name_id: 1,
                cell_number: 0,
                position: Point3D::ORIGIN,
                orientation: Quaternion::IDENTITY,
            },
            SnapshotRecord {
                id: 41,
                parent_id: 0,
                name_id: 0,
                cell_number: 0,
                position: Point3D::new(-100.0, 0.0, 250.0),
                orientation: Quaternion::IDENTITY,
            },
        ],
    }
    .write(&data.path().join("snapshot/naboo.ws"))
    .unwrap();

    let buildout = data.path().join("datatables/buildout/naboo");
    std::fs::create_dir_all(&buildout).unwrap();
    std::fs::write(
        data.path().join("datatables/buildout/areas_naboo.tab"),
        "area_name\tx1\tz1\ntheed\t-5000\t4000\n",
    )
    .unwrap();
    std::fs::write(
        buildout.join("theed.tab"),
        format!(
            "crc\tcell\tpx\tpy\tpz\tqw\tqx\tqy\tqz\tradius\tportal\n\
             {}\t0\t10\t0\t10\t1\t0\t0\t0\t512\t0\n",
            template_crc(ROCK)
        ),
    )
    .unwrap();

    let config = Config {
        data_dir: Some(data.path().to_path_buf()),
        planets: vec!["naboo".to_string()],
        ..Config::default()
    };
    let world = WorldTest::start_with(config).await.expect("Failed to start server");

    let stats: serde_json::Value = world.get("/stats").await.unwrap().json().await.unwrap();
    assert_eq!(stats["resident"], 3);
    assert_eq!(stats["unresolved_links"], 0);
    assert_eq!(stats["templates"], templates().len());

    let resp = world.get("/objects/41").await.unwrap();
    assert_eq!(resp.status(), 200);
    let hut: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(hut["template"], HUT);
    assert_eq!(hut["children"], serde_json::json!([42]));
    assert_eq!(hut["planet"], "naboo");

    let resp = world.get("/objects/43").await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_shutdown_drains_sessions() {
    let data = TempDir::new().unwrap();
    let path = data.path().join(TEMPLATE_TABLE_PATH);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    templates().write(&path).unwrap();

    let config = Config {
        data_dir: Some(data.path().to_path_buf()),
        ..Config::default()
    };
    let world = WorldTest::start_with(config).await.expect("Failed to start server");
    let service = world.service();

    let creature = service.create_object(ObjectSpec::new(GUARD)).await.unwrap();
    let (session, _rx) = ChannelSession::new();
    let session: Arc<dyn Session> = Arc::new(session);
    service.bind_session(session.clone(), creature.id()).await.unwrap();

    world.shutdown();
    for _ in 0..50 {
        if session.is_closed() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(session.is_closed());
}
