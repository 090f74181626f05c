//! Durable entity store: persisted creatures, buildings and the id high-water mark

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::{ObjectId, Planets, Point3D, Quaternion, Variant, WorldObject};

/// Persisted form of an object and its owned subtree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: ObjectId,
    pub template: String,
    pub planet_id: Option<u32>,
    pub position: Point3D,
    pub orientation: Quaternion,
    pub parent_id: Option<ObjectId>,
    pub custom_name: Option<String>,
    pub in_snapshot: bool,
    pub variant: Variant,
    #[serde(default)]
    pub children: Vec<StoredObject>,
}

impl StoredObject {
    /// Capture an object and everything it owns
    pub fn capture(obj: &WorldObject) -> Self {
        Self {
            id: obj.id(),
            template: obj.template().to_string(),
            planet_id: obj.planet().map(|p| p.id()),
            position: obj.position(),
            orientation: obj.orientation(),
            parent_id: obj.parent_id(),
            custom_name: obj.custom_name(),
            in_snapshot: obj.in_snapshot(),
            variant: obj.variant(),
            children: obj.children().iter().map(|c| Self::capture(c)).collect(),
        }
    }

    /// Rebuild the live object tree. Child edges are linked; the root keeps
    /// its parent id unresolved for the caller to attach.
    pub fn materialize(self, planets: &Planets) -> Arc<WorldObject> {
        let obj = Arc::new(WorldObject::new(
            self.id,
            &self.template,
            self.variant,
            self.planet_id.and_then(|id| planets.get(id)),
            self.position,
            self.orientation,
        ));
        obj.set_custom_name(self.custom_name);
        obj.set_in_snapshot(self.in_snapshot);
        obj.set_parent_id(self.parent_id);

        for child in self.children {
            let child = child.materialize(planets);
            obj.add_child(&child);
        }
        obj
    }
}

/// Entity storage with database backing
pub struct EntityStore {
    pool: SqlitePool,
}

impl EntityStore {
    /// Create a new entity store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Highest object id ever handed out
    pub async fn read_max(&self) -> Result<u64> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM highest_id WHERE slot = 0")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id as u64).unwrap_or(0))
    }

    /// Record a new high-water mark
    pub async fn write_max(&self, id: u64) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO highest_id (slot, id) VALUES (0, ?)")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert or replace a persisted creature
    pub async fn put_creature(&self, creature: &StoredObject) -> Result<()> {
        let data = serde_json::to_string(creature)?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO creatures (id, custom_name, planet_id, data, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(creature.id as i64)
        .bind(&creature.custom_name)
        .bind(creature.planet_id.map(|p| p as i64))
        .bind(&data)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a persisted creature by id
    pub async fn get_creature(&self, id: ObjectId) -> Result<Option<StoredObject>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM creatures WHERE id = ?")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(data,)| decode(&data)).transpose()
    }

    pub async fn contains_creature(&self, id: ObjectId) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM creatures WHERE id = ?")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// True if a persisted creature or building root holds this id.
    ///
    /// Ids nested inside a stored subtree are not checked.
    pub async fn contains_id(&self, id: ObjectId) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM creatures WHERE id = ?
            UNION ALL
            SELECT id FROM buildings WHERE id = ?
            LIMIT 1
            "#,
        )
        .bind(id as i64)
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Every persisted creature
    pub async fn creatures(&self) -> Result<Vec<StoredObject>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT data FROM creatures ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|(data,)| decode(data)).collect()
    }

    /// First persisted creature with this exact custom name.
    ///
    /// `custom_name` is deliberately unindexed; this is a full table scan.
    pub async fn find_creature_by_custom_name(&self, name: &str) -> Result<Option<StoredObject>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT data FROM creatures WHERE custom_name = ? ORDER BY id LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(data,)| decode(&data)).transpose()
    }

    /// Insert or replace a persisted building
    pub async fn put_building(&self, building: &StoredObject) -> Result<()> {
        let data = serde_json::to_string(building)?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO buildings (id, planet_id, data, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(building.id as i64)
        .bind(building.planet_id.map(|p| p as i64))
        .bind(&data)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_building(&self, id: ObjectId) -> Result<Option<StoredObject>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM buildings WHERE id = ?")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(data,)| decode(&data)).transpose()
    }

    /// Every persisted building, optionally restricted to one planet
    pub async fn buildings(&self, planet_id: Option<u32>) -> Result<Vec<StoredObject>> {
        let rows: Vec<(String,)> = match planet_id {
            Some(planet) => {
                sqlx::query_as("SELECT data FROM buildings WHERE planet_id = ? ORDER BY id")
                    .bind(planet as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT data FROM buildings ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(|(data,)| decode(data)).collect()
    }

    /// Delete every persisted record for this id
    pub async fn delete_entity(&self, id: ObjectId) -> Result<bool> {
        let creatures = sqlx::query("DELETE FROM creatures WHERE id = ?")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        let buildings = sqlx::query("DELETE FROM buildings WHERE id = ?")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;

        Ok(creatures.rows_affected() + buildings.rows_affected() > 0)
    }
}

fn decode(data: &str) -> Result<StoredObject> {
    serde_json::from_str(data).context("decoding stored entity")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_pool;
    use crate::objects::{ObjectKind, Planet};

    fn stored(id: ObjectId, template: &str, kind: ObjectKind) -> StoredObject {
        StoredObject {
            id,
            template: template.to_string(),
            planet_id: Some(1),
            position: Point3D::new(1.0, 2.0, 3.0),
            orientation: Quaternion::IDENTITY,
            parent_id: None,
            custom_name: None,
            in_snapshot: false,
            variant: Variant::new(kind),
            children: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_high_water_mark() {
        let store = EntityStore::new(test_pool().await);
        assert_eq!(store.read_max().await.unwrap(), 0);

        store.write_max(17).await.unwrap();
        assert_eq!(store.read_max().await.unwrap(), 17);
    }

    #[tokio::test]
    async fn test_creature_roundtrip() {
        let store = EntityStore::new(test_pool().await);
        let mut creature = stored(100, "object/creature/player/shared_human_male.iff", ObjectKind::Creature);
        creature.custom_name = Some("Luke Skywalker".to_string());
        let mut inventory = stored(101, "object/tangible/inventory/shared_character_inventory.iff", ObjectKind::Tangible);
        inventory.parent_id = Some(100);
        creature.children.push(inventory);

        store.put_creature(&creature).await.unwrap();

        assert!(store.contains_creature(100).await.unwrap());
        assert!(store.contains_id(100).await.unwrap());
        assert!(!store.contains_creature(101).await.unwrap());

        let loaded = store.get_creature(100).await.unwrap().unwrap();
        assert_eq!(loaded, creature);

        let found = store
            .find_creature_by_custom_name("Luke Skywalker")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, 100);
        assert!(store
            .find_creature_by_custom_name("Leia")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_buildings_by_planet() {
        let store = EntityStore::new(test_pool().await);
        let a = stored(1, "object/building/shared_hut.iff", ObjectKind::Building);
        let mut b = stored(2, "object/building/shared_hut.iff", ObjectKind::Building);
        b.planet_id = Some(2);
        store.put_building(&a).await.unwrap();
        store.put_building(&b).await.unwrap();

        assert_eq!(store.buildings(None).await.unwrap().len(), 2);
        let on_two = store.buildings(Some(2)).await.unwrap();
        assert_eq!(on_two.len(), 1);
        assert_eq!(on_two[0].id, 2);
        assert!(store.contains_id(2).await.unwrap());

        assert!(store.delete_entity(2).await.unwrap());
        assert!(!store.delete_entity(2).await.unwrap());
        assert!(store.get_building(2).await.unwrap().is_none());
    }

    #[test]
    fn test_capture_and_materialize_subtree() {
        let planets = Planets::new();
        planets.add(Planet::new(1, "tatooine"));

        let mut building = stored(10, "object/building/shared_hut.iff", ObjectKind::Building);
        let mut cell = stored(11, "object/cell/shared_cell.iff", ObjectKind::Cell);
        cell.parent_id = Some(10);
        cell.variant = Variant::Cell { cell_number: 1 };
        let mut chair = stored(12, "object/tangible/furniture/shared_chair.iff", ObjectKind::Tangible);
        chair.parent_id = Some(11);
        cell.children.push(chair);
        building.children.push(cell);

        let obj = building.clone().materialize(&planets);
        assert_eq!(obj.planet().unwrap().name(), "tatooine");
        assert_eq!(obj.descendants().len(), 2);
        let cell = obj.cell_by_number(1).unwrap();
        assert!(Arc::ptr_eq(&cell.container().unwrap(), &obj));
        assert_eq!(cell.children()[0].id(), 12);

        assert_eq!(StoredObject::capture(&obj), building);
    }
}
