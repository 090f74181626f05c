//! Userdata handed to behavior scripts

use std::sync::Arc;
use std::time::Duration;

use mlua::{LuaSerdeExt, UserData, UserDataMethods, Value};
use tracing::info;

use crate::objects::{Attachment, ObjectId, ObjectRegistry, WorldObject};

/// Script-side handle to a world object
#[derive(Debug, Clone)]
pub struct ObjectHandle(pub Arc<WorldObject>);

impl UserData for ObjectHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("getObjectId", |_, this, ()| Ok(this.0.id()));

        methods.add_method("getTemplate", |_, this, ()| {
            Ok(this.0.template().to_string())
        });

        methods.add_method("getCustomName", |_, this, ()| Ok(this.0.custom_name()));

        methods.add_method("setCustomName", |_, this, name: Option<String>| {
            this.0.set_custom_name(name);
            Ok(())
        });

        methods.add_method("getCellNumber", |_, this, ()| Ok(this.0.cell_number()));

        methods.add_method("getParentId", |_, this, ()| Ok(this.0.parent_id()));

        methods.add_method("getPosition", |_, this, ()| {
            let p = this.0.position();
            Ok((p.x, p.y, p.z))
        });

        // Seconds; zero or nil clears the delay
        methods.add_method("setRespawnDelay", |_, this, secs: Option<f64>| {
            let delay = secs
                .filter(|s| s.is_finite() && *s > 0.0)
                .map(Duration::from_secs_f64);
            Ok(this.0.set_respawn_delay(delay))
        });

        methods.add_method("getAttachment", |lua, this, key: String| {
            match this.0.attachment(&key) {
                None => Ok(Value::Nil),
                Some(Attachment::Value(v)) => lua.to_value(&v),
                Some(Attachment::Task(task)) => lua.to_value(&task.to_string()),
                Some(Attachment::Objects(ids)) => lua.to_value(&ids),
            }
        });

        methods.add_method("setAttachment", |lua, this, (key, value): (String, Value)| {
            if value.is_nil() {
                this.0.take_attachment(&key);
            } else {
                let json: serde_json::Value = lua.from_value(value)?;
                this.0.set_attachment(&key, Attachment::Value(json));
            }
            Ok(())
        });
    }
}

/// The `core` argument every handler receives
#[derive(Debug, Clone)]
pub struct ScriptContext {
    registry: Arc<ObjectRegistry>,
}

impl ScriptContext {
    pub fn new(registry: Arc<ObjectRegistry>) -> Self {
        Self { registry }
    }
}

impl UserData for ScriptContext {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("getObject", |_, this, id: ObjectId| {
            Ok(this.registry.get(id).map(ObjectHandle))
        });

        methods.add_method("objectCount", |_, this, ()| Ok(this.registry.len()));

        methods.add_method("log", |_, _this, message: String| {
            info!(target: "worldd::script", "{}", message);
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ObjectKind, Point3D, Quaternion, Variant};
    use mlua::Lua;

    fn chest() -> Arc<WorldObject> {
        Arc::new(WorldObject::new(
            12,
            "object/tangible/container/shared_chest.iff",
            Variant::new(ObjectKind::Tangible),
            None,
            Point3D::new(1.0, 2.0, 3.0),
            Quaternion::IDENTITY,
        ))
    }

    #[test]
    fn test_object_handle_methods() {
        let lua = Lua::new();
        let obj = chest();
        lua.globals().set("obj", ObjectHandle(obj.clone())).unwrap();

        let (id, template, x): (u64, String, f32) = lua
            .load(
                r#"
                obj:setCustomName("Old Chest")
                obj:setRespawnDelay(30)
                obj:setAttachment("loot_table", { tier = 2 })
                local x, y, z = obj:getPosition()
                return obj:getObjectId(), obj:getTemplate(), x
                "#,
            )
            .eval()
            .unwrap();

        assert_eq!(id, 12);
        assert_eq!(template, "object/tangible/container/shared_chest.iff");
        assert_eq!(x, 1.0);
        assert_eq!(obj.custom_name().as_deref(), Some("Old Chest"));
        assert_eq!(obj.respawn_delay(), Some(Duration::from_secs(30)));
        assert_eq!(
            obj.attachment("loot_table"),
            Some(Attachment::Value(serde_json::json!({ "tier": 2 })))
        );

        let tier: i64 = lua
            .load("return obj:getAttachment('loot_table').tier")
            .eval()
            .unwrap();
        assert_eq!(tier, 2);
    }

    #[test]
    fn test_context_lookup() {
        let lua = Lua::new();
        let registry = ObjectRegistry::shared();
        registry.put(chest());
        lua.globals()
            .set("core", ScriptContext::new(registry))
            .unwrap();

        let (count, found, missing): (usize, u64, bool) = lua
            .load("return core:objectCount(), core:getObject(12):getObjectId(), core:getObject(99) == nil")
            .eval()
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(found, 12);
        assert!(missing);
    }
}
