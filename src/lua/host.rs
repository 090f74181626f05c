//! Behavior script lookup, caching and invocation

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use mlua::{Function, MultiValue, Table, Value};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::bindings::{ObjectHandle, ScriptContext};
use super::sandbox::{Sandbox, SandboxConfig, SandboxError};
use crate::error::{ObjectError, ObjectResult};
use crate::objects::{ObjectRegistry, ScriptLocation, WorldObject};

struct CachedScript {
    modified: Option<SystemTime>,
    digest: String,
    /// None for trivial scripts, which are never loaded
    env: Option<Table>,
}

/// True when a script has no lines other than blanks and comments
pub fn is_trivial(code: &str) -> bool {
    code.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

fn digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Resolves `(template, event)` to a Lua handler and runs it in the sandbox
pub struct ScriptHost {
    root: Option<PathBuf>,
    sandbox: Mutex<Sandbox>,
    cache: Mutex<HashMap<PathBuf, CachedScript>>,
    context: ScriptContext,
}

impl ScriptHost {
    /// `root` of None disables scripting; every lookup misses
    pub fn new(
        root: Option<PathBuf>,
        config: SandboxConfig,
        registry: Arc<ObjectRegistry>,
    ) -> Result<Self, SandboxError> {
        Ok(Self {
            root,
            sandbox: Mutex::new(Sandbox::new(config)?),
            cache: Mutex::new(HashMap::new()),
            context: ScriptContext::new(registry),
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Whether a non-trivial script exists for this location
    pub fn has_script(&self, location: &ScriptLocation) -> bool {
        self.environment(location).is_some()
    }

    /// Look up a handler. A missing script or handler is not an error.
    pub fn handler(&self, location: &ScriptLocation, event: &str) -> Option<Function> {
        match self.environment(location)?.get::<Value>(event) {
            Ok(Value::Function(f)) => Some(f),
            _ => None,
        }
    }

    /// Invoke `event` with `(core, objects...)`.
    ///
    /// Returns Ok(false) when no handler exists.
    pub fn invoke(
        &self,
        location: &ScriptLocation,
        event: &str,
        objects: &[&Arc<WorldObject>],
    ) -> ObjectResult<bool> {
        let Some(handler) = self.handler(location, event) else {
            return Ok(false);
        };
        let failure = |message: String| ObjectError::ScriptHandlerFailure {
            script: location.key(),
            event: event.to_string(),
            message,
        };

        let mut sandbox = self.sandbox.lock();
        let lua = sandbox.lua();
        let mut args = Vec::with_capacity(objects.len() + 1);
        args.push(Value::UserData(
            lua.create_userdata(self.context.clone())
                .map_err(|e| failure(e.to_string()))?,
        ));
        for obj in objects {
            args.push(Value::UserData(
                lua.create_userdata(ObjectHandle(Arc::clone(obj)))
                    .map_err(|e| failure(e.to_string()))?,
            ));
        }

        sandbox
            .call::<_, ()>(handler, MultiValue::from_vec(args))
            .map_err(|e| failure(e.to_string()))?;
        debug!(script = %location.key(), event, "script handler ran");
        Ok(true)
    }

    /// Invoke and log any failure; the caller carries on regardless
    pub fn invoke_logged(
        &self,
        location: &ScriptLocation,
        event: &str,
        objects: &[&Arc<WorldObject>],
    ) -> bool {
        match self.invoke(location, event, objects) {
            Ok(ran) => ran,
            Err(e) => {
                warn!(error = %e, "script handler failed");
                false
            }
        }
    }

    /// Loaded handler table for a location, reloading when the file changed
    fn environment(&self, location: &ScriptLocation) -> Option<Table> {
        let path = self.root.as_ref()?.join(location.relative_path());
        let modified = std::fs::metadata(&path).ok()?.modified().ok();

        let mut cache = self.cache.lock();
        if let Some(cached) = cache.get(&path) {
            if modified.is_some() && cached.modified == modified {
                return cached.env.clone();
            }
        }

        let code = match std::fs::read_to_string(&path) {
            Ok(code) => code,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read script");
                return None;
            }
        };
        let digest = digest(&code);
        if let Some(cached) = cache.get_mut(&path) {
            if cached.digest == digest {
                cached.modified = modified;
                return cached.env.clone();
            }
        }

        let env = if is_trivial(&code) {
            None
        } else {
            let name = path.to_string_lossy();
            match self.sandbox.lock().load_environment(&code, &name) {
                Ok(env) => Some(env),
                Err(e) => {
                    warn!(script = %location.key(), error = %e, "failed to load script");
                    None
                }
            }
        };
        debug!(script = %location.key(), digest = %digest, "script cached");
        cache.insert(
            path,
            CachedScript {
                modified,
                digest,
                env: env.clone(),
            },
        );
        env
    }

    /// Number of cached script files
    pub fn cached_scripts(&self) -> usize {
        self.cache.lock().len()
    }
}
