//! Lua sandbox - secure execution environment for behavior scripts

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, Lua, Result as LuaResult, StdLib, Table, Value, VmState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum instructions per execution (default: 1,000,000)
    pub max_instructions: u64,
    /// Maximum memory in bytes (default: 64MB)
    pub max_memory: usize,
    /// Execution timeout in milliseconds (default: 500)
    pub timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_instructions: 1_000_000,
            max_memory: 64 * 1024 * 1024, // 64MB
            timeout_ms: 500,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Errors that can occur during sandbox execution
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("instruction limit exceeded ({0} > {1})")]
    InstructionLimitExceeded(u64, u64),

    #[error("memory limit exceeded ({0} bytes > {1} bytes)")]
    MemoryLimitExceeded(usize, usize),

    #[error("execution timeout ({0:?})")]
    Timeout(Duration),

    #[error("Lua error: {0}")]
    LuaError(#[from] mlua::Error),
}

/// A sandboxed Lua execution environment
pub struct Sandbox {
    lua: Lua,
    config: SandboxConfig,
    instruction_count: Arc<AtomicU64>,
    exceeded: Arc<AtomicBool>,
    timed_out: Arc<AtomicBool>,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl Sandbox {
    /// Create a new sandbox with the given configuration
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        // Create Lua with minimal standard libraries
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            mlua::LuaOptions::default(),
        )?;

        lua.set_memory_limit(config.max_memory)?;

        let instruction_count = Arc::new(AtomicU64::new(0));
        let exceeded = Arc::new(AtomicBool::new(false));
        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        let count_clone = instruction_count.clone();
        let exceeded_clone = exceeded.clone();
        let timed_out_clone = timed_out.clone();
        let deadline_clone = deadline.clone();
        let max_instructions = config.max_instructions;

        lua.set_hook(
            HookTriggers::new().every_nth_instruction(1000),
            move |_lua, _debug| {
                let current = count_clone.fetch_add(1000, Ordering::Relaxed) + 1000;
                if current > max_instructions {
                    exceeded_clone.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::runtime("instruction limit exceeded"));
                }
                if let Some(deadline) = *deadline_clone.lock() {
                    if Instant::now() > deadline {
                        timed_out_clone.store(true, Ordering::Relaxed);
                        return Err(mlua::Error::runtime("execution timeout"));
                    }
                }
                Ok(VmState::Continue)
            },
        );

        Self::remove_dangerous_globals(&lua)?;
        Self::add_safe_globals(&lua)?;

        Ok(Self {
            lua,
            config,
            instruction_count,
            exceeded,
            timed_out,
            deadline,
        })
    }

    /// Remove dangerous global functions/tables
    fn remove_dangerous_globals(lua: &Lua) -> LuaResult<()> {
        let globals = lua.globals();

        let dangerous = [
            "os",
            "io",
            "loadfile",
            "dofile",
            "load",
            "loadstring",
            "require",
            "package",
            "debug",
            "collectgarbage",
        ];

        for name in dangerous {
            globals.set(name, Value::Nil)?;
        }

        Ok(())
    }

    /// Add safe utility functions
    fn add_safe_globals(lua: &Lua) -> LuaResult<()> {
        let globals = lua.globals();

        // print goes to the debug log instead of stdout
        let safe_print = lua.create_function(|_, args: mlua::MultiValue| {
            let line: Vec<String> = args
                .iter()
                .map(|v| v.to_string().unwrap_or_else(|_| "?".to_string()))
                .collect();
            debug!(target: "worldd::script", "{}", line.join("\t"));
            Ok(())
        })?;
        globals.set("print", safe_print)?;

        Ok(())
    }

    /// Get the sandbox configuration
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute Lua code and return the result
    pub fn execute<R>(&mut self, code: &str) -> Result<R, SandboxError>
    where
        R: mlua::FromLuaMulti,
    {
        let chunk = self.lua.load(code);
        self.metered(|| chunk.eval())
    }

    /// Run a script in a fresh environment table and return that table.
    ///
    /// Globals the script defines land in the environment; reads fall
    /// back to the sandbox globals.
    pub fn load_environment(&mut self, code: &str, name: &str) -> Result<Table, SandboxError> {
        let env = self.lua.create_table()?;
        let meta = self.lua.create_table()?;
        meta.set("__index", self.lua.globals())?;
        env.set_metatable(Some(meta));

        let chunk = self
            .lua
            .load(code)
            .set_name(name)
            .set_environment(env.clone());
        self.metered(|| chunk.exec())?;
        Ok(env)
    }

    /// Execute a Lua function with arguments
    pub fn call<A, R>(&mut self, func: Function, args: A) -> Result<R, SandboxError>
    where
        A: mlua::IntoLuaMulti,
        R: mlua::FromLuaMulti,
    {
        self.metered(|| func.call(args))
    }

    fn metered<R>(&self, run: impl FnOnce() -> LuaResult<R>) -> Result<R, SandboxError> {
        self.instruction_count.store(0, Ordering::Relaxed);
        self.exceeded.store(false, Ordering::Relaxed);
        self.timed_out.store(false, Ordering::Relaxed);
        let start = Instant::now();
        *self.deadline.lock() = Some(start + self.config.timeout());

        let result = run();
        *self.deadline.lock() = None;

        if self.exceeded.load(Ordering::Relaxed) {
            return Err(SandboxError::InstructionLimitExceeded(
                self.instruction_count(),
                self.config.max_instructions,
            ));
        }
        if self.timed_out.load(Ordering::Relaxed) || start.elapsed() > self.config.timeout() {
            return Err(SandboxError::Timeout(self.config.timeout()));
        }

        result.map_err(|e| match e {
            mlua::Error::MemoryError(_) => {
                SandboxError::MemoryLimitExceeded(self.lua.used_memory(), self.config.max_memory)
            }
            other => SandboxError::LuaError(other),
        })
    }

    /// Check if a global exists
    pub fn global_exists(&self, name: &str) -> bool {
        self.lua
            .globals()
            .get::<Value>(name)
            .map(|v| !matches!(v, Value::Nil))
            .unwrap_or(false)
    }

    /// Instructions counted during the most recent execution
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count.load(Ordering::Relaxed)
    }

    /// Get current memory usage
    pub fn memory_used(&self) -> usize {
        self.lua.used_memory()
    }

    /// Access the underlying Lua state
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}
