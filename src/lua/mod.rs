//! Lua behavior scripts - sandboxed hooks attached to object templates

mod bindings;
mod host;
mod sandbox;

pub use bindings::{ObjectHandle, ScriptContext};
pub use host::{is_trivial, ScriptHost};
pub use sandbox::{Sandbox, SandboxConfig, SandboxError};
