//! Latch Script Bridge
//!
//! Moves values between host code and the embedded script engine.
//!
//! ## Pieces
//!
//! - **`HostValue`:** what host code reads and writes
//! - **`Converter`:** `HostValue` <-> `latch_abi::JsValue`, recursive for arrays
//! - **`KeepAlive`:** anchors host objects referenced from script
//! - **`HostAccess`:** script reading, writing and calling anchored objects
//! - **`JsObject` / `JsFunction`:** host-side proxies for script objects
//! - **`JsContext`:** one realm plus its registry; the unit of confinement
//!
//! A context and everything it hands out is `!Send`: all conversions for a
//! realm happen on the thread that created it.

pub mod context;
pub mod convert;
pub mod engine;
pub mod error;
pub mod exception;
pub mod function;
pub mod host;
pub mod keep_alive;
pub mod object;

#[cfg(test)]
pub(crate) mod mock;

pub use context::JsContext;
pub use convert::Converter;
pub use engine::{Engine, HostAccess, RealmId};
pub use error::{BridgeError, InteropError, Result};
pub use exception::{JsException, ScriptError};
pub use function::JsFunction;
pub use host::{HostObject, HostValue};
pub use keep_alive::KeepAlive;
pub use object::{DynamicObject, JsObject};

pub use latch_abi;
