//! Latch Scripting System
//!
//! QuickJS engine behind the `latch_bridge::Engine` boundary.
//!
//! ## Architecture
//!
//! - **`ScriptEngine`:** one QuickJS runtime, one context per realm
//! - **FFI:** script objects held by the host are pinned in a handle table;
//!   everything else is copied into `latch_abi::JsValue` records
//! - **Host objects:** proxies in script whose traps call the owning context
//! - **Config:** `EngineConfig`, loaded from JSON
//!
//! ```no_run
//! use latch_script::{EngineConfig, ScriptEngine};
//!
//! let context = ScriptEngine::context(&EngineConfig::default())?;
//! let answer = context.execute("6 * 7")?;
//! assert_eq!(answer.as_i64(), Some(42));
//! # Ok::<(), latch_bridge::BridgeError>(())
//! ```

pub mod config;
pub mod error;
mod ffi;
pub mod runtime;

pub use config::EngineConfig;
pub use error::EngineError;
pub use runtime::{HeapStats, ScriptEngine, Terminator};

pub use latch_bridge;
pub use rquickjs;
