use latch_abi::UnknownKind;
use thiserror::Error;

use crate::exception::JsException;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// The two sides disagree about the wire protocol.
///
/// Never expected in correct operation; the current conversion is aborted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InteropError {
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),

    #[error("can't allocate memory on the native side: requested {requested} elements, got {allocated}")]
    ArrayAllocation { requested: usize, allocated: i32 },

    #[error("keep-alive index {index} is out of range (registry holds {len} slots)")]
    IndexOutOfRange { index: u32, len: usize },

    #[error("keep-alive slot {index} has already been released")]
    ReleasedIndex { index: u32 },

    #[error("can't wrap an empty object (handle is zero)")]
    NullHandle,

    #[error("date payload {0} ms is not a representable instant")]
    InvalidDate(f64),

    #[error("expected {expected}, got {found}")]
    UnexpectedValue { expected: &'static str, found: String },
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("interop protocol violation: {0}")]
    Interop(#[from] InteropError),

    #[error("script error: {0}")]
    Script(#[from] JsException),

    #[error("object already disposed: {0}")]
    ObjectDisposed(String),

    #[error("script context has been torn down")]
    ContextClosed,

    #[error("engine failure: {0}")]
    Engine(String),
}

impl BridgeError {
    /// The script exception, if this error came from the script side.
    pub fn as_exception(&self) -> Option<&JsException> {
        match self {
            BridgeError::Script(exception) => Some(exception),
            _ => None,
        }
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, BridgeError::Interop(_))
    }
}
