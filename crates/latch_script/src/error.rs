use latch_bridge::{BridgeError, InteropError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("QuickJS: {0}")]
    QuickJs(#[from] rquickjs::Error),

    #[error(transparent)]
    Interop(#[from] InteropError),

    #[error("invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("can't read engine configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EngineError> for BridgeError {
    fn from(error: EngineError) -> Self {
        BridgeError::Engine(error.to_string())
    }
}
