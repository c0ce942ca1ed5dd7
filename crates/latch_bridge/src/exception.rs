//! Script-visible failures surfaced to the host
//!
//! Built only when an error-kind value is converted; nothing here is
//! allocated on the happy path.

use std::error::Error;
use std::fmt;

use crate::host::HostObject;

/// Message used when the engine failed without saying why.
pub const UNKNOWN_ERROR_MESSAGE: &str = "unknown error without reason";

/// A failure raised on the script side of the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum JsException {
    /// Engine failure, possibly with a reason (`UnknownError`).
    Unknown { message: Option<String> },
    /// Message-only failure (`StringError`).
    Message(String),
    /// A host error thrown through script and caught again (`ManagedError`).
    /// `inner` is the original error whenever the registry still holds it.
    Host {
        message: Option<String>,
        inner: Option<HostObject>,
    },
    /// Fully structured script error (`Error`).
    Script(ScriptError),
}

impl JsException {
    pub fn message(&self) -> Option<&str> {
        match self {
            JsException::Unknown { message } | JsException::Host { message, .. } => {
                message.as_deref()
            }
            JsException::Message(message) => Some(message),
            JsException::Script(error) => error.message.as_deref(),
        }
    }

    /// The original host error of a `Host` exception.
    pub fn inner(&self) -> Option<&HostObject> {
        match self {
            JsException::Host { inner, .. } => inner.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for JsException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsException::Unknown { message } => {
                f.write_str(message.as_deref().unwrap_or(UNKNOWN_ERROR_MESSAGE))
            }
            JsException::Message(message) => f.write_str(message),
            JsException::Host { message, .. } => {
                f.write_str(message.as_deref().unwrap_or("host error"))
            }
            JsException::Script(error) => error.fmt(f),
        }
    }
}

impl Error for JsException {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner().and_then(HostObject::as_error)
    }
}

/// Structured script error decoded from a `JsErrorRecord`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptError {
    /// Constructor name (`TypeError`, `SyntaxError`, ...).
    pub name: Option<String>,
    pub message: Option<String>,
    pub stack: Option<String>,
    pub resource: Option<String>,
    /// 1-based; zero when unknown.
    pub line: i32,
    pub column: i32,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.message) {
            (Some(name), Some(message)) => write!(f, "{name}: {message}")?,
            (Some(name), None) => f.write_str(name)?,
            (None, Some(message)) => f.write_str(message)?,
            (None, None) => f.write_str("script error")?,
        }
        if let Some(resource) = &self.resource {
            write!(f, " ({resource}")?;
            if self.line > 0 {
                write!(f, ":{}:{}", self.line, self.column)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}
