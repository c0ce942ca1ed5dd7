//! Conversion between `HostValue` and the wire `JsValue`
//!
//! Both directions dispatch on a single tag and recurse into arrays. There
//! is no cycle detection: a self-referential host array recurses until the
//! stack runs out, so callers must not pass one.
//!
//! Ownership:
//! - `from_native` only reads; the value stays owned by whoever produced it.
//! - `to_native` allocates strings and array runs on the native side; the
//!   result belongs to the receiver, which releases it.

use chrono::{DateTime, Utc};
use latch_abi::{self as abi, JsValue, JsValueKind, NativeHandle};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::context::ContextShared;
use crate::error::InteropError;
use crate::exception::{JsException, ScriptError};
use crate::function::JsFunction;
use crate::host::{HostObject, HostValue};
use crate::keep_alive::KeepAlive;
use crate::object::JsObject;

pub struct Converter<'c> {
    keep_alive: &'c RefCell<KeepAlive>,
    owner: Weak<ContextShared>,
}

impl<'c> Converter<'c> {
    pub(crate) fn new(keep_alive: &'c RefCell<KeepAlive>, owner: Weak<ContextShared>) -> Self {
        Self { keep_alive, owner }
    }

    /// Converter bound to a bare registry, with no owning context.
    ///
    /// Proxies it creates report `ContextClosed` on every operation.
    pub fn detached(keep_alive: &'c RefCell<KeepAlive>) -> Self {
        Self::new(keep_alive, Weak::new())
    }

    /// Convert a value produced by the engine.
    ///
    /// Error kinds come back as `HostValue::Exception`; deciding whether to
    /// raise it is up to the caller. Protocol faults abort with an error after
    /// releasing every script handle the value carried.
    pub fn from_native(&self, value: &JsValue) -> Result<HostValue, InteropError> {
        let kind = value.kind()?;
        tracing::trace!(?kind, "from_native");

        let host = match kind {
            JsValueKind::Empty | JsValueKind::Null => HostValue::Null,
            JsValueKind::Boolean => HostValue::Bool(value.as_i32() != 0),
            JsValueKind::Integer => HostValue::I32(value.as_i32()),
            // Indices above u32::MAX are truncated.
            JsValueKind::Index => HostValue::U32(value.as_i64() as u32),
            JsValueKind::Number => HostValue::F64(value.as_f64()),
            JsValueKind::String => HostValue::String(self.string(value)),
            JsValueKind::Date => HostValue::Date(date_from_millis(value.as_f64())?),
            JsValueKind::Array => {
                // SAFETY: array runs are produced by the engine through latch_abi.
                let run = unsafe { abi::elements(value) };
                // Visit every element even after a fault: script objects past
                // it are pinned already and need a proxy to be released.
                let mut items = Vec::with_capacity(run.len());
                let mut fault = None;
                for element in run {
                    match self.from_native(element) {
                        Ok(item) => items.push(item),
                        Err(err) => {
                            fault.get_or_insert(err);
                        }
                    }
                }
                if let Some(err) = fault {
                    items.into_iter().for_each(discard);
                    return Err(err);
                }
                HostValue::Array(items)
            }
            JsValueKind::UnknownError => HostValue::Exception(JsException::Unknown {
                message: self.message(value),
            }),
            JsValueKind::StringError => {
                HostValue::Exception(JsException::Message(self.string(value)))
            }
            JsValueKind::Managed => {
                HostValue::Object(self.keep_alive.borrow().get(value.keep_alive_index())?.clone())
            }
            JsValueKind::ManagedError => {
                let resolved = self
                    .keep_alive
                    .borrow()
                    .get(value.keep_alive_index())?
                    .clone();
                let inner = resolved.is_error().then_some(resolved);
                let message = self.message(value).or_else(|| {
                    inner
                        .as_ref()
                        .and_then(HostObject::as_error)
                        .map(|error| error.to_string())
                });
                HostValue::Exception(JsException::Host { message, inner })
            }
            JsValueKind::Error => HostValue::Exception(JsException::Script(self.script_error(value))),
            JsValueKind::Wrapped => {
                let handle = value.handle().ok_or(InteropError::NullHandle)?;
                HostValue::Proxy(Rc::new(self.proxy(handle)))
            }
            JsValueKind::Function => {
                // SAFETY: function composites are produced by latch_abi::alloc_function.
                let pair = unsafe { abi::elements(value) };
                let [function, this] = pair else {
                    return Err(InteropError::UnexpectedValue {
                        expected: "function composite",
                        found: format!("{} records", pair.len()),
                    });
                };
                let function = self.pinned(function, "function handle");
                let this = match this.kind() {
                    Ok(JsValueKind::Null | JsValueKind::Empty) => Ok(None),
                    _ => self.pinned(this, "receiver handle").map(Some),
                };
                match (function, this) {
                    (Ok(function), Ok(this)) => {
                        HostValue::Function(Rc::new(JsFunction::new(function, this)))
                    }
                    (Err(err), Ok(Some(this))) => {
                        let _ = this.dispose();
                        return Err(err);
                    }
                    (Ok(function), Err(err)) => {
                        let _ = function.dispose();
                        return Err(err);
                    }
                    (Err(err), _) => return Err(err),
                }
            }
        };
        Ok(host)
    }

    /// Convert a host value for the engine. See the module docs for ownership.
    pub fn to_native(&self, value: &HostValue) -> Result<JsValue, InteropError> {
        let native = match value {
            HostValue::Null => JsValue::null(),
            HostValue::Bool(value) => JsValue::boolean(*value),
            HostValue::Char(value) => abi::alloc_string(value.encode_utf8(&mut [0; 4])),
            HostValue::String(value) => abi::alloc_string(value),

            HostValue::I8(value) => JsValue::integer((*value).into()),
            HostValue::U8(value) => JsValue::integer((*value).into()),
            HostValue::I16(value) => JsValue::integer((*value).into()),
            HostValue::U16(value) => JsValue::integer((*value).into()),
            HostValue::I32(value) => JsValue::integer(*value),
            // Bit-preserving: values above i32::MAX arrive negative.
            HostValue::U32(value) => JsValue::integer(*value as i32),

            // Beyond 2^53 these lose precision.
            HostValue::I64(value) => JsValue::number(*value as f64),
            HostValue::U64(value) => JsValue::number(*value as f64),
            HostValue::I128(value) => JsValue::number(*value as f64),
            HostValue::U128(value) => JsValue::number(*value as f64),
            HostValue::F32(value) => JsValue::number((*value).into()),
            HostValue::F64(value) => JsValue::number(*value),

            HostValue::Date(value) => JsValue::date(value.timestamp_millis() as f64),
            HostValue::Array(items) => self.to_native_array(items)?,

            HostValue::Object(object) => self.anchor(object.clone()),
            HostValue::Exception(exception) => self.anchor(HostObject::error(exception.clone())),
            HostValue::Proxy(object) => self.anchor(HostObject::from_rc(object.clone())),
            HostValue::Function(function) => self.anchor(HostObject::from_rc(function.clone())),
        };
        Ok(native)
    }

    /// Convert a slice into a native `Array` run.
    ///
    /// On failure the partially filled run is released before returning.
    pub fn to_native_array(&self, items: &[HostValue]) -> Result<JsValue, InteropError> {
        let mut native = abi::alloc_array(items.len());
        let allocated = native.length();
        if usize::try_from(allocated).ok() != Some(items.len()) {
            // SAFETY: freshly allocated by latch_abi, never shared.
            unsafe { abi::release(native) };
            return Err(InteropError::ArrayAllocation {
                requested: items.len(),
                allocated,
            });
        }

        let filled = {
            // SAFETY: freshly allocated run of `items.len()` records.
            let slots = unsafe { abi::elements_mut(&mut native) };
            slots
                .iter_mut()
                .zip(items)
                .try_for_each(|(slot, item)| {
                    *slot = self.to_native(item)?;
                    Ok::<_, InteropError>(())
                })
        };

        if let Err(err) = filled {
            // SAFETY: unfilled slots are still Empty; filled ones are ours.
            unsafe { abi::release(native) };
            return Err(err);
        }
        Ok(native)
    }

    fn anchor(&self, object: HostObject) -> JsValue {
        let index = self.keep_alive.borrow_mut().add(object);
        JsValue::managed(index)
    }

    fn proxy(&self, handle: NativeHandle) -> JsObject {
        JsObject::new(self.owner.clone(), handle)
    }

    /// Proxy for a slot that must hold a `Wrapped` handle.
    fn pinned(&self, value: &JsValue, expected: &'static str) -> Result<JsObject, InteropError> {
        match value.kind()? {
            JsValueKind::Wrapped => Ok(self.proxy(value.handle().ok_or(InteropError::NullHandle)?)),
            kind => Err(InteropError::UnexpectedValue {
                expected,
                found: format!("{kind:?}"),
            }),
        }
    }

    fn string(&self, value: &JsValue) -> String {
        self.message(value).unwrap_or_default()
    }

    fn message(&self, value: &JsValue) -> Option<String> {
        // SAFETY: string payloads are latch_abi buffers owned by the producer.
        unsafe { abi::read_string(value) }
    }

    fn optional_string(&self, value: &JsValue) -> Option<String> {
        if value.is(JsValueKind::String) {
            self.message(value)
        } else {
            None
        }
    }

    fn script_error(&self, value: &JsValue) -> ScriptError {
        // SAFETY: `Error` payloads are latch_abi error records.
        let Some(record) = (unsafe { abi::error_record(value) }) else {
            return ScriptError::default();
        };
        ScriptError {
            name: self.optional_string(&record.name),
            message: self.optional_string(&record.message),
            stack: self.optional_string(&record.stack),
            resource: self.optional_string(&record.resource),
            line: record.line,
            column: record.column,
        }
    }
}

/// Release the proxies inside a value that will never reach the caller.
fn discard(value: HostValue) {
    match value {
        HostValue::Proxy(object) => {
            let _ = object.dispose();
        }
        HostValue::Function(function) => {
            let _ = function.dispose();
        }
        HostValue::Array(items) => items.into_iter().for_each(discard),
        _ => {}
    }
}

fn date_from_millis(millis: f64) -> Result<DateTime<Utc>, InteropError> {
    if !millis.is_finite() {
        return Err(InteropError::InvalidDate(millis));
    }
    DateTime::from_timestamp_millis(millis.trunc() as i64).ok_or(InteropError::InvalidDate(millis))
}
