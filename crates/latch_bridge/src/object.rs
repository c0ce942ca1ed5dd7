//! Host-side proxies for objects living in the engine

use latch_abi::NativeHandle;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::context::ContextShared;
use crate::error::{BridgeError, Result};
use crate::exception::JsException;
use crate::host::HostValue;

/// Member access by name.
///
/// Implemented by [`JsObject`] for script objects, and by host types that
/// script should be able to work with (see [`HostObject::dynamic`]). Host
/// implementations run inside script execution and must not call back into
/// the engine that is running them.
///
/// [`HostObject::dynamic`]: crate::HostObject::dynamic
pub trait DynamicObject {
    fn get(&self, name: &str) -> Result<HostValue>;

    fn set(&self, name: &str, value: HostValue) -> Result<()>;

    /// Call method `name` with `args`; the object is the receiver.
    fn invoke(&self, name: &str, args: &[HostValue]) -> Result<HostValue>;

    fn member_names(&self) -> Result<Vec<String>>;

    /// Whether reading `name` from script yields a callable bound to
    /// [`invoke`](Self::invoke) rather than the result of [`get`](Self::get).
    fn is_method(&self, _name: &str) -> bool {
        false
    }

    /// Remove member `name`. Returns whether anything was removed.
    fn delete(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    /// Call the object itself.
    fn call(&self, _args: &[HostValue]) -> Result<HostValue> {
        Err(JsException::Message("object is not a function".into()).into())
    }

    /// Primitive value script sees when it converts the object.
    fn value_of(&self) -> Result<HostValue> {
        Ok(HostValue::Null)
    }
}

/// Proxy for a script object, identified by its native handle.
///
/// Call [`JsObject::dispose`] when done. Dropping a live proxy also releases
/// the handle but logs a warning, since that path hides leaks in long-lived
/// values.
pub struct JsObject {
    context: Weak<ContextShared>,
    handle: NativeHandle,
    disposed: Cell<bool>,
}

impl JsObject {
    pub(crate) fn new(context: Weak<ContextShared>, handle: NativeHandle) -> Self {
        Self {
            context,
            handle,
            disposed: Cell::new(false),
        }
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Release the native handle. Fails if the proxy was already disposed.
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.replace(true) {
            return Err(self.disposed_error());
        }
        match self.context.upgrade() {
            Some(context) => context.dispose_handle(self.handle),
            None => tracing::debug!(handle = self.handle.get(), "context gone, handle died with its realm"),
        }
        Ok(())
    }

    /// Owning context, if the proxy is still usable.
    pub(crate) fn live(&self) -> Result<Rc<ContextShared>> {
        if self.disposed.get() {
            return Err(self.disposed_error());
        }
        self.context.upgrade().ok_or(BridgeError::ContextClosed)
    }

    fn disposed_error(&self) -> BridgeError {
        BridgeError::ObjectDisposed(format!("JsObject:{}", self.handle.get()))
    }
}

impl DynamicObject for JsObject {
    fn get(&self, name: &str) -> Result<HostValue> {
        self.live()?.get_property(self.handle, name)
    }

    fn set(&self, name: &str, value: HostValue) -> Result<()> {
        self.live()?.set_property(self.handle, name, &value)
    }

    fn invoke(&self, name: &str, args: &[HostValue]) -> Result<HostValue> {
        self.live()?.invoke(self.handle, name, args)
    }

    fn member_names(&self) -> Result<Vec<String>> {
        self.live()?.property_names(self.handle)
    }
}

impl Drop for JsObject {
    fn drop(&mut self) {
        if self.disposed.get() {
            return;
        }
        match self.context.upgrade() {
            Some(context) => {
                tracing::warn!(handle = self.handle.get(), "JsObject dropped without dispose()");
                context.dispose_handle(self.handle);
            }
            None => tracing::debug!(handle = self.handle.get(), "JsObject outlived its context"),
        }
    }
}

/// Two proxies are equal when they refer to the same native handle.
impl PartialEq for JsObject {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.context.ptr_eq(&other.context)
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsObject")
            .field("handle", &self.handle.get())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}
