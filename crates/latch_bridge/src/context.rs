//! Script execution context
//!
//! A `JsContext` owns one realm in an engine and the keep-alive registry for
//! every host object exposed to it. All values crossing the boundary go
//! through here: host values are converted and handed over (the engine owns
//! them from then on), engine results are converted and released at once.

use latch_abi::{self as abi, JsValue, NativeHandle};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::convert::Converter;
use crate::engine::{Engine, HostAccess, RealmId};
use crate::error::{BridgeError, InteropError, Result};
use crate::exception::JsException;
use crate::host::{HostObject, HostValue};
use crate::keep_alive::KeepAlive;
use crate::object::DynamicObject;

pub struct JsContext {
    shared: Rc<ContextShared>,
}

/// State shared between a context and the proxies it hands out.
///
/// Proxies hold it weakly, so dropping the `JsContext` tears the realm down
/// even while proxies are still around.
pub(crate) struct ContextShared {
    engine: Rc<dyn Engine>,
    realm: RealmId,
    keep_alive: RefCell<KeepAlive>,
    this: Weak<ContextShared>,
}

impl JsContext {
    pub fn new(engine: Rc<dyn Engine>) -> Result<Self> {
        let realm = engine.create_realm()?;
        let shared = Rc::new_cyclic(|this| ContextShared {
            engine,
            realm,
            keep_alive: RefCell::new(KeepAlive::new()),
            this: this.clone(),
        });
        let host: Weak<dyn HostAccess> = shared.this.clone();
        shared.engine.attach_host(realm, host);
        tracing::debug!(realm = realm.0, "script context created");
        Ok(Self { shared })
    }

    pub fn realm(&self) -> RealmId {
        self.shared.realm
    }

    pub fn execute(&self, source: &str) -> Result<HostValue> {
        self.shared.execute(source, None)
    }

    /// Like [`execute`](Self::execute); `resource` names the script in
    /// stack traces and error records.
    pub fn execute_named(&self, source: &str, resource: &str) -> Result<HostValue> {
        self.shared.execute(source, Some(resource))
    }

    pub fn set_variable(&self, name: &str, value: impl Into<HostValue>) -> Result<()> {
        let shared = &self.shared;
        let native = shared.converter().to_native(&value.into())?;
        shared.accept_status(shared.engine.set_variable(shared.realm, name, native))
    }

    pub fn get_variable(&self, name: &str) -> Result<HostValue> {
        let shared = &self.shared;
        shared.accept(shared.engine.get_variable(shared.realm, name))
    }

    /// Drop the anchor at `index` once the engine reports that script can no
    /// longer reach it.
    pub fn release_managed(&self, index: u32) -> Result<HostObject> {
        let object = self.shared.keep_alive.borrow_mut().remove(index)?;
        tracing::trace!(index, "keep-alive anchor released");
        Ok(object)
    }

    /// The host object anchored at `index`.
    pub fn keep_alive_get(&self, index: u32) -> Result<HostObject> {
        Ok(self.shared.keep_alive.borrow().get(index)?.clone())
    }

    /// Number of live keep-alive anchors.
    pub fn keep_alive_len(&self) -> usize {
        self.shared.keep_alive.borrow().len()
    }

    /// Converter bound to this context's registry.
    pub fn converter(&self) -> Converter<'_> {
        self.shared.converter()
    }
}

impl fmt::Debug for JsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsContext")
            .field("realm", &self.shared.realm)
            .field("keep_alive", &self.keep_alive_len())
            .finish()
    }
}

impl ContextShared {
    fn converter(&self) -> Converter<'_> {
        Converter::new(&self.keep_alive, self.this.clone())
    }

    fn execute(self: &Rc<Self>, source: &str, resource: Option<&str>) -> Result<HostValue> {
        tracing::trace!(realm = self.realm.0, ?resource, "execute");
        self.accept(self.engine.execute(self.realm, source, resource))
    }

    pub(crate) fn get_property(self: &Rc<Self>, object: NativeHandle, name: &str) -> Result<HostValue> {
        self.accept(self.engine.get_property(self.realm, object, name))
    }

    pub(crate) fn set_property(
        self: &Rc<Self>,
        object: NativeHandle,
        name: &str,
        value: &HostValue,
    ) -> Result<()> {
        let native = self.converter().to_native(value)?;
        self.accept_status(self.engine.set_property(self.realm, object, name, native))
    }

    pub(crate) fn invoke(
        self: &Rc<Self>,
        object: NativeHandle,
        name: &str,
        args: &[HostValue],
    ) -> Result<HostValue> {
        let args = self.converter().to_native_array(args)?;
        self.accept(self.engine.invoke(self.realm, object, name, args))
    }

    pub(crate) fn call(
        self: &Rc<Self>,
        function: NativeHandle,
        this: Option<NativeHandle>,
        args: &[HostValue],
    ) -> Result<HostValue> {
        let args = self.converter().to_native_array(args)?;
        self.accept(self.engine.call(self.realm, function, this, args))
    }

    pub(crate) fn property_names(self: &Rc<Self>, object: NativeHandle) -> Result<Vec<String>> {
        let items = match self.accept(self.engine.property_names(self.realm, object))? {
            HostValue::Array(items) => items,
            other => return Err(unexpected("array of names", &other).into()),
        };
        items
            .into_iter()
            .map(|item| match item {
                HostValue::String(name) => Ok(name),
                other => Err(unexpected("property name", &other).into()),
            })
            .collect()
    }

    pub(crate) fn dispose_handle(&self, handle: NativeHandle) {
        tracing::debug!(realm = self.realm.0, handle = handle.get(), "releasing native handle");
        self.engine.dispose_handle(self.realm, handle);
    }

    /// Convert and release a value produced by the engine. Error kinds turn
    /// into `BridgeError::Script`.
    fn accept(&self, value: JsValue) -> Result<HostValue> {
        let converted = self.converter().from_native(&value);
        // SAFETY: the engine handed ownership of `value` to us.
        unsafe { abi::release(value) };
        Ok(converted?.into_result()?)
    }

    fn accept_status(&self, value: JsValue) -> Result<()> {
        self.accept(value).map(drop)
    }

    fn accept_args(&self, args: JsValue) -> Result<Vec<HostValue>> {
        match self.accept(args)? {
            HostValue::Array(items) => Ok(items),
            other => Err(unexpected("argument array", &other).into()),
        }
    }

    /// Run a member operation for script and encode its outcome.
    fn answer<F>(&self, index: u32, operation: F) -> JsValue
    where
        F: FnOnce(&dyn DynamicObject) -> Result<HostValue>,
    {
        let outcome = self.keep_alive.borrow().get(index).cloned();
        let outcome = outcome
            .map_err(BridgeError::from)
            .and_then(|object| match object.members() {
                Some(members) => operation(members),
                None => Err(JsException::Message(format!("host object {index} has no members")).into()),
            })
            .and_then(|value| Ok(self.converter().to_native(&value)?));
        match outcome {
            Ok(native) => native,
            Err(err) => self.raise(index, err),
        }
    }

    /// Encode a failed member operation as an error kind for script to throw.
    fn raise(&self, index: u32, err: BridgeError) -> JsValue {
        tracing::debug!(realm = self.realm.0, index, %err, "host member access failed");
        match err {
            BridgeError::Script(exception) => {
                let message = exception.message().map(str::to_owned);
                let anchored = self.keep_alive.borrow_mut().add(HostObject::error(exception));
                abi::alloc_managed_error(anchored, message.as_deref())
            }
            other => abi::alloc_string_error(&other.to_string()),
        }
    }
}

impl HostAccess for ContextShared {
    fn get(&self, index: u32, name: &str) -> JsValue {
        tracing::trace!(index, name, "script reads host member");
        self.answer(index, |members| members.get(name))
    }

    fn set(&self, index: u32, name: &str, value: JsValue) -> JsValue {
        tracing::trace!(index, name, "script writes host member");
        let value = self.accept(value);
        self.answer(index, |members| {
            members.set(name, value?)?;
            Ok(HostValue::Null)
        })
    }

    fn delete(&self, index: u32, name: &str) -> JsValue {
        self.answer(index, |members| members.delete(name).map(HostValue::Bool))
    }

    fn names(&self, index: u32) -> JsValue {
        self.answer(index, |members| {
            let names = members.member_names()?;
            Ok(HostValue::Array(names.into_iter().map(HostValue::String).collect()))
        })
    }

    fn is_method(&self, index: u32, name: &str) -> bool {
        let object = self.keep_alive.borrow().get(index).cloned();
        object
            .ok()
            .and_then(|object| object.members().map(|members| members.is_method(name)))
            .unwrap_or(false)
    }

    fn invoke(&self, index: u32, name: &str, args: JsValue) -> JsValue {
        tracing::trace!(index, name, "script invokes host method");
        let args = self.accept_args(args);
        self.answer(index, |members| members.invoke(name, &args?))
    }

    fn call(&self, index: u32, args: JsValue) -> JsValue {
        let args = self.accept_args(args);
        self.answer(index, |members| members.call(&args?))
    }

    fn value_of(&self, index: u32) -> JsValue {
        self.answer(index, |members| members.value_of())
    }
}

impl Drop for ContextShared {
    fn drop(&mut self) {
        tracing::debug!(
            realm = self.realm.0,
            anchors = self.keep_alive.borrow().len(),
            "script context torn down"
        );
        self.engine.destroy_realm(self.realm);
        self.keep_alive.borrow_mut().clear();
    }
}

fn unexpected(expected: &'static str, found: &HostValue) -> InteropError {
    InteropError::UnexpectedValue {
        expected,
        found: format!("{found:?}"),
    }
}
