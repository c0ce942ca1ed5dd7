//! FFI layer between the bridge and QuickJS
//!
//! Script objects handed to the host are pinned in a [`HandleTable`] and
//! travel as `NativeHandle`s. [`Marshal`] converts between `JsValue` records
//! and QuickJS values inside one realm.

use latch_abi::{self as abi, JsErrorRecord, JsValue, JsValueKind, NativeHandle};
use latch_bridge::{HostAccess, InteropError, RealmId};
use rquickjs::function::{Rest, This};
use rquickjs::{Array, Ctx, Exception, FromJs, Function, Object, Persistent, Value};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::EngineError;

/// File name QuickJS records for code run through `Ctx::eval`.
pub(crate) const EVAL_FILE_NAME: &str = "eval_script";

/// Per-realm helpers for checks that have no direct C API in rquickjs.
///
/// Evaluates to a factory taking the native trap functions (see [`Trap`]).
/// Managed references are proxies over a callable target keyed by a private
/// symbol; every string-keyed access goes to the host.
pub(crate) const BOOTSTRAP: &str = r#"
((host) => {
    const managed = Symbol("latch.managed");
    const id = (target) => target[managed];
    const names = (target) => host.names(helpers, id(target), "", undefined);
    const handler = {
        get(target, key) {
            if (typeof key === "symbol") {
                return key === Symbol.toPrimitive
                    ? () => host.valueOf(helpers, id(target), "", undefined)
                    : Reflect.get(target, key);
            }
            if (host.isMethod(helpers, id(target), key, undefined)) {
                return (...args) => host.invoke(helpers, id(target), key, args);
            }
            return host.get(helpers, id(target), key, undefined);
        },
        set(target, key, value) {
            if (typeof key === "symbol") return false;
            host.set(helpers, id(target), key, value);
            return true;
        },
        has(target, key) {
            return typeof key === "symbol" ? Reflect.has(target, key) : names(target).includes(key);
        },
        deleteProperty(target, key) {
            return typeof key === "symbol" ? false : host.remove(helpers, id(target), key, undefined);
        },
        ownKeys(target) {
            return names(target);
        },
        getOwnPropertyDescriptor(target, key) {
            if (typeof key === "symbol" || !names(target).includes(key)) return undefined;
            const value = handler.get(target, key);
            return { value, writable: true, enumerable: true, configurable: true };
        },
        defineProperty() {
            return false;
        },
        apply(target, self, args) {
            return host.call(helpers, id(target), "", args);
        },
    };
    const helpers = Object.freeze({
        isDate: (v) => v instanceof Date,
        isError: (v) => v instanceof Error,
        isBigInt: (v) => typeof v === "bigint",
        toDate: (ms) => new Date(ms),
        toError: (message) => new Error(message),
        dateValue: (d) => d.getTime(),
        toNumber: (v) => Number(v),
        describe: (v) => String(v),
        wrapManaged: (index) => {
            const target = () => {};
            Object.defineProperty(target, managed, { value: index, configurable: true });
            return new Proxy(target, handler);
        },
        managedId: (v) =>
            v !== null && (typeof v === "object" || typeof v === "function") && managed in v
                ? v[managed]
                : -1,
    });
    return helpers;
})
"#;

/// Native functions the bootstrap routes managed references through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trap {
    Get,
    Set,
    Remove,
    Names,
    IsMethod,
    Invoke,
    Call,
    ValueOf,
}

impl Trap {
    pub const ALL: [Trap; 8] = [
        Trap::Get,
        Trap::Set,
        Trap::Remove,
        Trap::Names,
        Trap::IsMethod,
        Trap::Invoke,
        Trap::Call,
        Trap::ValueOf,
    ];

    /// Name the bootstrap calls the trap by.
    pub fn name(self) -> &'static str {
        match self {
            Trap::Get => "get",
            Trap::Set => "set",
            Trap::Remove => "remove",
            Trap::Names => "names",
            Trap::IsMethod => "isMethod",
            Trap::Invoke => "invoke",
            Trap::Call => "call",
            Trap::ValueOf => "valueOf",
        }
    }
}

/// Route from a realm's managed references back to the host context.
#[derive(Default)]
pub(crate) struct HostLink {
    host: RefCell<Option<Weak<dyn HostAccess>>>,
}

impl HostLink {
    pub fn attach(&self, host: Weak<dyn HostAccess>) {
        *self.host.borrow_mut() = Some(host);
    }

    fn host(&self) -> Option<Rc<dyn HostAccess>> {
        self.host.borrow().as_ref()?.upgrade()
    }
}

/// Build the object of native trap functions handed to the bootstrap.
pub(crate) fn traps<'js>(
    ctx: &Ctx<'js>,
    realm: RealmId,
    link: &Rc<HostLink>,
    handles: &Rc<RefCell<HandleTable>>,
) -> rquickjs::Result<Object<'js>> {
    let traps = Object::new(ctx.clone())?;
    for trap in Trap::ALL {
        let link = link.clone();
        let handles = handles.clone();
        let function = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>,
                  helpers: Object<'js>,
                  index: u32,
                  key: String,
                  payload: Value<'js>|
                  -> rquickjs::Result<Value<'js>> {
                let marshal = Marshal::new(ctx, helpers, realm, &handles);
                let Some(host) = link.host() else {
                    return Err(Exception::throw_internal(
                        marshal.ctx(),
                        "script context has been torn down",
                    ));
                };
                match marshal.dispatch(host.as_ref(), trap, index, &key, payload) {
                    Ok(reply) => marshal.reply(reply),
                    Err(err) => Err(marshal.raise(err)),
                }
            },
        )?;
        traps.set(trap.name(), function)?;
    }
    Ok(traps)
}

struct Slot {
    realm: RealmId,
    value: Persistent<Value<'static>>,
}

/// Script values pinned on behalf of host proxies.
#[derive(Default)]
pub(crate) struct HandleTable {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
}

impl HandleTable {
    pub fn issue(&mut self, realm: RealmId, value: Persistent<Value<'static>>) -> NativeHandle {
        let slot = Some(Slot { realm, value });
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                NativeHandle::from_slot(index)
            }
            None => {
                self.slots.push(slot);
                NativeHandle::from_slot(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, realm: RealmId, handle: NativeHandle) -> Option<Persistent<Value<'static>>> {
        match self.slots.get(handle.slot())? {
            Some(slot) if slot.realm == realm => Some(slot.value.clone()),
            _ => None,
        }
    }

    /// Unpin `handle`. Returns false if it was not live in `realm`.
    pub fn dispose(&mut self, realm: RealmId, handle: NativeHandle) -> bool {
        let index = handle.slot();
        let live = matches!(self.slots.get(index), Some(Some(slot)) if slot.realm == realm);
        if live {
            self.slots[index] = None;
            self.free.push(index);
        }
        live
    }

    /// Unpin every handle of `realm`; returns how many were live.
    pub fn drop_realm(&mut self, realm: RealmId) -> usize {
        let mut dropped = 0;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            if entry.as_ref().is_some_and(|slot| slot.realm == realm) {
                *entry = None;
                self.free.push(index);
                dropped += 1;
            }
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

/// Converts values inside one realm.
pub(crate) struct Marshal<'a, 'js> {
    ctx: Ctx<'js>,
    helpers: Object<'js>,
    realm: RealmId,
    handles: &'a RefCell<HandleTable>,
}

impl<'a, 'js> Marshal<'a, 'js> {
    pub fn new(
        ctx: Ctx<'js>,
        helpers: Object<'js>,
        realm: RealmId,
        handles: &'a RefCell<HandleTable>,
    ) -> Self {
        Self {
            ctx,
            helpers,
            realm,
            handles,
        }
    }

    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    fn helper<R: FromJs<'js>>(&self, name: &str, arg: Value<'js>) -> Result<R, EngineError> {
        let function: Function = self.helpers.get(name)?;
        Ok(function.call((arg,))?)
    }

    /// Resolve a handle issued for this realm.
    pub fn restore(&self, handle: NativeHandle) -> Result<Value<'js>, EngineError> {
        let pinned = self
            .handles
            .borrow()
            .get(self.realm, handle)
            .ok_or_else(|| InteropError::UnexpectedValue {
                expected: "live native handle",
                found: format!("handle {}", handle.get()),
            })?;
        Ok(pinned.restore(&self.ctx)?)
    }

    pub fn restore_object(&self, handle: NativeHandle) -> Result<Object<'js>, EngineError> {
        let value = self.restore(handle)?;
        match value.as_object() {
            Some(object) => Ok(object.clone()),
            None => Err(InteropError::UnexpectedValue {
                expected: "object",
                found: format!("handle {}", handle.get()),
            }
            .into()),
        }
    }

    fn pin(&self, value: &Value<'js>) -> NativeHandle {
        let pinned = Persistent::save(&self.ctx, value.clone());
        self.handles.borrow_mut().issue(self.realm, pinned)
    }

    /// Build a script value from a wire record. `value` stays owned by the
    /// caller.
    pub fn load(&self, value: &JsValue) -> Result<Value<'js>, EngineError> {
        let ctx = self.ctx.clone();
        let loaded = match value.kind().map_err(InteropError::from)? {
            JsValueKind::Empty => Value::new_undefined(ctx),
            JsValueKind::Null => Value::new_null(ctx),
            JsValueKind::Boolean => Value::new_bool(ctx, value.as_i32() != 0),
            JsValueKind::Integer => Value::new_int(ctx, value.as_i32()),
            JsValueKind::Number => Value::new_float(ctx, value.as_f64()),
            JsValueKind::Index => Value::new_float(ctx, value.as_i64() as f64),
            JsValueKind::String => {
                // SAFETY: string payloads come from latch_abi allocators.
                let text = unsafe { abi::read_string(value) }.unwrap_or_default();
                rquickjs::String::from_str(ctx, &text)?.into_value()
            }
            JsValueKind::Date => self.helper("toDate", Value::new_float(ctx, value.as_f64()))?,
            JsValueKind::Array => {
                let array = Array::new(ctx)?;
                // SAFETY: array runs come from latch_abi::alloc_array.
                for (index, element) in unsafe { abi::elements(value) }.iter().enumerate() {
                    array.set(index, self.load(element)?)?;
                }
                array.into_value()
            }
            JsValueKind::Managed | JsValueKind::ManagedError => {
                let index = Value::new_int(ctx, value.keep_alive_index() as i32);
                self.helper("wrapManaged", index)?
            }
            JsValueKind::Wrapped => self.restore(value.handle().ok_or(InteropError::NullHandle)?)?,
            JsValueKind::Function => {
                // SAFETY: function composites come from latch_abi::alloc_function.
                let function = unsafe { abi::elements(value) }
                    .first()
                    .and_then(JsValue::handle)
                    .ok_or(InteropError::NullHandle)?;
                self.restore(function)?
            }
            JsValueKind::StringError | JsValueKind::UnknownError | JsValueKind::Error => {
                let message = error_message(value).unwrap_or_default();
                let message = rquickjs::String::from_str(ctx, &message)?.into_value();
                self.helper("toError", message)?
            }
        };
        Ok(loaded)
    }

    /// Load an `Array` record of call arguments.
    pub fn load_args(&self, args: &JsValue) -> Result<Vec<Value<'js>>, EngineError> {
        if !args.is(JsValueKind::Array) {
            return Err(InteropError::UnexpectedValue {
                expected: "argument array",
                found: format!("{args:?}"),
            }
            .into());
        }
        // SAFETY: checked to be an array run above.
        unsafe { abi::elements(args) }
            .iter()
            .map(|arg| self.load(arg))
            .collect()
    }

    /// Emit a script value as a wire record owned by the caller.
    ///
    /// A function read off `receiver` is emitted with the receiver bound.
    pub fn emit(&self, value: Value<'js>, receiver: Option<&Value<'js>>) -> Result<JsValue, EngineError> {
        if value.is_undefined() {
            return Ok(JsValue::empty());
        }
        if value.is_null() {
            return Ok(JsValue::null());
        }
        if let Some(flag) = value.as_bool() {
            return Ok(JsValue::boolean(flag));
        }
        if let Some(number) = value.as_int() {
            return Ok(JsValue::integer(number));
        }
        if let Some(number) = value.as_float() {
            return Ok(JsValue::number(number));
        }
        if let Some(text) = value.as_string() {
            return Ok(abi::alloc_string(&text.to_string()?));
        }
        if let Some(array) = value.as_array() {
            return self.emit_array(array);
        }
        // Managed references are callable proxies; check before functions.
        if value.is_object() || value.is_function() {
            let managed: i32 = self.helper("managedId", value.clone())?;
            if let Ok(index) = u32::try_from(managed) {
                return Ok(JsValue::managed(index));
            }
        }
        if value.is_function() {
            let function = self.pin(&value);
            let this = receiver.map(|receiver| self.pin(receiver));
            return Ok(abi::alloc_function(function, this));
        }
        if value.is_object() {
            return self.emit_object(value);
        }
        if self.helper::<bool>("isBigInt", value.clone())? {
            return Ok(JsValue::number(self.helper("toNumber", value)?));
        }
        let text: String = self.helper("describe", value)?;
        Ok(abi::alloc_string(&text))
    }

    fn emit_array(&self, array: &Array<'js>) -> Result<JsValue, EngineError> {
        let len = array.len();
        let mut native = abi::alloc_array(len);
        if usize::try_from(native.length()).ok() != Some(len) {
            let allocated = native.length();
            // SAFETY: freshly allocated, never shared.
            unsafe { abi::release(native) };
            return Err(InteropError::ArrayAllocation {
                requested: len,
                allocated,
            }
            .into());
        }

        let filled = {
            // SAFETY: freshly allocated run of `len` records.
            let slots = unsafe { abi::elements_mut(&mut native) };
            slots.iter_mut().enumerate().try_for_each(|(index, slot)| {
                *slot = self.emit(array.get(index)?, None)?;
                Ok::<_, EngineError>(())
            })
        };
        if let Err(err) = filled {
            // SAFETY: unfilled slots are Empty; filled ones belong to the run.
            unsafe { abi::release(native) };
            return Err(err);
        }
        Ok(native)
    }

    fn emit_object(&self, value: Value<'js>) -> Result<JsValue, EngineError> {
        if self.helper::<bool>("isDate", value.clone())? {
            let millis: f64 = self.helper("dateValue", value)?;
            return Ok(JsValue::date(millis));
        }
        Ok(JsValue::wrapped(self.pin(&value)))
    }

    /// Turn the outcome of a script operation into a wire record, mapping
    /// every failure to an error kind.
    pub fn finish(
        &self,
        result: Result<Value<'js>, EngineError>,
        receiver: Option<&Value<'js>>,
        resource: Option<&str>,
    ) -> JsValue {
        match result.and_then(|value| self.emit(value, receiver)) {
            Ok(native) => native,
            Err(err) => self.failure(err, resource),
        }
    }

    pub fn failure(&self, err: EngineError, resource: Option<&str>) -> JsValue {
        match err {
            EngineError::QuickJs(rquickjs::Error::Exception) => {
                let thrown = self.ctx.catch();
                self.thrown(thrown, resource).unwrap_or_else(|err| {
                    tracing::warn!(%err, "failed to decode script exception");
                    abi::alloc_unknown_error(Some(&err.to_string()))
                })
            }
            other => abi::alloc_string_error(&other.to_string()),
        }
    }

    fn thrown(&self, thrown: Value<'js>, resource: Option<&str>) -> Result<JsValue, EngineError> {
        let managed: i32 = self.helper("managedId", thrown.clone())?;
        if let Ok(index) = u32::try_from(managed) {
            return Ok(abi::alloc_managed_error(index, None));
        }
        if !self.helper::<bool>("isError", thrown.clone())? {
            let text: String = self.helper("describe", thrown)?;
            return Ok(abi::alloc_string_error(&text));
        }

        let Some(error) = thrown.as_object() else {
            return Ok(abi::alloc_unknown_error(None));
        };
        let name: Option<String> = error.get("name")?;
        let message: Option<String> = error.get("message")?;
        let stack: Option<String> = error.get("stack")?;
        let line_number: Option<i32> = error.get("lineNumber")?;

        let (line, column) = stack
            .as_deref()
            .and_then(parse_location)
            .or(line_number.map(|line| (line, 0)))
            .unwrap_or((0, 0));
        let stack = match (stack, resource) {
            (Some(stack), Some(resource)) => Some(stack.replace(EVAL_FILE_NAME, resource)),
            (stack, _) => stack,
        };

        Ok(abi::alloc_error(JsErrorRecord {
            line,
            column,
            name: optional_string(name.as_deref()),
            message: optional_string(message.as_deref()),
            stack: optional_string(stack.as_deref()),
            resource: optional_string(resource),
        }))
    }

    /// Forward one trap to the host. `payload` is the assigned value or the
    /// argument array, depending on the trap.
    fn dispatch(
        &self,
        host: &dyn HostAccess,
        trap: Trap,
        index: u32,
        key: &str,
        payload: Value<'js>,
    ) -> Result<JsValue, EngineError> {
        let reply = match trap {
            Trap::Get => host.get(index, key),
            Trap::Set => host.set(index, key, self.emit(payload, None)?),
            Trap::Remove => host.delete(index, key),
            Trap::Names => host.names(index),
            Trap::IsMethod => JsValue::boolean(host.is_method(index, key)),
            Trap::Invoke => host.invoke(index, key, self.emit(payload, None)?),
            Trap::Call => host.call(index, self.emit(payload, None)?),
            Trap::ValueOf => host.value_of(index),
        };
        Ok(reply)
    }

    /// Load a host reply, throwing it when it is an error kind.
    fn reply(&self, reply: JsValue) -> rquickjs::Result<Value<'js>> {
        let loaded = self.load(&reply);
        let failed = reply.kind().is_ok_and(JsValueKind::is_error);
        // SAFETY: host replies belong to the engine once returned.
        unsafe { abi::release(reply) };
        match loaded {
            Ok(value) if failed => Err(self.ctx.throw(value)),
            Ok(value) => Ok(value),
            Err(err) => Err(self.raise(err)),
        }
    }

    /// Turn a failure inside a native function into a pending exception.
    fn raise(&self, err: EngineError) -> rquickjs::Error {
        match err {
            EngineError::QuickJs(err) => err,
            other => Exception::throw_internal(&self.ctx, &other.to_string()),
        }
    }

    /// Call `function` with `this` and wire arguments.
    pub fn call(
        &self,
        function: &Function<'js>,
        this: Value<'js>,
        args: &JsValue,
    ) -> Result<Value<'js>, EngineError> {
        let args = self.load_args(args)?;
        Ok(function.call((This(this), Rest(args)))?)
    }
}

fn error_message(value: &JsValue) -> Option<String> {
    // SAFETY: error payloads come from latch_abi allocators.
    unsafe {
        match abi::error_record(value) {
            Some(record) => abi::read_string(&record.message),
            None => abi::read_string(value),
        }
    }
}

fn optional_string(text: Option<&str>) -> JsValue {
    text.map_or(JsValue::null(), abi::alloc_string)
}

/// Line and column of the innermost frame that ran evaluated code.
/// QuickJS frames look like `    at f (eval_script:3:9)`; the column is
/// missing on older builds.
pub(crate) fn parse_location(stack: &str) -> Option<(i32, i32)> {
    let frame = stack.lines().find(|line| line.contains(EVAL_FILE_NAME))?;
    let start = frame.find(EVAL_FILE_NAME)? + EVAL_FILE_NAME.len();
    let mut numbers = frame[start..]
        .trim_end_matches(')')
        .split(':')
        .skip(1)
        .map(|part| part.parse::<i32>().ok());
    let line = numbers.next().flatten()?;
    let column = numbers.next().flatten().unwrap_or(0);
    Some((line, column))
}
