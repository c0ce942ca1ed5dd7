//! In-memory engine for exercising contexts and proxies without QuickJS
//!
//! Scripts are not parsed. `execute` understands three forms:
//! - `throw <message>` raises a `StringError`
//! - `crash` fails with an `UnknownError`
//! - anything else is a global name lookup (`ReferenceError` when missing)

use latch_abi::{self as abi, JsErrorRecord, JsValue, JsValueKind, NativeHandle};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::engine::{Engine, HostAccess, RealmId};
use crate::error::BridgeError;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

type NativeFn = dyn Fn(Option<&Value>, &[Value]) -> Result<Value, String>;

#[derive(Clone)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Num(f64),
    Str(String),
    Date(f64),
    Array(Vec<Value>),
    Object(Rc<RefCell<BTreeMap<String, Value>>>),
    Function(Rc<NativeFn>),
    Managed(u32),
}

impl Value {
    pub(crate) fn object<const N: usize>(members: [(&str, Value); N]) -> Self {
        Value::Object(Rc::new(RefCell::new(
            members
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
        )))
    }

    pub(crate) fn function(
        body: impl Fn(Option<&Value>, &[Value]) -> Result<Value, String> + 'static,
    ) -> Self {
        Value::Function(Rc::new(body))
    }
}

#[derive(Default)]
struct State {
    realms: Vec<Option<BTreeMap<String, Value>>>,
    handles: Vec<Option<(RealmId, Value)>>,
    hosts: BTreeMap<u32, Weak<dyn HostAccess>>,
    disposed: Vec<u64>,
}

#[derive(Default)]
pub(crate) struct MockEngine {
    state: RefCell<State>,
}

impl MockEngine {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn define(&self, realm: RealmId, name: &str, value: Value) {
        if let Some(Some(globals)) = self.state.borrow_mut().realms.get_mut(realm.0 as usize) {
            globals.insert(name.to_owned(), value);
        }
    }

    pub(crate) fn global(&self, realm: RealmId, name: &str) -> Option<Value> {
        let state = self.state.borrow();
        state.realms.get(realm.0 as usize)?.as_ref()?.get(name).cloned()
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.state.borrow().handles.iter().flatten().count()
    }

    pub(crate) fn disposed(&self) -> Vec<u64> {
        self.state.borrow().disposed.clone()
    }

    /// Host attached to `realm`, while its context is alive.
    pub(crate) fn host(&self, realm: RealmId) -> Option<Rc<dyn HostAccess>> {
        self.state.borrow().hosts.get(&realm.0)?.upgrade()
    }

    pub(crate) fn realm_alive(&self, realm: RealmId) -> bool {
        matches!(self.state.borrow().realms.get(realm.0 as usize), Some(Some(_)))
    }

    fn issue(&self, realm: RealmId, value: Value) -> NativeHandle {
        let mut state = self.state.borrow_mut();
        state.handles.push(Some((realm, value)));
        NativeHandle::from_slot(state.handles.len() - 1)
    }

    fn resolve(&self, handle: NativeHandle) -> Option<Value> {
        let state = self.state.borrow();
        let (_, value) = state.handles.get(handle.slot())?.as_ref()?;
        Some(value.clone())
    }

    fn emit(&self, realm: RealmId, value: &Value) -> JsValue {
        match value {
            Value::Null => JsValue::null(),
            Value::Bool(value) => JsValue::boolean(*value),
            Value::Int(value) => JsValue::integer(*value),
            Value::Num(value) => JsValue::number(*value),
            Value::Str(value) => abi::alloc_string(value),
            Value::Date(millis) => JsValue::date(*millis),
            Value::Array(items) => {
                let mut native = abi::alloc_array(items.len());
                let slots = unsafe { abi::elements_mut(&mut native) };
                for (slot, item) in slots.iter_mut().zip(items) {
                    *slot = self.emit(realm, item);
                }
                native
            }
            Value::Object(_) => JsValue::wrapped(self.issue(realm, value.clone())),
            Value::Function(_) => abi::alloc_function(self.issue(realm, value.clone()), None),
            Value::Managed(index) => JsValue::managed(*index),
        }
    }

    /// Take ownership of `value` and turn it into a mock value.
    fn absorb(&self, value: JsValue) -> Value {
        let result = self.read(&value);
        unsafe { abi::release(value) };
        result
    }

    fn read(&self, value: &JsValue) -> Value {
        match value.kind() {
            Ok(JsValueKind::Boolean) => Value::Bool(value.as_i32() != 0),
            Ok(JsValueKind::Integer) => Value::Int(value.as_i32()),
            Ok(JsValueKind::Number) => Value::Num(value.as_f64()),
            Ok(JsValueKind::String) => Value::Str(unsafe { abi::read_string(value) }.unwrap_or_default()),
            Ok(JsValueKind::Date) => Value::Date(value.as_f64()),
            Ok(JsValueKind::Array) => {
                Value::Array(unsafe { abi::elements(value) }.iter().map(|v| self.read(v)).collect())
            }
            Ok(JsValueKind::Managed) => Value::Managed(value.keep_alive_index()),
            Ok(JsValueKind::Wrapped) => value
                .handle()
                .and_then(|handle| self.resolve(handle))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn call_value(&self, realm: RealmId, function: &Value, this: Option<&Value>, args: JsValue) -> JsValue {
        let Value::Array(args) = self.absorb(args) else {
            return abi::alloc_string_error("arguments must be an array");
        };
        let Value::Function(body) = function else {
            return abi::alloc_string_error("not a function");
        };
        match body(this, &args) {
            Ok(result) => self.emit(realm, &result),
            Err(message) => abi::alloc_string_error(&message),
        }
    }
}

fn reference_error(name: &str, resource: Option<&str>) -> JsValue {
    abi::alloc_error(JsErrorRecord {
        line: 1,
        column: 1,
        name: abi::alloc_string("ReferenceError"),
        message: abi::alloc_string(&format!("{name} is not defined")),
        stack: abi::alloc_string(&format!("    at <eval> ({}:1:1)", resource.unwrap_or("<eval>"))),
        resource: resource.map_or(JsValue::null(), abi::alloc_string),
    })
}

impl Engine for MockEngine {
    fn create_realm(&self) -> Result<RealmId, BridgeError> {
        let mut state = self.state.borrow_mut();
        state.realms.push(Some(BTreeMap::new()));
        Ok(RealmId(state.realms.len() as u32 - 1))
    }

    fn destroy_realm(&self, realm: RealmId) {
        let mut state = self.state.borrow_mut();
        if let Some(slot) = state.realms.get_mut(realm.0 as usize) {
            *slot = None;
        }
        for slot in state.handles.iter_mut() {
            if matches!(slot, Some((owner, _)) if *owner == realm) {
                *slot = None;
            }
        }
    }

    fn execute(&self, realm: RealmId, source: &str, resource: Option<&str>) -> JsValue {
        if let Some(message) = source.strip_prefix("throw ") {
            return abi::alloc_string_error(message);
        }
        if source == "crash" {
            return abi::alloc_unknown_error(None);
        }
        match self.global(realm, source) {
            Some(value) => self.emit(realm, &value),
            None => reference_error(source, resource),
        }
    }

    fn get_variable(&self, realm: RealmId, name: &str) -> JsValue {
        match self.global(realm, name) {
            Some(value) => self.emit(realm, &value),
            None => JsValue::null(),
        }
    }

    fn set_variable(&self, realm: RealmId, name: &str, value: JsValue) -> JsValue {
        let value = self.absorb(value);
        self.define(realm, name, value);
        JsValue::null()
    }

    fn get_property(&self, realm: RealmId, object: NativeHandle, name: &str) -> JsValue {
        match self.resolve(object) {
            Some(Value::Object(members)) => {
                let member = members.borrow().get(name).cloned().unwrap_or(Value::Null);
                self.emit(realm, &member)
            }
            _ => abi::alloc_string_error("invalid handle"),
        }
    }

    fn set_property(&self, _realm: RealmId, object: NativeHandle, name: &str, value: JsValue) -> JsValue {
        let value = self.absorb(value);
        match self.resolve(object) {
            Some(Value::Object(members)) => {
                members.borrow_mut().insert(name.to_owned(), value);
                JsValue::null()
            }
            _ => abi::alloc_string_error("invalid handle"),
        }
    }

    fn invoke(&self, realm: RealmId, object: NativeHandle, name: &str, args: JsValue) -> JsValue {
        let receiver = self.resolve(object);
        let Some(Value::Object(members)) = &receiver else {
            unsafe { abi::release(args) };
            return abi::alloc_string_error("invalid handle");
        };
        let method = members.borrow().get(name).cloned().unwrap_or(Value::Null);
        self.call_value(realm, &method, receiver.as_ref(), args)
    }

    fn call(&self, realm: RealmId, function: NativeHandle, this: Option<NativeHandle>, args: JsValue) -> JsValue {
        let Some(function) = self.resolve(function) else {
            unsafe { abi::release(args) };
            return abi::alloc_string_error("invalid handle");
        };
        let this = this.and_then(|handle| self.resolve(handle));
        self.call_value(realm, &function, this.as_ref(), args)
    }

    fn property_names(&self, realm: RealmId, object: NativeHandle) -> JsValue {
        match self.resolve(object) {
            Some(Value::Object(members)) => {
                let names: Vec<Value> = members.borrow().keys().cloned().map(Value::Str).collect();
                self.emit(realm, &Value::Array(names))
            }
            _ => abi::alloc_string_error("invalid handle"),
        }
    }

    fn dispose_handle(&self, _realm: RealmId, handle: NativeHandle) {
        let mut state = self.state.borrow_mut();
        if let Some(slot) = state.handles.get_mut(handle.slot()) {
            *slot = None;
        }
        state.disposed.push(handle.get());
    }

    fn attach_host(&self, realm: RealmId, host: Weak<dyn HostAccess>) {
        self.state.borrow_mut().hosts.insert(realm.0, host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BridgeError, DynamicObject, HostObject, HostValue, InteropError, JsContext, JsException,
        Result,
    };
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;

    fn context() -> (Rc<MockEngine>, JsContext) {
        init_tracing();
        let engine = MockEngine::new();
        let context = JsContext::new(engine.clone()).expect("mock realm");
        (engine, context)
    }

    fn counter() -> Value {
        Value::object([
            ("count", Value::Int(1)),
            (
                "add",
                Value::function(|this, args| {
                    let Some(Value::Object(members)) = this else {
                        return Err("no receiver".into());
                    };
                    let Some(Value::Int(step)) = args.first() else {
                        return Err("step must be an integer".into());
                    };
                    let mut members = members.borrow_mut();
                    let Some(Value::Int(count)) = members.get("count").cloned() else {
                        return Err("count missing".into());
                    };
                    members.insert("count".into(), Value::Int(count + step));
                    Ok(Value::Int(count + step))
                }),
            ),
        ])
    }

    #[test]
    fn test_variables_round_trip_through_engine() -> Result<()> {
        let (_engine, context) = context();
        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();

        context.set_variable("flag", true)?;
        context.set_variable("name", "latch")?;
        context.set_variable("when", epoch)?;
        context.set_variable("nested", HostValue::Array(vec![
            HostValue::Array(vec![1i32.into(), "two".into()]),
            2.5f64.into(),
        ]))?;

        assert_eq!(context.get_variable("flag")?, HostValue::Bool(true));
        assert_eq!(context.get_variable("name")?, HostValue::String("latch".into()));
        assert_eq!(context.get_variable("when")?, HostValue::Date(epoch));
        assert_eq!(
            context.get_variable("nested")?,
            HostValue::Array(vec![
                HostValue::Array(vec![HostValue::I32(1), HostValue::String("two".into())]),
                HostValue::F64(2.5),
            ])
        );
        assert_eq!(context.get_variable("missing")?, HostValue::Null);
        Ok(())
    }

    #[test]
    fn test_host_objects_are_anchored_per_exposure() -> Result<()> {
        let (engine, context) = context();
        let object = HostObject::new(String::from("inventory"));

        context.set_variable("a", object.clone())?;
        context.set_variable("b", object.clone())?;
        assert_eq!(context.keep_alive_len(), 2);

        let (Some(Value::Managed(a)), Some(Value::Managed(b))) =
            (engine.global(context.realm(), "a"), engine.global(context.realm(), "b"))
        else {
            panic!("expected managed globals");
        };
        assert_ne!(a, b);

        let back = context.get_variable("b")?;
        assert!(back.as_object().unwrap().ptr_eq(&object));

        assert!(context.release_managed(a)?.ptr_eq(&object));
        assert_eq!(context.keep_alive_len(), 1);
        assert!(context.keep_alive_get(b)?.ptr_eq(&object));
        Ok(())
    }

    #[test]
    fn test_released_anchor_can_not_be_resolved() -> Result<()> {
        let (_engine, context) = context();
        context.set_variable("a", HostObject::new(1u8))?;
        context.release_managed(0)?;

        let err = context.get_variable("a").unwrap_err();
        assert!(err.is_protocol_error());
        assert!(matches!(
            err,
            BridgeError::Interop(InteropError::ReleasedIndex { index: 0 })
        ));
        Ok(())
    }

    #[test]
    fn test_script_errors_surface_as_exceptions() {
        let (_engine, context) = context();

        let err = context.execute("throw out of fuel").unwrap_err();
        assert_eq!(
            err.as_exception(),
            Some(&JsException::Message("out of fuel".into()))
        );

        let err = context.execute("crash").unwrap_err();
        assert_eq!(err.to_string(), "script error: unknown error without reason");

        let err = context.execute_named("nope", "main.js").unwrap_err();
        let Some(JsException::Script(error)) = err.as_exception() else {
            panic!("expected script error, got {err:?}");
        };
        assert_eq!(error.name.as_deref(), Some("ReferenceError"));
        assert_eq!(error.resource.as_deref(), Some("main.js"));
        assert_eq!(error.to_string(), "ReferenceError: nope is not defined (main.js:1:1)");
    }

    #[test]
    fn test_proxy_member_access() -> Result<()> {
        let (engine, context) = context();
        engine.define(context.realm(), "counter", counter());

        let proxy = context.execute("counter")?;
        let proxy = proxy.as_proxy().expect("object proxy");

        assert_eq!(proxy.get("count")?, HostValue::I32(1));
        assert_eq!(proxy.invoke("add", &[4i32.into()])?, HostValue::I32(5));
        proxy.set("label", "main".into())?;
        assert_eq!(proxy.get("label")?, HostValue::String("main".into()));
        assert_eq!(proxy.member_names()?, vec!["add", "count", "label"]);

        let err = proxy.invoke("add", &["x".into()]).unwrap_err();
        assert_eq!(
            err.as_exception().and_then(JsException::message),
            Some("step must be an integer")
        );

        proxy.dispose()?;
        assert_eq!(engine.disposed(), vec![proxy.handle().get()]);
        Ok(())
    }

    #[test]
    fn test_failed_array_conversion_releases_every_handle() {
        let (engine, context) = context();
        engine.define(
            context.realm(),
            "batch",
            Value::Array(vec![
                Value::Date(f64::NAN),
                counter(),
                Value::Array(vec![counter()]),
                Value::function(|_, _| Ok(Value::Null)),
            ]),
        );

        let err = context.execute("batch").unwrap_err();
        assert!(matches!(err, BridgeError::Interop(InteropError::InvalidDate(_))));
        assert_eq!(engine.live_handles(), 0);
        assert_eq!(engine.disposed().len(), 3);
    }

    #[test]
    fn test_proxy_dispose_twice_fails() -> Result<()> {
        let (engine, context) = context();
        engine.define(context.realm(), "counter", counter());

        let value = context.execute("counter")?;
        let proxy = value.as_proxy().expect("object proxy");
        proxy.dispose()?;

        assert!(matches!(proxy.dispose(), Err(BridgeError::ObjectDisposed(_))));
        assert!(matches!(proxy.get("count"), Err(BridgeError::ObjectDisposed(_))));
        assert_eq!(engine.disposed().len(), 1);
        Ok(())
    }

    #[test]
    fn test_dropped_proxy_releases_its_handle() -> Result<()> {
        let (engine, context) = context();
        engine.define(context.realm(), "counter", counter());

        let value = context.execute("counter")?;
        assert_eq!(engine.live_handles(), 1);
        drop(value);
        assert_eq!(engine.live_handles(), 0);
        assert_eq!(engine.disposed().len(), 1);
        Ok(())
    }

    #[test]
    fn test_functions_call_with_bound_receiver() -> Result<()> {
        let (engine, context) = context();
        engine.define(context.realm(), "counter", counter());

        let proxy = context.execute("counter")?;
        let proxy = proxy.as_proxy().expect("object proxy");
        let add = proxy.get("add")?;
        let add = add.as_function().expect("function proxy");
        assert!(add.this().is_none());

        // Without a receiver the native body refuses.
        let err = add.call(&[1i32.into()]).unwrap_err();
        assert_eq!(err.as_exception().and_then(JsException::message), Some("no receiver"));

        add.dispose()?;
        assert!(matches!(add.dispose(), Err(BridgeError::ObjectDisposed(_))));
        assert!(matches!(add.call(&[]), Err(BridgeError::ObjectDisposed(_))));
        Ok(())
    }

    #[test]
    fn test_proxy_passed_back_reaches_the_same_object() -> Result<()> {
        let (engine, context) = context();
        engine.define(context.realm(), "counter", counter());
        engine.define(
            context.realm(),
            "read",
            Value::function(|_, args| match args.first() {
                Some(Value::Managed(index)) => Ok(Value::Int(*index as i32)),
                _ => Err("expected a managed reference".into()),
            }),
        );

        let proxy = context.execute("counter")?;
        let read = context.execute("read")?;
        let index = read.as_function().expect("function").call(&[proxy.clone()])?;

        let anchored = context.keep_alive_get(index.as_i64().unwrap_or(-1) as u32)?;
        let same = anchored.downcast_ref::<crate::JsObject>().expect("anchored proxy");
        assert_eq!(same, proxy.as_proxy().unwrap().as_ref());
        Ok(())
    }

    #[test]
    fn test_dropping_context_closes_proxies() -> Result<()> {
        let (engine, context) = context();
        engine.define(context.realm(), "counter", counter());
        let realm = context.realm();

        let value = context.execute("counter")?;
        drop(context);

        assert!(!engine.realm_alive(realm));
        assert_eq!(engine.live_handles(), 0);
        let proxy = value.as_proxy().expect("object proxy");
        assert!(matches!(proxy.get("count"), Err(BridgeError::ContextClosed)));
        // The realm took the handle with it; nothing left to dispose.
        proxy.dispose()?;
        assert!(engine.disposed().is_empty());
        Ok(())
    }

    #[test]
    fn test_contexts_are_isolated() -> Result<()> {
        init_tracing();
        let engine = MockEngine::new();
        let first = JsContext::new(engine.clone())?;
        let second = JsContext::new(engine.clone())?;

        first.set_variable("shared", 1i32)?;
        assert_eq!(first.get_variable("shared")?, HostValue::I32(1));
        assert_eq!(second.get_variable("shared")?, HostValue::Null);
        assert_ne!(first.realm(), second.realm());
        Ok(())
    }

    #[test]
    fn test_large_i64_is_lossy() -> Result<()> {
        let (_engine, context) = context();
        let big = i64::MAX;

        context.set_variable("big", big)?;
        let back = context.get_variable("big")?;
        assert_eq!(back, HostValue::F64(big as f64));
        assert_ne!(back.as_f64().map(|v| v as i128), Some(big as i128));
        Ok(())
    }

    #[derive(Default)]
    struct Gauge {
        value: Cell<i32>,
        printed: RefCell<Vec<String>>,
    }

    impl DynamicObject for Gauge {
        fn get(&self, name: &str) -> Result<HostValue> {
            Ok(match name {
                "Value" => self.value.get().into(),
                _ => HostValue::Null,
            })
        }

        fn set(&self, name: &str, value: HostValue) -> Result<()> {
            match (name, value.as_i64()) {
                ("Value", Some(value)) => {
                    self.value.set(value as i32);
                    Ok(())
                }
                _ => Err(JsException::Message(format!("can't assign {name}")).into()),
            }
        }

        fn invoke(&self, name: &str, args: &[HostValue]) -> Result<HostValue> {
            let message = args.first().and_then(HostValue::as_str).unwrap_or_default();
            self.printed
                .borrow_mut()
                .push(format!("{name}: {message} {}", self.value.get()));
            Ok(HostValue::Null)
        }

        fn member_names(&self) -> Result<Vec<String>> {
            Ok(vec!["Value".into(), "PrintValue".into()])
        }

        fn is_method(&self, name: &str) -> bool {
            name == "PrintValue"
        }
    }

    fn managed_global(engine: &MockEngine, context: &JsContext, name: &str) -> u32 {
        match engine.global(context.realm(), name) {
            Some(Value::Managed(index)) => index,
            _ => panic!("{name} is not a managed reference"),
        }
    }

    #[test]
    fn test_script_reaches_host_members() -> Result<()> {
        let (engine, context) = context();
        let gauge = HostObject::dynamic(Gauge::default());
        context.set_variable("m", gauge.clone())?;
        let index = managed_global(&engine, &context, "m");
        let host = engine.host(context.realm()).expect("attached host");

        let status = host.set(index, "Value", JsValue::integer(42));
        assert_eq!(status.kind(), Ok(JsValueKind::Null));

        let value = host.get(index, "Value");
        assert_eq!(value.kind(), Ok(JsValueKind::Integer));
        assert_eq!(value.as_i32(), 42);

        assert!(host.is_method(index, "PrintValue"));
        assert!(!host.is_method(index, "Value"));
        let mut args = abi::alloc_array(1);
        unsafe { abi::elements_mut(&mut args)[0] = abi::alloc_string("reading") };
        let result = host.invoke(index, "PrintValue", args);
        assert_eq!(result.kind(), Ok(JsValueKind::Null));
        let printed = gauge.downcast_ref::<Gauge>().map(|g| g.printed.borrow().clone());
        assert_eq!(printed, Some(vec!["PrintValue: reading 42".to_owned()]));

        let names = host.names(index);
        let listed = context.converter().from_native(&names);
        unsafe { abi::release(names) };
        assert_eq!(listed?, HostValue::from(vec!["Value", "PrintValue"]));

        let removed = host.delete(index, "Value");
        assert_eq!((removed.kind(), removed.as_i32()), (Ok(JsValueKind::Boolean), 0));
        Ok(())
    }

    #[test]
    fn test_host_member_failures_become_error_kinds() -> Result<()> {
        let (engine, context) = context();
        context.set_variable("m", HostObject::dynamic(Gauge::default()))?;
        context.set_variable("plain", HostObject::new(5u8))?;
        let gauge = managed_global(&engine, &context, "m");
        let plain = managed_global(&engine, &context, "plain");
        let host = engine.host(context.realm()).expect("attached host");

        let refused = host.set(gauge, "Value", abi::alloc_string("high"));
        assert_eq!(refused.kind(), Ok(JsValueKind::ManagedError));
        let HostValue::Exception(exception) = context.converter().from_native(&refused)? else {
            panic!("expected exception");
        };
        unsafe { abi::release(refused) };
        assert_eq!(exception.message(), Some("can't assign Value"));
        assert!(exception.inner().is_some());

        let opaque = host.get(plain, "anything");
        assert_eq!(opaque.kind(), Ok(JsValueKind::ManagedError));
        unsafe { abi::release(opaque) };
        assert!(!host.is_method(plain, "anything"));

        let uncallable = host.call(gauge, abi::alloc_array(0));
        assert_eq!(uncallable.kind(), Ok(JsValueKind::ManagedError));
        unsafe { abi::release(uncallable) };

        context.release_managed(gauge)?;
        let released = host.get(gauge, "Value");
        assert_eq!(released.kind(), Ok(JsValueKind::StringError));
        unsafe { abi::release(released) };
        Ok(())
    }

    #[test]
    fn test_host_detaches_with_its_context() {
        let (engine, context) = context();
        let realm = context.realm();
        assert!(engine.host(realm).is_some());
        drop(context);
        assert!(engine.host(realm).is_none());
    }

    #[test]
    fn test_unknown_tag_from_engine_is_protocol_error() {
        struct Garbled;

        impl Engine for Garbled {
            fn create_realm(&self) -> std::result::Result<RealmId, BridgeError> {
                Ok(RealmId(0))
            }
            fn destroy_realm(&self, _: RealmId) {}
            fn execute(&self, _: RealmId, _: &str, _: Option<&str>) -> JsValue {
                JsValue::from_raw_parts(9, 0, 0)
            }
            fn get_variable(&self, _: RealmId, _: &str) -> JsValue {
                JsValue::empty()
            }
            fn set_variable(&self, _: RealmId, _: &str, _: JsValue) -> JsValue {
                JsValue::null()
            }
            fn get_property(&self, _: RealmId, _: NativeHandle, _: &str) -> JsValue {
                JsValue::null()
            }
            fn set_property(&self, _: RealmId, _: NativeHandle, _: &str, _: JsValue) -> JsValue {
                JsValue::null()
            }
            fn invoke(&self, _: RealmId, _: NativeHandle, _: &str, _: JsValue) -> JsValue {
                JsValue::null()
            }
            fn call(&self, _: RealmId, _: NativeHandle, _: Option<NativeHandle>, _: JsValue) -> JsValue {
                JsValue::null()
            }
            fn property_names(&self, _: RealmId, _: NativeHandle) -> JsValue {
                JsValue::null()
            }
            fn dispose_handle(&self, _: RealmId, _: NativeHandle) {}
        }

        init_tracing();
        let context = JsContext::new(Rc::new(Garbled)).expect("realm");
        let err = context.execute("anything").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Interop(InteropError::UnknownKind(abi::UnknownKind(9)))
        ));
        assert_eq!(context.get_variable("x").ok(), Some(HostValue::Null));
    }
}
