//! QuickJS engine
//!
//! One `rquickjs::Runtime` per engine and one `rquickjs::Context` per realm.
//! Script objects the host holds on to are pinned in the handle table until
//! the host disposes them or the realm goes away. Host objects reach script
//! as proxies whose traps call back into the attached context.

use latch_abi::{self as abi, JsValue, NativeHandle};
use latch_bridge::{BridgeError, Engine, HostAccess, InteropError, JsContext, RealmId};
use rquickjs::{Context, Ctx, Function, Object, Persistent, Runtime, Value};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ffi::{traps, HandleTable, HostLink, Marshal, BOOTSTRAP};

struct Realm {
    helpers: Persistent<Object<'static>>,
    context: Context,
    link: Rc<HostLink>,
}

/// Stops whatever script the engine is running, from any thread.
///
/// A request made while no script runs stops the next one that does.
#[derive(Debug, Clone)]
pub struct Terminator(Arc<AtomicBool>);

impl Terminator {
    pub fn terminate(&self) {
        tracing::debug!("script termination requested");
        self.0.store(true, Ordering::Release);
    }
}

/// Runtime heap statistics, in bytes unless noted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub malloc_size: i64,
    pub memory_used: i64,
    /// Number of live objects.
    pub objects: i64,
    /// Number of live strings.
    pub strings: i64,
}

pub struct ScriptEngine {
    // Field order is drop order: pinned values, then realms, then the runtime.
    handles: Rc<RefCell<HandleTable>>,
    realms: RefCell<Vec<Option<Realm>>>,
    interrupt: Arc<AtomicBool>,
    runtime: Runtime,
}

impl ScriptEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let runtime = Runtime::new()?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        let interrupt = Arc::new(AtomicBool::new(false));
        let requested = interrupt.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            requested.swap(false, Ordering::AcqRel)
        })));
        tracing::debug!(?config, "QuickJS runtime created");

        Ok(Self {
            handles: Rc::default(),
            realms: RefCell::default(),
            interrupt,
            runtime,
        })
    }

    /// Create an engine and open a context on it.
    pub fn context(config: &EngineConfig) -> Result<JsContext, BridgeError> {
        let engine = Rc::new(Self::new(config)?);
        JsContext::new(engine)
    }

    pub fn memory_usage(&self) -> HeapStats {
        let usage = self.runtime.memory_usage();
        let stats = HeapStats {
            malloc_size: usage.malloc_size as i64,
            memory_used: usage.memory_used_size as i64,
            objects: usage.obj_count as i64,
            strings: usage.str_count as i64,
        };
        tracing::debug!(
            malloc_size = stats.malloc_size,
            memory_used = stats.memory_used,
            objects = stats.objects,
            strings = stats.strings,
            handles = self.handles.borrow().len(),
            "QuickJS heap"
        );
        stats
    }

    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }

    /// Handle for stopping running script, usable from other threads.
    pub fn terminator(&self) -> Terminator {
        Terminator(self.interrupt.clone())
    }

    /// Stop the script currently running. The interrupted call fails with
    /// an uncatchable `InternalError`; the realm stays usable.
    pub fn terminate_execution(&self) {
        self.terminator().terminate();
    }

    /// Number of script values pinned for the host, across all realms.
    pub fn pinned_handles(&self) -> usize {
        self.handles.borrow().len()
    }

    fn realm(&self, realm: RealmId) -> Option<(Context, Persistent<Object<'static>>)> {
        let realms = self.realms.borrow();
        let entry = realms.get(realm.0 as usize)?.as_ref()?;
        Some((entry.context.clone(), entry.helpers.clone()))
    }

    /// Run `f` inside `realm`. Failures to enter come back as `StringError`.
    fn enter<F>(&self, realm: RealmId, f: F) -> JsValue
    where
        F: for<'js> FnOnce(&Marshal<'_, 'js>) -> JsValue,
    {
        let Some((context, helpers)) = self.realm(realm) else {
            return abi::alloc_string_error(&format!("realm {} does not exist", realm.0));
        };
        context.with(|ctx| match helpers.restore(&ctx) {
            Ok(helpers) => f(&Marshal::new(ctx.clone(), helpers, realm, &self.handles)),
            Err(err) => abi::alloc_string_error(&err.to_string()),
        })
    }
}

fn global<'js>(ctx: &Ctx<'js>, name: &str) -> Result<Value<'js>, EngineError> {
    Ok(ctx.globals().get(name)?)
}

impl Engine for ScriptEngine {
    fn create_realm(&self) -> Result<RealmId, BridgeError> {
        let id = RealmId(self.realms.borrow().len() as u32);
        let link = Rc::new(HostLink::default());
        let context = Context::full(&self.runtime).map_err(EngineError::from)?;
        let helpers = context
            .with(|ctx| {
                let factory: Function = ctx.eval(BOOTSTRAP)?;
                let helpers: Object = factory.call((traps(&ctx, id, &link, &self.handles)?,))?;
                Ok::<_, rquickjs::Error>(Persistent::save(&ctx, helpers))
            })
            .map_err(EngineError::from)?;

        self.realms.borrow_mut().push(Some(Realm {
            helpers,
            context,
            link,
        }));
        tracing::debug!(realm = id.0, "realm created");
        Ok(id)
    }

    fn destroy_realm(&self, realm: RealmId) {
        let pinned = self.handles.borrow_mut().drop_realm(realm);
        let removed = self
            .realms
            .borrow_mut()
            .get_mut(realm.0 as usize)
            .and_then(Option::take);
        match removed {
            Some(_) => tracing::debug!(realm = realm.0, pinned, "realm destroyed"),
            None => tracing::warn!(realm = realm.0, "destroying unknown realm"),
        }
    }

    fn execute(&self, realm: RealmId, source: &str, resource: Option<&str>) -> JsValue {
        self.enter(realm, |m| {
            let result = m.ctx().eval::<Value, _>(source).map_err(EngineError::from);
            m.finish(result, None, resource)
        })
    }

    fn get_variable(&self, realm: RealmId, name: &str) -> JsValue {
        self.enter(realm, |m| m.finish(global(m.ctx(), name), None, None))
    }

    fn set_variable(&self, realm: RealmId, name: &str, value: JsValue) -> JsValue {
        let status = self.enter(realm, |m| {
            let stored = m
                .load(&value)
                .and_then(|loaded| Ok(m.ctx().globals().set(name, loaded)?));
            match stored {
                Ok(()) => JsValue::null(),
                Err(err) => m.failure(err, None),
            }
        });
        // SAFETY: the host handed `value` over; nothing references it now.
        unsafe { abi::release(value) };
        status
    }

    fn get_property(&self, realm: RealmId, object: NativeHandle, name: &str) -> JsValue {
        self.enter(realm, |m| {
            let target = match m.restore_object(object) {
                Ok(target) => target,
                Err(err) => return m.failure(err, None),
            };
            let result = target.get::<_, Value>(name).map_err(EngineError::from);
            m.finish(result, Some(target.as_value()), None)
        })
    }

    fn set_property(
        &self,
        realm: RealmId,
        object: NativeHandle,
        name: &str,
        value: JsValue,
    ) -> JsValue {
        let status = self.enter(realm, |m| {
            let stored = m.restore_object(object).and_then(|target| {
                let loaded = m.load(&value)?;
                Ok(target.set(name, loaded)?)
            });
            match stored {
                Ok(()) => JsValue::null(),
                Err(err) => m.failure(err, None),
            }
        });
        // SAFETY: see `set_variable`.
        unsafe { abi::release(value) };
        status
    }

    fn invoke(&self, realm: RealmId, object: NativeHandle, name: &str, args: JsValue) -> JsValue {
        let result = self.enter(realm, |m| {
            let target = match m.restore_object(object) {
                Ok(target) => target,
                Err(err) => return m.failure(err, None),
            };
            let method = match target.get::<_, Value>(name) {
                Ok(method) => method,
                Err(err) => return m.failure(err.into(), None),
            };
            let Some(method) = method.as_function() else {
                return abi::alloc_string_error(&format!("{name} is not a function"));
            };
            let result = m.call(method, target.as_value().clone(), &args);
            m.finish(result, None, None)
        });
        // SAFETY: see `set_variable`.
        unsafe { abi::release(args) };
        result
    }

    fn call(
        &self,
        realm: RealmId,
        function: NativeHandle,
        this: Option<NativeHandle>,
        args: JsValue,
    ) -> JsValue {
        let result = self.enter(realm, |m| {
            let prepared = m.restore(function).and_then(|function| {
                let this = match this {
                    Some(this) => m.restore(this)?,
                    None => Value::new_undefined(m.ctx().clone()),
                };
                Ok((function, this))
            });
            let (function, this) = match prepared {
                Ok(prepared) => prepared,
                Err(err) => return m.failure(err, None),
            };
            let Some(function) = function.as_function() else {
                return abi::alloc_string_error("value is not a function");
            };
            let result = m.call(function, this, &args);
            m.finish(result, None, None)
        });
        // SAFETY: see `set_variable`.
        unsafe { abi::release(args) };
        result
    }

    fn property_names(&self, realm: RealmId, object: NativeHandle) -> JsValue {
        self.enter(realm, |m| {
            let names = m.restore_object(object).and_then(|target| {
                target
                    .keys::<String>()
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(EngineError::from)
            });
            let names = match names {
                Ok(names) => names,
                Err(err) => return m.failure(err, None),
            };

            let mut native = abi::alloc_array(names.len());
            if usize::try_from(native.length()).ok() != Some(names.len()) {
                let allocated = native.length();
                // SAFETY: freshly allocated, never shared.
                unsafe { abi::release(native) };
                let err = InteropError::ArrayAllocation {
                    requested: names.len(),
                    allocated,
                };
                return abi::alloc_string_error(&err.to_string());
            }
            // SAFETY: freshly allocated run of `names.len()` records.
            let slots = unsafe { abi::elements_mut(&mut native) };
            for (slot, name) in slots.iter_mut().zip(&names) {
                *slot = abi::alloc_string(name);
            }
            native
        })
    }

    fn dispose_handle(&self, realm: RealmId, handle: NativeHandle) {
        if self.handles.borrow_mut().dispose(realm, handle) {
            tracing::trace!(realm = realm.0, handle = handle.get(), "handle unpinned");
        } else {
            tracing::warn!(realm = realm.0, handle = handle.get(), "disposing unknown handle");
        }
    }

    fn attach_host(&self, realm: RealmId, host: Weak<dyn HostAccess>) {
        match self.realms.borrow().get(realm.0 as usize) {
            Some(Some(entry)) => entry.link.attach(host),
            _ => tracing::warn!(realm = realm.0, "attaching host to unknown realm"),
        }
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        let live = self.realms.get_mut().iter().flatten().count();
        if live > 0 {
            tracing::debug!(live, "QuickJS engine dropped with live realms");
        }
        // Trap closures share the table; unpin before the realms go.
        self.handles.borrow_mut().clear();
    }
}
