//! Boundary with the script engine
//!
//! The engine only ever sees and produces `JsValue`s. Values passed in are
//! owned by the engine from then on (it releases them); values returned are
//! owned by the caller until it releases them. Failures are reported in-band
//! as error-kind values, never as Rust errors, except for realm creation.

use latch_abi::{JsValue, NativeHandle};
use std::rc::Weak;

use crate::error::BridgeError;

/// One isolated script environment inside an engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RealmId(pub u32);

pub trait Engine {
    fn create_realm(&self) -> Result<RealmId, BridgeError>;

    /// Tear down a realm and every native handle issued for it.
    fn destroy_realm(&self, realm: RealmId);

    /// Run `source`; `resource` names it in stack traces.
    fn execute(&self, realm: RealmId, source: &str, resource: Option<&str>) -> JsValue;

    fn get_variable(&self, realm: RealmId, name: &str) -> JsValue;

    /// Returns `Null` on success or an error-kind value.
    fn set_variable(&self, realm: RealmId, name: &str, value: JsValue) -> JsValue;

    fn get_property(&self, realm: RealmId, object: NativeHandle, name: &str) -> JsValue;

    /// Returns `Null` on success or an error-kind value.
    fn set_property(
        &self,
        realm: RealmId,
        object: NativeHandle,
        name: &str,
        value: JsValue,
    ) -> JsValue;

    /// Call method `name` on `object`; `args` is an `Array` value.
    fn invoke(&self, realm: RealmId, object: NativeHandle, name: &str, args: JsValue) -> JsValue;

    /// Call `function` with an optional receiver; `args` is an `Array` value.
    fn call(
        &self,
        realm: RealmId,
        function: NativeHandle,
        this: Option<NativeHandle>,
        args: JsValue,
    ) -> JsValue;

    /// Enumerable property names of `object` as an `Array` of `String`s.
    fn property_names(&self, realm: RealmId, object: NativeHandle) -> JsValue;

    fn dispose_handle(&self, realm: RealmId, handle: NativeHandle);

    /// Route member access on keep-alive references in `realm` to `host`.
    /// Engines that keep such references opaque ignore it.
    fn attach_host(&self, _realm: RealmId, _host: Weak<dyn HostAccess>) {}
}

/// Host side of script working with keep-alive references.
///
/// `index` names the anchored host object. Values passed in belong to the
/// host from then on; values returned belong to the engine, which releases
/// them. Failures come back as error-kind values for the engine to throw.
pub trait HostAccess {
    fn get(&self, index: u32, name: &str) -> JsValue;

    /// Returns `Null` on success or an error-kind value.
    fn set(&self, index: u32, name: &str, value: JsValue) -> JsValue;

    /// Returns a `Boolean`: whether a member was removed.
    fn delete(&self, index: u32, name: &str) -> JsValue;

    /// Member names as an `Array` of `String`s.
    fn names(&self, index: u32) -> JsValue;

    fn is_method(&self, index: u32, name: &str) -> bool;

    /// Call method `name`; `args` is an `Array` value.
    fn invoke(&self, index: u32, name: &str, args: JsValue) -> JsValue;

    /// Call the object itself; `args` is an `Array` value.
    fn call(&self, index: u32, args: JsValue) -> JsValue;

    fn value_of(&self, index: u32) -> JsValue;
}
