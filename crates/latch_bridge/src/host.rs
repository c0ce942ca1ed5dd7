//! Host-side values
//!
//! `HostValue` is the dynamically typed view host code works with. Numeric
//! variants keep their source width so the converter can apply the width
//! rules; values coming back from script only ever use `I32`, `U32` and `F64`.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::rc::Rc;

use crate::exception::JsException;
use crate::function::JsFunction;
use crate::object::{DynamicObject, JsObject};

#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Char(char),
    String(String),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    I128(i128),
    U128(u128),
    F32(f32),
    F64(f64),
    Date(DateTime<Utc>),
    Array(Vec<HostValue>),
    /// Host object; crosses into script as a keep-alive reference. Script
    /// can reach its members when it was built with [`HostObject::dynamic`].
    Object(HostObject),
    /// Error value produced by script (only ever comes out of the converter).
    Exception(JsException),
    Proxy(Rc<JsObject>),
    Function(Rc<JsFunction>),
}

impl HostValue {
    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Integral value of any integer variant that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            HostValue::I8(v) => Some(v.into()),
            HostValue::U8(v) => Some(v.into()),
            HostValue::I16(v) => Some(v.into()),
            HostValue::U16(v) => Some(v.into()),
            HostValue::I32(v) => Some(v.into()),
            HostValue::U32(v) => Some(v.into()),
            HostValue::I64(v) => Some(v),
            HostValue::U64(v) => i64::try_from(v).ok(),
            HostValue::I128(v) => i64::try_from(v).ok(),
            HostValue::U128(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Any numeric variant widened (or narrowed) to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            HostValue::F32(v) => Some(v.into()),
            HostValue::F64(v) => Some(v),
            HostValue::U64(v) => Some(v as f64),
            HostValue::I128(v) => Some(v as f64),
            HostValue::U128(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            HostValue::Date(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Rc<JsObject>> {
        match self {
            HostValue::Proxy(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Rc<JsFunction>> {
        match self {
            HostValue::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Turn an `Exception` value into an error, pass everything else through.
    pub fn into_result(self) -> Result<HostValue, JsException> {
        match self {
            HostValue::Exception(exception) => Err(exception),
            other => Ok(other),
        }
    }
}

macro_rules! host_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    HostValue::$variant(value)
                }
            }
        )*
    };
}

host_value_from! {
    bool => Bool,
    char => Char,
    String => String,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    i128 => I128,
    u128 => U128,
    f32 => F32,
    f64 => F64,
    DateTime<Utc> => Date,
    HostObject => Object,
    JsException => Exception,
    Rc<JsObject> => Proxy,
    Rc<JsFunction> => Function,
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_owned())
    }
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        HostValue::Null
    }
}

/// `None` is null; `Some(v)` converts as `v`.
impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::Null, Into::into)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        HostValue::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Shared reference to an arbitrary host object.
///
/// Cloning shares the object; identity is pointer identity (`ptr_eq`).
/// Errors are kept as `dyn Error` so they can become the inner cause of a
/// script exception when they are thrown back out of script.
#[derive(Clone)]
pub struct HostObject(Anchor);

#[derive(Clone)]
enum Anchor {
    Value(Rc<dyn Any>),
    Error(Rc<dyn HostError>),
    Dynamic(Rc<dyn HostMembers>),
}

/// `Error` that can still be downcast to its concrete type.
trait HostError: Error {
    fn as_any(&self) -> &dyn Any;
    fn as_dyn_error(&self) -> &(dyn Error + 'static);
}

impl<E: Error + 'static> HostError for E {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_dyn_error(&self) -> &(dyn Error + 'static) {
        self
    }
}

/// `DynamicObject` that can still be downcast to its concrete type.
trait HostMembers: DynamicObject {
    fn as_any(&self) -> &dyn Any;
    fn as_members(&self) -> &dyn DynamicObject;
}

impl<T: DynamicObject + Any> HostMembers for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_members(&self) -> &dyn DynamicObject {
        self
    }
}

impl HostObject {
    pub fn new<T: Any>(value: T) -> Self {
        Self(Anchor::Value(Rc::new(value)))
    }

    pub fn from_rc(value: Rc<dyn Any>) -> Self {
        Self(Anchor::Value(value))
    }

    pub fn error<E: Error + 'static>(error: E) -> Self {
        Self(Anchor::Error(Rc::new(error)))
    }

    /// Host object whose members script can read, write and call.
    pub fn dynamic<T: DynamicObject + Any>(value: T) -> Self {
        Self(Anchor::Dynamic(Rc::new(value)))
    }

    /// Member access, for objects built with [`dynamic`](Self::dynamic).
    pub fn members(&self) -> Option<&dyn DynamicObject> {
        match &self.0 {
            Anchor::Dynamic(members) => Some(HostMembers::as_members(members.as_ref())),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.0, Anchor::Error(_))
    }

    pub fn as_error(&self) -> Option<&(dyn Error + 'static)> {
        match &self.0 {
            Anchor::Error(error) => Some(HostError::as_dyn_error(error.as_ref())),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match &self.0 {
            Anchor::Value(value) => value.as_ref().downcast_ref(),
            Anchor::Error(error) => HostError::as_any(error.as_ref()).downcast_ref(),
            Anchor::Dynamic(members) => HostMembers::as_any(members.as_ref()).downcast_ref(),
        }
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        self.addr() == other.addr()
    }

    fn addr(&self) -> *const () {
        match &self.0 {
            Anchor::Value(value) => Rc::as_ptr(value) as *const (),
            Anchor::Error(error) => Rc::as_ptr(error) as *const (),
            Anchor::Dynamic(members) => Rc::as_ptr(members) as *const (),
        }
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Anchor::Value(_) => write!(f, "HostObject({:p})", self.addr()),
            Anchor::Dynamic(_) => write!(f, "HostObject(dynamic {:p})", self.addr()),
            Anchor::Error(error) => write!(f, "HostObject(error: {})", HostError::as_dyn_error(error.as_ref())),
        }
    }
}
