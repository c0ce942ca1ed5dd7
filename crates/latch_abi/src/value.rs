//! Tagged value record
//!
//! Layout (16 bytes, 8-byte aligned):
//! ```text
//! [ payload: u64 | kind: i32 | length: i32 ]
//! ```
//! `payload` is an `i32`, `i64`, `f64` bit pattern, pointer or handle id
//! depending on `kind`. `length` is the element count for arrays, the
//! code-unit count for strings and the keep-alive index for managed values.
//! Readers dispatch on `kind` only.

use bytemuck::{Pod, Zeroable};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use thiserror::Error;

use crate::handle::NativeHandle;

/// Distance in bytes between consecutive records of a contiguous run.
pub const STRIDE: usize = std::mem::size_of::<JsValue>();

/// Element count of a function composite: `[function, this]`.
pub const FUNCTION_ARITY: usize = 2;

/// Value kind tag. The numbering is part of the wire format.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum JsValueKind {
    UnknownError = -1,
    Empty = 0,
    Null = 1,
    Boolean = 2,
    Integer = 3,
    Number = 4,
    String = 5,
    Date = 6,
    Index = 7,
    Array = 10,
    StringError = 11,
    Managed = 12,
    ManagedError = 13,
    Wrapped = 14,
    Error = 16,
    Function = 17,
}

impl JsValueKind {
    /// Kinds that report a failure instead of carrying a result.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            JsValueKind::UnknownError
                | JsValueKind::StringError
                | JsValueKind::ManagedError
                | JsValueKind::Error
        )
    }
}

/// A raw tag that is not part of the wire format.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("unknown value kind {0}")]
pub struct UnknownKind(pub i32);

/// One value crossing the boundary.
///
/// Plain data: copying a record does not copy what its pointer refers to.
/// See [`crate::release`] for who frees what.
#[derive(Copy, Clone, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct JsValue {
    payload: u64,
    kind: i32,
    length: i32,
}

impl JsValue {
    /// Assemble a record from raw parts. No validation is performed.
    pub const fn from_raw_parts(kind: i32, payload: u64, length: i32) -> Self {
        Self {
            payload,
            kind,
            length,
        }
    }

    pub const fn empty() -> Self {
        Self::from_raw_parts(JsValueKind::Empty as i32, 0, 0)
    }

    pub const fn null() -> Self {
        Self::from_raw_parts(JsValueKind::Null as i32, 0, 0)
    }

    pub const fn boolean(value: bool) -> Self {
        Self::from_raw_parts(JsValueKind::Boolean as i32, value as u64, 0)
    }

    pub const fn integer(value: i32) -> Self {
        Self::from_raw_parts(JsValueKind::Integer as i32, value as u32 as u64, 0)
    }

    /// Unsigned index, stored in the full 64-bit payload.
    pub const fn index(value: i64) -> Self {
        Self::from_raw_parts(JsValueKind::Index as i32, value as u64, 0)
    }

    pub fn number(value: f64) -> Self {
        Self::from_raw_parts(JsValueKind::Number as i32, value.to_bits(), 0)
    }

    /// Milliseconds since 1970-01-01T00:00:00Z.
    pub fn date(millis: f64) -> Self {
        Self::from_raw_parts(JsValueKind::Date as i32, millis.to_bits(), 0)
    }

    /// Reference to a host object anchored at `index` in the keep-alive registry.
    pub const fn managed(index: u32) -> Self {
        Self::from_raw_parts(JsValueKind::Managed as i32, 0, index as i32)
    }

    pub const fn wrapped(handle: NativeHandle) -> Self {
        Self::from_raw_parts(JsValueKind::Wrapped as i32, handle.get(), 0)
    }

    pub fn raw_kind(&self) -> i32 {
        self.kind
    }

    pub fn kind(&self) -> Result<JsValueKind, UnknownKind> {
        JsValueKind::try_from(self.kind).map_err(|err| UnknownKind(err.number))
    }

    pub fn is(&self, kind: JsValueKind) -> bool {
        self.kind == kind as i32
    }

    pub fn payload(&self) -> u64 {
        self.payload
    }

    pub fn as_i32(&self) -> i32 {
        self.payload as u32 as i32
    }

    pub fn as_i64(&self) -> i64 {
        self.payload as i64
    }

    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.payload)
    }

    pub fn as_ptr<T>(&self) -> *mut T {
        self.payload as usize as *mut T
    }

    pub fn has_ptr(&self) -> bool {
        self.payload != 0
    }

    pub fn length(&self) -> i32 {
        self.length
    }

    /// Keep-alive index of a `Managed` / `ManagedError` value.
    pub fn keep_alive_index(&self) -> u32 {
        self.length as u32
    }

    /// Native handle of a `Wrapped` value, `None` if the payload is zero.
    pub fn handle(&self) -> Option<NativeHandle> {
        NativeHandle::new(self.payload)
    }

    pub(crate) fn with_ptr<T>(kind: JsValueKind, ptr: *mut T, length: i32) -> Self {
        Self::from_raw_parts(kind as i32, ptr as usize as u64, length)
    }
}

impl Default for JsValue {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("JsValue");
        match self.kind() {
            Ok(kind) => out.field("kind", &kind),
            Err(UnknownKind(raw)) => out.field("kind", &raw),
        };
        match self.kind() {
            Ok(JsValueKind::Boolean | JsValueKind::Integer) => out.field("i32", &self.as_i32()),
            Ok(JsValueKind::Index) => out.field("i64", &self.as_i64()),
            Ok(JsValueKind::Number | JsValueKind::Date) => out.field("num", &self.as_f64()),
            Ok(JsValueKind::Managed) => out.field("index", &self.keep_alive_index()),
            Ok(JsValueKind::ManagedError) => out
                .field("index", &self.keep_alive_index())
                .field("ptr", &self.as_ptr::<u16>()),
            Ok(JsValueKind::Wrapped) => out.field("handle", &self.payload),
            Ok(JsValueKind::Empty | JsValueKind::Null) => &mut out,
            _ => out
                .field("ptr", &self.as_ptr::<u8>())
                .field("length", &self.length),
        };
        out.finish()
    }
}
