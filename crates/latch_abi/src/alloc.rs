//! Native-side allocations
//!
//! Strings, array runs, function composites and error records are heap blocks
//! referenced from a `JsValue` payload. The side that creates one hands it
//! over; the side that receives it frees it with [`release`].
//!
//! String buffer layout (UTF-16 code units):
//! ```text
//! [ len_lo | len_hi | unit 0 .. unit n-1 | 0 ]
//!                   ^ ptr
//! ```
//! `ptr` points at the first unit, so the buffer doubles as a NUL-terminated
//! wide string, while the header keeps embedded NULs intact.

use std::ptr;
use std::slice;

use crate::error::JsErrorRecord;
use crate::handle::NativeHandle;
use crate::value::{JsValue, JsValueKind, FUNCTION_ARITY};

const STRING_HEADER: usize = 2;

/// Allocate a `String` value holding `text`.
pub fn alloc_string(text: &str) -> JsValue {
    let units: Vec<u16> = text.encode_utf16().collect();
    alloc_utf16(&units)
}

/// Allocate a `String` value from raw UTF-16 code units.
pub fn alloc_utf16(units: &[u16]) -> JsValue {
    let length = i32::try_from(units.len()).unwrap_or(i32::MAX);
    JsValue::with_ptr(JsValueKind::String, utf16_buffer(units), length)
}

/// Allocate a `StringError` carrying `message`.
pub fn alloc_string_error(message: &str) -> JsValue {
    JsValue::with_ptr(JsValueKind::StringError, utf16_from_str(message), 0)
}

/// Allocate an `UnknownError`, with or without a reason.
pub fn alloc_unknown_error(message: Option<&str>) -> JsValue {
    let ptr = message.map_or(ptr::null_mut(), utf16_from_str);
    JsValue::with_ptr(JsValueKind::UnknownError, ptr, 0)
}

/// Allocate a `ManagedError` pointing at keep-alive `index`, with an optional
/// message overriding the host error's own.
pub fn alloc_managed_error(index: u32, message: Option<&str>) -> JsValue {
    let ptr = message.map_or(ptr::null_mut(), utf16_from_str);
    JsValue::with_ptr(JsValueKind::ManagedError, ptr, index as i32)
}

/// Allocate an `Array` run of `len` empty records.
///
/// If the run cannot be allocated the returned value reports a length of
/// zero; callers compare `length()` against what they asked for.
pub fn alloc_array(len: usize) -> JsValue {
    let failed = JsValue::with_ptr(JsValueKind::Array, ptr::null_mut::<JsValue>(), 0);
    let Ok(length) = i32::try_from(len) else {
        tracing::warn!(requested = len, "array run exceeds the wire length limit");
        return failed;
    };

    let mut run: Vec<JsValue> = Vec::new();
    if run.try_reserve_exact(len).is_err() {
        tracing::warn!(requested = len, "array run allocation failed");
        return failed;
    }
    run.resize(len, JsValue::empty());

    let ptr = Box::into_raw(run.into_boxed_slice()) as *mut JsValue;
    JsValue::with_ptr(JsValueKind::Array, ptr, length)
}

/// Allocate a `Function` composite: `[Wrapped(function), Wrapped(this) | Null]`.
pub fn alloc_function(function: NativeHandle, this: Option<NativeHandle>) -> JsValue {
    let pair: Box<[JsValue]> = Box::new([
        JsValue::wrapped(function),
        this.map_or(JsValue::null(), JsValue::wrapped),
    ]);
    let ptr = Box::into_raw(pair) as *mut JsValue;
    JsValue::with_ptr(JsValueKind::Function, ptr, 0)
}

/// Allocate an `Error` value owning `record` (and the strings inside it).
pub fn alloc_error(record: JsErrorRecord) -> JsValue {
    let ptr = Box::into_raw(Box::new(record));
    JsValue::with_ptr(JsValueKind::Error, ptr, 0)
}

/// Decode the UTF-16 buffer referenced by `value`, `None` for a null pointer.
///
/// Lone surrogates are replaced with U+FFFD.
///
/// # Safety
/// `value` must carry a string buffer produced by this module (any of the
/// string or error-message allocators) that has not been released.
pub unsafe fn read_string(value: &JsValue) -> Option<String> {
    if !value.has_ptr() {
        return None;
    }
    let units = utf16_units(value.as_ptr::<u16>());
    Some(String::from_utf16_lossy(units))
}

/// View the records of an `Array` run (`length` elements) or a `Function`
/// composite (two elements). Any other kind yields an empty slice.
///
/// # Safety
/// `value` must have been produced by [`alloc_array`] / [`alloc_function`]
/// (or follow the same layout) and must not have been released.
pub unsafe fn elements<'a>(value: &JsValue) -> &'a [JsValue] {
    let len = run_len(value);
    if len == 0 {
        return &[];
    }
    slice::from_raw_parts(value.as_ptr::<JsValue>(), len)
}

/// Mutable view of a run, for filling a freshly allocated array.
///
/// # Safety
/// As for [`elements`]; additionally no other view of the run may be alive.
pub unsafe fn elements_mut<'a>(value: &mut JsValue) -> &'a mut [JsValue] {
    let len = run_len(value);
    if len == 0 {
        return &mut [];
    }
    slice::from_raw_parts_mut(value.as_ptr::<JsValue>(), len)
}

/// Borrow the record behind an `Error` value.
///
/// # Safety
/// `value` must have been produced by [`alloc_error`] and not released.
pub unsafe fn error_record<'a>(value: &JsValue) -> Option<&'a JsErrorRecord> {
    if !value.is(JsValueKind::Error) {
        return None;
    }
    value.as_ptr::<JsErrorRecord>().as_ref()
}

/// Free every native allocation reachable from `value`.
///
/// Keep-alive indices and native handles are left alone: the registry and
/// the engine own those.
///
/// # Safety
/// `value` must come from this module's allocators and must not be used (or
/// released) again afterwards. Copies of the record share the same blocks.
pub unsafe fn release(value: JsValue) {
    let kind = match value.kind() {
        Ok(kind) => kind,
        Err(unknown) => {
            tracing::warn!(kind = unknown.0, "not releasing value of unknown kind");
            return;
        }
    };
    if !value.has_ptr() {
        return;
    }

    match kind {
        JsValueKind::String
        | JsValueKind::StringError
        | JsValueKind::UnknownError
        | JsValueKind::ManagedError => free_utf16(value.as_ptr::<u16>()),
        JsValueKind::Array => {
            let run = Box::from_raw(ptr::slice_from_raw_parts_mut(
                value.as_ptr::<JsValue>(),
                run_len(&value),
            ));
            for element in run.iter() {
                release(*element);
            }
        }
        JsValueKind::Function => {
            // Both slots are handles or null; the composite itself is all we own.
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                value.as_ptr::<JsValue>(),
                FUNCTION_ARITY,
            )));
        }
        JsValueKind::Error => {
            let record = Box::from_raw(value.as_ptr::<JsErrorRecord>());
            release(record.name);
            release(record.message);
            release(record.stack);
            release(record.resource);
        }
        JsValueKind::Empty
        | JsValueKind::Null
        | JsValueKind::Boolean
        | JsValueKind::Integer
        | JsValueKind::Number
        | JsValueKind::Date
        | JsValueKind::Index
        | JsValueKind::Managed
        | JsValueKind::Wrapped => {}
    }
}

fn run_len(value: &JsValue) -> usize {
    if !value.has_ptr() {
        return 0;
    }
    match value.kind() {
        Ok(JsValueKind::Array) => value.length().max(0) as usize,
        Ok(JsValueKind::Function) => FUNCTION_ARITY,
        _ => 0,
    }
}

fn utf16_from_str(text: &str) -> *mut u16 {
    let units: Vec<u16> = text.encode_utf16().collect();
    utf16_buffer(&units)
}

fn utf16_buffer(units: &[u16]) -> *mut u16 {
    let len = units.len() as u32;
    let mut buffer = Vec::with_capacity(STRING_HEADER + units.len() + 1);
    buffer.push(len as u16);
    buffer.push((len >> 16) as u16);
    buffer.extend_from_slice(units);
    buffer.push(0);

    let base = Box::into_raw(buffer.into_boxed_slice()) as *mut u16;
    // SAFETY: the block holds at least STRING_HEADER + 1 units.
    unsafe { base.add(STRING_HEADER) }
}

unsafe fn utf16_len(ptr: *const u16) -> usize {
    let header = ptr.sub(STRING_HEADER);
    (*header as usize) | ((*header.add(1) as usize) << 16)
}

unsafe fn utf16_units<'a>(ptr: *const u16) -> &'a [u16] {
    slice::from_raw_parts(ptr, utf16_len(ptr))
}

unsafe fn free_utf16(ptr: *mut u16) {
    let len = utf16_len(ptr);
    let base = ptr.sub(STRING_HEADER);
    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
        base,
        STRING_HEADER + len + 1,
    )));
}
