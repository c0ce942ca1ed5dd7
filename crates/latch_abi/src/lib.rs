//! Latch Script ABI
//!
//! The wire format shared by the host and the embedded script engine:
//! - `JsValue`: a 16-byte tagged record, the only thing that crosses the boundary
//! - `JsErrorRecord`: structured script error (name, message, stack, location)
//! - Native-side allocator for strings, array runs and composites
//!
//! Ownership rule: whoever allocates hands the value over, the receiver
//! releases it with [`release`]. Keep-alive indices and native handles inside
//! a value are never freed by `release`; their owners do that.

mod alloc;
mod error;
mod handle;
mod value;

pub use alloc::{
    alloc_array, alloc_error, alloc_function, alloc_managed_error, alloc_string,
    alloc_string_error, alloc_unknown_error, alloc_utf16, elements, elements_mut, error_record,
    read_string, release,
};
pub use error::JsErrorRecord;
pub use handle::NativeHandle;
pub use value::{JsValue, JsValueKind, UnknownKind, FUNCTION_ARITY, STRIDE};
