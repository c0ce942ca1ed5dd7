use bytemuck::{Pod, Zeroable};

use crate::value::JsValue;

/// Structured script error, addressed by the `ptr` of an `Error` value.
///
/// Every `JsValue` field is either `String` or `Null`/`Empty`. `name` is the
/// constructor name of the thrown error (`TypeError`, `RangeError`, ...) and
/// serves as its code. `line`/`column` are zero when unknown.
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct JsErrorRecord {
    pub line: i32,
    pub column: i32,
    pub name: JsValue,
    pub message: JsValue,
    pub stack: JsValue,
    pub resource: JsValue,
}

impl Default for JsErrorRecord {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}
