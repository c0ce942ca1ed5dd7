//! Callable script values

use std::fmt;

use crate::error::Result;
use crate::host::HostValue;
use crate::object::JsObject;

/// A script function together with the receiver it was read from.
pub struct JsFunction {
    function: JsObject,
    this: Option<JsObject>,
}

impl JsFunction {
    pub(crate) fn new(function: JsObject, this: Option<JsObject>) -> Self {
        Self { function, this }
    }

    /// Call with the bound receiver (or none).
    pub fn call(&self, args: &[HostValue]) -> Result<HostValue> {
        let context = self.function.live()?;
        let this = match &self.this {
            Some(this) => {
                this.live()?;
                Some(this.handle())
            }
            None => None,
        };
        context.call(self.function.handle(), this, args)
    }

    pub fn function(&self) -> &JsObject {
        &self.function
    }

    pub fn this(&self) -> Option<&JsObject> {
        self.this.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.function.is_disposed()
    }

    /// Release both handles. Fails if already disposed.
    pub fn dispose(&self) -> Result<()> {
        self.function.dispose()?;
        if let Some(this) = &self.this {
            if !this.is_disposed() {
                this.dispose()?;
            }
        }
        Ok(())
    }
}

impl PartialEq for JsFunction {
    fn eq(&self, other: &Self) -> bool {
        self.function == other.function && self.this == other.this
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsFunction")
            .field("function", &self.function)
            .field("this", &self.this)
            .finish()
    }
}
