//! Keep-alive registry
//!
//! Every host object handed to script is anchored here under an integer
//! index, and the index is what travels across the boundary. Entries are
//! never removed on their own: script may hold an index indefinitely (stored
//! in a variable, captured by a closure), so the anchor lives as long as the
//! owning context unless the engine explicitly reports it as garbage.
//!
//! Adding the same object twice yields two independent anchors, one per
//! exposure.

use crate::error::InteropError;
use crate::host::HostObject;

#[derive(Debug, Default)]
pub struct KeepAlive {
    slots: Vec<Option<HostObject>>,
    /// Slots vacated by `remove`, reused by later `add`s.
    free: Vec<u32>,
    live: usize,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor `object` and return its index.
    pub fn add(&mut self, object: HostObject) -> u32 {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(object);
            tracing::trace!(index, "keep-alive slot reused");
            return index;
        }

        // Indices travel in the 32-bit signed length slot of a JsValue.
        debug_assert!(self.slots.len() < i32::MAX as usize, "keep-alive registry exhausted");
        let index = self.slots.len() as u32;
        self.slots.push(Some(object));
        if index.is_power_of_two() {
            tracing::debug!(slots = index + 1, "keep-alive registry grew");
        }
        index
    }

    /// Resolve an index handed back by the engine.
    pub fn get(&self, index: u32) -> Result<&HostObject, InteropError> {
        match self.slots.get(index as usize) {
            Some(Some(object)) => Ok(object),
            Some(None) => Err(InteropError::ReleasedIndex { index }),
            None => Err(InteropError::IndexOutOfRange {
                index,
                len: self.slots.len(),
            }),
        }
    }

    /// Drop the anchor at `index`, after the engine reports that script can
    /// no longer reach it. The slot becomes available for reuse.
    pub fn remove(&mut self, index: u32) -> Result<HostObject, InteropError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(InteropError::IndexOutOfRange { index, len })?;
        let object = slot.take().ok_or(InteropError::ReleasedIndex { index })?;
        self.free.push(index);
        self.live -= 1;
        Ok(object)
    }

    /// Number of live anchors.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever handed out, live or vacated.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Release every anchor. Only valid once the owning realm is gone.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }
}
