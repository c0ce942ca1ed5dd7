//! Opaque handles to objects living inside the script engine

use std::num::NonZeroU64;

/// Handle to a script-side object.
///
/// Issued and owned by the engine. The host only carries it around and asks
/// the engine to dispose of it; zero is reserved so a null payload never
/// aliases a live object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NativeHandle(NonZeroU64);

impl NativeHandle {
    /// Wrap a raw handle id. Returns `None` for zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub const fn get(&self) -> u64 {
        self.0.get()
    }

    /// Slot index for engines that keep handles in a table (`id - 1`).
    pub fn slot(&self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Handle for table slot `slot` (`slot + 1`).
    pub fn from_slot(slot: usize) -> Self {
        Self(NonZeroU64::MIN.saturating_add(slot as u64))
    }
}
