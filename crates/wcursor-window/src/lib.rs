//! Typed row windows.
//!
//! A [`CursorWindow`] is the unit of transfer between a result-set producer
//! and a consumer cursor: a bounded block of consecutive rows whose cells
//! carry their own [`TypeTag`](wcursor_types::TypeTag). The [`wire`] module
//! gives a window a self-describing byte form for cross-process hand-off.

pub mod window;
pub mod wire;

pub use window::{CursorWindow, WindowRole};
pub use wire::{WINDOW_MAGIC, WINDOW_WIRE_VERSION, decode_window, encode_window};

/// Bytes charged per allocated cell slot, on top of any text/blob payload.
pub const SLOT_BYTES: usize = 16;

/// Default window capacity (2 MiB).
pub const DEFAULT_WINDOW_CAPACITY: usize = 2 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sizing for newly allocated windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Byte budget per window, covering slots and payloads.
    ///
    /// Default: 2 MiB.
    pub capacity_bytes: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_WINDOW_CAPACITY,
        }
    }
}

impl WindowConfig {
    pub const fn with_capacity(capacity_bytes: usize) -> Self {
        Self { capacity_bytes }
    }

    /// Clamp the capacity so a window can always hold at least one slot.
    #[must_use]
    pub const fn validated(mut self) -> Self {
        if self.capacity_bytes < SLOT_BYTES {
            self.capacity_bytes = SLOT_BYTES;
        }
        self
    }
}
