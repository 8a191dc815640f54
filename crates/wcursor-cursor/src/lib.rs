//! Cursor position tracking and window binding.
//!
//! [`CursorPosition`] is the bare `[-1, count]` state machine.
//! [`WindowedCursor`] pairs it with at most one bound window and gates every
//! read through `check_position`. The [`Cursor`] trait is the consumer API;
//! implementors decide when to fetch.

pub mod position;
pub mod traits;
pub mod windowed;

pub use position::{CursorPosition, PositionState};
pub use traits::Cursor;
pub use windowed::WindowedCursor;
