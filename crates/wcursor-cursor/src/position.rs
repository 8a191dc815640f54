//! Cursor position state machine.
//!
//! ```text
//!   -1 (before first) ── 0 .. count-1 (data rows) ── count (after last)
//! ```
//!
//! Every move clamps its target into `[-1, count]` and reports whether the
//! resulting position bears data. The sentinels never bear data.

use wcursor_error::{CursorError, Result};

/// Where a cursor sits relative to its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    /// Position `-1`.
    BeforeFirst,
    /// A data row in `[0, count)`.
    Row(i64),
    /// Position `count`.
    AfterLast,
}

/// Logical row index into a result of `count` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorPosition {
    position: i64,
    count: i64,
    closed: bool,
}

impl Default for CursorPosition {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CursorPosition {
    /// An unpositioned cursor over `count` rows. Negative counts clamp to 0.
    pub const fn new(count: i64) -> Self {
        Self {
            position: -1,
            count: if count < 0 { 0 } else { count },
            closed: false,
        }
    }

    pub const fn position(&self) -> i64 {
        self.position
    }

    pub const fn count(&self) -> i64 {
        self.count
    }

    pub const fn state(&self) -> PositionState {
        if self.position < 0 {
            PositionState::BeforeFirst
        } else if self.position >= self.count {
            PositionState::AfterLast
        } else {
            PositionState::Row(self.position)
        }
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(CursorError::Closed { what: "cursor" });
        }
        Ok(())
    }

    /// Adopt a new row count and return to before-first.
    pub fn reset(&mut self, count: i64) -> Result<()> {
        self.ensure_open()?;
        self.count = count.max(0);
        self.position = -1;
        Ok(())
    }

    /// Clamp `target` into `[-1, count]` and move there.
    ///
    /// Returns `true` iff the new position is a data row.
    pub fn move_to_position(&mut self, target: i64) -> Result<bool> {
        self.ensure_open()?;
        self.position = target.clamp(-1, self.count);
        Ok(self.is_data_row())
    }

    pub fn move_to_first(&mut self) -> Result<bool> {
        self.move_to_position(0)
    }

    pub fn move_to_last(&mut self) -> Result<bool> {
        self.move_to_position(self.count - 1)
    }

    pub fn move_to_next(&mut self) -> Result<bool> {
        self.move_to_position(self.position.saturating_add(1))
    }

    pub fn move_to_previous(&mut self) -> Result<bool> {
        self.move_to_position(self.position.saturating_sub(1))
    }

    pub fn move_by(&mut self, offset: i64) -> Result<bool> {
        self.move_to_position(self.position.saturating_add(offset))
    }

    pub const fn is_data_row(&self) -> bool {
        self.position >= 0 && self.position < self.count
    }

    pub const fn is_before_first(&self) -> bool {
        self.count == 0 || self.position == -1
    }

    pub const fn is_after_last(&self) -> bool {
        self.count == 0 || self.position == self.count
    }

    pub const fn is_first(&self) -> bool {
        self.count > 0 && self.position == 0
    }

    pub const fn is_last(&self) -> bool {
        self.count > 0 && self.position == self.count - 1
    }

    /// Fail with `IndexOutOfRange` unless the position is a data row.
    pub fn check_in_range(&self) -> Result<i64> {
        self.ensure_open()?;
        if self.is_data_row() {
            Ok(self.position)
        } else {
            Err(CursorError::IndexOutOfRange {
                index: self.position,
                size: self.count,
            })
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}
