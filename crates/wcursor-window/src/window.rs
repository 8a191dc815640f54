//! Fixed-capacity typed row cache (the "cursor window").
//!
//! A window covers the contiguous logical row range
//! `[start_position, start_position + num_rows)` of a result set. The
//! producer declares the column count, then appends rows and writes cells
//! until the byte budget runs out; running out is reported as `Ok(false)`
//! and tells the producer to start the next window at the next position.
//!
//! # Handles
//!
//! ```text
//!   owner handle ──┐
//!                  ├──► Arc<WindowShared> { revoked, RwLock<WindowState> }
//!   view handle ───┘
//! ```
//!
//! The allocating side holds the *owner* handle. [`CursorWindow::share`]
//! freezes the window and hands out read-only *view* handles over the same
//! storage. Closing the owner revokes every view; closing a view only
//! retires that handle. Dropping any handle without closing just releases
//! its reference.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use wcursor_error::{CursorError, Result};
use wcursor_types::coerce::{read_blob, read_float, read_integer, read_text};
use wcursor_types::{Cell, CharBuffer, Generation, TypeTag};

use crate::{SLOT_BYTES, WindowConfig};

/// Which side of a shared window a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRole {
    /// The allocating side; may populate until frozen and may revoke.
    Owner,
    /// A read-only handle (shared in process or decoded from the wire).
    View,
}

#[derive(Debug)]
struct WindowState {
    start_position: i64,
    /// Zero until `set_num_columns` succeeds.
    column_count: usize,
    /// `None` marks an allocated but unwritten cell; it reads as NULL.
    rows: Vec<Vec<Option<Cell>>>,
    used_bytes: usize,
    frozen: bool,
}

#[derive(Debug)]
struct WindowShared {
    generation: Generation,
    capacity_bytes: usize,
    revoked: AtomicBool,
    state: RwLock<WindowState>,
}

/// A typed, fixed-capacity cache of a contiguous row range.
#[derive(Debug)]
pub struct CursorWindow {
    shared: Arc<WindowShared>,
    role: WindowRole,
    closed: bool,
}

impl CursorWindow {
    /// Create an empty owner window with the configured byte capacity.
    pub fn new(config: &WindowConfig, generation: Generation) -> Self {
        Self::with_capacity(config.validated().capacity_bytes, generation)
    }

    /// Create an empty owner window with an explicit byte capacity.
    pub fn with_capacity(capacity_bytes: usize, generation: Generation) -> Self {
        Self {
            shared: Arc::new(WindowShared {
                generation,
                capacity_bytes,
                revoked: AtomicBool::new(false),
                state: RwLock::new(WindowState {
                    start_position: 0,
                    column_count: 0,
                    rows: Vec::new(),
                    used_bytes: 0,
                    frozen: false,
                }),
            }),
            role: WindowRole::Owner,
            closed: false,
        }
    }

    /// Rebuild a read-only window from decoded wire contents.
    pub(crate) fn from_parts(
        generation: Generation,
        start_position: i64,
        column_count: usize,
        rows: Vec<Vec<Option<Cell>>>,
    ) -> Self {
        let used_bytes = rows
            .iter()
            .map(|row| row_cost(row.len()) + row.iter().flatten().map(Cell::payload_len).sum::<usize>())
            .sum();
        Self {
            shared: Arc::new(WindowShared {
                generation,
                capacity_bytes: used_bytes,
                revoked: AtomicBool::new(false),
                state: RwLock::new(WindowState {
                    start_position,
                    column_count,
                    rows,
                    used_bytes,
                    frozen: true,
                }),
            }),
            role: WindowRole::View,
            closed: false,
        }
    }

    // -- Handle state --

    pub const fn role(&self) -> WindowRole {
        self.role
    }

    /// Whether writes through this handle are refused.
    pub fn is_read_only(&self) -> bool {
        self.role == WindowRole::View || self.shared.state.read().frozen
    }

    /// Whether this handle was closed or the owner revoked the storage.
    pub fn is_closed(&self) -> bool {
        self.closed || self.shared.revoked.load(Ordering::Acquire)
    }

    /// The generation of the result set this window was filled from.
    pub fn generation(&self) -> Generation {
        self.shared.generation
    }

    pub fn capacity_bytes(&self) -> usize {
        self.shared.capacity_bytes
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, WindowState>> {
        if self.is_closed() {
            return Err(CursorError::Closed { what: "window" });
        }
        Ok(self.shared.state.read())
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, WindowState>> {
        if self.is_closed() {
            return Err(CursorError::Closed { what: "window" });
        }
        if self.role == WindowRole::View {
            return Err(CursorError::illegal_state("window view is read-only"));
        }
        let state = self.shared.state.write();
        if state.frozen {
            return Err(CursorError::illegal_state(
                "window is frozen for read-only hand-off",
            ));
        }
        Ok(state)
    }

    // -- Geometry --

    pub fn num_rows(&self) -> Result<usize> {
        Ok(self.read_state()?.rows.len())
    }

    pub fn num_columns(&self) -> Result<usize> {
        Ok(self.read_state()?.column_count)
    }

    pub fn used_bytes(&self) -> Result<usize> {
        Ok(self.read_state()?.used_bytes)
    }

    pub fn free_bytes(&self) -> Result<usize> {
        Ok(self.capacity_bytes().saturating_sub(self.used_bytes()?))
    }

    /// Logical position of relative row 0.
    pub fn start_position(&self) -> Result<i64> {
        Ok(self.read_state()?.start_position)
    }

    /// Set the logical position of relative row 0. Owner only, before freeze.
    pub fn set_start_position(&mut self, position: i64) -> Result<()> {
        self.write_state()?.start_position = position;
        Ok(())
    }

    /// One past the last logical position covered.
    pub fn end_position(&self) -> Result<i64> {
        let state = self.read_state()?;
        Ok(state.start_position + len_i64(state.rows.len()))
    }

    /// Whether the logical `position` falls inside this window.
    pub fn contains(&self, position: i64) -> bool {
        self.read_state().is_ok_and(|state| {
            position >= state.start_position
                && position < state.start_position + len_i64(state.rows.len())
        })
    }

    // -- Population --

    /// Declare the column count.
    ///
    /// Returns `Ok(false)` when columns were already declared, rows were
    /// already allocated, or `count` is zero.
    pub fn set_num_columns(&mut self, count: usize) -> Result<bool> {
        let mut state = self.write_state()?;
        if count == 0 || state.column_count != 0 || !state.rows.is_empty() {
            return Ok(false);
        }
        state.column_count = count;
        Ok(true)
    }

    /// Append one row of unwritten cells.
    ///
    /// Returns `Ok(false)` when the row slots do not fit in the remaining
    /// capacity; existing rows are untouched.
    pub fn alloc_row(&mut self) -> Result<bool> {
        let capacity = self.capacity_bytes();
        let mut state = self.write_state()?;
        if state.column_count == 0 {
            return Err(CursorError::illegal_state(
                "columns must be declared before rows are allocated",
            ));
        }
        let cost = row_cost(state.column_count);
        if state.used_bytes + cost > capacity {
            return Ok(false);
        }
        let columns = state.column_count;
        state.rows.push(vec![None; columns]);
        state.used_bytes += cost;
        Ok(true)
    }

    /// Drop the most recently allocated row and any payload written to it.
    pub fn free_last_row(&mut self) -> Result<()> {
        let mut state = self.write_state()?;
        let Some(row) = state.rows.pop() else {
            return Ok(());
        };
        let freed = row_cost(row.len()) + row.iter().flatten().map(Cell::payload_len).sum::<usize>();
        state.used_bytes -= freed;
        Ok(())
    }

    /// Write one cell.
    ///
    /// Returns `Ok(false)` when the cell was already written or the payload
    /// does not fit in the remaining capacity.
    pub fn put_cell(&mut self, cell: Cell, row: usize, column: usize) -> Result<bool> {
        let capacity = self.capacity_bytes();
        let mut state = self.write_state()?;
        check_bounds(&state, row, column)?;
        if state.rows[row][column].is_some() {
            return Ok(false);
        }
        let payload = cell.payload_len();
        if state.used_bytes + payload > capacity {
            return Ok(false);
        }
        state.used_bytes += payload;
        state.rows[row][column] = Some(cell);
        Ok(true)
    }

    pub fn put_null(&mut self, row: usize, column: usize) -> Result<bool> {
        self.put_cell(Cell::Null, row, column)
    }

    pub fn put_long(&mut self, value: i64, row: usize, column: usize) -> Result<bool> {
        self.put_cell(Cell::Integer(value), row, column)
    }

    pub fn put_double(&mut self, value: f64, row: usize, column: usize) -> Result<bool> {
        self.put_cell(Cell::Float(value), row, column)
    }

    pub fn put_string(&mut self, value: &str, row: usize, column: usize) -> Result<bool> {
        self.put_cell(Cell::Text(value.to_owned()), row, column)
    }

    pub fn put_blob(&mut self, value: &[u8], row: usize, column: usize) -> Result<bool> {
        self.put_cell(Cell::Blob(value.to_vec()), row, column)
    }

    /// Freeze the window for read-only hand-off. Idempotent.
    pub fn freeze(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(CursorError::Closed { what: "window" });
        }
        self.shared.state.write().frozen = true;
        Ok(())
    }

    /// Freeze the window and return a read-only view over the same storage.
    pub fn share(&self) -> Result<Self> {
        if self.is_closed() {
            return Err(CursorError::Closed { what: "window" });
        }
        self.shared.state.write().frozen = true;
        Ok(Self {
            shared: Arc::clone(&self.shared),
            role: WindowRole::View,
            closed: false,
        })
    }

    /// Close this handle.
    ///
    /// On the owner this revokes every view and releases the row storage.
    /// Any further access through a closed handle fails with
    /// [`CursorError::Closed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.role == WindowRole::Owner {
            self.shared.revoked.store(true, Ordering::Release);
            let mut state = self.shared.state.write();
            debug!(
                start = state.start_position,
                rows = state.rows.len(),
                generation = self.shared.generation.get(),
                "window closed by owner"
            );
            state.rows = Vec::new();
            state.used_bytes = 0;
        }
    }

    // -- Reads (relative row indices) --

    fn with_cell<T>(&self, row: usize, column: usize, f: impl FnOnce(&Cell) -> T) -> Result<T> {
        let state = self.read_state()?;
        check_bounds(&state, row, column)?;
        Ok(match &state.rows[row][column] {
            Some(cell) => f(cell),
            None => f(&Cell::Null),
        })
    }

    /// Clone the cell at (row, column).
    pub fn get_cell(&self, row: usize, column: usize) -> Result<Cell> {
        self.with_cell(row, column, Clone::clone)
    }

    pub fn get_type(&self, row: usize, column: usize) -> Result<TypeTag> {
        self.with_cell(row, column, Cell::tag)
    }

    pub fn is_null(&self, row: usize, column: usize) -> Result<bool> {
        Ok(self.get_type(row, column)? == TypeTag::Null)
    }

    pub fn is_blob(&self, row: usize, column: usize) -> Result<bool> {
        Ok(self.get_type(row, column)? == TypeTag::Blob)
    }

    pub fn get_long(&self, row: usize, column: usize) -> Result<i64> {
        self.with_cell(row, column, read_integer)?
    }

    /// Read as `i32`, truncating like a C cast.
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_int(&self, row: usize, column: usize) -> Result<i32> {
        Ok(self.get_long(row, column)? as i32)
    }

    /// Read as `i16`, truncating like a C cast.
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_short(&self, row: usize, column: usize) -> Result<i16> {
        Ok(self.get_long(row, column)? as i16)
    }

    pub fn get_double(&self, row: usize, column: usize) -> Result<f64> {
        self.with_cell(row, column, read_float)?
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn get_float(&self, row: usize, column: usize) -> Result<f32> {
        Ok(self.get_double(row, column)? as f32)
    }

    pub fn get_string(&self, row: usize, column: usize) -> Result<String> {
        self.with_cell(row, column, read_text)?
    }

    pub fn get_blob(&self, row: usize, column: usize) -> Result<Vec<u8>> {
        self.with_cell(row, column, read_blob)?
    }

    /// Copy the cell's text into `buffer` without an intermediate `String`
    /// for text cells. NULL copies zero characters; numbers are formatted.
    pub fn copy_string_to_buffer(
        &self,
        row: usize,
        column: usize,
        buffer: &mut CharBuffer,
    ) -> Result<()> {
        self.with_cell(row, column, |cell| match cell {
            Cell::Text(s) => {
                buffer.copy_from(s);
                Ok(())
            }
            Cell::Null => {
                buffer.clear();
                Ok(())
            }
            other => read_text(other).map(|s| buffer.copy_from(&s)),
        })?
    }

    /// Snapshot every row, for encoding.
    pub(crate) fn snapshot(&self) -> Result<(i64, usize, Vec<Vec<Option<Cell>>>)> {
        let state = self.read_state()?;
        Ok((state.start_position, state.column_count, state.rows.clone()))
    }
}

const fn row_cost(columns: usize) -> usize {
    columns * SLOT_BYTES
}

#[allow(clippy::cast_possible_wrap)]
const fn len_i64(len: usize) -> i64 {
    len as i64
}

fn check_bounds(state: &WindowState, row: usize, column: usize) -> Result<()> {
    if row >= state.rows.len() {
        return Err(CursorError::IndexOutOfRange {
            index: len_i64(row),
            size: len_i64(state.rows.len()),
        });
    }
    if column >= state.column_count {
        return Err(CursorError::ColumnOutOfRange {
            column,
            columns: state.column_count,
        });
    }
    Ok(())
}
