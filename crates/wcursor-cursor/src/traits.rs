//! Consumer-facing cursor trait.
//!
//! Implementors supply movement (which may fetch) and access to their
//! [`WindowedCursor`]; everything else is provided in terms of those two.

use wcursor_error::Result;
use wcursor_types::{Cell, CharBuffer, TypeTag};

use crate::windowed::WindowedCursor;

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Row-by-row access to a windowed result.
///
/// Movement clamps into `[-1, count]` and returns whether the cursor now
/// sits on a data row. Reads address columns of the current row.
pub trait Cursor {
    /// The binding of position and window backing this cursor.
    fn windowed(&self) -> &WindowedCursor;

    /// Move to `target`, fetching data if the implementation needs to.
    fn move_to_position(&mut self, target: i64) -> Result<bool>;

    /// Release the window and any producer-side resources.
    fn close(&mut self);

    // -- Movement --

    fn move_to_first(&mut self) -> Result<bool> {
        self.move_to_position(0)
    }

    fn move_to_last(&mut self) -> Result<bool> {
        let last = self.count() - 1;
        self.move_to_position(last)
    }

    fn move_to_next(&mut self) -> Result<bool> {
        let next = self.position().saturating_add(1);
        self.move_to_position(next)
    }

    fn move_to_previous(&mut self) -> Result<bool> {
        let previous = self.position().saturating_sub(1);
        self.move_to_position(previous)
    }

    fn move_by(&mut self, offset: i64) -> Result<bool> {
        let target = self.position().saturating_add(offset);
        self.move_to_position(target)
    }

    // -- Position queries --

    fn position(&self) -> i64 {
        self.windowed().position()
    }

    fn count(&self) -> i64 {
        self.windowed().count()
    }

    fn is_first(&self) -> bool {
        self.windowed().cursor_position().is_first()
    }

    fn is_last(&self) -> bool {
        self.windowed().cursor_position().is_last()
    }

    fn is_before_first(&self) -> bool {
        self.windowed().cursor_position().is_before_first()
    }

    fn is_after_last(&self) -> bool {
        self.windowed().cursor_position().is_after_last()
    }

    fn is_closed(&self) -> bool {
        self.windowed().is_closed()
    }

    // -- Columns --

    fn column_names(&self) -> &[String] {
        self.windowed().column_names()
    }

    fn column_count(&self) -> usize {
        self.windowed().column_count()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.windowed().column_index(name)
    }

    fn column_index_or_err(&self, name: &str) -> Result<usize> {
        self.windowed().column_index_or_err(name)
    }

    // -- Typed reads --

    fn check_position(&self) -> Result<()> {
        self.windowed().check_position()
    }

    fn get_cell(&self, column: usize) -> Result<Cell> {
        self.windowed().get_cell(column)
    }

    fn get_type(&self, column: usize) -> Result<TypeTag> {
        self.windowed().get_type(column)
    }

    fn is_null(&self, column: usize) -> Result<bool> {
        self.windowed().is_null(column)
    }

    fn is_blob(&self, column: usize) -> Result<bool> {
        self.windowed().is_blob(column)
    }

    fn get_string(&self, column: usize) -> Result<String> {
        self.windowed().get_string(column)
    }

    fn get_short(&self, column: usize) -> Result<i16> {
        self.windowed().get_short(column)
    }

    fn get_int(&self, column: usize) -> Result<i32> {
        self.windowed().get_int(column)
    }

    fn get_long(&self, column: usize) -> Result<i64> {
        self.windowed().get_long(column)
    }

    fn get_float(&self, column: usize) -> Result<f32> {
        self.windowed().get_float(column)
    }

    fn get_double(&self, column: usize) -> Result<f64> {
        self.windowed().get_double(column)
    }

    fn get_blob(&self, column: usize) -> Result<Vec<u8>> {
        self.windowed().get_blob(column)
    }

    fn copy_string_to_buffer(&self, column: usize, buffer: &mut CharBuffer) -> Result<()> {
        self.windowed().copy_string_to_buffer(column, buffer)
    }
}

/// A bare windowed cursor moves without fetching; callers bind windows.
impl Cursor for WindowedCursor {
    fn windowed(&self) -> &WindowedCursor {
        self
    }

    fn move_to_position(&mut self, target: i64) -> Result<bool> {
        self.cursor_position_mut().move_to_position(target)
    }

    fn close(&mut self) {
        Self::close(self);
    }
}
