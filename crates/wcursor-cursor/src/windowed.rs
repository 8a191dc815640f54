//! A cursor position bound to at most one window.
//!
//! The cursor never fetches on its own. It answers reads from the bound
//! window and reports [`CursorError::StaleData`] whenever that window cannot
//! serve the current position: nothing is bound, the window was closed or
//! revoked, its generation is older than the newest one observed, or the
//! position lies outside its row range. Whoever drives the cursor (see the
//! bulk adaptor) turns that into a fetch.

use tracing::debug;
use wcursor_error::{CursorError, Result};
use wcursor_types::{Cell, CharBuffer, Generation, TypeTag};
use wcursor_window::CursorWindow;

use crate::position::CursorPosition;

#[derive(Debug)]
pub struct WindowedCursor {
    columns: Vec<String>,
    position: CursorPosition,
    window: Option<CursorWindow>,
    known_generation: Generation,
}

impl WindowedCursor {
    /// An unpositioned cursor over `count` rows with no window bound.
    pub fn new(columns: Vec<String>, count: i64) -> Self {
        Self {
            columns,
            position: CursorPosition::new(count),
            window: None,
            known_generation: Generation::default(),
        }
    }

    // -- Position --

    pub const fn position(&self) -> i64 {
        self.position.position()
    }

    pub const fn count(&self) -> i64 {
        self.position.count()
    }

    pub const fn cursor_position(&self) -> &CursorPosition {
        &self.position
    }

    pub fn cursor_position_mut(&mut self) -> &mut CursorPosition {
        &mut self.position
    }

    /// Adopt a new row count (after requery) and return to before-first.
    pub fn set_count(&mut self, count: i64) -> Result<()> {
        self.position.reset(count)
    }

    pub const fn is_closed(&self) -> bool {
        self.position.is_closed()
    }

    // -- Window binding --

    /// Bind `window`, closing the previously bound handle.
    ///
    /// The window is frozen; its generation raises the known generation if
    /// newer. `None` leaves the cursor unbound.
    pub fn set_window(&mut self, window: Option<CursorWindow>) -> Result<()> {
        if self.is_closed() {
            return Err(CursorError::Closed { what: "cursor" });
        }
        if let Some(mut old) = self.window.take() {
            old.close();
        }
        if let Some(mut window) = window {
            if !window.is_closed() {
                window.freeze()?;
            }
            self.known_generation = self.known_generation.max(window.generation());
            self.window = Some(window);
        }
        Ok(())
    }

    pub const fn has_window(&self) -> bool {
        self.window.is_some()
    }

    pub const fn window(&self) -> Option<&CursorWindow> {
        self.window.as_ref()
    }

    /// Newest generation this cursor knows of.
    pub const fn known_generation(&self) -> Generation {
        self.known_generation
    }

    /// Record that `generation` is current; older windows become stale.
    pub fn observe_generation(&mut self, generation: Generation) {
        self.known_generation = self.known_generation.max(generation);
    }

    /// Mark the bound window stale and release it.
    ///
    /// The known generation ends up past the bound window's; it does not move
    /// further when it already is (a newer generation was observed).
    pub fn invalidate(&mut self) {
        let bound = self.window.as_ref().map_or(Generation::default(), CursorWindow::generation);
        self.known_generation = self.known_generation.max(bound.next());
        if let Some(mut window) = self.window.take() {
            debug!(
                generation = window.generation().get(),
                known = self.known_generation.get(),
                "bound window invalidated"
            );
            window.close();
        }
    }

    /// Whether the bound window is live and covers `position`.
    pub fn window_covers(&self, position: i64) -> bool {
        self.usable_window().is_some_and(|w| w.contains(position))
    }

    fn usable_window(&self) -> Option<&CursorWindow> {
        self.window
            .as_ref()
            .filter(|w| !w.is_closed() && w.generation() >= self.known_generation)
    }

    /// Gate for every cell read.
    ///
    /// `IndexOutOfRange` when the position is not a data row; `StaleData`
    /// when no live, current window is bound.
    pub fn check_position(&self) -> Result<()> {
        self.position.check_in_range()?;
        let Some(window) = self.window.as_ref() else {
            return Err(CursorError::stale("no window bound"));
        };
        if window.is_closed() {
            return Err(CursorError::stale("bound window was closed"));
        }
        if window.generation() < self.known_generation {
            return Err(CursorError::stale(format!(
                "window {} predates {}",
                window.generation(),
                self.known_generation
            )));
        }
        Ok(())
    }

    /// The bound window and the relative row of the current position.
    fn row(&self) -> Result<(&CursorWindow, usize)> {
        self.check_position()?;
        let position = self.position.position();
        match self.window.as_ref() {
            Some(window) if window.contains(position) => {
                let start = window.start_position()?;
                let row = usize::try_from(position - start)
                    .map_err(|_| CursorError::internal("negative relative row"))?;
                Ok((window, row))
            }
            Some(window) => Err(CursorError::stale(format!(
                "position {position} outside window [{}, {})",
                window.start_position()?,
                window.end_position()?
            ))),
            None => Err(CursorError::stale("no window bound")),
        }
    }

    // -- Column metadata --

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.columns.get(column).map(String::as_str)
    }

    /// Case-insensitive column lookup. A qualified `table.column` name
    /// matches on the part after the last dot.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.rsplit('.').next().unwrap_or(name);
        self.columns.iter().position(|c| {
            let short = c.rsplit('.').next().unwrap_or(c);
            short.eq_ignore_ascii_case(wanted) || c.eq_ignore_ascii_case(name)
        })
    }

    pub fn column_index_or_err(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| CursorError::NoSuchColumn {
            name: name.to_owned(),
        })
    }

    // -- Reads at the current position --

    pub fn get_cell(&self, column: usize) -> Result<Cell> {
        let (w, row) = self.row()?;
        w.get_cell(row, column)
    }

    pub fn get_type(&self, column: usize) -> Result<TypeTag> {
        let (w, row) = self.row()?;
        w.get_type(row, column)
    }

    pub fn is_null(&self, column: usize) -> Result<bool> {
        Ok(self.get_type(column)? == TypeTag::Null)
    }

    pub fn is_blob(&self, column: usize) -> Result<bool> {
        Ok(self.get_type(column)? == TypeTag::Blob)
    }

    pub fn get_string(&self, column: usize) -> Result<String> {
        let (w, row) = self.row()?;
        w.get_string(row, column)
    }

    pub fn get_short(&self, column: usize) -> Result<i16> {
        let (w, row) = self.row()?;
        w.get_short(row, column)
    }

    pub fn get_int(&self, column: usize) -> Result<i32> {
        let (w, row) = self.row()?;
        w.get_int(row, column)
    }

    pub fn get_long(&self, column: usize) -> Result<i64> {
        let (w, row) = self.row()?;
        w.get_long(row, column)
    }

    pub fn get_float(&self, column: usize) -> Result<f32> {
        let (w, row) = self.row()?;
        w.get_float(row, column)
    }

    pub fn get_double(&self, column: usize) -> Result<f64> {
        let (w, row) = self.row()?;
        w.get_double(row, column)
    }

    pub fn get_blob(&self, column: usize) -> Result<Vec<u8>> {
        let (w, row) = self.row()?;
        w.get_blob(row, column)
    }

    pub fn copy_string_to_buffer(&self, column: usize, buffer: &mut CharBuffer) -> Result<()> {
        let (w, row) = self.row()?;
        w.copy_string_to_buffer(row, column, buffer)
    }

    /// Close the cursor and release its window. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut window) = self.window.take() {
            window.close();
        }
        self.position.close();
    }
}
