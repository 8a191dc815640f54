//! Client-side cursor over a [`BulkCursor`].
//!
//! Moves to a data row either stay inside the bound window (no fetch, an
//! optional `on_move` notice) or fetch a replacement window through
//! `get_window`. Moves to the sentinels never fetch.
//!
//! After every producer call the adaptor adopts the producer's generation,
//! so a re-execution triggered elsewhere makes the bound window stale even
//! when the window itself was never revoked (a decoded remote copy).
//!
//! A producer-side failure (unreachable producer, malformed reply) closes
//! the bound window and leaves the adaptor closed; the failing call returns
//! the error. Other producer errors (out of range, unsupported) pass
//! through and leave the adaptor usable.

use std::sync::Arc;

use tracing::{debug, warn};
use wcursor_cursor::{Cursor, WindowedCursor};
use wcursor_error::{CursorError, Result};

use crate::protocol::{Bundle, BulkCursor, ContentObserver, RowUpdates};

pub struct BulkCursorAdaptor {
    producer: Arc<dyn BulkCursor>,
    cursor: WindowedCursor,
    wants_all_on_move: bool,
    observer: Option<Arc<dyn ContentObserver>>,
}

impl std::fmt::Debug for BulkCursorAdaptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkCursorAdaptor")
            .field("cursor", &self.cursor)
            .field("wants_all_on_move", &self.wants_all_on_move)
            .finish_non_exhaustive()
    }
}

impl BulkCursorAdaptor {
    /// Bind to `producer`, reading its columns, count and move policy.
    pub fn new(producer: Arc<dyn BulkCursor>) -> Result<Self> {
        let columns = producer.column_names()?;
        let count = producer.count()?;
        let wants_all_on_move = producer.wants_all_on_move_calls()?;
        debug!(count, columns = columns.len(), wants_all_on_move, "bulk cursor adaptor opened");
        let mut cursor = WindowedCursor::new(columns, count);
        cursor.observe_generation(producer.generation());
        Ok(Self {
            producer,
            cursor,
            wants_all_on_move,
            observer: None,
        })
    }

    /// Register `observer` with the producer on every requery.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ContentObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn producer(&self) -> &Arc<dyn BulkCursor> {
        &self.producer
    }

    fn ensure_open(&self) -> Result<()> {
        if self.cursor.is_closed() {
            return Err(CursorError::Closed { what: "cursor" });
        }
        Ok(())
    }

    /// Run `f` against the producer, applying the failure rule.
    fn call<T>(&mut self, f: impl FnOnce(&dyn BulkCursor) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        match f(self.producer.as_ref()) {
            Ok(value) => {
                self.cursor.observe_generation(self.producer.generation());
                Ok(value)
            }
            Err(e) if e.is_producer_failure() => {
                warn!(error = %e, position = self.cursor.position(), "producer failed; closing cursor");
                self.cursor.close();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch a window containing `target` and bind it.
    fn fetch(&mut self, target: i64) -> Result<()> {
        let window = self.call(|p| p.get_window(target))?;
        if !window.contains(target) {
            return Err(CursorError::stale(format!(
                "producer window does not cover position {target}"
            )));
        }
        debug!(
            target,
            start = window.start_position()?,
            rows = window.num_rows()?,
            generation = window.generation().get(),
            "window fetched"
        );
        self.cursor.set_window(Some(window))
    }

    /// Re-execute on the producer and start over before the first row.
    ///
    /// The bound window is released; the next move fetches.
    pub fn requery(&mut self) -> Result<i64> {
        let observer = self.observer.clone();
        let count = self.call(|p| p.requery(observer))?;
        self.cursor.invalidate();
        self.cursor.set_count(count)?;
        Ok(count)
    }

    /// Release the window and the producer's execution; requery to resume.
    pub fn deactivate(&mut self) -> Result<()> {
        self.call(|p| p.deactivate())?;
        self.cursor.invalidate();
        Ok(())
    }

    /// Apply row changes; on success the result is refreshed.
    pub fn update_rows(&mut self, updates: &RowUpdates) -> Result<bool> {
        let changed = self.call(|p| p.update_rows(updates))?;
        if changed {
            self.refresh()?;
        }
        Ok(changed)
    }

    /// Delete the row at the current position; on success the result is
    /// refreshed.
    pub fn delete_row(&mut self) -> Result<bool> {
        self.cursor.cursor_position().check_in_range()?;
        let position = self.cursor.position();
        let deleted = self.call(|p| p.delete_row(position))?;
        if deleted {
            self.refresh()?;
        }
        Ok(deleted)
    }

    fn refresh(&mut self) -> Result<()> {
        let count = self.call(|p| p.count())?;
        self.cursor.invalidate();
        self.cursor.set_count(count)
    }

    pub fn extras(&mut self) -> Result<Bundle> {
        self.call(|p| p.extras())
    }

    pub fn respond(&mut self, extras: &Bundle) -> Result<Bundle> {
        self.call(|p| p.respond(extras))
    }

    pub const fn wants_all_on_move_calls(&self) -> bool {
        self.wants_all_on_move
    }
}

impl Cursor for BulkCursorAdaptor {
    fn windowed(&self) -> &WindowedCursor {
        &self.cursor
    }

    fn move_to_position(&mut self, target: i64) -> Result<bool> {
        self.ensure_open()?;
        let clamped = target.clamp(-1, self.cursor.count());
        if (0..self.cursor.count()).contains(&clamped) {
            if self.wants_all_on_move && self.cursor.window_covers(clamped) {
                self.call(|p| p.on_move(clamped))?;
            }
            // The notice may have revealed a newer generation.
            if !self.cursor.window_covers(clamped) {
                self.fetch(clamped)?;
            }
        }
        self.cursor.cursor_position_mut().move_to_position(clamped)
    }

    fn close(&mut self) {
        if self.cursor.is_closed() {
            return;
        }
        self.cursor.close();
        if let Err(e) = self.producer.close() {
            warn!(error = %e, "producer close failed");
        }
    }
}
