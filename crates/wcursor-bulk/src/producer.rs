//! In-process producer that materializes windows from a [`RowSource`].
//!
//! ```text
//!   RowSource ──execute/row──► MaterializedProducer ──share()──► consumer
//!                               │ owner windows (≤ N cached)
//!                               └ generation, observers
//! ```
//!
//! The producer keeps the owner handle of every cached window and hands out
//! views. Requery, mutation, deactivate and close all revoke those views by
//! closing the owners; eviction on `on_move` or cache overflow only drops
//! the producer's reference, so views already handed out stay readable.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use wcursor_error::{CursorError, Result};
use wcursor_types::{Cell, Generation};
use wcursor_window::{CursorWindow, WindowConfig};

use crate::protocol::{Bundle, BulkCursor, ContentObserver, RowUpdates};

// ---------------------------------------------------------------------------
// RowSource
// ---------------------------------------------------------------------------

/// The query-engine seam: something that can (re)execute and serve rows.
pub trait RowSource: Send {
    fn column_names(&self) -> Vec<String>;

    /// Run (or re-run) the query; later calls see the fresh result.
    fn execute(&mut self) -> Result<()>;

    /// Rows in the current result.
    fn row_count(&self) -> Result<i64>;

    /// All cells of the row at `position` in the current result.
    fn row(&self, position: i64) -> Result<Vec<Cell>>;

    fn update_rows(&mut self, _updates: &RowUpdates) -> Result<bool> {
        Err(CursorError::unsupported("update_rows"))
    }

    fn delete_row(&mut self, _position: i64) -> Result<bool> {
        Err(CursorError::unsupported("delete_row"))
    }
}

// ---------------------------------------------------------------------------
// MemoryTable / MemoryRowSource
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TableData {
    columns: Vec<String>,
    rows: Vec<(i64, Vec<Cell>)>,
    next_rowid: i64,
}

/// A shared in-memory table. Clones refer to the same rows.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    data: Arc<RwLock<TableData>>,
}

impl MemoryTable {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            data: Arc::new(RwLock::new(TableData {
                columns: columns.into_iter().map(Into::into).collect(),
                rows: Vec::new(),
                next_rowid: 1,
            })),
        }
    }

    /// Append a row and return its row id. Missing trailing cells are NULL.
    pub fn insert(&self, mut cells: Vec<Cell>) -> Result<i64> {
        let mut data = self.data.write();
        if cells.len() > data.columns.len() {
            return Err(CursorError::ColumnOutOfRange {
                column: cells.len() - 1,
                columns: data.columns.len(),
            });
        }
        cells.resize(data.columns.len(), Cell::Null);
        let rowid = data.next_rowid;
        data.next_rowid += 1;
        data.rows.push((rowid, cells));
        Ok(rowid)
    }

    pub fn len(&self) -> usize {
        self.data.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().rows.is_empty()
    }

    pub fn columns(&self) -> Vec<String> {
        self.data.read().columns.clone()
    }

    /// Row id of the row at `position`, if any.
    pub fn rowid_at(&self, position: usize) -> Option<i64> {
        self.data.read().rows.get(position).map(|(id, _)| *id)
    }

    /// Remove every row.
    pub fn clear(&self) {
        self.data.write().rows.clear();
    }

    fn snapshot(&self) -> Vec<(i64, Vec<Cell>)> {
        self.data.read().rows.clone()
    }
}

/// Serves a [`MemoryTable`] as a result set: `SELECT * FROM table`.
///
/// Each execution snapshots the table, so earlier executions are unaffected
/// by later inserts.
#[derive(Debug)]
pub struct MemoryRowSource {
    table: MemoryTable,
    snapshot: Option<Vec<(i64, Vec<Cell>)>>,
}

impl MemoryRowSource {
    pub const fn new(table: MemoryTable) -> Self {
        Self {
            table,
            snapshot: None,
        }
    }

    fn rows(&self) -> Result<&[(i64, Vec<Cell>)]> {
        self.snapshot
            .as_deref()
            .ok_or_else(|| CursorError::illegal_state("row source not executed"))
    }
}

impl RowSource for MemoryRowSource {
    fn column_names(&self) -> Vec<String> {
        self.table.columns()
    }

    fn execute(&mut self) -> Result<()> {
        self.snapshot = Some(self.table.snapshot());
        Ok(())
    }

    fn row_count(&self) -> Result<i64> {
        i64::try_from(self.rows()?.len()).map_err(|_| CursorError::internal("row count overflow"))
    }

    fn row(&self, position: i64) -> Result<Vec<Cell>> {
        let rows = self.rows()?;
        usize::try_from(position)
            .ok()
            .and_then(|p| rows.get(p))
            .map(|(_, cells)| cells.clone())
            .ok_or(CursorError::IndexOutOfRange {
                index: position,
                size: i64::try_from(rows.len()).unwrap_or(i64::MAX),
            })
    }

    fn update_rows(&mut self, updates: &RowUpdates) -> Result<bool> {
        let mut data = self.table.data.write();
        let mut changed = false;
        for (rowid, changes) in updates {
            let mut resolved = Vec::with_capacity(changes.len());
            for (name, cell) in changes {
                let column = data
                    .columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(name))
                    .ok_or_else(|| CursorError::NoSuchColumn { name: name.clone() })?;
                resolved.push((column, cell));
            }
            if let Some((_, cells)) = data.rows.iter_mut().find(|(id, _)| id == rowid) {
                for (column, cell) in resolved {
                    cells[column] = cell.clone();
                }
                changed = true;
            }
        }
        Ok(changed)
    }

    fn delete_row(&mut self, position: i64) -> Result<bool> {
        let Some(rowid) = usize::try_from(position)
            .ok()
            .and_then(|p| self.rows().ok()?.get(p).map(|(id, _)| *id))
        else {
            return Ok(false);
        };
        let mut data = self.table.data.write();
        let before = data.rows.len();
        data.rows.retain(|(id, _)| *id != rowid);
        Ok(data.rows.len() != before)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning for a [`MaterializedProducer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Sizing of every window the producer fills.
    pub window: WindowConfig,

    /// Owner windows kept for reuse.
    ///
    /// Default: 2.
    pub max_cached_windows: usize,

    /// Rows on either side of the reported position whose windows survive
    /// `on_move`.
    ///
    /// Default: 256.
    pub look_around_rows: i64,

    /// Whether consumers should report every move.
    ///
    /// Default: false.
    pub wants_all_on_move_calls: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            max_cached_windows: 2,
            look_around_rows: 256,
            wants_all_on_move_calls: false,
        }
    }
}

impl ProducerConfig {
    /// Validate and clamp configuration values.
    #[must_use]
    pub const fn validated(mut self) -> Self {
        self.window = self.window.validated();
        if self.max_cached_windows == 0 {
            self.max_cached_windows = 1;
        }
        if self.look_around_rows < 0 {
            self.look_around_rows = 0;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// MaterializedProducer
// ---------------------------------------------------------------------------

struct ProducerState<S> {
    source: S,
    columns: Vec<String>,
    /// `None` until the first execution after creation or deactivation.
    count: Option<i64>,
    generation: Generation,
    windows: VecDeque<CursorWindow>,
    /// Rows that fit in the most recently filled window.
    last_window_rows: i64,
    observers: Vec<Arc<dyn ContentObserver>>,
    extras: Bundle,
    closed: bool,
}

/// Serves the bulk cursor protocol from a [`RowSource`].
pub struct MaterializedProducer<S: RowSource> {
    config: ProducerConfig,
    state: Mutex<ProducerState<S>>,
}

impl<S: RowSource> std::fmt::Debug for MaterializedProducer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MaterializedProducer")
            .field("config", &self.config)
            .field("count", &state.count)
            .field("generation", &state.generation)
            .field("cached_windows", &state.windows.len())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl<S: RowSource> MaterializedProducer<S> {
    /// Wrap `source`. Nothing executes until the first call that needs rows.
    pub fn new(source: S, config: ProducerConfig) -> Self {
        let columns = source.column_names();
        Self {
            config: config.validated(),
            state: Mutex::new(ProducerState {
                source,
                columns,
                count: None,
                generation: Generation::default(),
                windows: VecDeque::new(),
                last_window_rows: 0,
                observers: Vec::new(),
                extras: Bundle::new(),
                closed: false,
            }),
        }
    }

    /// Attach the bundle returned by `extras`.
    #[must_use]
    pub fn with_extras(self, extras: Bundle) -> Self {
        self.state.lock().extras = extras;
        self
    }

    pub const fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Owner windows currently cached.
    pub fn cached_windows(&self) -> usize {
        self.state.lock().windows.len()
    }

    fn open_state(&self) -> Result<parking_lot::MutexGuard<'_, ProducerState<S>>> {
        let state = self.state.lock();
        if state.closed {
            return Err(CursorError::unavailable("producer closed"));
        }
        Ok(state)
    }

    /// Run the source if it has not run since creation or deactivation.
    fn ensure_executed(state: &mut ProducerState<S>) -> Result<i64> {
        if let Some(count) = state.count {
            return Ok(count);
        }
        Self::execute(state)
    }

    fn execute(state: &mut ProducerState<S>) -> Result<i64> {
        Self::revoke_windows(state);
        state.source.execute()?;
        state.columns = state.source.column_names();
        let count = state.source.row_count()?;
        state.generation = state.generation.next();
        state.count = Some(count);
        debug!(
            count,
            generation = state.generation.get(),
            "row source executed"
        );
        Ok(count)
    }

    fn revoke_windows(state: &mut ProducerState<S>) {
        for mut window in state.windows.drain(..) {
            window.close();
        }
    }

    /// Call with the producer lock released; observers may call back in.
    fn notify(observers: &[Arc<dyn ContentObserver>]) {
        for observer in observers {
            observer.on_change(false);
        }
    }

    /// Fill a new owner window that contains `required`.
    fn fill_window(&self, state: &mut ProducerState<S>, required: i64, count: i64) -> Result<CursorWindow> {
        let start = (required - state.last_window_rows / 3).max(0);
        let window = self.fill_from(state, start, count)?;
        if required >= count || window.contains(required) {
            return Ok(window);
        }
        if start < required {
            let window = self.fill_from(state, required, count)?;
            if window.contains(required) {
                return Ok(window);
            }
        }
        Err(CursorError::RowTooBig {
            position: required,
            capacity: self.config.window.capacity_bytes,
        })
    }

    fn fill_from(&self, state: &mut ProducerState<S>, start: i64, count: i64) -> Result<CursorWindow> {
        let mut window = CursorWindow::new(&self.config.window, state.generation);
        window.set_start_position(start)?;
        if !window.set_num_columns(state.columns.len())? {
            return Err(CursorError::internal("result has no columns"));
        }
        let mut position = start;
        'rows: while position < count {
            if !window.alloc_row()? {
                break;
            }
            let row = window.num_rows()? - 1;
            for (column, cell) in state.source.row(position)?.into_iter().enumerate() {
                if column >= state.columns.len() {
                    break;
                }
                if !window.put_cell(cell, row, column)? {
                    window.free_last_row()?;
                    break 'rows;
                }
            }
            position += 1;
        }
        let rows = position - start;
        if rows > 0 {
            state.last_window_rows = rows;
        }
        debug!(
            start,
            rows,
            generation = state.generation.get(),
            used_bytes = window.used_bytes()?,
            "window filled"
        );
        Ok(window)
    }

    fn cache(&self, state: &mut ProducerState<S>, window: CursorWindow) {
        state.windows.push_back(window);
        while state.windows.len() > self.config.max_cached_windows {
            if let Some(evicted) = state.windows.pop_front() {
                debug!(
                    start = evicted.start_position().unwrap_or(-1),
                    "window evicted from cache"
                );
            }
        }
    }

    /// Re-execute after a successful mutation; returns the observers to
    /// notify once the lock is dropped.
    fn after_mutation(state: &mut ProducerState<S>) -> Result<Vec<Arc<dyn ContentObserver>>> {
        Self::execute(state)?;
        Ok(state.observers.clone())
    }
}

impl<S: RowSource> BulkCursor for MaterializedProducer<S> {
    fn get_window(&self, start_position: i64) -> Result<CursorWindow> {
        let mut state = self.open_state()?;
        let count = Self::ensure_executed(&mut state)?;
        if start_position < 0 {
            return Err(CursorError::IndexOutOfRange {
                index: start_position,
                size: count,
            });
        }
        let generation = state.generation;
        if let Some(hit) = state
            .windows
            .iter()
            .find(|w| w.generation() == generation && w.contains(start_position))
        {
            return hit.share();
        }
        let window = self.fill_window(&mut state, start_position, count)?;
        let view = window.share()?;
        self.cache(&mut state, window);
        Ok(view)
    }

    fn on_move(&self, position: i64) -> Result<()> {
        let mut state = self.open_state()?;
        let low = position.saturating_sub(self.config.look_around_rows);
        let high = position.saturating_add(self.config.look_around_rows);
        state.windows.retain(|w| {
            let keep = match (w.start_position(), w.end_position()) {
                (Ok(start), Ok(end)) => start <= high && end > low,
                _ => false,
            };
            if !keep {
                debug!(position, "dropping window outside look-around range");
            }
            keep
        });
        Ok(())
    }

    fn count(&self) -> Result<i64> {
        let mut state = self.open_state()?;
        Self::ensure_executed(&mut state)
    }

    fn column_names(&self) -> Result<Vec<String>> {
        Ok(self.open_state()?.columns.clone())
    }

    fn update_rows(&self, updates: &RowUpdates) -> Result<bool> {
        let observers = {
            let mut state = self.open_state()?;
            Self::ensure_executed(&mut state)?;
            if !state.source.update_rows(updates)? {
                return Ok(false);
            }
            Self::after_mutation(&mut state)?
        };
        Self::notify(&observers);
        Ok(true)
    }

    fn delete_row(&self, position: i64) -> Result<bool> {
        let observers = {
            let mut state = self.open_state()?;
            Self::ensure_executed(&mut state)?;
            if !state.source.delete_row(position)? {
                return Ok(false);
            }
            Self::after_mutation(&mut state)?
        };
        Self::notify(&observers);
        Ok(true)
    }

    fn deactivate(&self) -> Result<()> {
        let mut state = self.open_state()?;
        Self::revoke_windows(&mut state);
        state.count = None;
        debug!("producer deactivated");
        Ok(())
    }

    fn requery(&self, observer: Option<Arc<dyn ContentObserver>>) -> Result<i64> {
        let mut state = self.open_state()?;
        if let Some(observer) = observer {
            if !state.observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
                state.observers.push(observer);
            }
        }
        let count = Self::execute(&mut state)?;
        info!(
            count,
            generation = state.generation.get(),
            "producer requeried"
        );
        Ok(count)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            warn!("producer closed twice");
            return Ok(());
        }
        Self::revoke_windows(&mut state);
        state.observers.clear();
        state.count = None;
        state.closed = true;
        info!("producer closed");
        Ok(())
    }

    fn wants_all_on_move_calls(&self) -> Result<bool> {
        self.open_state()?;
        Ok(self.config.wants_all_on_move_calls)
    }

    fn extras(&self) -> Result<Bundle> {
        Ok(self.open_state()?.extras.clone())
    }

    fn respond(&self, extras: &Bundle) -> Result<Bundle> {
        let mut state = self.open_state()?;
        let count = Self::ensure_executed(&mut state)?;
        Ok(extras.clone().with("count", count))
    }

    fn generation(&self) -> Generation {
        self.state.lock().generation
    }
}
