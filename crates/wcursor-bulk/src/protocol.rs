//! The bulk cursor contract between a row producer and a consumer.
//!
//! [`BulkCursor`] is implemented in process by
//! [`MaterializedProducer`](crate::MaterializedProducer) and across a byte
//! channel by [`BulkCursorProxy`](crate::BulkCursorProxy). Every method is a
//! single blocking round trip; implementations serialize calls internally.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use wcursor_error::{CursorError, Result};
use wcursor_types::{Cell, Generation};
use wcursor_window::CursorWindow;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

/// First opcode value; every later operation increments by one.
pub const FIRST_CALL_TRANSACTION: u16 = 1;

/// Wire method table.
///
/// The numbering matches the deployed producer interface and must not be
/// reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkOpcode {
    GetWindow,
    Count,
    GetColumnNames,
    UpdateRows,
    DeleteRow,
    Deactivate,
    Requery,
    OnMove,
    WantsAllOnMoveCalls,
    GetExtras,
    Respond,
    Close,
}

impl BulkOpcode {
    pub const ALL: [Self; 12] = [
        Self::GetWindow,
        Self::Count,
        Self::GetColumnNames,
        Self::UpdateRows,
        Self::DeleteRow,
        Self::Deactivate,
        Self::Requery,
        Self::OnMove,
        Self::WantsAllOnMoveCalls,
        Self::GetExtras,
        Self::Respond,
        Self::Close,
    ];

    /// Wire discriminant value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        FIRST_CALL_TRANSACTION
            + match self {
                Self::GetWindow => 0,
                Self::Count => 1,
                Self::GetColumnNames => 2,
                Self::UpdateRows => 3,
                Self::DeleteRow => 4,
                Self::Deactivate => 5,
                Self::Requery => 6,
                Self::OnMove => 7,
                Self::WantsAllOnMoveCalls => 8,
                Self::GetExtras => 9,
                Self::Respond => 10,
                Self::Close => 11,
            }
    }

    /// Parse wire discriminant; `None` for unknown opcodes.
    #[must_use]
    pub const fn from_u16(v: u16) -> Option<Self> {
        if v < FIRST_CALL_TRANSACTION {
            return None;
        }
        let idx = (v - FIRST_CALL_TRANSACTION) as usize;
        if idx < Self::ALL.len() {
            Some(Self::ALL[idx])
        } else {
            None
        }
    }
}

impl fmt::Display for BulkOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::GetWindow => "GET_WINDOW",
            Self::Count => "COUNT",
            Self::GetColumnNames => "GET_COLUMN_NAMES",
            Self::UpdateRows => "UPDATE_ROWS",
            Self::DeleteRow => "DELETE_ROW",
            Self::Deactivate => "DEACTIVATE",
            Self::Requery => "REQUERY",
            Self::OnMove => "ON_MOVE",
            Self::WantsAllOnMoveCalls => "WANTS_ALL_ON_MOVE_CALLS",
            Self::GetExtras => "GET_EXTRAS",
            Self::Respond => "RESPOND",
            Self::Close => "CLOSE",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// Row changes keyed by row id, each a map of column name to new value.
pub type RowUpdates = BTreeMap<i64, BTreeMap<String, Cell>>;

/// Opaque out-of-band metadata exchanged through `extras`/`respond`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Bundle(serde_json::Map<String, serde_json::Value>);

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`Bundle::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CursorError::protocol(format!("bundle encode: {e}")))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CursorError::protocol(format!("bundle decode: {e}")))
    }
}

/// Receives a notification when the producer's data changes.
pub trait ContentObserver: Send + Sync {
    /// `self_change` is true when the change came through the observing
    /// cursor itself.
    fn on_change(&self, self_change: bool);
}

// ---------------------------------------------------------------------------
// BulkCursor
// ---------------------------------------------------------------------------

/// A row producer serving windows to a remote or local consumer.
pub trait BulkCursor: Send + Sync {
    /// A window containing `start_position` when it is below `count()`.
    ///
    /// The producer picks the window's actual start, which may precede the
    /// requested position.
    fn get_window(&self, start_position: i64) -> Result<CursorWindow>;

    /// Advisory position notice; lets the producer drop distant windows.
    fn on_move(&self, position: i64) -> Result<()>;

    /// Total rows. The first call may execute the query to completion.
    fn count(&self) -> Result<i64>;

    /// Column names, fixed for one execution.
    fn column_names(&self) -> Result<Vec<String>>;

    /// Apply row changes. `Ok(false)` or `Unsupported` on read-only sources.
    fn update_rows(&self, updates: &RowUpdates) -> Result<bool>;

    /// Delete the row at `position`. `Ok(false)` or `Unsupported` on
    /// read-only sources.
    fn delete_row(&self, position: i64) -> Result<bool>;

    /// Release execution resources; the next access re-executes.
    fn deactivate(&self) -> Result<()>;

    /// Re-execute, revoking every window issued so far. Returns the new
    /// count. `observer`, when given, is registered for change notices.
    fn requery(&self, observer: Option<Arc<dyn ContentObserver>>) -> Result<i64>;

    /// Release everything; every later call fails.
    fn close(&self) -> Result<()>;

    /// Whether the consumer should report every move, not only jumps.
    fn wants_all_on_move_calls(&self) -> Result<bool>;

    fn extras(&self) -> Result<Bundle>;

    fn respond(&self, extras: &Bundle) -> Result<Bundle>;

    /// Newest execution generation this handle knows of; zero before the
    /// first execution. Never a round trip.
    ///
    /// A remote handle learns it from each reply, so a re-execution caused
    /// by another client shows up after the next call.
    fn generation(&self) -> Generation;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_are_stable() {
        let expected = [
            (BulkOpcode::GetWindow, 1),
            (BulkOpcode::Count, 2),
            (BulkOpcode::GetColumnNames, 3),
            (BulkOpcode::UpdateRows, 4),
            (BulkOpcode::DeleteRow, 5),
            (BulkOpcode::Deactivate, 6),
            (BulkOpcode::Requery, 7),
            (BulkOpcode::OnMove, 8),
            (BulkOpcode::WantsAllOnMoveCalls, 9),
            (BulkOpcode::GetExtras, 10),
            (BulkOpcode::Respond, 11),
            (BulkOpcode::Close, 12),
        ];
        for (op, value) in expected {
            assert_eq!(op.to_u16(), value, "{op}");
            assert_eq!(BulkOpcode::from_u16(value), Some(op));
        }
        assert_eq!(BulkOpcode::from_u16(0), None);
        assert_eq!(BulkOpcode::from_u16(13), None);
    }

    #[test]
    fn bundle_json_round_trip() {
        let b = Bundle::new().with("count", 3).with("label", "people");
        assert_eq!(b.len(), 2);
        let bytes = b.to_json().unwrap();
        assert_eq!(Bundle::from_json(&bytes).unwrap(), b);
        assert!(matches!(
            Bundle::from_json(b"[1,2]"),
            Err(CursorError::Protocol { .. })
        ));
    }

    #[test]
    fn row_updates_survive_json() {
        let mut changes = BTreeMap::new();
        changes.insert("name".to_owned(), Cell::from("x"));
        changes.insert("score".to_owned(), Cell::Float(1.5));
        let mut updates = RowUpdates::new();
        updates.insert(-7, changes);
        let json = serde_json::to_vec(&updates).unwrap();
        let back: RowUpdates = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, updates);
    }
}
