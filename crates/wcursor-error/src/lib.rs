use thiserror::Error;

/// Primary error type for windowed cursor operations.
///
/// Out-of-range access and stale-window access are deliberately separate
/// variants: the first is a caller defect, the second means the bound window
/// no longer matches the current execution of the result set and must be
/// re-fetched. Window capacity exhaustion is not represented here; it is an
/// ordinary `Ok(false)` from the population calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CursorError {
    // === Position Errors ===
    /// A row index or cursor position is outside its declared bounds.
    #[error("index {index} requested, with a size of {size}")]
    IndexOutOfRange { index: i64, size: i64 },

    /// A column index is outside the declared column count.
    #[error("column {column} out of range: window has {columns} columns")]
    ColumnOutOfRange { column: usize, columns: usize },

    /// An out-of-range report from a remote producer whose message did not
    /// carry the index and size.
    #[error("out of range: {detail}")]
    RemoteOutOfRange { detail: String },

    /// No column with the given name exists in the result.
    #[error("no such column: {name}")]
    NoSuchColumn { name: String },

    // === Staleness ===
    /// The bound window is missing, closed, or older than the current
    /// generation of the result set.
    #[error("stale data: {detail}")]
    StaleData { detail: String },

    // === Producer / Boundary Errors ===
    /// The remote row producer cannot be reached or has been closed.
    #[error("row producer unavailable: {detail}")]
    ProducerUnavailable { detail: String },

    /// A frame or window payload on the wire is malformed.
    #[error("protocol error: {detail}")]
    Protocol { detail: String },

    /// The producer does not implement an optional operation.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    // === Lifecycle Errors ===
    /// Use of a cursor, window or producer after `close()`.
    #[error("attempt to use {what} after it was closed")]
    Closed { what: &'static str },

    /// Population or hand-off rules violated (frozen window, undeclared
    /// columns, write through a read-only view).
    #[error("illegal state: {detail}")]
    IllegalState { detail: String },

    // === Type Errors ===
    /// The stored cell cannot be read as the requested type.
    #[error("type mismatch: cannot read {actual} as {expected}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Text could not be parsed as the requested numeric type.
    #[error("cannot convert '{text}' to {target}")]
    ConversionFailed { text: String, target: &'static str },

    // === Limits ===
    /// A single row does not fit in an empty window.
    #[error("row at position {position} does not fit in a window of {capacity} bytes")]
    RowTooBig { position: i64, capacity: usize },

    /// A remote row-too-big report whose message did not carry the fields.
    #[error("row too big: {detail}")]
    RemoteRowTooBig { detail: String },

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Numeric error codes carried in error reply frames.
///
/// Values are part of the wire format and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Index or column out of range.
    OutOfRange = 1,
    /// Unknown column name.
    NoSuchColumn = 2,
    /// Stale window.
    Stale = 3,
    /// Producer unavailable.
    Unavailable = 4,
    /// Malformed wire data.
    Protocol = 5,
    /// Optional operation not implemented.
    Unsupported = 6,
    /// Use after close.
    Closed = 7,
    /// Illegal population/hand-off state.
    IllegalState = 8,
    /// Type mismatch or failed conversion.
    Mismatch = 9,
    /// Row larger than a whole window.
    TooBig = 10,
    /// Internal logic error.
    Internal = 11,
}

impl ErrorCode {
    /// Parse a wire value; unknown values map to `Internal`.
    #[must_use]
    pub const fn from_u32(v: u32) -> Self {
        match v {
            1 => Self::OutOfRange,
            2 => Self::NoSuchColumn,
            3 => Self::Stale,
            4 => Self::Unavailable,
            5 => Self::Protocol,
            6 => Self::Unsupported,
            7 => Self::Closed,
            8 => Self::IllegalState,
            9 => Self::Mismatch,
            10 => Self::TooBig,
            _ => Self::Internal,
        }
    }
}

impl CursorError {
    /// Map this error to its wire code.
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::IndexOutOfRange { .. }
            | Self::ColumnOutOfRange { .. }
            | Self::RemoteOutOfRange { .. } => ErrorCode::OutOfRange,
            Self::NoSuchColumn { .. } => ErrorCode::NoSuchColumn,
            Self::StaleData { .. } => ErrorCode::Stale,
            Self::ProducerUnavailable { .. } => ErrorCode::Unavailable,
            Self::Protocol { .. } => ErrorCode::Protocol,
            Self::Unsupported { .. } => ErrorCode::Unsupported,
            Self::Closed { .. } => ErrorCode::Closed,
            Self::IllegalState { .. } => ErrorCode::IllegalState,
            Self::TypeMismatch { .. } | Self::ConversionFailed { .. } => ErrorCode::Mismatch,
            Self::RowTooBig { .. } | Self::RemoteRowTooBig { .. } => ErrorCode::TooBig,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Rebuild an error received in a reply frame.
    ///
    /// Structured fields do not travel over the wire. Range and size errors
    /// are recovered from their display text when it has the local shape;
    /// otherwise the reconstructed error keeps the kind and carries the
    /// remote message as its detail.
    pub fn from_remote(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::OutOfRange => parse_index_out_of_range(&message)
                .or_else(|| parse_column_out_of_range(&message))
                .unwrap_or(Self::RemoteOutOfRange { detail: message }),
            ErrorCode::NoSuchColumn => Self::NoSuchColumn { name: message },
            ErrorCode::Stale => Self::StaleData { detail: message },
            ErrorCode::Unavailable | ErrorCode::Closed => {
                Self::ProducerUnavailable { detail: message }
            }
            ErrorCode::Protocol => Self::Protocol { detail: message },
            ErrorCode::Unsupported => Self::Unsupported { operation: message },
            ErrorCode::IllegalState => Self::IllegalState { detail: message },
            ErrorCode::Mismatch => Self::ConversionFailed {
                text: message,
                target: "remote value",
            },
            ErrorCode::TooBig => {
                parse_row_too_big(&message).unwrap_or(Self::RemoteRowTooBig { detail: message })
            }
            ErrorCode::Internal => Self::Internal(message),
        }
    }

    /// Whether the condition is fixed by fetching a fresh window.
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleData { .. })
    }

    /// Whether this is a caller addressing defect (never retried).
    pub const fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            Self::IndexOutOfRange { .. }
                | Self::ColumnOutOfRange { .. }
                | Self::RemoteOutOfRange { .. }
        )
    }

    /// Whether the failure means the producer side of the boundary is gone.
    ///
    /// Cursors bound to a producer become inert after such a failure.
    pub const fn is_producer_failure(&self) -> bool {
        matches!(
            self,
            Self::ProducerUnavailable { .. } | Self::Protocol { .. }
        )
    }

    /// Create a stale-data error.
    pub fn stale(detail: impl Into<String>) -> Self {
        Self::StaleData {
            detail: detail.into(),
        }
    }

    /// Create a producer-unavailable error.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::ProducerUnavailable {
            detail: detail.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol {
            detail: detail.into(),
        }
    }

    /// Create an illegal-state error.
    pub fn illegal_state(detail: impl Into<String>) -> Self {
        Self::IllegalState {
            detail: detail.into(),
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

// ---------------------------------------------------------------------------
// Remote message parsing
// ---------------------------------------------------------------------------

/// `index {index} requested, with a size of {size}`
fn parse_index_out_of_range(message: &str) -> Option<CursorError> {
    let (index, size) = message
        .strip_prefix("index ")?
        .split_once(" requested, with a size of ")?;
    Some(CursorError::IndexOutOfRange {
        index: index.parse().ok()?,
        size: size.parse().ok()?,
    })
}

/// `column {column} out of range: window has {columns} columns`
fn parse_column_out_of_range(message: &str) -> Option<CursorError> {
    let (column, rest) = message
        .strip_prefix("column ")?
        .split_once(" out of range: window has ")?;
    Some(CursorError::ColumnOutOfRange {
        column: column.parse().ok()?,
        columns: rest.strip_suffix(" columns")?.parse().ok()?,
    })
}

/// `row at position {position} does not fit in a window of {capacity} bytes`
fn parse_row_too_big(message: &str) -> Option<CursorError> {
    let (position, rest) = message
        .strip_prefix("row at position ")?
        .split_once(" does not fit in a window of ")?;
    Some(CursorError::RowTooBig {
        position: position.parse().ok()?,
        capacity: rest.strip_suffix(" bytes")?.parse().ok()?,
    })
}

/// Result type alias using `CursorError`.
pub type Result<T> = std::result::Result<T, CursorError>;
