pub mod cell;
pub mod coerce;
pub mod encoding;

pub use cell::Cell;
pub use coerce::{Coercion, ReadKind, coercion, format_float};

use std::fmt;

/// The tag of a [`Cell`].
///
/// The discriminants are the field-type codes existing cursor consumers
/// compare against and are part of the window wire format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum TypeTag {
    Null = 0,
    Integer = 1,
    Float = 2,
    Text = 3,
    Blob = 4,
}

impl TypeTag {
    /// All tags, in discriminant order.
    pub const ALL: [Self; 5] = [
        Self::Null,
        Self::Integer,
        Self::Float,
        Self::Text,
        Self::Blob,
    ];

    /// Parse a field-type code; `None` for unknown codes.
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Null),
            1 => Some(Self::Integer),
            2 => Some(Self::Float),
            3 => Some(Self::Text),
            4 => Some(Self::Blob),
            _ => None,
        }
    }

    /// Lowercase name, matching SQLite's `typeof()` spelling for the
    /// storage classes (`"real"` is reported as `"float"`).
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Blob => "blob",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies which execution of a result set a window was materialized from.
///
/// Producers advance their generation on every requery; a cursor treats any
/// window older than the newest generation it has observed as stale.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Generation(u64);

impl Generation {
    /// The generation of a result set's first execution.
    pub const FIRST: Self = Self(1);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The generation following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

/// Reusable destination for `copy_string_to_buffer`.
///
/// Copies clear and refill the same allocation, so a consumer scanning many
/// rows does not allocate per cell once the buffer has grown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharBuffer {
    data: String,
    size_copied: usize,
}

impl CharBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: String::with_capacity(capacity),
            size_copied: 0,
        }
    }

    /// Replace the contents with `text`, reusing the allocation.
    pub fn copy_from(&mut self, text: &str) {
        self.data.clear();
        self.data.push_str(text);
        self.size_copied = text.chars().count();
    }

    /// Empty the buffer; a zero-length copy.
    pub fn clear(&mut self) {
        self.data.clear();
        self.size_copied = 0;
    }

    /// Characters copied by the last copy.
    pub const fn size_copied(&self) -> usize {
        self.size_copied
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}
