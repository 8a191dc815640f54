use std::fmt;

use crate::TypeTag;
use crate::coerce::format_float;

/// A single typed entry of a window, addressed by (row, column).
///
/// The tag is decided by how the cell was populated, never by a schema, so a
/// column may hold different tags on different rows.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Cell {
    /// SQL NULL.
    Null,
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit IEEE 754 floating-point number.
    Float(f64),
    /// A UTF-8 text string.
    Text(String),
    /// A binary large object.
    Blob(Vec<u8>),
}

impl Cell {
    /// Returns the type tag of this cell.
    pub const fn tag(&self) -> TypeTag {
        match self {
            Self::Null => TypeTag::Null,
            Self::Integer(_) => TypeTag::Integer,
            Self::Float(_) => TypeTag::Float,
            Self::Text(_) => TypeTag::Text,
            Self::Blob(_) => TypeTag::Blob,
        }
    }

    /// Returns true if this is a NULL cell.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to extract an integer value without coercion.
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to extract a float value without coercion.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to extract a text reference without coercion.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to extract a blob reference without coercion.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Number of variable-length payload bytes this cell stores.
    ///
    /// Fixed-width cells (NULL, integers, floats) live entirely in their
    /// slot and report zero.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Null | Self::Integer(_) | Self::Float(_) => 0,
            Self::Text(s) => s.len(),
            Self::Blob(b) => b.len(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Blob(b) => {
                f.write_str("X'")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                f.write_str("'")
            }
        }
    }
}

impl From<i64> for Cell {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Cell {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Cell {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Cell {
    fn from(b: Vec<u8>) -> Self {
        Self::Blob(b)
    }
}

impl From<&[u8]> for Cell {
    fn from(b: &[u8]) -> Self {
        Self::Blob(b.to_vec())
    }
}

impl<T: Into<Self>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_population() {
        assert_eq!(Cell::Null.tag(), TypeTag::Null);
        assert_eq!(Cell::from(7_i64).tag(), TypeTag::Integer);
        assert_eq!(Cell::from(1.5).tag(), TypeTag::Float);
        assert_eq!(Cell::from("x").tag(), TypeTag::Text);
        assert_eq!(Cell::from(vec![1_u8]).tag(), TypeTag::Blob);
        assert_eq!(Cell::from(None::<i64>).tag(), TypeTag::Null);
        assert_eq!(Cell::from(Some("y")).tag(), TypeTag::Text);
    }

    #[test]
    fn payload_len_counts_only_variable_data() {
        assert_eq!(Cell::Null.payload_len(), 0);
        assert_eq!(Cell::Integer(i64::MAX).payload_len(), 0);
        assert_eq!(Cell::Float(1.0).payload_len(), 0);
        assert_eq!(Cell::from("héllo").payload_len(), 6);
        assert_eq!(Cell::from(vec![0_u8; 100]).payload_len(), 100);
    }

    #[test]
    fn display_renders_sql_literals() {
        assert_eq!(Cell::Null.to_string(), "NULL");
        assert_eq!(Cell::Integer(-3).to_string(), "-3");
        assert_eq!(Cell::Float(42.09).to_string(), "42.09");
        assert_eq!(Cell::from("abc").to_string(), "'abc'");
        assert_eq!(Cell::from(vec![0xCA_u8, 0xFE]).to_string(), "X'CAFE'");
    }

    #[test]
    fn accessors_do_not_coerce() {
        let v = Cell::Integer(5);
        assert_eq!(v.as_integer(), Some(5));
        assert_eq!(v.as_float(), None);
        assert_eq!(v.as_text(), None);
        assert_eq!(v.as_blob(), None);
        assert!(!v.is_null());
    }
}
