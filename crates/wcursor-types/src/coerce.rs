//! Read-side coercion rules for window cells.
//!
//! Every typed reader goes through [`coercion`], a single 5×4 matrix of
//! (stored tag, requested read kind) → [`Coercion`]. Keeping the rules in one
//! table makes the round-trip and NULL-default laws checkable exhaustively.
//!
//! ```text
//!              Integer     Float       Text          Blob
//!   Null       Zero        Zero        Zero          Zero
//!   Integer    Exact       Widen       Format        Reject
//!   Float      Truncate    Exact       Format        Reject
//!   Text       Parse       Parse       Exact         Bytes
//!   Blob       Reject      Reject      Reject        Exact
//! ```

use wcursor_error::{CursorError, Result};

use crate::{Cell, TypeTag};

/// The typed accessor family a caller is reading through.
///
/// `get_short`/`get_int` are narrowing conveniences over `Integer`, and
/// `get_float` over `Float`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadKind {
    Integer,
    Float,
    Text,
    Blob,
}

impl ReadKind {
    /// All read kinds, in matrix column order.
    pub const ALL: [Self; 4] = [Self::Integer, Self::Float, Self::Text, Self::Blob];

    /// Lowercase name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Blob => "blob",
        }
    }
}

/// How a stored cell is turned into the requested read kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coercion {
    /// Same representation; returned as stored.
    Exact,
    /// NULL read as the kind's zero value (`0`, `0.0`, `""`, empty blob).
    Zero,
    /// Integer widened to float.
    Widen,
    /// Float truncated toward zero (saturating) to integer.
    Truncate,
    /// Number rendered canonically as text.
    Format,
    /// Text parsed as a number; fails when unparsable.
    Parse,
    /// Text returned as its UTF-8 bytes.
    Bytes,
    /// Not readable as this kind.
    Reject,
}

/// The coercion matrix.
pub const fn coercion(tag: TypeTag, kind: ReadKind) -> Coercion {
    match (tag, kind) {
        (TypeTag::Null, _) => Coercion::Zero,
        (TypeTag::Integer, ReadKind::Integer)
        | (TypeTag::Float, ReadKind::Float)
        | (TypeTag::Text, ReadKind::Text)
        | (TypeTag::Blob, ReadKind::Blob) => Coercion::Exact,
        (TypeTag::Integer, ReadKind::Float) => Coercion::Widen,
        (TypeTag::Float, ReadKind::Integer) => Coercion::Truncate,
        (TypeTag::Integer | TypeTag::Float, ReadKind::Text) => Coercion::Format,
        (TypeTag::Text, ReadKind::Integer | ReadKind::Float) => Coercion::Parse,
        (TypeTag::Text, ReadKind::Blob) => Coercion::Bytes,
        (TypeTag::Integer | TypeTag::Float, ReadKind::Blob)
        | (TypeTag::Blob, ReadKind::Integer | ReadKind::Float | ReadKind::Text) => {
            Coercion::Reject
        }
    }
}

fn reject(cell: &Cell, kind: ReadKind) -> CursorError {
    CursorError::TypeMismatch {
        expected: kind.name(),
        actual: cell.tag().name(),
    }
}

fn inconsistent(cell: &Cell, kind: ReadKind) -> CursorError {
    CursorError::internal(format!(
        "coercion matrix has no {} rule for {}",
        kind.name(),
        cell.tag().name()
    ))
}

/// Read a cell as a 64-bit integer.
#[allow(clippy::cast_possible_truncation)]
pub fn read_integer(cell: &Cell) -> Result<i64> {
    let kind = ReadKind::Integer;
    match (coercion(cell.tag(), kind), cell) {
        (Coercion::Zero, _) => Ok(0),
        (Coercion::Exact, Cell::Integer(i)) => Ok(*i),
        (Coercion::Truncate, Cell::Float(f)) => Ok(*f as i64),
        (Coercion::Parse, Cell::Text(s)) => parse_integer(s),
        (Coercion::Reject, _) => Err(reject(cell, kind)),
        _ => Err(inconsistent(cell, kind)),
    }
}

/// Read a cell as a 64-bit float.
#[allow(clippy::cast_precision_loss)]
pub fn read_float(cell: &Cell) -> Result<f64> {
    let kind = ReadKind::Float;
    match (coercion(cell.tag(), kind), cell) {
        (Coercion::Zero, _) => Ok(0.0),
        (Coercion::Exact, Cell::Float(f)) => Ok(*f),
        (Coercion::Widen, Cell::Integer(i)) => Ok(*i as f64),
        (Coercion::Parse, Cell::Text(s)) => parse_float(s),
        (Coercion::Reject, _) => Err(reject(cell, kind)),
        _ => Err(inconsistent(cell, kind)),
    }
}

/// Read a cell as text.
pub fn read_text(cell: &Cell) -> Result<String> {
    let kind = ReadKind::Text;
    match (coercion(cell.tag(), kind), cell) {
        (Coercion::Zero, _) => Ok(String::new()),
        (Coercion::Exact, Cell::Text(s)) => Ok(s.clone()),
        (Coercion::Format, Cell::Integer(i)) => Ok(i.to_string()),
        (Coercion::Format, Cell::Float(f)) => Ok(format_float(*f)),
        (Coercion::Reject, _) => Err(reject(cell, kind)),
        _ => Err(inconsistent(cell, kind)),
    }
}

/// Read a cell as a byte sequence.
pub fn read_blob(cell: &Cell) -> Result<Vec<u8>> {
    let kind = ReadKind::Blob;
    match (coercion(cell.tag(), kind), cell) {
        (Coercion::Zero, _) => Ok(Vec::new()),
        (Coercion::Exact, Cell::Blob(b)) => Ok(b.clone()),
        (Coercion::Bytes, Cell::Text(s)) => Ok(s.as_bytes().to_vec()),
        (Coercion::Reject, _) => Err(reject(cell, kind)),
        _ => Err(inconsistent(cell, kind)),
    }
}

/// Parse text as an integer.
///
/// Accepts a plain decimal integer, or a decimal/float literal which is then
/// truncated toward zero. Surrounding whitespace is ignored.
#[allow(clippy::cast_possible_truncation)]
fn parse_integer(s: &str) -> Result<i64> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(i);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(f as i64),
        _ => Err(CursorError::ConversionFailed {
            text: s.to_owned(),
            target: "integer",
        }),
    }
}

fn parse_float(s: &str) -> Result<f64> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| CursorError::ConversionFailed {
            text: s.to_owned(),
            target: "float",
        })
}

/// Render a float the way SQLite does (`printf("%!.15g")`).
///
/// 15 significant digits, scientific notation when the exponent is below -4
/// or at least 15, trailing zeros stripped but one digit always kept after
/// the decimal point (`1.0`, not `1`).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_owned();
    }
    if f.is_infinite() {
        return if f.is_sign_positive() {
            "Inf".to_owned()
        } else {
            "-Inf".to_owned()
        };
    }
    let abs = f.abs();
    if abs == 0.0 {
        return "0.0".to_owned();
    }
    // The exponent is taken after rounding to 15 significant digits, so a
    // value that rounds up to the next power of ten switches form with it.
    let sci = format!("{f:.14e}");
    let Some(e_pos) = sci.find('e') else {
        return sci;
    };
    let exp: i32 = sci[e_pos + 1..].parse().unwrap_or(0);
    if exp >= 15 || exp < -4 {
        let mantissa = keep_one_decimal(sci[..e_pos].trim_end_matches('0'));
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
    } else {
        let decimal_places = (14 - exp).max(0) as usize;
        let s = format!("{f:.decimal_places$}");
        if s.contains('.') {
            keep_one_decimal(s.trim_end_matches('0'))
        } else {
            format!("{s}.0")
        }
    }
}

fn keep_one_decimal(trimmed: &str) -> String {
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_owned()
    }
}
