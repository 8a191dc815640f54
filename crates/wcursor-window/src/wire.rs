//! Self-describing byte form of a window.
//!
//! ```text
//!   "CWIN" | version_be:u16 | start:i64_le | generation:u64_le
//!          | columns:u32_le | rows:u32_le | cells...
//!
//!   cell  = tag:u8 [payload]
//!           NULL     -> nothing
//!           INTEGER  -> i64_le
//!           FLOAT    -> f64 bits as u64_le
//!           TEXT     -> len:u32_le utf8 bytes
//!           BLOB     -> len:u32_le bytes
//! ```
//!
//! Cells are laid out row-major. Decoding yields a frozen read-only view.

use wcursor_error::{CursorError, Result};
use wcursor_types::Cell;
use wcursor_types::Generation;
use wcursor_types::TypeTag;
use wcursor_types::encoding::{
    WireReader, append_i64_le, append_u16_be, append_u32_le, append_u64_le,
};

use crate::CursorWindow;

/// Leading magic of an encoded window.
pub const WINDOW_MAGIC: [u8; 4] = *b"CWIN";

/// Current window encoding version.
pub const WINDOW_WIRE_VERSION: u16 = 1;

/// Serialize every row of `window`.
pub fn encode_window(window: &CursorWindow) -> Result<Vec<u8>> {
    let (start, columns, rows) = window.snapshot()?;
    let mut buf = Vec::with_capacity(30 + window.used_bytes()?);
    buf.extend_from_slice(&WINDOW_MAGIC);
    append_u16_be(&mut buf, WINDOW_WIRE_VERSION);
    append_i64_le(&mut buf, start);
    append_u64_le(&mut buf, window.generation().get());
    append_u32_le(&mut buf, wire_len(columns)?);
    append_u32_le(&mut buf, wire_len(rows.len())?);
    for row in &rows {
        for cell in row {
            encode_cell(&mut buf, cell.as_ref().unwrap_or(&Cell::Null))?;
        }
    }
    Ok(buf)
}

fn encode_cell(buf: &mut Vec<u8>, cell: &Cell) -> Result<()> {
    buf.push(cell.tag() as u8);
    match cell {
        Cell::Null => {}
        Cell::Integer(i) => append_i64_le(buf, *i),
        Cell::Float(f) => append_u64_le(buf, f.to_bits()),
        Cell::Text(s) => {
            append_u32_le(buf, wire_len(s.len())?);
            buf.extend_from_slice(s.as_bytes());
        }
        Cell::Blob(b) => {
            append_u32_le(buf, wire_len(b.len())?);
            buf.extend_from_slice(b);
        }
    }
    Ok(())
}

fn wire_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| CursorError::protocol(format!("length {len} exceeds u32")))
}

fn truncated(what: &str) -> CursorError {
    CursorError::protocol(format!("window encoding truncated in {what}"))
}

/// Parse an encoded window into a frozen read-only view.
pub fn decode_window(bytes: &[u8]) -> Result<CursorWindow> {
    let mut r = WireReader::new(bytes);
    let magic = r.take(4).ok_or_else(|| truncated("magic"))?;
    if magic != WINDOW_MAGIC {
        return Err(CursorError::protocol("bad window magic"));
    }
    let version = r.u16_be().ok_or_else(|| truncated("version"))?;
    if version != WINDOW_WIRE_VERSION {
        return Err(CursorError::protocol(format!(
            "unsupported window version {version}"
        )));
    }
    let start = r.i64_le().ok_or_else(|| truncated("start position"))?;
    let generation = Generation::new(r.u64_le().ok_or_else(|| truncated("generation"))?);
    let columns = r.u32_le().ok_or_else(|| truncated("column count"))? as usize;
    let row_count = r.u32_le().ok_or_else(|| truncated("row count"))? as usize;
    if row_count > 0 && columns == 0 {
        return Err(CursorError::protocol("rows present without columns"));
    }

    // Each cell needs at least its tag byte.
    let cells = columns
        .checked_mul(row_count)
        .filter(|&n| n <= r.remaining())
        .ok_or_else(|| truncated("cells"))?;
    let mut rows = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let mut row = Vec::with_capacity(columns);
        for _ in 0..columns {
            row.push(Some(decode_cell(&mut r)?));
        }
        rows.push(row);
    }
    debug_assert_eq!(rows.len() * columns, cells);
    if r.remaining() != 0 {
        return Err(CursorError::protocol(format!(
            "{} trailing bytes after window",
            r.remaining()
        )));
    }
    Ok(CursorWindow::from_parts(generation, start, columns, rows))
}

fn decode_cell(r: &mut WireReader<'_>) -> Result<Cell> {
    let raw = r.u8().ok_or_else(|| truncated("cell tag"))?;
    let tag = TypeTag::from_u8(raw)
        .ok_or_else(|| CursorError::protocol(format!("unknown cell tag {raw}")))?;
    Ok(match tag {
        TypeTag::Null => Cell::Null,
        TypeTag::Integer => Cell::Integer(r.i64_le().ok_or_else(|| truncated("integer"))?),
        TypeTag::Float => Cell::Float(f64::from_bits(
            r.u64_le().ok_or_else(|| truncated("float"))?,
        )),
        TypeTag::Text => {
            let bytes = r.len_prefixed().ok_or_else(|| truncated("text"))?;
            let text = std::str::from_utf8(bytes)
                .map_err(|e| CursorError::protocol(format!("text cell is not utf-8: {e}")))?;
            Cell::Text(text.to_owned())
        }
        TypeTag::Blob => Cell::Blob(r.len_prefixed().ok_or_else(|| truncated("blob"))?.to_vec()),
    })
}
