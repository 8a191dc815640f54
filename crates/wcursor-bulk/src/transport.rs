//! Bulk cursor transport: framing, server stub, client proxy, channels.
//!
//! Length-delimited framing with big-endian header, little-endian payload.
//! One request frame, one reply frame; the reply echoes the request's
//! opcode and id and opens with a status byte. OK replies then carry the
//! producer's current generation, which is how a remote consumer learns
//! that another client re-executed the result.
//!
//! ```text
//!   BulkCursorProxy ──Channel──► BulkCursorStub ──► Arc<dyn BulkCursor>
//!     (client)        loopback      (server)
//!                     or stream
//! ```

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};
use wcursor_error::{CursorError, ErrorCode, Result};
use wcursor_types::encoding::{
    WireReader, append_i64_le, append_u16_be, append_u32_be, append_u32_le, append_u64_be,
    append_u64_le, read_u16_be, read_u32_be, read_u64_be,
};
use wcursor_types::Generation;
use wcursor_window::{CursorWindow, decode_window, encode_window};

use crate::protocol::{Bundle, BulkCursor, BulkOpcode, ContentObserver, RowUpdates};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Minimum `len_be` value: version(2) + opcode(2) + request_id(8) = 12.
pub const FRAME_MIN_LEN_BE: u32 = 12;

/// Default maximum `len_be` value: 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Wire protocol version (must be 1).
pub const PROTOCOL_VERSION: u16 = 1;

/// Frame header size on wire: `len_be`(4) + `version_be`(2) + `opcode_be`(2) + `request_id`(8).
const FRAME_HEADER_WIRE_BYTES: usize = 16;

const STATUS_OK: u8 = 0;
const STATUS_ERR: u8 = 1;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Transport limits shared by both ends of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest accepted `len_be`.
    ///
    /// Default: 16 MiB. Must cover the largest encoded window.
    pub max_frame_len: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl TransportConfig {
    /// Validate and clamp configuration values.
    #[must_use]
    pub const fn validated(mut self) -> Self {
        if self.max_frame_len < FRAME_MIN_LEN_BE {
            self.max_frame_len = FRAME_MIN_LEN_BE;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// FrameError
// ---------------------------------------------------------------------------

/// Errors from frame decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Input buffer shorter than frame header.
    #[error("frame buffer too short for header")]
    TooShort,
    /// `len_be` below minimum (12).
    #[error("len_be {0} below minimum {FRAME_MIN_LEN_BE}")]
    LenTooSmall(u32),
    /// `len_be` exceeds the configured cap.
    #[error("len_be {len} exceeds cap {max}")]
    LenTooLarge { len: u32, max: u32 },
    /// Unsupported protocol version.
    #[error("unknown protocol version {0}")]
    UnknownVersion(u16),
    /// Unrecognised opcode.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    /// Buffer does not contain full payload indicated by `len_be`.
    #[error("payload truncated: expected {expected} bytes, got {actual}")]
    PayloadTruncated { expected: u32, actual: usize },
}

impl From<FrameError> for CursorError {
    fn from(e: FrameError) -> Self {
        Self::protocol(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A decoded wire frame.
///
/// On-wire layout (big-endian header):
/// ```text
/// [len_be:u32][version_be:u16][opcode_be:u16][request_id:u64_be][payload...]
/// ```
/// `len_be` = 12 + payload.len().
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: BulkOpcode,
    pub request_id: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Encode this frame to wire bytes.
    ///
    /// # Errors
    /// [`FrameError::LenTooLarge`] when the payload exceeds the cap.
    pub fn encode(&self, config: &TransportConfig) -> std::result::Result<Vec<u8>, FrameError> {
        let payload_len = self.payload.len();
        let len_be = u32::try_from(payload_len)
            .ok()
            .and_then(|n| n.checked_add(FRAME_MIN_LEN_BE))
            .unwrap_or(u32::MAX);
        if len_be > config.max_frame_len {
            return Err(FrameError::LenTooLarge {
                len: len_be,
                max: config.max_frame_len,
            });
        }
        let mut buf = Vec::with_capacity(FRAME_HEADER_WIRE_BYTES + payload_len);
        append_u32_be(&mut buf, len_be);
        append_u16_be(&mut buf, PROTOCOL_VERSION);
        append_u16_be(&mut buf, self.opcode.to_u16());
        append_u64_be(&mut buf, self.request_id);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode a frame from wire bytes.
    ///
    /// # Errors
    /// Returns [`FrameError`] if the buffer is malformed.
    pub fn decode(buf: &[u8], config: &TransportConfig) -> std::result::Result<Self, FrameError> {
        if buf.len() < FRAME_HEADER_WIRE_BYTES {
            return Err(FrameError::TooShort);
        }
        let len_be = read_u32_be(&buf[0..4]).ok_or(FrameError::TooShort)?;
        if len_be < FRAME_MIN_LEN_BE {
            return Err(FrameError::LenTooSmall(len_be));
        }
        if len_be > config.max_frame_len {
            return Err(FrameError::LenTooLarge {
                len: len_be,
                max: config.max_frame_len,
            });
        }
        let version = read_u16_be(&buf[4..6]).ok_or(FrameError::TooShort)?;
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnknownVersion(version));
        }
        let opcode_raw = read_u16_be(&buf[6..8]).ok_or(FrameError::TooShort)?;
        let opcode =
            BulkOpcode::from_u16(opcode_raw).ok_or(FrameError::UnknownOpcode(opcode_raw))?;
        let request_id = read_u64_be(&buf[8..16]).ok_or(FrameError::TooShort)?;

        let payload_len = (len_be - FRAME_MIN_LEN_BE) as usize;
        let remaining = &buf[FRAME_HEADER_WIRE_BYTES..];
        if remaining.len() < payload_len {
            return Err(FrameError::PayloadTruncated {
                expected: len_be - FRAME_MIN_LEN_BE,
                actual: remaining.len(),
            });
        }
        Ok(Self {
            opcode,
            request_id,
            payload: remaining[..payload_len].to_vec(),
        })
    }
}

/// Read one whole frame (header included) from `reader`.
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
pub fn read_frame<R: Read>(reader: &mut R, config: &TransportConfig) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0_u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_unavailable(&e)),
    }
    let len_be = u32::from_be_bytes(len_buf);
    if len_be < FRAME_MIN_LEN_BE {
        return Err(FrameError::LenTooSmall(len_be).into());
    }
    if len_be > config.max_frame_len {
        return Err(FrameError::LenTooLarge {
            len: len_be,
            max: config.max_frame_len,
        }
        .into());
    }
    let mut frame = Vec::with_capacity(4 + len_be as usize);
    frame.extend_from_slice(&len_buf);
    frame.resize(4 + len_be as usize, 0);
    reader
        .read_exact(&mut frame[4..])
        .map_err(|e| io_unavailable(&e))?;
    Ok(Some(frame))
}

fn io_unavailable(e: &io::Error) -> CursorError {
    CursorError::unavailable(format!("channel i/o: {e}"))
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

fn encode_i64(v: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    append_i64_le(&mut buf, v);
    buf
}

fn decode_i64(payload: &[u8]) -> Result<i64> {
    let mut r = WireReader::new(payload);
    let v = r
        .i64_le()
        .ok_or_else(|| CursorError::protocol("expected i64 payload"))?;
    expect_end(&r)?;
    Ok(v)
}

fn decode_bool(payload: &[u8]) -> Result<bool> {
    match payload {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(CursorError::protocol("expected bool payload")),
    }
}

fn expect_end(r: &WireReader<'_>) -> Result<()> {
    if r.remaining() == 0 {
        Ok(())
    } else {
        Err(CursorError::protocol(format!(
            "{} trailing payload bytes",
            r.remaining()
        )))
    }
}

fn wire_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| CursorError::protocol(format!("length {len} exceeds u32")))
}

fn encode_names(names: &[String]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    append_u32_le(&mut buf, wire_u32(names.len())?);
    for name in names {
        append_u32_le(&mut buf, wire_u32(name.len())?);
        buf.extend_from_slice(name.as_bytes());
    }
    Ok(buf)
}

fn decode_names(payload: &[u8]) -> Result<Vec<String>> {
    let truncated = || CursorError::protocol("column names truncated");
    let mut r = WireReader::new(payload);
    let n = r.u32_le().ok_or_else(truncated)? as usize;
    let mut names = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        let bytes = r.len_prefixed().ok_or_else(truncated)?;
        let name = std::str::from_utf8(bytes)
            .map_err(|e| CursorError::protocol(format!("column name is not utf-8: {e}")))?;
        names.push(name.to_owned());
    }
    expect_end(&r)?;
    Ok(names)
}

/// OK: `[0][generation u64_le][body]`. Error: see [`encode_error`].
fn encode_reply(result: Result<Vec<u8>>, generation: Generation) -> Vec<u8> {
    match result {
        Ok(body) => {
            let mut buf = Vec::with_capacity(9 + body.len());
            buf.push(STATUS_OK);
            append_u64_le(&mut buf, generation.get());
            buf.extend_from_slice(&body);
            buf
        }
        Err(e) => encode_error(&e),
    }
}

fn encode_error(e: &CursorError) -> Vec<u8> {
    let message = e.to_string();
    let mut buf = Vec::with_capacity(9 + message.len());
    buf.push(STATUS_ERR);
    append_u32_le(&mut buf, e.error_code() as u32);
    append_u32_le(&mut buf, u32::try_from(message.len()).unwrap_or(0));
    if u32::try_from(message.len()).is_ok() {
        buf.extend_from_slice(message.as_bytes());
    }
    buf
}

fn decode_reply(payload: &[u8]) -> Result<(Generation, &[u8])> {
    match payload.split_first() {
        Some((&STATUS_OK, rest)) => {
            let mut r = WireReader::new(rest);
            let generation = r
                .u64_le()
                .ok_or_else(|| CursorError::protocol("ok reply truncated"))?;
            Ok((Generation::new(generation), &rest[8..]))
        }
        Some((&STATUS_ERR, rest)) => {
            let mut r = WireReader::new(rest);
            let code = r
                .u32_le()
                .ok_or_else(|| CursorError::protocol("error reply truncated"))?;
            let message = r
                .len_prefixed()
                .ok_or_else(|| CursorError::protocol("error reply truncated"))?;
            Err(CursorError::from_remote(
                ErrorCode::from_u32(code),
                String::from_utf8_lossy(message).into_owned(),
            ))
        }
        Some((status, _)) => Err(CursorError::protocol(format!("unknown reply status {status}"))),
        None => Err(CursorError::protocol("empty reply")),
    }
}

// ---------------------------------------------------------------------------
// BulkCursorStub (server side)
// ---------------------------------------------------------------------------

/// Decodes request frames, calls the producer, encodes reply frames.
pub struct BulkCursorStub {
    producer: Arc<dyn BulkCursor>,
    config: TransportConfig,
}

impl BulkCursorStub {
    pub fn new(producer: Arc<dyn BulkCursor>, config: TransportConfig) -> Self {
        Self {
            producer,
            config: config.validated(),
        }
    }

    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Run one request against the producer and build the reply frame.
    pub fn dispatch(&self, request: &Frame) -> Frame {
        let result = self.call(request.opcode, &request.payload);
        if let Err(e) = &result {
            debug!(opcode = %request.opcode, request_id = request.request_id, error = %e, "request failed");
        }
        Frame {
            opcode: request.opcode,
            request_id: request.request_id,
            payload: encode_reply(result, self.producer.generation()),
        }
    }

    /// Handle one encoded request frame and return the encoded reply.
    ///
    /// # Errors
    /// A malformed request frame; the connection should be dropped.
    pub fn handle(&self, request: &[u8]) -> Result<Vec<u8>> {
        let request = Frame::decode(request, &self.config)?;
        let reply = self.dispatch(&request);
        match reply.encode(&self.config) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                warn!(opcode = %request.opcode, error = %e, "reply exceeds frame cap");
                let fallback = Frame {
                    payload: encode_error(&CursorError::protocol(e.to_string())),
                    ..reply
                };
                Ok(fallback.encode(&self.config)?)
            }
        }
    }

    fn call(&self, opcode: BulkOpcode, payload: &[u8]) -> Result<Vec<u8>> {
        let p = &self.producer;
        match opcode {
            BulkOpcode::GetWindow => encode_window(&p.get_window(decode_i64(payload)?)?),
            BulkOpcode::OnMove => p.on_move(decode_i64(payload)?).map(|()| Vec::new()),
            BulkOpcode::Count => p.count().map(encode_i64),
            BulkOpcode::GetColumnNames => encode_names(&p.column_names()?),
            BulkOpcode::UpdateRows => {
                let updates: RowUpdates = serde_json::from_slice(payload)
                    .map_err(|e| CursorError::protocol(format!("row updates decode: {e}")))?;
                p.update_rows(&updates).map(|b| vec![u8::from(b)])
            }
            BulkOpcode::DeleteRow => p.delete_row(decode_i64(payload)?).map(|b| vec![u8::from(b)]),
            BulkOpcode::Deactivate => p.deactivate().map(|()| Vec::new()),
            // Observers cannot cross the channel; the proxy keeps its own.
            BulkOpcode::Requery => {
                decode_bool(payload)?;
                p.requery(None).map(encode_i64)
            }
            BulkOpcode::WantsAllOnMoveCalls => p.wants_all_on_move_calls().map(|b| vec![u8::from(b)]),
            BulkOpcode::GetExtras => p.extras()?.to_json(),
            BulkOpcode::Respond => p.respond(&Bundle::from_json(payload)?)?.to_json(),
            BulkOpcode::Close => p.close().map(|()| Vec::new()),
        }
    }
}

/// Serve requests from `stream` until the peer closes it.
///
/// Returns the number of requests served.
pub fn serve_stream<S: Read + Write>(stub: &BulkCursorStub, mut stream: S) -> Result<u64> {
    let mut served = 0_u64;
    while let Some(request) = read_frame(&mut stream, &stub.config)? {
        let reply = stub.handle(&request)?;
        stream
            .write_all(&reply)
            .and_then(|()| stream.flush())
            .map_err(|e| io_unavailable(&e))?;
        served += 1;
    }
    debug!(served, "bulk cursor stream closed by peer");
    Ok(served)
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// One blocking request/reply exchange of encoded frames.
pub trait Channel: Send {
    fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}

/// In-memory channel straight into a stub; exercises the full codec.
pub struct LoopbackChannel {
    stub: Arc<BulkCursorStub>,
}

impl LoopbackChannel {
    pub const fn new(stub: Arc<BulkCursorStub>) -> Self {
        Self { stub }
    }
}

impl Channel for LoopbackChannel {
    fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.stub.handle(request)
    }
}

/// Channel over any blocking byte stream, e.g. a Unix socket.
#[derive(Debug)]
pub struct StreamChannel<S> {
    stream: S,
    config: TransportConfig,
}

impl<S: Read + Write + Send> StreamChannel<S> {
    pub const fn new(stream: S, config: TransportConfig) -> Self {
        Self { stream, config }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write + Send> Channel for StreamChannel<S> {
    fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.stream
            .write_all(request)
            .and_then(|()| self.stream.flush())
            .map_err(|e| io_unavailable(&e))?;
        read_frame(&mut self.stream, &self.config)?
            .ok_or_else(|| CursorError::unavailable("channel closed before reply"))
    }
}

// ---------------------------------------------------------------------------
// BulkCursorProxy (client side)
// ---------------------------------------------------------------------------

/// [`BulkCursor`] over a [`Channel`]; one round trip per call.
pub struct BulkCursorProxy<C: Channel> {
    channel: Mutex<C>,
    config: TransportConfig,
    next_request_id: AtomicU64,
    latest_generation: AtomicU64,
    observers: Mutex<Vec<Arc<dyn ContentObserver>>>,
}

impl<C: Channel> BulkCursorProxy<C> {
    pub fn new(channel: C, config: TransportConfig) -> Self {
        Self {
            channel: Mutex::new(channel),
            config: config.validated(),
            next_request_id: AtomicU64::new(1),
            latest_generation: AtomicU64::new(0),
            observers: Mutex::new(Vec::new()),
        }
    }

    fn call(&self, opcode: BulkOpcode, payload: Vec<u8>) -> Result<Vec<u8>> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = Frame {
            opcode,
            request_id,
            payload,
        }
        .encode(&self.config)?;
        let reply = {
            let mut channel = self.channel.lock();
            channel.round_trip(&request).inspect_err(|e| {
                warn!(%opcode, request_id, error = %e, "bulk cursor round trip failed");
            })?
        };
        let reply = Frame::decode(&reply, &self.config)?;
        if reply.request_id != request_id || reply.opcode != opcode {
            return Err(CursorError::protocol(format!(
                "reply {} #{} does not answer {opcode} #{request_id}",
                reply.opcode, reply.request_id
            )));
        }
        let (generation, body) = decode_reply(&reply.payload)?;
        let previous = self
            .latest_generation
            .fetch_max(generation.get(), Ordering::AcqRel);
        if generation.get() > previous && previous != 0 {
            debug!(%opcode, previous, generation = generation.get(), "producer re-executed");
        }
        Ok(body.to_vec())
    }

    fn notify_local(&self) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.on_change(true);
        }
    }
}

impl<C: Channel> BulkCursor for BulkCursorProxy<C> {
    fn get_window(&self, start_position: i64) -> Result<CursorWindow> {
        decode_window(&self.call(BulkOpcode::GetWindow, encode_i64(start_position))?)
    }

    fn on_move(&self, position: i64) -> Result<()> {
        self.call(BulkOpcode::OnMove, encode_i64(position)).map(drop)
    }

    fn count(&self) -> Result<i64> {
        decode_i64(&self.call(BulkOpcode::Count, Vec::new())?)
    }

    fn column_names(&self) -> Result<Vec<String>> {
        decode_names(&self.call(BulkOpcode::GetColumnNames, Vec::new())?)
    }

    fn update_rows(&self, updates: &RowUpdates) -> Result<bool> {
        let payload = serde_json::to_vec(updates)
            .map_err(|e| CursorError::protocol(format!("row updates encode: {e}")))?;
        let changed = decode_bool(&self.call(BulkOpcode::UpdateRows, payload)?)?;
        if changed {
            self.notify_local();
        }
        Ok(changed)
    }

    fn delete_row(&self, position: i64) -> Result<bool> {
        let deleted = decode_bool(&self.call(BulkOpcode::DeleteRow, encode_i64(position))?)?;
        if deleted {
            self.notify_local();
        }
        Ok(deleted)
    }

    fn deactivate(&self) -> Result<()> {
        self.call(BulkOpcode::Deactivate, Vec::new()).map(drop)
    }

    fn requery(&self, observer: Option<Arc<dyn ContentObserver>>) -> Result<i64> {
        let flag = u8::from(observer.is_some());
        if let Some(observer) = observer {
            let mut observers = self.observers.lock();
            if !observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
                observers.push(observer);
            }
        }
        decode_i64(&self.call(BulkOpcode::Requery, vec![flag])?)
    }

    fn close(&self) -> Result<()> {
        self.observers.lock().clear();
        self.call(BulkOpcode::Close, Vec::new()).map(drop)
    }

    fn wants_all_on_move_calls(&self) -> Result<bool> {
        decode_bool(&self.call(BulkOpcode::WantsAllOnMoveCalls, Vec::new())?)
    }

    fn extras(&self) -> Result<Bundle> {
        Bundle::from_json(&self.call(BulkOpcode::GetExtras, Vec::new())?)
    }

    fn respond(&self, extras: &Bundle) -> Result<Bundle> {
        Bundle::from_json(&self.call(BulkOpcode::Respond, extras.to_json()?)?)
    }

    fn generation(&self) -> Generation {
        Generation::new(self.latest_generation.load(Ordering::Acquire))
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::producer::{MaterializedProducer, MemoryRowSource, MemoryTable, ProducerConfig};
    use wcursor_types::{Cell, TypeTag};

    fn table() -> MemoryTable {
        let t = MemoryTable::new(["id", "name", "data"]);
        t.insert(vec![Cell::Integer(1), Cell::from("one"), Cell::Blob(vec![1])])
            .unwrap();
        t.insert(vec![Cell::Integer(2), Cell::Null, Cell::Float(2.5)])
            .unwrap();
        t
    }

    fn loopback(t: &MemoryTable) -> BulkCursorProxy<LoopbackChannel> {
        let producer = MaterializedProducer::new(
            MemoryRowSource::new(t.clone()),
            ProducerConfig::default(),
        );
        let stub = Arc::new(BulkCursorStub::new(
            Arc::new(producer),
            TransportConfig::default(),
        ));
        BulkCursorProxy::new(LoopbackChannel::new(stub), TransportConfig::default())
    }

    #[test]
    fn frame_header_layout() {
        let frame = Frame {
            opcode: BulkOpcode::Count,
            request_id: 0x0102,
            payload: vec![9, 9],
        };
        let bytes = frame.encode(&TransportConfig::default()).unwrap();
        assert_eq!(&bytes[..4], &14_u32.to_be_bytes());
        assert_eq!(&bytes[4..6], &[0, 1]);
        assert_eq!(&bytes[6..8], &[0, 2]);
        assert_eq!(&bytes[8..16], &0x0102_u64.to_be_bytes());
        assert_eq!(
            Frame::decode(&bytes, &TransportConfig::default()).unwrap(),
            frame
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let config = TransportConfig::default();
        let good = Frame {
            opcode: BulkOpcode::Close,
            request_id: 1,
            payload: vec![1, 2, 3],
        }
        .encode(&config)
        .unwrap();

        assert_eq!(Frame::decode(&good[..10], &config), Err(FrameError::TooShort));

        let mut small = good.clone();
        small[..4].copy_from_slice(&4_u32.to_be_bytes());
        assert_eq!(Frame::decode(&small, &config), Err(FrameError::LenTooSmall(4)));

        let mut version = good.clone();
        version[5] = 2;
        assert_eq!(
            Frame::decode(&version, &config),
            Err(FrameError::UnknownVersion(2))
        );

        let mut opcode = good.clone();
        opcode[7] = 99;
        assert_eq!(
            Frame::decode(&opcode, &config),
            Err(FrameError::UnknownOpcode(99))
        );

        assert_eq!(
            Frame::decode(&good[..17], &config),
            Err(FrameError::PayloadTruncated {
                expected: 3,
                actual: 1
            })
        );

        let tight = TransportConfig { max_frame_len: 13 };
        assert!(matches!(
            Frame::decode(&good, &tight),
            Err(FrameError::LenTooLarge { len: 15, max: 13 })
        ));
    }

    #[test]
    fn oversized_frames_are_not_encoded() {
        let frame = Frame {
            opcode: BulkOpcode::Respond,
            request_id: 1,
            payload: vec![0; 64],
        };
        let tight = TransportConfig { max_frame_len: 32 };
        assert!(matches!(
            frame.encode(&tight),
            Err(FrameError::LenTooLarge { len: 76, max: 32 })
        ));
    }

    #[test]
    fn proxy_matches_in_process_producer() {
        let t = table();
        let proxy = loopback(&t);
        assert_eq!(proxy.count().unwrap(), 2);
        assert_eq!(proxy.column_names().unwrap(), vec!["id", "name", "data"]);
        assert!(!proxy.wants_all_on_move_calls().unwrap());

        let w = proxy.get_window(1).unwrap();
        assert!(w.is_read_only());
        assert!(w.contains(1));
        let row = usize::try_from(1 - w.start_position().unwrap()).unwrap();
        assert_eq!(w.get_type(row, 1).unwrap(), TypeTag::Null);
        assert_eq!(w.get_double(row, 2).unwrap(), 2.5);
        proxy.on_move(1).unwrap();

        let reply = proxy.respond(&Bundle::new().with("q", 1)).unwrap();
        assert_eq!(reply.get("count").and_then(serde_json::Value::as_i64), Some(2));
        assert!(proxy.extras().unwrap().is_empty());
    }

    #[test]
    fn remote_errors_keep_their_kind() {
        let t = table();
        let proxy = loopback(&t);
        assert_eq!(
            proxy.get_window(-4).unwrap_err(),
            CursorError::IndexOutOfRange { index: -4, size: 2 }
        );
        proxy.close().unwrap();
        assert!(proxy.count().unwrap_err().is_producer_failure());
    }

    #[test]
    fn requery_and_mutation_through_proxy() {
        struct Flag(parking_lot::Mutex<Vec<bool>>);
        impl ContentObserver for Flag {
            fn on_change(&self, self_change: bool) {
                self.0.lock().push(self_change);
            }
        }

        let t = table();
        let proxy = loopback(&t);
        let flag = Arc::new(Flag(parking_lot::Mutex::new(Vec::new())));
        t.insert(vec![Cell::Integer(3)]).unwrap();
        assert_eq!(proxy.requery(Some(flag.clone())).unwrap(), 3);

        assert!(proxy.delete_row(0).unwrap());
        assert_eq!(proxy.count().unwrap(), 2);
        assert_eq!(*flag.0.lock(), vec![true]);

        let mut changes = std::collections::BTreeMap::new();
        changes.insert("name".to_owned(), Cell::from("two"));
        let mut updates = RowUpdates::new();
        updates.insert(t.rowid_at(0).unwrap(), changes);
        assert!(proxy.update_rows(&updates).unwrap());
        let w = proxy.get_window(0).unwrap();
        assert_eq!(w.get_string(0, 1).unwrap(), "two");
        proxy.deactivate().unwrap();
    }

    #[test]
    fn replies_carry_the_producer_generation() {
        let t = table();
        let producer = MaterializedProducer::new(
            MemoryRowSource::new(t.clone()),
            ProducerConfig::default(),
        );
        let stub = Arc::new(BulkCursorStub::new(
            Arc::new(producer),
            TransportConfig::default(),
        ));
        let a = BulkCursorProxy::new(LoopbackChannel::new(stub.clone()), TransportConfig::default());
        let b = BulkCursorProxy::new(LoopbackChannel::new(stub), TransportConfig::default());

        assert_eq!(a.generation(), Generation::default());
        assert_eq!(a.count().unwrap(), 2);
        assert_eq!(a.generation(), Generation::FIRST);

        // Another client re-executes; `a` hears of it on its next call.
        assert_eq!(b.requery(None).unwrap(), 2);
        assert_eq!(b.generation(), Generation::new(2));
        assert_eq!(a.generation(), Generation::FIRST);
        a.on_move(0).unwrap();
        assert_eq!(a.generation(), Generation::new(2));

        // Error replies carry no generation and do not lower it.
        assert!(a.get_window(-1).is_err());
        assert_eq!(a.generation(), Generation::new(2));
    }

    #[test]
    fn truncated_ok_reply_is_a_protocol_error() {
        assert!(matches!(
            decode_reply(&[STATUS_OK, 1, 2, 3]),
            Err(CursorError::Protocol { .. })
        ));
        let encoded = encode_reply(Ok(vec![7]), Generation::new(9));
        let (generation, body) = decode_reply(&encoded).unwrap();
        assert_eq!(generation, Generation::new(9));
        assert_eq!(body, &[7]);
    }

    #[test]
    fn local_observer_may_requery_from_its_callback() {
        struct Requerier {
            proxy: std::sync::OnceLock<std::sync::Weak<BulkCursorProxy<LoopbackChannel>>>,
            counts: Mutex<Vec<i64>>,
        }
        impl ContentObserver for Requerier {
            fn on_change(&self, _self_change: bool) {
                if let Some(proxy) = self.proxy.get().and_then(std::sync::Weak::upgrade) {
                    self.counts.lock().push(proxy.requery(None).unwrap());
                }
            }
        }

        let t = table();
        let proxy = Arc::new(loopback(&t));
        let observer = Arc::new(Requerier {
            proxy: std::sync::OnceLock::new(),
            counts: Mutex::new(Vec::new()),
        });
        assert!(observer.proxy.set(Arc::downgrade(&proxy)).is_ok());
        proxy.requery(Some(observer.clone())).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&proxy);
        std::thread::spawn(move || {
            let _ = tx.send(worker.delete_row(0));
        });
        let deleted = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("delete_row blocked while notifying");
        assert!(deleted.unwrap());
        assert_eq!(*observer.counts.lock(), vec![1]);
    }

    struct BrokenChannel;

    impl Channel for BrokenChannel {
        fn round_trip(&mut self, _request: &[u8]) -> Result<Vec<u8>> {
            Err(CursorError::unavailable("peer hung up"))
        }
    }

    #[test]
    fn channel_failure_is_producer_unavailable() {
        let proxy = BulkCursorProxy::new(BrokenChannel, TransportConfig::default());
        assert!(matches!(
            proxy.count(),
            Err(CursorError::ProducerUnavailable { .. })
        ));
    }

    struct EchoWrongId;

    impl Channel for EchoWrongId {
        fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>> {
            let config = TransportConfig::default();
            let mut frame = Frame::decode(request, &config)?;
            frame.request_id += 1;
            frame.payload = encode_reply(Ok(encode_i64(0)), Generation::FIRST);
            Ok(frame.encode(&config)?)
        }
    }

    #[test]
    fn mismatched_reply_is_a_protocol_error() {
        let proxy = BulkCursorProxy::new(EchoWrongId, TransportConfig::default());
        assert!(matches!(proxy.count(), Err(CursorError::Protocol { .. })));
    }

    #[test]
    fn read_frame_stops_cleanly_at_eof() {
        let config = TransportConfig::default();
        let bytes = Frame {
            opcode: BulkOpcode::Count,
            request_id: 5,
            payload: Vec::new(),
        }
        .encode(&config)
        .unwrap();
        let mut input = io::Cursor::new(bytes.clone());
        assert_eq!(read_frame(&mut input, &config).unwrap(), Some(bytes));
        assert_eq!(read_frame(&mut input, &config).unwrap(), None);
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn serves_over_unix_socket() {
        use std::os::unix::net::UnixStream;

        let t = table();
        let producer = MaterializedProducer::new(
            MemoryRowSource::new(t.clone()),
            ProducerConfig::default(),
        );
        let stub = BulkCursorStub::new(Arc::new(producer), TransportConfig::default());
        let (client_sock, server_sock) = UnixStream::pair().expect("socketpair");
        let server = std::thread::spawn(move || serve_stream(&stub, server_sock));

        let proxy = BulkCursorProxy::new(
            StreamChannel::new(client_sock, TransportConfig::default()),
            TransportConfig::default(),
        );
        assert_eq!(proxy.count().unwrap(), 2);
        let w = proxy.get_window(0).unwrap();
        assert_eq!(w.get_string(0, 1).unwrap(), "one");
        assert_eq!(w.get_blob(0, 2).unwrap(), vec![1]);
        drop(proxy);

        let served = server.join().expect("server thread").unwrap();
        assert_eq!(served, 2);
    }
}
