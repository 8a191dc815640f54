//! Public API facade for the windowed result-set cursor.
//!
//! Re-exports the member crates and offers two entry points that wire a
//! [`BulkCursorAdaptor`] from an explicit [`Config`]: [`open_local`] over an
//! in-process producer and [`connect`] over a byte channel.

use std::sync::Arc;

use tracing::debug;

pub use wcursor_bulk::{
    Bundle, BulkCursor, BulkCursorAdaptor, BulkCursorProxy, BulkCursorStub, BulkOpcode, Channel,
    ContentObserver, DEFAULT_MAX_FRAME_LEN, FIRST_CALL_TRANSACTION, FRAME_MIN_LEN_BE, Frame,
    FrameError, LoopbackChannel, MaterializedProducer, MemoryRowSource, MemoryTable,
    PROTOCOL_VERSION, ProducerConfig, RowSource, RowUpdates, StreamChannel, TransportConfig,
    read_frame, serve_stream,
};
pub use wcursor_cursor::{Cursor, CursorPosition, PositionState, WindowedCursor};
pub use wcursor_error::{CursorError, ErrorCode, Result};
pub use wcursor_types::{Cell, CharBuffer, Generation, TypeTag};
pub use wcursor_window::{
    CursorWindow, SLOT_BYTES, WindowConfig, WindowRole, decode_window, encode_window,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Everything an embedder tunes, passed explicitly to the entry points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub producer: ProducerConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Validate and clamp configuration values.
    #[must_use]
    pub const fn validated(self) -> Self {
        Self {
            producer: self.producer.validated(),
            transport: self.transport.validated(),
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str::<Self>(json)
            .map(Self::validated)
            .map_err(|e| CursorError::illegal_state(format!("invalid configuration: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Serve `source` in process and return a cursor over it.
pub fn open_local<S>(source: S, config: &Config) -> Result<BulkCursorAdaptor>
where
    S: RowSource + 'static,
{
    let producer = MaterializedProducer::new(source, config.validated().producer);
    debug!("opening in-process bulk cursor");
    BulkCursorAdaptor::new(Arc::new(producer))
}

/// Return a cursor over a producer reached through `channel`.
pub fn connect<C>(channel: C, config: &Config) -> Result<BulkCursorAdaptor>
where
    C: Channel + 'static,
{
    let proxy = BulkCursorProxy::new(channel, config.validated().transport);
    debug!("connecting bulk cursor over channel");
    BulkCursorAdaptor::new(Arc::new(proxy))
}

/// Build the server side for `source`, ready for [`serve_stream`] or a
/// [`LoopbackChannel`].
pub fn stub_for<S>(source: S, config: &Config) -> BulkCursorStub
where
    S: RowSource + 'static,
{
    let config = config.validated();
    BulkCursorStub::new(
        Arc::new(MaterializedProducer::new(source, config.producer)),
        config.transport,
    )
}
