//! The bulk cursor protocol.
//!
//! A row producer serves windows, counts and invalidation across a process
//! boundary through the [`BulkCursor`] contract. This crate carries the
//! contract and its opcode table, the frame codec with a server stub and a
//! client proxy, the client-side [`BulkCursorAdaptor`], and an in-process
//! [`MaterializedProducer`] over a pluggable [`RowSource`].

pub mod adaptor;
pub mod producer;
pub mod protocol;
pub mod transport;

pub use adaptor::BulkCursorAdaptor;
pub use producer::{MaterializedProducer, MemoryRowSource, MemoryTable, ProducerConfig, RowSource};
pub use protocol::{
    Bundle, BulkCursor, BulkOpcode, ContentObserver, FIRST_CALL_TRANSACTION, RowUpdates,
};
pub use transport::{
    BulkCursorProxy, BulkCursorStub, Channel, DEFAULT_MAX_FRAME_LEN, FRAME_MIN_LEN_BE, Frame,
    FrameError, LoopbackChannel, PROTOCOL_VERSION, StreamChannel, TransportConfig, read_frame,
    serve_stream,
};
