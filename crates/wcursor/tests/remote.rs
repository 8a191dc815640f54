//! End-to-end tests across a real byte stream.
//!
//! A producer runs behind a [`BulkCursorStub`] on one end of a Unix socket
//! pair; the consumer drives a [`BulkCursorAdaptor`] over a proxy on the
//! other end.
#![cfg(unix)]

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use wcursor::{
    Bundle, Cell, Config, ContentObserver, Cursor, CursorError, MemoryRowSource, MemoryTable,
    RowUpdates, StreamChannel, connect, read_frame, serve_stream, stub_for,
};

fn people() -> MemoryTable {
    let t = MemoryTable::new(["id", "name", "score", "avatar"]);
    let rows = [
        ("ada", 9.5, vec![1_u8, 2]),
        ("brian", 7.25, vec![]),
        ("grace", 8.0, vec![0xff; 32]),
    ];
    for (i, (name, score, avatar)) in rows.into_iter().enumerate() {
        t.insert(vec![
            Cell::Integer(i64::try_from(i).unwrap() + 1),
            Cell::from(name),
            Cell::Float(score),
            Cell::Blob(avatar),
        ])
        .unwrap();
    }
    t
}

#[derive(Default)]
struct Counter(AtomicUsize);

impl ContentObserver for Counter {
    fn on_change(&self, self_change: bool) {
        assert!(self_change);
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Full session
// ============================================================================

#[test]
fn full_session_over_unix_socket() {
    let table = people();
    let config = Config::default();
    let stub = stub_for(MemoryRowSource::new(table.clone()), &config);
    let (client, server) = UnixStream::pair().unwrap();
    let server = thread::spawn(move || serve_stream(&stub, server));

    let observer = Arc::new(Counter::default());
    let mut cursor = connect(StreamChannel::new(client, config.transport), &config)
        .unwrap()
        .with_observer(observer.clone());

    assert_eq!(cursor.count(), 3);
    assert_eq!(cursor.column_names(), ["id", "name", "score", "avatar"]);
    assert!(!cursor.wants_all_on_move_calls());

    // Typed reads through a decoded window.
    assert!(cursor.move_to_position(2).unwrap());
    assert_eq!(cursor.get_string(1).unwrap(), "grace");
    assert!((cursor.get_double(2).unwrap() - 8.0).abs() < f64::EPSILON);
    assert_eq!(cursor.get_blob(3).unwrap(), vec![0xff; 32]);
    assert!(cursor.move_to_position(1).unwrap());
    assert!(cursor.is_blob(3).unwrap());
    assert!(cursor.get_blob(3).unwrap().is_empty());
    assert!(matches!(
        cursor.get_blob(0),
        Err(CursorError::TypeMismatch { .. })
    ));
    assert!(matches!(
        cursor.get_long(1),
        Err(CursorError::ConversionFailed { .. })
    ));

    // Requery registers the observer on the client side.
    assert_eq!(cursor.requery().unwrap(), 3);

    let mut changes = std::collections::BTreeMap::new();
    changes.insert("NAME".to_owned(), Cell::from("brian k."));
    let mut updates = RowUpdates::new();
    updates.insert(table.rowid_at(1).unwrap(), changes);
    assert!(cursor.update_rows(&updates).unwrap());
    assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    assert!(cursor.move_to_position(1).unwrap());
    assert_eq!(cursor.get_string(1).unwrap(), "brian k.");

    assert!(cursor.move_to_first().unwrap());
    assert!(cursor.delete_row().unwrap());
    assert_eq!(observer.0.load(Ordering::SeqCst), 2);
    assert_eq!(cursor.count(), 2);
    assert!(cursor.move_to_first().unwrap());
    assert_eq!(cursor.get_string(1).unwrap(), "brian k.");

    let reply = cursor.respond(&Bundle::new().with("ping", true)).unwrap();
    assert_eq!(reply.get("ping").and_then(serde_json::Value::as_bool), Some(true));
    assert_eq!(reply.get("count").and_then(serde_json::Value::as_i64), Some(2));

    cursor.close();
    drop(cursor);
    let served = server.join().unwrap().unwrap();
    assert!(served >= 10, "served {served} requests");
}

// ============================================================================
// Producer failure
// ============================================================================

#[test]
fn lost_producer_closes_the_cursor() {
    let table = MemoryTable::new(["n"]);
    for i in 0..32 {
        table.insert(vec![Cell::Integer(i)]).unwrap();
    }
    let config =
        Config::from_json_str(r#"{"producer":{"window":{"capacity_bytes":64}}}"#).unwrap();
    let stub = stub_for(MemoryRowSource::new(table), &config);
    let (client, mut server) = UnixStream::pair().unwrap();

    // Answer the handshake (names, count, move policy) and one window, then
    // hang up.
    let server = thread::spawn(move || {
        for _ in 0..4 {
            let request = read_frame(&mut server, stub.config()).unwrap().unwrap();
            let reply = stub.handle(&request).unwrap();
            server.write_all(&reply).unwrap();
        }
    });

    let mut cursor = connect(StreamChannel::new(client, config.transport), &config).unwrap();
    assert!(cursor.move_to_first().unwrap());
    assert_eq!(cursor.get_long(0).unwrap(), 0);
    server.join().unwrap();

    let mut seen = 1;
    let err = loop {
        match cursor.move_to_next() {
            Ok(true) => {
                assert_eq!(cursor.get_long(0).unwrap(), seen);
                seen += 1;
            }
            Ok(false) => panic!("walked off the end without a fetch"),
            Err(e) => break e,
        }
    };
    assert!(err.is_producer_failure(), "{err}");
    assert!(seen < 32);
    assert!(cursor.is_closed());
    assert!(cursor.windowed().window().is_none());
    assert!(matches!(
        cursor.get_long(0),
        Err(CursorError::Closed { .. })
    ));
}
