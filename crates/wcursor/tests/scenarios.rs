//! Acceptance scenarios for windows, cursors and the bulk adaptor.
//!
//! Scenarios A-C populate a window by hand and read it through a cursor.
//! D walks the IndexOutOfRange / StaleData / OK ladder of `check_position`.
//! E checks that a requery on the producer makes the old window unreadable
//! until a fresh one is fetched, in process and across a channel.

use std::sync::Arc;

use wcursor::{
    BulkCursor, Cell, Config, Cursor, CursorError, CursorWindow, Generation, LoopbackChannel,
    MaterializedProducer, MemoryRowSource, MemoryTable, ProducerConfig, WindowedCursor, connect,
    open_local,
};

fn window(columns: usize, rows: usize) -> CursorWindow {
    let mut w = CursorWindow::with_capacity(1 << 16, Generation::FIRST);
    assert!(w.set_num_columns(columns).unwrap());
    for _ in 0..rows {
        assert!(w.alloc_row().unwrap());
    }
    w
}

fn bound_cursor(columns: &[&str], window: CursorWindow) -> WindowedCursor {
    let rows = i64::try_from(window.num_rows().unwrap()).unwrap();
    let mut cursor = WindowedCursor::new(columns.iter().map(|c| (*c).to_owned()).collect(), rows);
    cursor.set_window(Some(window)).unwrap();
    cursor
}

fn one_column_table(rows: i64) -> MemoryTable {
    let t = MemoryTable::new(["n"]);
    for i in 0..rows {
        t.insert(vec![Cell::Integer(i * 10)]).unwrap();
    }
    t
}

// ============================================================================
// A-C: hand-populated windows
// ============================================================================

#[test]
fn scenario_a_text_cell() {
    let mut w = window(1, 1);
    assert!(w.put_string("abcdefg", 0, 0).unwrap());
    let mut cursor = bound_cursor(&["s"], w);

    assert!(cursor.move_to_position(0).unwrap());
    assert!(!cursor.is_null(0).unwrap());
    assert_eq!(cursor.get_string(0).unwrap(), "abcdefg");
}

#[test]
fn scenario_b_integer_widths() {
    let mut w = window(2, 1);
    assert!(w.put_long(10, 0, 0).unwrap());
    let mut cursor = bound_cursor(&["a", "b"], w);

    assert!(cursor.move_to_first().unwrap());
    assert_eq!(cursor.get_short(0).unwrap(), 10);
    assert_eq!(cursor.get_int(0).unwrap(), 10);
    assert_eq!(cursor.get_long(0).unwrap(), 10);
    // The untouched column reads as null.
    assert!(cursor.is_null(1).unwrap());
}

#[test]
fn scenario_c_empty_string_and_blob() {
    let pattern: Vec<u8> = (0..100u8).map(|b| b.wrapping_mul(7)).collect();
    let mut w = window(2, 1);
    assert!(w.put_string("", 0, 0).unwrap());
    assert!(w.put_blob(&pattern, 0, 1).unwrap());
    let mut cursor = bound_cursor(&["s", "b"], w);

    assert!(cursor.move_to_first().unwrap());
    assert_eq!(cursor.get_string(0).unwrap(), "");
    assert!(!cursor.is_null(0).unwrap());
    assert!(cursor.is_blob(1).unwrap());
    assert_eq!(cursor.get_blob(1).unwrap(), pattern);
}

// ============================================================================
// D: check_position ladder
// ============================================================================

#[test]
fn scenario_d_out_of_range_then_stale_then_ok() {
    let mut cursor = WindowedCursor::new(vec!["n".to_owned()], 3);

    let err = cursor.check_position().unwrap_err();
    assert!(matches!(err, CursorError::IndexOutOfRange { index: -1, size: 3 }));

    assert!(cursor.move_to_position(cursor.count() - 1).unwrap());
    assert!(cursor.check_position().unwrap_err().is_stale());

    let mut w = window(1, 3);
    for row in 0..3 {
        assert!(w.put_long(i64::try_from(row).unwrap(), row, 0).unwrap());
    }
    cursor.set_window(Some(w)).unwrap();
    cursor.check_position().unwrap();
    assert_eq!(cursor.get_long(0).unwrap(), 2);
}

#[test]
fn window_outside_position_is_stale_not_out_of_range() {
    let mut w = window(1, 2);
    w.set_start_position(10).unwrap();
    let mut cursor = WindowedCursor::new(vec!["n".to_owned()], 20);
    cursor.set_window(Some(w)).unwrap();

    assert!(cursor.move_to_position(3).unwrap());
    assert!(cursor.get_long(0).unwrap_err().is_stale());
    assert!(cursor.move_to_position(11).unwrap());
    assert!(cursor.is_null(0).unwrap());
}

// ============================================================================
// E: requery invalidates the bound window
// ============================================================================

#[test]
fn scenario_e_generation_bump_on_cursor() {
    let mut w = window(1, 1);
    assert!(w.put_long(7, 0, 0).unwrap());
    let mut cursor = bound_cursor(&["n"], w);
    assert!(cursor.move_to_first().unwrap());
    assert_eq!(cursor.get_long(0).unwrap(), 7);

    // The producer re-executed: two rows now, newer generation.
    cursor.observe_generation(Generation::new(2));
    assert!(cursor.get_long(0).unwrap_err().is_stale());

    let mut fresh = CursorWindow::with_capacity(1 << 16, Generation::new(2));
    assert!(fresh.set_num_columns(1).unwrap());
    for value in [7, 8] {
        assert!(fresh.alloc_row().unwrap());
        let row = fresh.num_rows().unwrap() - 1;
        assert!(fresh.put_long(value, row, 0).unwrap());
    }
    cursor.set_window(Some(fresh)).unwrap();
    assert_eq!(cursor.get_long(0).unwrap(), 7);
}

#[test]
fn scenario_e_in_process_requery_revokes_window() {
    let table = one_column_table(1);
    let producer = Arc::new(MaterializedProducer::new(
        MemoryRowSource::new(table.clone()),
        ProducerConfig::default(),
    ));
    let mut adaptor = wcursor::BulkCursorAdaptor::new(producer.clone()).unwrap();
    assert_eq!(adaptor.count(), 1);
    assert!(adaptor.move_to_first().unwrap());
    assert_eq!(adaptor.get_long(0).unwrap(), 0);

    table.insert(vec![Cell::Integer(10)]).unwrap();
    assert_eq!(producer.requery(None).unwrap(), 2);

    // Same position, but the window it was read from is gone.
    assert!(adaptor.get_long(0).unwrap_err().is_stale());
    assert!(adaptor.get_long(0).unwrap_err().is_stale());

    // Re-positioning fetches a window from the new execution.
    assert!(adaptor.move_to_position(0).unwrap());
    assert_eq!(adaptor.get_long(0).unwrap(), 0);
    assert_eq!(adaptor.requery().unwrap(), 2);
    assert!(adaptor.move_to_last().unwrap());
    assert_eq!(adaptor.get_long(0).unwrap(), 10);
}

#[test]
fn scenario_e_requery_over_loopback() {
    let table = one_column_table(1);
    let config = Config::default();
    let stub = Arc::new(wcursor::stub_for(MemoryRowSource::new(table.clone()), &config));
    let mut adaptor = connect(LoopbackChannel::new(stub), &config).unwrap();

    assert!(adaptor.move_to_first().unwrap());
    let first = adaptor.windowed().window().unwrap().generation();
    assert_eq!(adaptor.get_long(0).unwrap(), 0);

    table.insert(vec![Cell::Integer(10)]).unwrap();
    assert_eq!(adaptor.requery().unwrap(), 2);
    assert!(adaptor.is_before_first());
    assert!(adaptor.windowed().known_generation() > first);

    assert!(adaptor.move_to_position(1).unwrap());
    let second = adaptor.windowed().window().unwrap().generation();
    assert!(second > first);
    assert_eq!(adaptor.get_long(0).unwrap(), 10);
}

#[test]
fn scenario_e_requery_by_another_client_over_loopback() {
    let table = one_column_table(1);
    let config = Config::default();
    let stub = Arc::new(wcursor::stub_for(MemoryRowSource::new(table.clone()), &config));
    let mut reader = connect(LoopbackChannel::new(stub.clone()), &config).unwrap();
    let writer = wcursor::BulkCursorProxy::new(LoopbackChannel::new(stub), config.transport);

    assert!(reader.move_to_first().unwrap());
    assert_eq!(reader.get_long(0).unwrap(), 0);

    let mut changes = std::collections::BTreeMap::new();
    changes.insert("n".to_owned(), Cell::Integer(99));
    let mut updates = wcursor::RowUpdates::new();
    updates.insert(table.rowid_at(0).unwrap(), changes);
    assert!(writer.update_rows(&updates).unwrap());
    table.insert(vec![Cell::Integer(10)]).unwrap();
    assert_eq!(writer.requery(None).unwrap(), 2);

    // The decoded window cannot be revoked remotely; the next round trip
    // tells the reader its generation is gone.
    assert_eq!(reader.get_long(0).unwrap(), 0);
    reader.extras().unwrap();
    assert!(reader.get_long(0).unwrap_err().is_stale());
    assert!(!reader.windowed().window_covers(0));

    // Moving refetches from the new execution.
    assert!(reader.move_to_first().unwrap());
    assert_eq!(reader.get_long(0).unwrap(), 99);
    assert_eq!(reader.requery().unwrap(), 2);
    assert!(reader.move_to_last().unwrap());
    assert_eq!(reader.get_long(0).unwrap(), 10);
}

#[test]
fn on_move_notice_reveals_remote_requery() {
    let table = one_column_table(2);
    let config = Config {
        producer: ProducerConfig {
            wants_all_on_move_calls: true,
            ..ProducerConfig::default()
        },
        ..Config::default()
    };
    let stub = Arc::new(wcursor::stub_for(MemoryRowSource::new(table.clone()), &config));
    let mut reader = connect(LoopbackChannel::new(stub.clone()), &config).unwrap();
    let writer = wcursor::BulkCursorProxy::new(LoopbackChannel::new(stub), config.transport);

    assert!(reader.move_to_first().unwrap());
    let first = reader.windowed().window().unwrap().generation();

    let mut changes = std::collections::BTreeMap::new();
    changes.insert("n".to_owned(), Cell::Integer(-1));
    let mut updates = wcursor::RowUpdates::new();
    updates.insert(table.rowid_at(1).unwrap(), changes);
    assert!(writer.update_rows(&updates).unwrap());

    // Row 1 sits in the bound window; the on_move reply carries the new
    // generation and the adaptor refetches instead of serving the old copy.
    assert!(reader.move_to_next().unwrap());
    assert!(reader.windowed().window().unwrap().generation() > first);
    assert_eq!(reader.get_long(0).unwrap(), -1);
}

// ============================================================================
// Whole-result iteration
// ============================================================================

#[test]
fn iterates_result_larger_than_one_window() {
    let table = MemoryTable::new(["id", "label"]);
    for i in 0..200 {
        table
            .insert(vec![Cell::Integer(i), Cell::Text(format!("row-{i}"))])
            .unwrap();
    }
    let config = Config::from_json_str(r#"{"producer":{"window":{"capacity_bytes":512}}}"#).unwrap();
    let mut adaptor = open_local(MemoryRowSource::new(table), &config).unwrap();

    let label = adaptor.column_index("label").unwrap();
    let mut seen = 0;
    while adaptor.move_to_next().unwrap() {
        assert_eq!(adaptor.get_long(0).unwrap(), seen);
        assert_eq!(adaptor.get_string(label).unwrap(), format!("row-{seen}"));
        seen += 1;
    }
    assert_eq!(seen, 200);
    assert!(adaptor.is_after_last());

    // And backwards, which fetches windows that start before the target.
    while adaptor.move_to_previous().unwrap() {
        seen -= 1;
        assert_eq!(adaptor.get_long(0).unwrap(), seen);
    }
    assert_eq!(seen, 0);
}

#[test]
fn closed_adaptor_rejects_everything() {
    let mut adaptor = open_local(MemoryRowSource::new(one_column_table(3)), &Config::default()).unwrap();
    assert!(adaptor.move_to_first().unwrap());
    adaptor.close();
    adaptor.close();
    assert!(adaptor.is_closed());
    assert!(matches!(
        adaptor.move_to_next(),
        Err(CursorError::Closed { what: "cursor" })
    ));
    assert!(adaptor.requery().is_err());
}

// ============================================================================
// Random window sizes
// ============================================================================

proptest::proptest! {
    #[test]
    fn every_position_reads_its_own_row(
        rows in 0_i64..120,
        capacity in 16_usize..600,
        jumps in proptest::collection::vec(-5_i64..125, 1..40),
    ) {
        let config = Config {
            producer: ProducerConfig {
                window: wcursor::WindowConfig::with_capacity(capacity),
                ..ProducerConfig::default()
            },
            ..Config::default()
        };
        let mut adaptor = open_local(MemoryRowSource::new(one_column_table(rows)), &config).unwrap();
        for target in jumps {
            let on_row = adaptor.move_to_position(target).unwrap();
            proptest::prop_assert_eq!(on_row, (0..rows).contains(&target));
            if on_row {
                proptest::prop_assert_eq!(adaptor.get_long(0).unwrap(), target * 10);
            } else {
                proptest::prop_assert!(adaptor.get_long(0).unwrap_err().is_out_of_range());
            }
        }
    }
}
