//! Scenario tests against the in-memory backend.
//!
//! Each group drives one state machine end to end through the backend
//! traits and checks the calls it made.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::array::ArrayBound;
use super::blob::{Blob, BlobState};
use super::charset::Charset;
use super::connection::ConnectionOptions;
use super::events::EventSubscription;
use super::mock::*;
use super::parameter::ParameterBuffer;
use super::pool::FbPool;
use super::protocol::FreeOption;
use super::services::*;
use super::statement::{Statement, StatementKind, StatementState};
use super::transaction::{Transaction, TransactionOptions, TransactionState};
use super::types::{DbArray, DbDataType, DbValue};
use crate::error::FbError;

/// Route `fbcore::*` logs to the test harness; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn begin(att: &mut MockAttachment) -> Transaction {
    init_tracing();
    Transaction::begin(att, &TransactionOptions::default()).unwrap()
}

fn select_script() -> Script {
    Script::new(1)
        .column("ID", DbDataType::Integer, 4)
        .column("NAME", DbDataType::VarChar, 20)
        .row(vec![DbValue::Integer(1), DbValue::Text("one".into())])
        .row(vec![DbValue::Integer(2), DbValue::Text("two".into())])
        .row(vec![DbValue::Integer(3), DbValue::Null])
}

fn attachment() -> MockAttachment {
    let mut att = MockAttachment::new();
    att.script("FROM ITEMS", select_script());
    att.script(
        "UPDATE ITEMS",
        Script::new(3).param(DbDataType::Integer, 4).records(0, 4, 0),
    );
    att
}

// ============================================================================
// Statement Lifecycle Tests
// ============================================================================

mod statement_lifecycle {
    use super::*;

    #[test]
    fn test_prepare_from_deallocated() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);

        stmt.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();

        assert_eq!(stmt.state(), StatementState::Prepared);
        assert_eq!(stmt.kind(), StatementKind::Select);
        assert!(stmt.handle().is_some());
        let fields = stmt.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.field(1).unwrap().display_name(), "NAME");
    }

    #[test]
    fn test_execute_before_prepare_is_state_error() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);

        let err = stmt.execute(&mut att, &mut tx).unwrap_err();
        assert!(matches!(err, FbError::StateError(_)));
        assert_eq!(stmt.state(), StatementState::Deallocated);
    }

    #[test]
    fn test_fetch_in_batches() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.set_fetch_size(2);
        stmt.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();

        let mut rows = Vec::new();
        while let Some(row) = stmt.fetch(&mut att).unwrap() {
            rows.push(row);
        }

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![DbValue::Integer(1), DbValue::Text("one".into())]);
        assert_eq!(rows[2], vec![DbValue::Integer(3), DbValue::Null]);
        assert_eq!(stmt.records_affected(), -1);
    }

    #[test]
    fn test_close_non_select_is_noop() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "UPDATE ITEMS SET X = 1 WHERE ID = ?").unwrap();
        stmt.set_parameter(0, DbValue::Integer(5)).unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();
        assert_eq!(stmt.records_affected(), 4);

        stmt.close(&mut att).unwrap();

        assert_eq!(stmt.state(), StatementState::Executed);
        assert!(att.freed.is_empty());
    }

    #[test]
    fn test_close_select_frees_cursor() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();
        let handle = stmt.handle().unwrap();

        stmt.close(&mut att).unwrap();

        assert_eq!(stmt.state(), StatementState::Closed);
        assert_eq!(att.freed, vec![(handle, FreeOption::Close)]);
    }

    #[test]
    fn test_re_execute_closes_open_cursor() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();
        stmt.fetch(&mut att).unwrap();

        stmt.execute(&mut att, &mut tx).unwrap();

        assert_eq!(att.freed.len(), 1);
        let first = stmt.fetch(&mut att).unwrap().unwrap();
        assert_eq!(first[0], DbValue::Integer(1));
    }

    #[test]
    fn test_release_from_prepared_and_executed() {
        let mut att = attachment();
        let mut tx = begin(&mut att);

        let mut prepared = Statement::new(3);
        prepared.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();
        prepared.release(&mut att).unwrap();
        assert_eq!(prepared.state(), StatementState::Deallocated);
        assert!(prepared.handle().is_none());

        let mut executed = Statement::new(3);
        executed.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();
        executed.execute(&mut att, &mut tx).unwrap();
        let handle = executed.handle().unwrap();
        executed.release(&mut att).unwrap();
        assert_eq!(executed.state(), StatementState::Deallocated);
        assert_eq!(att.freed.last(), Some(&(handle, FreeOption::Drop)));
    }

    #[test]
    fn test_server_error_moves_to_error_until_released() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();
        att.fail_execute = Some(FbError::server(335544569, "Dynamic SQL Error"));

        let err = stmt.execute(&mut att, &mut tx).unwrap_err();
        assert_eq!(err.code(), Some(335544569));
        assert_eq!(stmt.state(), StatementState::Error);

        let err = stmt.prepare(&mut att, &mut tx, "SELECT ID FROM ITEMS").unwrap_err();
        assert!(matches!(err, FbError::StateError(_)));

        stmt.release(&mut att).unwrap();
        assert_eq!(stmt.state(), StatementState::Deallocated);
        stmt.prepare(&mut att, &mut tx, "SELECT ID FROM ITEMS").unwrap();
        assert_eq!(stmt.state(), StatementState::Prepared);
    }

    #[test]
    fn test_release_unregisters_from_transaction() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();
        assert_eq!(tx.observer_count(), 1);

        stmt.release(&mut att).unwrap();

        assert_eq!(tx.observer_count(), 0);
    }

    #[test]
    fn test_describe_gives_up_after_repeated_truncation() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        att.always_truncate = true;
        let mut stmt = Statement::new(3);

        let err = stmt.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap_err();

        assert!(matches!(err, FbError::Truncated { attempts: 5 }));
        assert_eq!(att.info_lengths, vec![8192, 16384, 32768, 65536, 131072]);
        assert_eq!(stmt.state(), StatementState::Allocated);
    }

    #[test]
    fn test_stored_procedure_returns_singleton_row() {
        let mut att = MockAttachment::new();
        att.script(
            "EXECUTE PROCEDURE",
            Script::new(8)
                .column("TOTAL", DbDataType::BigInt, 8)
                .row(vec![DbValue::BigInt(42)]),
        );
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "EXECUTE PROCEDURE SUM_ITEMS").unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();

        assert_eq!(stmt.fetch(&mut att).unwrap(), Some(vec![DbValue::BigInt(42)]));
        assert_eq!(stmt.fetch(&mut att).unwrap(), None);
        assert_eq!(stmt.records_affected(), 0);
    }

    #[test]
    fn test_short_fetched_row_moves_to_error() {
        let mut att = attachment();
        att.short_row_at = Some(1);
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();

        let err = stmt.fetch(&mut att).unwrap_err();
        assert!(matches!(err, FbError::ProtocolError(_)));
        assert_eq!(stmt.state(), StatementState::Error);
        assert!(matches!(stmt.fetch(&mut att), Err(FbError::StateError(_))));

        stmt.release(&mut att).unwrap();
        assert_eq!(stmt.state(), StatementState::Deallocated);
    }

    #[test]
    fn test_short_singleton_row_moves_to_error() {
        let mut att = MockAttachment::new();
        att.script(
            "EXECUTE PROCEDURE",
            Script::new(8)
                .column("TOTAL", DbDataType::BigInt, 8)
                .row(vec![DbValue::BigInt(42)]),
        );
        att.short_row_at = Some(0);
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "EXECUTE PROCEDURE SUM_ITEMS").unwrap();

        let err = stmt.execute(&mut att, &mut tx).unwrap_err();
        assert!(matches!(err, FbError::ProtocolError(_)));
        assert_eq!(stmt.state(), StatementState::Error);
    }

    #[test]
    fn test_plan_text() {
        let mut att = MockAttachment::new();
        att.script(
            "FROM ITEMS",
            Script {
                plan: "PLAN (ITEMS NATURAL)".to_string(),
                ..select_script()
            },
        );
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT ID, NAME FROM ITEMS").unwrap();

        assert_eq!(stmt.plan(&mut att).unwrap(), "PLAN (ITEMS NATURAL)");
        assert_eq!(stmt.query_kind(&mut att).unwrap(), StatementKind::Select);
    }
}

// ============================================================================
// Transaction Tests
// ============================================================================

mod transaction_lifecycle {
    use super::*;

    #[test]
    fn test_commit_twice_is_state_error() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        tx.commit(&mut att).unwrap();

        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(matches!(tx.commit(&mut att), Err(FbError::StateError(_))));
        assert_eq!(att.committed, vec![tx.handle()]);
    }

    #[test]
    fn test_retaining_keeps_handle_and_bumps_generation() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        let handle = tx.handle();
        tx.commit_retaining(&mut att).unwrap();
        tx.rollback_retaining(&mut att).unwrap();

        assert!(tx.is_active());
        assert_eq!(tx.handle(), handle);
        assert_eq!(tx.generation(), 2);
        tx.rollback(&mut att).unwrap();
        assert_eq!(att.rolled_back, vec![handle]);
    }

    #[test]
    fn test_prepare_in_ended_transaction_fails() {
        let mut att = attachment();
        let mut tx = begin(&mut att);
        tx.rollback(&mut att).unwrap();
        let mut stmt = Statement::new(3);

        let err = stmt.prepare(&mut att, &mut tx, "SELECT ID FROM ITEMS").unwrap_err();
        assert!(matches!(err, FbError::StateError(_)));
    }
}

// ============================================================================
// Blob Streaming Tests
// ============================================================================

mod blob_streaming {
    use super::*;

    #[test]
    fn test_write_exact_multiple_of_segment_size() {
        let mut att = MockAttachment::new();
        let tx = begin(&mut att);
        let mut blob = Blob::new(&att, &tx, 0);
        blob.set_segment_size(4);

        let data: Vec<u8> = (0u8..12).collect();
        let id = blob.write(&mut att, &data).unwrap();

        assert_eq!(att.put_segments, vec![4, 4, 4]);
        assert_eq!(att.closed_blobs.len(), 1);
        assert_eq!(blob.state(), BlobState::Closed);
        assert_eq!(blob.id(), id);

        let mut reader = Blob::new(&att, &tx, id);
        reader.set_segment_size(5);
        assert_eq!(reader.read(&mut att).unwrap(), data);
    }

    #[test]
    fn test_write_remainder_in_last_segment() {
        let mut att = MockAttachment::new();
        let tx = begin(&mut att);
        let mut blob = Blob::new(&att, &tx, 0);
        blob.set_segment_size(4);

        blob.write(&mut att, &[7u8; 10]).unwrap();

        assert_eq!(att.put_segments, vec![4, 4, 2]);
    }

    #[test]
    fn test_empty_blob_is_valid() {
        let mut att = MockAttachment::new();
        let tx = begin(&mut att);
        let mut blob = Blob::new(&att, &tx, 0);

        let id = blob.write(&mut att, &[]).unwrap();

        assert!(att.put_segments.is_empty());
        assert_eq!(att.blobs.get(&id), Some(&Vec::new()));
        assert!(Blob::new(&att, &tx, id).read(&mut att).unwrap().is_empty());
    }

    #[test]
    fn test_segment_size_follows_packet_size() {
        let mut att = MockAttachment::new();
        att.packet_size = 100_000;
        let tx = begin(&mut att);
        assert_eq!(Blob::new(&att, &tx, 0).segment_size(), u16::MAX as usize);
        att.packet_size = 1024;
        assert_eq!(Blob::new(&att, &tx, 0).segment_size(), 1024);
    }

    #[test]
    fn test_read_error_cancels_exactly_once() {
        let mut att = MockAttachment::new();
        att.blobs.insert(77, vec![1u8; 10]);
        att.fail_get_segment_at = Some(2);
        let tx = begin(&mut att);
        let mut blob = Blob::new(&att, &tx, 77);
        blob.set_segment_size(4);

        let err = blob.read(&mut att).unwrap_err();

        assert!(err.is_fatal_for_connection());
        assert_eq!(att.cancelled_blobs.len(), 1);
        assert!(att.closed_blobs.is_empty());
    }

    #[test]
    fn test_write_error_cancels_exactly_once() {
        let mut att = MockAttachment::new();
        att.fail_put_segment_at = Some(2);
        let tx = begin(&mut att);
        let mut blob = Blob::new(&att, &tx, 0);
        blob.set_segment_size(4);

        assert!(blob.write(&mut att, &[0u8; 12]).is_err());

        assert_eq!(att.put_segments, vec![4]);
        assert_eq!(att.cancelled_blobs.len(), 1);
        assert!(att.blobs.is_empty());
        assert_eq!(blob.id(), 0);
    }

    #[test]
    fn test_text_blob_round_trip() {
        let mut att = MockAttachment::new();
        let tx = begin(&mut att);
        let mut blob = Blob::new(&att, &tx, 0);
        let id = blob.write_string(&mut att, "grüße").unwrap();

        let mut reader = Blob::new(&att, &tx, id);
        assert_eq!(reader.read_string(&mut att).unwrap(), "grüße");
    }
}

// ============================================================================
// Array Streaming Tests
// ============================================================================

mod array_streaming {
    use super::*;

    fn int_slice(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn array_attachment() -> MockAttachment {
        let mut att = MockAttachment::new();
        att.int_array_catalog("TAB", "A", ArrayBound { lower: 1, upper: 5 });
        att.script(
            "FROM TAB",
            Script::new(1)
                .array_column("TAB", "A")
                .row(vec![DbValue::Quad(500)]),
        );
        att.script("INSERT INTO TAB", Script::new(2).array_param("TAB", "A"));
        att.slices.insert(500, int_slice(&[10, 20, 30, 40, 50]));
        att
    }

    #[test]
    fn test_read_declared_bounds() {
        let mut att = array_attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT A FROM TAB").unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();
        stmt.fetch(&mut att).unwrap().unwrap();

        let array = stmt.read_array(&mut att, &mut tx, 0).unwrap().unwrap();

        assert_eq!(att.slice_requests, vec![20]);
        assert_eq!(array.lower_bounds, vec![1]);
        assert_eq!(array.lengths, vec![5]);
        assert_eq!(array.elements[4], DbValue::Integer(50));
        let fields = stmt.fields();
        let handle = fields.field(0).unwrap().array_handle().unwrap();
        assert_eq!(handle.slice_length(), 20);
        assert_eq!(handle.handle(), 500);
    }

    #[test]
    fn test_write_reshapes_upper_bound() {
        let mut att = array_attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "INSERT INTO TAB (A) VALUES (?)").unwrap();

        let values: Vec<DbValue> = (1..=7).map(DbValue::Integer).collect();
        let id = stmt
            .write_array(&mut att, &mut tx, 0, &DbArray::from_vec(values))
            .unwrap();

        assert_eq!(att.slices[&id], int_slice(&[1, 2, 3, 4, 5, 6, 7]));
        let params = stmt.parameters();
        let field = params.field(0).unwrap();
        assert_eq!(field.value(), &DbValue::Quad(id));
        let bound = field.array_handle().unwrap().desc().bounds[0];
        assert_eq!(bound, ArrayBound { lower: 1, upper: 7 });
    }

    #[test]
    fn test_commit_drops_array_handles() {
        let mut att = array_attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT A FROM TAB").unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();
        stmt.fetch(&mut att).unwrap();
        stmt.read_array(&mut att, &mut tx, 0).unwrap();
        assert!(stmt.fields().has_array_handles());

        tx.commit(&mut att).unwrap();

        assert!(!stmt.fields().has_array_handles());
    }

    #[test]
    fn test_retaining_commit_keeps_array_handles() {
        let mut att = array_attachment();
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT A FROM TAB").unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();
        stmt.fetch(&mut att).unwrap();
        stmt.read_array(&mut att, &mut tx, 0).unwrap();

        tx.commit_retaining(&mut att).unwrap();

        assert!(stmt.fields().has_array_handles());
    }

    #[test]
    fn test_unknown_column_not_describable() {
        let mut att = MockAttachment::new();
        att.script(
            "RDB$RELATION_FIELDS",
            Script::new(1)
                .column("RDB$FIELD_TYPE", DbDataType::SmallInt, 2)
                .param(DbDataType::VarChar, 31)
                .param(DbDataType::VarChar, 31),
        );
        att.script(
            "FROM TAB",
            Script::new(1).array_column("TAB", "B").row(vec![DbValue::Quad(9)]),
        );
        let mut tx = begin(&mut att);
        let mut stmt = Statement::new(3);
        stmt.prepare(&mut att, &mut tx, "SELECT B FROM TAB").unwrap();
        stmt.execute(&mut att, &mut tx).unwrap();
        stmt.fetch(&mut att).unwrap();

        let err = stmt.read_array(&mut att, &mut tx, 0).unwrap_err();
        assert!(matches!(err, FbError::NotDescribable { .. }));
    }
}

// ============================================================================
// Connection Pool Tests
// ============================================================================

mod connection_pool {
    use super::*;

    fn options(min: usize, max: usize) -> ConnectionOptions {
        init_tracing();
        ConnectionOptions::new("pool.fdb")
            .pool_size(min, max)
            .connection_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_min_population_is_reused() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(options(2, 3), factory.clone()).unwrap();
        assert_eq!(factory.connect_count(), 2);
        assert_eq!(pool.idle_count(), 2);

        let _a = pool.checkout().unwrap();
        let _b = pool.checkout().unwrap();

        assert_eq!(factory.connect_count(), 2);
        assert_eq!(pool.population(), 2);
        assert_eq!(pool.checked_out_count(), 2);
    }

    #[test]
    fn test_checkout_blocks_until_checkin() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(
            options(2, 3).connection_timeout(Duration::from_secs(5)),
            factory.clone(),
        )
        .unwrap();
        let a = pool.checkout().unwrap();
        let _b = pool.checkout().unwrap();
        let _c = pool.checkout().unwrap();
        assert_eq!(pool.population(), 3);

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let conn = pool.checkout();
                (conn.is_ok(), start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(100));
        drop(a);

        let (ok, waited) = waiter.join().unwrap();
        assert!(ok);
        assert!(waited >= Duration::from_millis(80), "waited {:?}", waited);
        assert_eq!(factory.connect_count(), 3);
    }

    #[test]
    fn test_checkout_times_out() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(options(0, 1), factory.clone()).unwrap();
        let held = pool.checkout().unwrap();

        let start = Instant::now();
        let err = pool.checkout().unwrap_err();

        assert!(matches!(err, FbError::PoolTimeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(format!("{:?}", held).contains("broken: false"));
    }

    #[test]
    fn test_expired_idle_served_at_minimum() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(
            options(1, 2).connection_lifetime(Duration::from_millis(300)),
            factory.clone(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(400));
        let conn = pool.checkout().unwrap();

        assert_eq!(factory.connect_count(), 1);
        assert_eq!(factory.detach_count(), 0);
        drop(conn);
        assert_eq!(pool.population(), 1);
    }

    #[test]
    fn test_expired_idle_replaced_above_minimum() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(
            options(0, 2).connection_lifetime(Duration::from_millis(300)),
            factory.clone(),
        )
        .unwrap();
        let conn = pool.checkout().unwrap();
        // Return it between sweeps so only checkout sees it expire.
        thread::sleep(Duration::from_millis(100));
        drop(conn);
        thread::sleep(Duration::from_millis(350));

        let _conn = pool.checkout().unwrap();

        assert_eq!(factory.connect_count(), 2);
        assert_eq!(factory.detach_count(), 1);
        assert_eq!(pool.population(), 1);
    }

    #[test]
    fn test_sweep_keeps_minimum() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(
            options(1, 3).connection_lifetime(Duration::from_millis(50)),
            factory.clone(),
        )
        .unwrap();
        let conns: Vec<_> = (0..3).map(|_| pool.checkout().unwrap()).collect();
        drop(conns);
        assert_eq!(pool.idle_count(), 3);

        thread::sleep(Duration::from_millis(150));
        pool.sweep();

        assert_eq!(pool.population(), 1);
        assert_eq!(factory.detach_count(), 2);
    }

    #[test]
    fn test_empty_pool_notification() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(
            options(0, 2).connection_lifetime(Duration::from_millis(30)),
            factory.clone(),
        )
        .unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        pool.set_empty_callback(Arc::new(move |_key: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        drop(pool.checkout().unwrap());

        thread::sleep(Duration::from_millis(100));
        pool.sweep();

        assert_eq!(pool.population(), 0);
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_broken_connection_is_discarded() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(options(0, 2), factory.clone()).unwrap();
        let mut conn = pool.checkout().unwrap();
        conn.observe_error(&FbError::server(crate::error::ISC_NET_READ_ERR, "read failed"));
        assert!(conn.is_broken());

        drop(conn);

        assert_eq!(pool.population(), 0);
        assert_eq!(factory.detach_count(), 1);
    }

    #[test]
    fn test_dead_idle_connection_is_replaced() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(options(1, 2), factory.clone()).unwrap();
        factory.alive.lock()[0].store(false, Ordering::SeqCst);

        let mut conn = pool.checkout().unwrap();

        assert!(conn.attachment().unwrap().verify());
        assert_eq!(factory.connect_count(), 2);
        assert_eq!(factory.detach_count(), 1);
    }

    #[test]
    fn test_explicit_checkin_returns_to_idle() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(options(0, 2), factory.clone()).unwrap();
        let conn = pool.checkout().unwrap();
        conn.checkin();

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.checked_out_count(), 0);
    }

    #[test]
    fn test_clear_fails_later_checkouts() {
        let factory = Arc::new(MockFactory::default());
        let pool = FbPool::new(options(2, 3), factory.clone()).unwrap();
        let held = pool.checkout().unwrap();

        pool.clear();

        assert!(matches!(pool.checkout(), Err(FbError::PoolError(_))));
        assert_eq!(factory.detach_count(), 1);
        drop(held);
        assert_eq!(factory.detach_count(), 2);
        assert_eq!(pool.population(), 0);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let factory = Arc::new(MockFactory::default());
        assert!(matches!(
            FbPool::new(options(3, 1), factory),
            Err(FbError::ConfigError(_))
        ));
    }
}

// ============================================================================
// Services Tests
// ============================================================================

mod services_client {
    use super::*;

    const VERSION: &str = "WI-V3.0.10.33601 Firebird 3.0";

    fn client(buffer: usize) -> ServiceClient<MockServiceManager> {
        let manager = MockServiceManager {
            server_version: VERSION.to_string(),
            ..Default::default()
        };
        let options = ServiceOptions {
            query_buffer_size: buffer,
            ..Default::default()
        };
        ServiceClient::new(manager, options)
    }

    #[test]
    fn test_server_version_retries_doubled_buffer() {
        let mut client = client(16);

        assert_eq!(client.server_version().unwrap(), VERSION);
        assert_eq!(client.manager().query_lengths, vec![16, 32, 64]);
        assert!(client.is_attached());
    }

    #[test]
    fn test_query_gives_up_when_still_truncated() {
        let mut client = client(1);

        let err = client.server_version().unwrap_err();

        assert!(matches!(err, FbError::Truncated { attempts: 5 }));
        assert_eq!(client.manager().query_lengths, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn test_run_collects_output_lines() {
        let manager = MockServiceManager {
            lines: ["gbak: starting", "gbak: done"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let mut client = ServiceClient::new(manager, ServiceOptions::default());

        let lines = client.run(&ServiceAction::GetLog).unwrap();

        assert_eq!(lines, vec!["gbak: starting", "gbak: done"]);
        let manager = client.manager();
        assert_eq!(manager.started, vec![vec![ISC_ACTION_SVC_GET_LOG]]);
        assert_eq!(
            manager.attached.as_ref().map(|(name, _)| name.as_str()),
            Some(SERVICE_MANAGER_NAME)
        );
    }

    #[test]
    fn test_display_users() {
        let manager = MockServiceManager {
            users: vec![("ALICE".to_string(), 7), ("BOB".to_string(), 8)],
            ..Default::default()
        };
        let mut client = ServiceClient::new(manager, ServiceOptions::default());

        let users = client.display_users(None).unwrap();

        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user_name, "ALICE");
        assert_eq!(users[1].user_id, 8);
    }

    #[test]
    fn test_detach_after_use() {
        let mut client = client(DEFAULT_QUERY_BUFFER_SIZE);
        client.server_version().unwrap();
        client.detach().unwrap();

        assert!(!client.is_attached());
        assert!(client.manager().detached);
    }
}

// ============================================================================
// Event Tests
// ============================================================================

mod event_counts {
    use super::*;

    fn delivery(pairs: &[(&str, i32)]) -> Vec<u8> {
        let mut epb = ParameterBuffer::event(Charset::Utf8);
        for (name, count) in pairs {
            epb.append_event(name, *count).unwrap();
        }
        epb.as_bytes().to_vec()
    }

    #[test]
    fn test_first_delivery_sets_baseline() {
        let mut att = MockAttachment::new();
        let mut sub = EventSubscription::new(&["ORDER_PLACED", "ORDER_SHIPPED"], Charset::Utf8).unwrap();
        sub.queue(&mut att).unwrap();

        let fired = sub
            .handle_notification(&mut att, &delivery(&[("ORDER_PLACED", 3), ("ORDER_SHIPPED", 1)]))
            .unwrap();

        assert!(fired.is_empty());
        assert_eq!(sub.counts(), &[3, 1]);
        assert_eq!(att.queued_events.len(), 2);
    }

    #[test]
    fn test_only_grown_counts_fire() {
        let mut att = MockAttachment::new();
        let mut sub = EventSubscription::new(&["ORDER_PLACED", "ORDER_SHIPPED"], Charset::Utf8).unwrap();
        sub.queue(&mut att).unwrap();
        sub.handle_notification(&mut att, &delivery(&[("ORDER_PLACED", 3), ("ORDER_SHIPPED", 1)]))
            .unwrap();

        let fired = sub
            .handle_notification(&mut att, &delivery(&[("ORDER_PLACED", 5), ("ORDER_SHIPPED", 1)]))
            .unwrap();

        assert_eq!(fired, vec![("ORDER_PLACED".to_string(), 2)]);
        assert!(sub.is_queued());
        let expected = sub.to_epb().unwrap().as_bytes().to_vec();
        assert_eq!(att.queued_events.last(), Some(&expected));
    }

    #[test]
    fn test_cancel_releases_handle() {
        let mut att = MockAttachment::new();
        let mut sub = EventSubscription::new(&["E"], Charset::Utf8).unwrap();
        let handle = sub.queue(&mut att).unwrap();

        sub.cancel(&mut att).unwrap();
        sub.cancel(&mut att).unwrap();

        assert_eq!(att.cancelled_events, vec![handle]);
        assert!(!sub.is_queued());
    }
}
