
use arrow_array::Array;
use pq_core::*;
use test_helpers::*;

#[test]
fn test_round_trip_all_types_and_thread_counts() {
    let layout = all_types_layout();
    let store = random_store(&layout, 2_500, 7, None);
    let engine = quiet_engine(4);

    let special_sets: [&[&str]; 4] = [&[], &["long"], &["short", "long"], &["i32", "long"]];
    for threads in [1, 2, 4, 8] {
        for special in special_sets {
            let copy = round_trip(&engine, &store, threads, special);
            assert_stores_equal(&store, &copy);
        }
    }
}

#[test]
fn test_round_trip_with_binary_long_text() {
    let layout = all_types_layout();
    let store = random_store(&layout, 1_000, 11, Some(97));
    let engine = quiet_engine(4);

    for threads in [1, 4] {
        let copy = round_trip(&engine, &store, threads, &["long"]);
        assert_stores_equal(&store, &copy);
    }
}

#[test]
fn test_empty_string_round_trips_to_empty() {
    let store = MemoryStore::with_layout(
        &[
            ("short", StoreType::Text { width: 4 }),
            ("long", StoreType::LongText),
        ],
        3,
    )
    .unwrap();
    store.store_text(1, 1, "ab").unwrap();
    store.store_text(1, 2, "").unwrap();
    store.store_long_text(2, 3, "tail").unwrap();

    let engine = quiet_engine(2);
    let batch = engine
        .export_batch(&store, &ExportRequest::new(["short", "long"], 0, 3))
        .unwrap();
    // short: explicit empty at row 2, default empty at row 3
    assert_eq!(batch.column(0).null_count(), 2);
    assert_eq!(batch.column(1).null_count(), 2);

    let copy = round_trip(&engine, &store, 2, &[]);
    assert_eq!(copy.short_string(1, 2).unwrap(), "");
    assert_eq!(copy.long_text(2, 1).unwrap(), "");
    assert_stores_equal(&store, &copy);
}

#[test]
fn test_round_trip_through_descriptor_handles() {
    let layout = all_types_layout();
    let store = random_store(&layout, 500, 3, Some(50));
    let engine = quiet_engine(3);

    let request = ExportRequest::new(column_names(&layout), 0, store.row_count());
    let handles = engine.export_handles(&store, &request).unwrap();

    let copy = empty_like(&store);
    let summary =
        unsafe { engine.assign_handles(&copy, handles, &import_request_for(&copy, 1)) }.unwrap();
    assert_eq!(summary.rows, 500);
    assert_stores_equal(&store, &copy);

    // import moved the content out; the shells are still released by the engine
    engine.release_arrow_pointers(handles).unwrap();
    assert_eq!(engine.outstanding_handles(), 0);
}

#[test]
fn test_export_window_and_import_offset() {
    let layout = vec![("x", StoreType::Int32), ("s", StoreType::Text { width: 8 })];
    let store = MemoryStore::with_layout(&layout, 10).unwrap();
    for row in 1..=10 {
        store.store_number(1, row, row as f64).unwrap();
        store.store_text(2, row, &format!("r{}", row)).unwrap();
    }

    let engine = quiet_engine(2);
    // 0-based start row 3 reads store rows 4..=7
    let batch = engine
        .export_batch(&store, &ExportRequest::new(["x", "s"], 3, 4))
        .unwrap();
    assert_eq!(batch.num_rows(), 4);

    // 1-based base row 2 writes batch rows 0..4 to store rows 2..=5
    let target = MemoryStore::with_layout(&layout, 6).unwrap();
    let request = ImportRequest::new(2).map_column("x", 1).map_column("s", 2);
    engine.assign_batch(&target, &batch, &request).unwrap();

    assert!(target.is_missing(target.number(1, 1).unwrap()));
    for (row, expected) in (2..=5).zip(4..=7) {
        assert_eq!(target.number(1, row).unwrap(), expected as f64);
        assert_eq!(target.short_string(2, row).unwrap(), format!("r{}", expected));
    }
    assert!(target.is_missing(target.number(1, 6).unwrap()));
}

#[test]
fn test_export_past_end_is_null() {
    let store = MemoryStore::with_layout(&[("x", StoreType::Float64)], 3).unwrap();
    for row in 1..=3 {
        store.store_number(1, row, row as f64 / 2.0).unwrap();
    }

    let engine = quiet_engine(2);
    let batch = engine
        .export_batch(&store, &ExportRequest::new(["x"], 1, 5))
        .unwrap();
    assert_eq!(batch.num_rows(), 5);
    let column = batch.column(0);
    assert_eq!(column.null_count(), 3);
    assert!(column.is_valid(0));
    assert!(column.is_valid(1));
}
