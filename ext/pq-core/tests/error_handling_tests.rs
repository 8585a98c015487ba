
use std::sync::Arc;

use arrow::ffi::{to_ffi, FFI_ArrowArray, FFI_ArrowSchema};
use arrow_array::{Array, ArrayRef, Date32Array, Int32Array, RecordBatch, StringArray, StructArray};
use pq_core::*;
use test_helpers::*;

#[test]
fn test_double_export_handles_are_independent() {
    let layout = all_types_layout();
    let store = random_store(&layout, 200, 17, Some(20));
    let engine = quiet_engine(2);
    let request = ExportRequest::new(column_names(&layout), 0, 200);

    let first = engine.export_handles(&store, &request).unwrap();
    let second = engine.export_handles(&store, &request).unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.outstanding_handles(), 2);

    // releasing one leaves the other importable
    engine.release_arrow_pointers(first).unwrap();
    let copy = empty_like(&store);
    unsafe { engine.assign_handles(&copy, second, &import_request_for(&copy, 1)) }.unwrap();
    assert_stores_equal(&store, &copy);

    engine.release_arrow_pointers(second).unwrap();
    assert_eq!(engine.outstanding_handles(), 0);
}

#[test]
fn test_double_release_is_a_usage_error() {
    let store = random_store(&[("x", StoreType::Float64)], 10, 1, None);
    let engine = quiet_engine(1);
    let handles = engine
        .export_handles(&store, &ExportRequest::new(["x"], 0, 10))
        .unwrap();

    engine.release_arrow_pointers(handles).unwrap();
    let err = engine.release_arrow_pointers(handles).unwrap_err();
    assert!(matches!(err, TransposeError::InvalidHandle(_)));
    assert!(err.to_string().contains("already released"));
}

#[test]
fn test_unknown_export_column() {
    let store = random_store(&[("x", StoreType::Float64)], 10, 1, None);
    let engine = quiet_engine(1);
    let err = engine
        .export_batch(&store, &ExportRequest::new(["x", "nope"], 0, 10))
        .unwrap_err();
    match err {
        TransposeError::Stage { stage, source } => {
            assert_eq!(stage, Stage::Export);
            assert!(matches!(*source, TransposeError::UnknownColumn(ref n) if n == "nope"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unsupported_import_type_is_skipped() {
    let store = MemoryStore::with_layout(
        &[("id", StoreType::Int32), ("day", StoreType::Int32)],
        2,
    )
    .unwrap();
    let batch = RecordBatch::try_from_iter(vec![
        ("id", Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef),
        ("day", Arc::new(Date32Array::from(vec![10, 20])) as ArrayRef),
    ])
    .unwrap();

    let engine = quiet_engine(2);
    let summary = engine
        .assign_batch(&store, &batch, &import_request_for(&store, 1))
        .unwrap();
    assert_eq!(summary.skipped_columns, vec!["day".to_string()]);
    assert_eq!(store.number(1, 2).unwrap(), 2.0);
    assert!(store.is_missing(store.number(2, 1).unwrap()));
}

#[test]
fn test_unmapped_import_columns_are_dropped() {
    let store = MemoryStore::with_layout(&[("id", StoreType::Int32)], 2).unwrap();
    let batch = RecordBatch::try_from_iter(vec![
        ("id", Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef),
        ("extra", Arc::new(Int32Array::from(vec![3, 4])) as ArrayRef),
    ])
    .unwrap();

    let engine = quiet_engine(2);
    let summary = engine
        .assign_batch(&store, &batch, &ImportRequest::new(1).map_column("id", 1))
        .unwrap();
    assert_eq!(summary.regular_columns, 1);
    assert!(summary.skipped_columns.is_empty());
}

#[test]
fn test_import_rows_must_fit_the_store() {
    let store = MemoryStore::with_layout(&[("id", StoreType::Int32)], 2).unwrap();
    let batch = RecordBatch::try_from_iter(vec![(
        "id",
        Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef,
    )])
    .unwrap();
    let engine = quiet_engine(2);

    let err = engine
        .assign_batch(&store, &batch, &ImportRequest::new(2).map_column("id", 1))
        .unwrap_err();
    assert!(err.to_string().contains("exceed"));

    let err = engine
        .assign_batch(&store, &batch, &ImportRequest::new(0).map_column("id", 1))
        .unwrap_err();
    assert!(err.to_string().contains("1-based"));
}

#[test]
fn test_store_failure_inside_a_wave_names_the_batch() {
    let store = MemoryStore::with_layout(&[("s", StoreType::Text { width: 3 })], 40).unwrap();
    let values: Vec<String> = (0..40)
        .map(|i| if i == 33 { "too long".to_string() } else { "ok".to_string() })
        .collect();
    let batch = RecordBatch::try_from_iter(vec![(
        "s",
        Arc::new(StringArray::from(values)) as ArrayRef,
    )])
    .unwrap();

    let engine = quiet_engine(4);
    let err = engine
        .assign_batch(&store, &batch, &ImportRequest::new(1).map_column("s", 1))
        .unwrap_err();
    let TransposeError::Stage { stage, source } = err else {
        panic!("expected a staged error");
    };
    assert_eq!(stage, Stage::Import);
    match *source {
        TransposeError::Batch {
            batch, start, end, ..
        } => assert_eq!((batch, start, end), (3, 30, 40)),
        other => panic!("unexpected error: {other}"),
    }
    // sibling batches still completed
    assert_eq!(store.short_string(1, 1).unwrap(), "ok");
    assert_eq!(store.short_string(1, 30).unwrap(), "ok");
}

#[test]
fn test_mismatched_name_and_index_lists() {
    let err = ImportRequest::from_pairs(1, 1, vec![], vec!["a".to_string()], vec![]).unwrap_err();
    assert!(matches!(err, TransposeError::InvalidArgument(_)));
}

#[test]
fn test_handles_after_close_still_release() {
    let store = random_store(&[("x", StoreType::Int16)], 5, 2, None);
    let engine = quiet_engine(1);
    let handles = engine
        .export_handles(&store, &ExportRequest::new(["x"], 0, 5))
        .unwrap();

    engine.close();
    assert!(engine
        .export_handles(&store, &ExportRequest::new(["x"], 0, 5))
        .unwrap_err()
        .is_unavailable());
    engine.release_arrow_pointers(handles).unwrap();
}

/// Descriptor pair owned by the test, standing in for a foreign producer
struct ForeignPair {
    schema: *mut FFI_ArrowSchema,
    array: *mut FFI_ArrowArray,
}

impl ForeignPair {
    fn new(batch: RecordBatch) -> Self {
        let data = StructArray::from(batch).into_data();
        let (array, schema) = to_ffi(&data).unwrap();
        Self {
            schema: Box::into_raw(Box::new(schema)),
            array: Box::into_raw(Box::new(array)),
        }
    }

    fn handles(&self) -> ArrowHandles {
        ArrowHandles::new(self.schema as usize, self.array as usize)
    }

    fn is_released(&self) -> bool {
        unsafe { (*self.array).is_released() }
    }
}

impl Drop for ForeignPair {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.array));
            drop(Box::from_raw(self.schema));
        }
    }
}

fn three_ids() -> RecordBatch {
    RecordBatch::try_from_iter(vec![(
        "id",
        Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef,
    )])
    .unwrap()
}

#[test]
fn test_assign_handles_consumes_the_pair_on_every_outcome() {
    let store = MemoryStore::with_layout(&[("id", StoreType::Int32)], 3).unwrap();

    // success
    let engine = quiet_engine(2);
    let pair = ForeignPair::new(three_ids());
    unsafe { engine.assign_handles(&store, pair.handles(), &import_request_for(&store, 1)) }
        .unwrap();
    assert!(pair.is_released());

    // store index past the last variable
    let pair = ForeignPair::new(three_ids());
    let bad_index = ImportRequest::new(1).map_column("id", 9);
    assert!(unsafe { engine.assign_handles(&store, pair.handles(), &bad_index) }.is_err());
    assert!(pair.is_released());

    // rows past the end of the store
    let pair = ForeignPair::new(three_ids());
    let too_far = ImportRequest::new(2).map_column("id", 1);
    assert!(unsafe { engine.assign_handles(&store, pair.handles(), &too_far) }.is_err());
    assert!(pair.is_released());

    // closed engine
    engine.close();
    let pair = ForeignPair::new(three_ids());
    let err = unsafe { engine.assign_handles(&store, pair.handles(), &import_request_for(&store, 1)) }
        .unwrap_err();
    assert!(err.is_unavailable());
    assert!(pair.is_released());
}

#[test]
fn test_row_offsets_that_overflow_are_argument_errors() {
    let store = MemoryStore::with_layout(&[("id", StoreType::Int32)], 3).unwrap();
    let engine = quiet_engine(2);

    let err = engine
        .assign_batch(&store, &three_ids(), &ImportRequest::new(usize::MAX).map_column("id", 1))
        .unwrap_err();
    assert!(err.to_string().contains("overflow"), "{err}");

    let err = engine
        .export_batch(&store, &ExportRequest::new(["id"], usize::MAX, 1))
        .unwrap_err();
    let TransposeError::Stage { source, .. } = err else {
        panic!("expected a staged error");
    };
    assert!(matches!(*source, TransposeError::InvalidArgument(_)));

    let err = engine
        .prescan_binary(&store, &["id".to_string()], usize::MAX, 0)
        .unwrap_err();
    assert!(err.to_string().contains("overflow"), "{err}");
}

#[test]
fn test_long_text_store_fault_keeps_its_kind() {
    let store = MemoryStore::with_layout(&[("memo", StoreType::Int32)], 2).unwrap();
    let batch = RecordBatch::try_from_iter(vec![(
        "memo",
        Arc::new(StringArray::from(vec!["a", "b"])) as ArrayRef,
    )])
    .unwrap();
    let engine = quiet_engine(1);
    let request = ImportRequest::new(1)
        .with_special(["memo"])
        .map_column("memo", 1);

    let err = engine.assign_batch(&store, &batch, &request).unwrap_err();
    let TransposeError::Stage { source, .. } = err else {
        panic!("expected a staged error");
    };
    match *source {
        TransposeError::Context { message, source } => {
            assert!(message.contains("memo"));
            assert!(matches!(*source, TransposeError::Store(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}
