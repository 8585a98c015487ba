
use std::collections::BTreeSet;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::Array;
use arrow_schema::DataType;
use parking_lot::Mutex;
use pq_core::*;
use test_helpers::*;

#[derive(Default)]
struct Capture(Mutex<Vec<(LogLevel, String)>>);

impl LogSink for Capture {
    fn write(&self, level: LogLevel, message: &str) {
        self.0.lock().push((level, message.to_string()));
    }
}

/// Delegates to a [`MemoryStore`] but fails to open one cell's connector
struct FaultyConnectorStore {
    inner: MemoryStore,
    bad: (usize, usize),
}

impl RowStore for FaultyConnectorStore {
    fn variable_index(&self, name: &str) -> Option<usize> {
        self.inner.variable_index(name)
    }
    fn variable_name(&self, index: usize) -> Option<String> {
        self.inner.variable_name(index)
    }
    fn variable_count(&self) -> usize {
        self.inner.variable_count()
    }
    fn store_type(&self, index: usize) -> Result<StoreType> {
        self.inner.store_type(index)
    }
    fn row_count(&self) -> usize {
        self.inner.row_count()
    }
    fn number(&self, index: usize, row: usize) -> Result<f64> {
        self.inner.number(index, row)
    }
    fn is_missing(&self, value: f64) -> bool {
        self.inner.is_missing(value)
    }
    fn short_string(&self, index: usize, row: usize) -> Result<String> {
        self.inner.short_string(index, row)
    }
    fn long_text(&self, index: usize, row: usize) -> Result<String> {
        self.inner.long_text(index, row)
    }
    fn open_connector(&self, index: usize, row: usize) -> Result<Box<dyn BinaryConnector + '_>> {
        if (index, row) == self.bad {
            return Err(TransposeError::store("connector unavailable"));
        }
        self.inner.open_connector(index, row)
    }
    fn store_number(&self, index: usize, row: usize, value: f64) -> Result<()> {
        self.inner.store_number(index, row, value)
    }
    fn store_text(&self, index: usize, row: usize, value: &str) -> Result<()> {
        self.inner.store_text(index, row, value)
    }
    fn store_binary(&self, index: usize, row: usize, value: &[u8]) -> Result<()> {
        self.inner.store_binary(index, row, value)
    }
}

fn text_and_blob_store(rows: usize) -> MemoryStore {
    let store = MemoryStore::with_layout(
        &[("clean", StoreType::LongText), ("mixed", StoreType::LongText)],
        rows,
    )
    .unwrap();
    for row in 1..=rows {
        store.store_long_text(1, row, &format!("clean {}", row)).unwrap();
        store.store_long_text(2, row, &format!("mixed {}", row)).unwrap();
    }
    store
}

#[test]
fn test_one_binary_row_makes_column_binary() {
    let store = text_and_blob_store(50);
    store.store_binary(2, 30, &[0x80, 0x81, 0x00]).unwrap();

    let engine = quiet_engine(4);
    let batch = engine
        .export_batch(
            &store,
            &ExportRequest::new(["clean", "mixed"], 0, 50).with_special(["clean", "mixed"]),
        )
        .unwrap();

    assert_eq!(batch.schema().field(0).data_type(), &DataType::Utf8View);
    assert_eq!(batch.schema().field(1).data_type(), &DataType::Binary);

    let clean = batch.column(0).as_string_view();
    assert_eq!(clean.value(0), "clean 1");

    // text rows of a binary column come through as their UTF-8 bytes
    let mixed = batch.column(1).as_binary::<i32>();
    assert_eq!(mixed.value(0), b"mixed 1");
    assert_eq!(mixed.value(29), &[0x80, 0x81, 0x00]);
    assert_eq!(mixed.null_count(), 0);
}

#[test]
fn test_binary_decision_uses_requested_rows() {
    let store = text_and_blob_store(50);
    store.store_binary(2, 30, &[0xff]).unwrap();
    let engine = quiet_engine(2);

    let before = engine
        .export_batch(&store, &ExportRequest::new(["mixed"], 0, 20))
        .unwrap();
    assert_eq!(before.schema().field(0).data_type(), &DataType::Utf8View);

    let names = vec!["clean".to_string(), "mixed".to_string()];
    let scanned = engine.prescan_binary(&store, &names, 0, 50).unwrap();
    assert_eq!(scanned, BTreeSet::from(["mixed".to_string()]));
    assert!(engine.prescan_binary(&store, &names, 0, 29).unwrap().is_empty());
}

#[test]
fn test_binary_hint_skips_prescan() {
    let store = text_and_blob_store(10);
    let engine = quiet_engine(2);

    // clean text, but the caller pins the column to binary
    let request = ExportRequest::new(["clean"], 0, 10)
        .with_binary_hint(BTreeSet::from(["clean".to_string()]));
    let batch = engine.export_batch(&store, &request).unwrap();
    assert_eq!(batch.schema().field(0).data_type(), &DataType::Binary);
    assert_eq!(batch.column(0).as_binary::<i32>().value(9), b"clean 10");

    // an empty hint keeps a binary column as text, which then fails to read
    store.store_binary(1, 4, &[0xfe]).unwrap();
    let request = ExportRequest::new(["clean"], 0, 10).with_binary_hint(BTreeSet::new());
    let err = engine.export_batch(&store, &request).unwrap_err();
    assert!(err.to_string().starts_with("export failed"));
}

#[test]
fn test_binary_read_fault_sets_null_and_warns() {
    let inner = text_and_blob_store(6);
    inner.store_binary(2, 1, &[0xc0]).unwrap();
    let store = FaultyConnectorStore { inner, bad: (2, 4) };

    let capture = Arc::new(Capture::default());
    let engine = Engine::new(
        EngineConfig::builder()
            .default_threads(2)
            .log_level(LogLevel::Warn)
            .build(),
    );
    engine.set_log_sink(capture.clone());

    let batch = engine
        .export_batch(&store, &ExportRequest::new(["mixed"], 0, 6))
        .unwrap();
    let mixed = batch.column(0).as_binary::<i32>();
    assert_eq!(mixed.null_count(), 1);
    assert!(mixed.is_null(3));
    assert_eq!(mixed.value(4), b"mixed 5");

    let lines = capture.0.lock();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].0, LogLevel::Warn);
    assert!(lines[0].1.contains("row 4"));
}

#[test]
fn test_import_binary_column_is_sequential_binary_write() {
    let store = MemoryStore::with_layout(&[("blob", StoreType::LongText)], 3).unwrap();
    let values: Vec<Option<&[u8]>> = vec![Some(&[1u8, 2, 3][..]), None, Some(&b"ok"[..])];
    let batch = arrow_array::RecordBatch::try_from_iter(vec![(
        "blob",
        Arc::new(arrow_array::BinaryArray::from(values)) as arrow_array::ArrayRef,
    )])
    .unwrap();

    let engine = quiet_engine(2);
    let summary = engine
        .assign_batch(&store, &batch, &ImportRequest::new(1).map_column("blob", 1))
        .unwrap();
    assert_eq!(summary.special_columns, 1);
    assert_eq!(summary.regular_columns, 0);
    assert_eq!(store.raw_bytes(1, 1).unwrap(), vec![1, 2, 3]);
    assert_eq!(store.raw_bytes(1, 2).unwrap(), Vec::<u8>::new());
    assert_eq!(store.long_text(1, 3).unwrap(), "ok");
}

#[test]
fn test_special_fixed_width_text_stays_text() {
    let store = MemoryStore::with_layout(
        &[("code", StoreType::Text { width: 4 }), ("memo", StoreType::LongText)],
        3,
    )
    .unwrap();
    for row in 1..=3 {
        store.store_text(1, row, "abc").unwrap();
    }
    store.store_binary(2, 2, &[0xff, 0x00]).unwrap();

    let engine = quiet_engine(2);
    let scanned = engine
        .prescan_binary(&store, &["code".to_string(), "memo".to_string()], 0, 3)
        .unwrap();
    assert_eq!(scanned, BTreeSet::from(["memo".to_string()]));

    // a hint naming the fixed-width column does not change its layout
    let hint = BTreeSet::from(["code".to_string(), "memo".to_string()]);
    let batch = engine
        .export_batch(
            &store,
            &ExportRequest::new(["code", "memo"], 0, 3)
                .with_special(["code"])
                .with_binary_hint(hint),
        )
        .unwrap();
    assert_eq!(batch.schema().field(0).data_type(), &DataType::Utf8View);
    assert_eq!(batch.schema().field(1).data_type(), &DataType::Binary);
    assert_eq!(batch.column(0).as_string_view().value(2), "abc");
}
