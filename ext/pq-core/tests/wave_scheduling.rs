
use std::sync::Arc;

use arrow_array::{ArrayRef, Float64Array, RecordBatch};
use pq_core::config::{DEFAULT_CACHE_BUDGET_BYTES, DEFAULT_MIN_WAVE_ROWS};
use pq_core::wave::rows_per_wave;
use pq_core::*;
use test_helpers::*;

fn numeric_batch(columns: usize, rows: usize) -> RecordBatch {
    RecordBatch::try_from_iter((0..columns).map(|c| {
        let values: Float64Array = (0..rows).map(|r| Some((r * columns + c) as f64)).collect();
        (format!("c{}", c), Arc::new(values) as ArrayRef)
    }))
    .unwrap()
}

fn numeric_store(columns: usize, rows: usize) -> MemoryStore {
    let names: Vec<String> = (0..columns).map(|c| format!("c{}", c)).collect();
    let layout: Vec<(&str, StoreType)> = names
        .iter()
        .map(|n| (n.as_str(), StoreType::Float64))
        .collect();
    MemoryStore::with_layout(&layout, rows).unwrap()
}

#[test]
fn test_default_budget_covers_small_imports_in_one_wave() {
    let rows = 20_000;
    let batch = numeric_batch(20, rows);
    let store = numeric_store(20, rows);
    let engine = quiet_engine(4);

    let summary = engine
        .assign_batch(&store, &batch, &import_request_for(&store, 1))
        .unwrap();

    assert_eq!(summary.waves, 1);
    assert_eq!(summary.rows_per_wave, rows);
    assert_eq!(summary.max_wave_rows, rows);
    assert_eq!(store.number(20, rows).unwrap(), (rows * 20 - 1) as f64);
}

#[test]
fn test_wide_batches_clamp_to_minimum_wave() {
    let rows = 20_000;
    let columns = 100;
    let engine = Engine::new(
        EngineConfig::builder()
            .cache_budget_bytes(1024 * 1024)
            .default_threads(4)
            .log_level(LogLevel::Fatal)
            .build(),
    );
    let batch = numeric_batch(columns, rows);
    let store = numeric_store(columns, rows);

    let summary = engine
        .assign_batch(&store, &batch, &import_request_for(&store, 1))
        .unwrap();

    // 1MiB / (100 * 8) = 1310 rows, raised to the 16000-row floor
    assert_eq!(summary.rows_per_wave, DEFAULT_MIN_WAVE_ROWS);
    assert_eq!(summary.waves, 2);
    assert!(summary.max_wave_rows <= summary.rows_per_wave);
    assert_eq!(store.number(1, 1).unwrap(), 0.0);
    assert_eq!(
        store.number(columns, rows).unwrap(),
        (rows * columns - 1) as f64
    );
}

#[test]
fn test_many_small_waves_write_every_row_once() {
    let rows = 5_003;
    let engine = Engine::new(
        EngineConfig::builder()
            .cache_budget_bytes(3 * 8 * 700)
            .min_wave_rows(100)
            .default_threads(3)
            .log_level(LogLevel::Fatal)
            .build(),
    );
    let batch = numeric_batch(3, rows);
    let store = numeric_store(3, rows);

    let summary = engine
        .assign_batch(&store, &batch, &import_request_for(&store, 1))
        .unwrap();
    assert_eq!(summary.rows_per_wave, 700);
    assert_eq!(summary.waves, rows.div_ceil(700));
    assert!(summary.max_wave_rows <= 700);

    for row in 1..=rows {
        for c in 1..=3 {
            assert_eq!(
                store.number(c, row).unwrap(),
                ((row - 1) * 3 + c - 1) as f64
            );
        }
    }
}

#[test]
fn test_wave_bound_property() {
    for columns in [1, 3, 17, 250, 4_000, 100_000] {
        for total in [0, 1, 15_999, 16_000, 250_000, 10_000_000] {
            let rpw = rows_per_wave(
                columns,
                total,
                DEFAULT_CACHE_BUDGET_BYTES,
                DEFAULT_MIN_WAVE_ROWS,
            );
            assert!(rpw <= total);
            if total >= DEFAULT_MIN_WAVE_ROWS {
                assert!(rpw >= DEFAULT_MIN_WAVE_ROWS, "{} cols {} rows", columns, total);
            }
            let waves = pq_core::wave::plan_waves(total, rpw);
            assert!(waves.iter().all(|w| w.len() <= rpw));
            assert_eq!(waves.iter().map(|w| w.len()).sum::<usize>(), total);
        }
    }
}

#[test]
fn test_special_only_import_runs_no_waves() {
    let store = MemoryStore::with_layout(&[("notes", StoreType::LongText)], 3).unwrap();
    let batch = RecordBatch::try_from_iter(vec![(
        "notes",
        Arc::new(arrow_array::StringArray::from(vec!["a", "b", "c"])) as ArrayRef,
    )])
    .unwrap();

    let engine = quiet_engine(2);
    let request = ImportRequest::new(1)
        .map_column("notes", 1)
        .with_special(["notes"]);
    let summary = engine.assign_batch(&store, &batch, &request).unwrap();

    assert_eq!(summary.waves, 0);
    assert_eq!(summary.special_columns, 1);
    assert_eq!(store.long_text(1, 3).unwrap(), "c");
}
