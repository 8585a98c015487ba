//! Wave and batch planning
//!
//! Imports run in sequential waves sized to the cache budget; inside a wave
//! (or across the whole range on export) rows are split into contiguous,
//! disjoint batches, one per worker.

use std::ops::Range;

/// Bytes each regular column contributes per row in the working set
pub const BYTES_PER_CELL: usize = 8;

/// A contiguous, half-open row range `[start, end)` in batch coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: usize,
    pub end: usize,
}

impl RowRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn rows(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Rows per wave for `regular_columns` columns under `cache_budget` bytes
///
/// Clamped to `[min_rows, total_rows]`; with no regular columns the whole
/// range is one wave.
pub fn rows_per_wave(
    regular_columns: usize,
    total_rows: usize,
    cache_budget: usize,
    min_rows: usize,
) -> usize {
    if total_rows == 0 {
        return 0;
    }
    let bytes_per_row = regular_columns.saturating_mul(BYTES_PER_CELL);
    if bytes_per_row == 0 {
        return total_rows;
    }
    (cache_budget / bytes_per_row).max(min_rows).min(total_rows)
}

/// Split `[0, total_rows)` into consecutive waves of at most `wave_rows` rows
pub fn plan_waves(total_rows: usize, wave_rows: usize) -> Vec<RowRange> {
    if total_rows == 0 || wave_rows == 0 {
        return Vec::new();
    }
    (0..total_rows)
        .step_by(wave_rows)
        .map(|start| RowRange::new(start, (start + wave_rows).min(total_rows)))
        .collect()
}

/// Split `range` into at most `threads` batches of `ceil(len / threads)` rows
///
/// The last batch is truncated and empty batches are omitted.
pub fn split_batches(range: RowRange, threads: usize) -> Vec<RowRange> {
    if range.is_empty() {
        return Vec::new();
    }
    let batch_rows = range.len().div_ceil(threads.max(1));
    (range.start..range.end)
        .step_by(batch_rows)
        .map(|start| RowRange::new(start, (start + batch_rows).min(range.end)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_wave_clamps() {
        let budget = 32 * 1024 * 1024;
        // 4 columns * 8 bytes = 32 bytes per row -> 1Mi rows, clamped to total
        assert_eq!(rows_per_wave(4, 100_000, budget, 16_000), 100_000);
        assert_eq!(rows_per_wave(4, 5_000_000, budget, 16_000), 1_048_576);
        // very wide batches hit the lower clamp
        assert_eq!(rows_per_wave(10_000, 1_000_000, budget, 16_000), 16_000);
        // lower clamp never exceeds the data
        assert_eq!(rows_per_wave(10_000, 500, budget, 16_000), 500);
        assert_eq!(rows_per_wave(0, 123, budget, 16_000), 123);
        assert_eq!(rows_per_wave(3, 0, budget, 16_000), 0);
    }

    #[test]
    fn test_waves_cover_range_once() {
        let waves = plan_waves(10, 4);
        assert_eq!(
            waves,
            vec![RowRange::new(0, 4), RowRange::new(4, 8), RowRange::new(8, 10)]
        );
        assert!(plan_waves(0, 4).is_empty());
    }

    #[test]
    fn test_split_batches() {
        let batches = split_batches(RowRange::new(10, 20), 3);
        assert_eq!(
            batches,
            vec![
                RowRange::new(10, 14),
                RowRange::new(14, 18),
                RowRange::new(18, 20)
            ]
        );

        // more threads than rows: single-row batches, no empties
        let batches = split_batches(RowRange::new(0, 2), 8);
        assert_eq!(batches, vec![RowRange::new(0, 1), RowRange::new(1, 2)]);

        assert_eq!(split_batches(RowRange::new(0, 5), 0), vec![RowRange::new(0, 5)]);
        assert!(split_batches(RowRange::new(3, 3), 4).is_empty());
    }

    #[test]
    fn test_uneven_split_leaves_fewer_batches() {
        // ceil(9 / 4) = 3 rows each gives three batches, not four
        let batches = split_batches(RowRange::new(0, 9), 4);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.iter().map(RowRange::len).sum::<usize>(), 9);
    }
}
