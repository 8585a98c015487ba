//! Column-wide binary detection for long-text columns

use std::collections::BTreeSet;

use crate::classify::ExportColumn;
use crate::logger::Logger;
use crate::store::RowStore;
use crate::types::StoreType;
use crate::{Result, TransposeError};

/// Store rows (1-based, inclusive) backing export rows `[start_row, start_row + row_count)`
pub(crate) fn store_rows<S: RowStore + ?Sized>(
    store: &S,
    start_row: usize,
    row_count: usize,
) -> Result<std::ops::RangeInclusive<usize>> {
    let overflow = || {
        TransposeError::invalid_argument(format!(
            "rows {} + {} overflow the row index",
            start_row, row_count
        ))
    };
    let first = start_row.checked_add(1).ok_or_else(overflow)?;
    let end = start_row.checked_add(row_count).ok_or_else(overflow)?;
    Ok(first..=end.min(store.row_count()))
}

/// Names of special long-text columns holding at least one non-text cell in
/// the requested rows. One such cell marks the whole column binary.
pub fn prescan_binary<S: RowStore + ?Sized>(
    store: &S,
    columns: &[ExportColumn],
    start_row: usize,
    row_count: usize,
    logger: &Logger,
) -> Result<BTreeSet<String>> {
    let rows = store_rows(store, start_row, row_count)?;
    let mut binary = BTreeSet::new();

    for column in columns
        .iter()
        .filter(|c| c.is_special && c.store_type == StoreType::LongText)
    {
        let hit = rows
            .clone()
            .find(|&row| store.long_text(column.store_index, row).is_err());
        if let Some(row) = hit {
            logger.debug(|| {
                format!(
                    "Column '{}' has non-text content at row {}; exporting as binary",
                    column.name, row
                )
            });
            binary.insert(column.name.clone());
        }
    }

    Ok(binary)
}
