//! Access contract for the external row store
//!
//! Variables and rows are both 1-based. Regular accessors must tolerate
//! concurrent calls on disjoint rows; the long-text and binary accessors
//! (`long_text`, `open_connector`, `store_long_text`, `store_binary`) are
//! only called from one thread at a time.

use crate::types::StoreType;
use crate::Result;

/// Streaming reader over one long-text/binary cell
pub trait BinaryConnector {
    /// Whether the cell holds non-text bytes
    fn is_binary(&self) -> bool;

    /// Total payload length in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the next chunk into `buf`, returning the number of bytes written.
    /// Returns 0 once the payload is exhausted.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Row-oriented store addressed by `(variable, row)`
pub trait RowStore: Send + Sync {
    /// 1-based index of the variable called `name`
    fn variable_index(&self, name: &str) -> Option<usize>;

    /// Name of the variable at a 1-based index
    fn variable_name(&self, index: usize) -> Option<String>;

    /// Number of variables; valid indices are `1..=variable_count()`
    fn variable_count(&self) -> usize;

    fn store_type(&self, index: usize) -> Result<StoreType>;

    fn is_string(&self, index: usize) -> Result<bool> {
        Ok(self.store_type(index)?.is_string())
    }

    /// Number of populated rows
    fn row_count(&self) -> usize;

    fn number(&self, index: usize, row: usize) -> Result<f64>;

    /// Whether `value` is the store's missing-value sentinel
    fn is_missing(&self, value: f64) -> bool;

    /// Fixed-width text cell
    fn short_string(&self, index: usize, row: usize) -> Result<String>;

    /// Long text cell; fails when the cell holds non-text content
    fn long_text(&self, index: usize, row: usize) -> Result<String>;

    fn open_connector(&self, index: usize, row: usize) -> Result<Box<dyn BinaryConnector + '_>>;

    fn store_number(&self, index: usize, row: usize, value: f64) -> Result<()>;

    fn store_text(&self, index: usize, row: usize, value: &str) -> Result<()>;

    fn store_long_text(&self, index: usize, row: usize, value: &str) -> Result<()> {
        self.store_text(index, row, value)
    }

    fn store_binary(&self, index: usize, row: usize, value: &[u8]) -> Result<()>;
}

/// Stores whose variables and rows can be created by the caller
pub trait StoreLayout: RowStore {
    /// Create a variable, returning its 1-based index
    fn add_variable(&self, name: &str, store_type: StoreType) -> Result<usize>;

    /// Grow (or shrink) the store to `rows` rows; new cells start missing/empty
    fn set_row_count(&self, rows: usize) -> Result<()>;
}
