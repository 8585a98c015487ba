//! Thread-safe in-memory row store
//!
//! Numeric cells are `f64` bit patterns in atomics so disjoint rows can be
//! written concurrently without locking; text cells sit behind per-cell
//! mutexes. Adding variables or resizing takes the layout write lock.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::store::{BinaryConnector, RowStore, StoreLayout};
use crate::types::StoreType;
use crate::{Result, TransposeError};

/// Missing-value sentinel; every value at or above it counts as missing
pub const MISSING: f64 = 8.988_465_674_311_579e307;

#[derive(Debug, Clone, PartialEq)]
enum TextCell {
    Text(String),
    Bytes(Vec<u8>),
}

impl Default for TextCell {
    fn default() -> Self {
        TextCell::Text(String::new())
    }
}

fn is_binary_payload(bytes: &[u8]) -> bool {
    bytes.contains(&0) || simdutf8::basic::from_utf8(bytes).is_err()
}

#[derive(Debug)]
enum Cells {
    Numbers(Vec<AtomicU64>),
    Text(Vec<Mutex<TextCell>>),
}

impl Cells {
    fn new(store_type: StoreType, rows: usize) -> Self {
        if store_type.is_string() {
            Cells::Text((0..rows).map(|_| Mutex::new(TextCell::default())).collect())
        } else {
            Cells::Numbers((0..rows).map(|_| AtomicU64::new(MISSING.to_bits())).collect())
        }
    }

    fn resize(&mut self, rows: usize) {
        match self {
            Cells::Numbers(cells) => {
                cells.resize_with(rows, || AtomicU64::new(MISSING.to_bits()))
            }
            Cells::Text(cells) => cells.resize_with(rows, || Mutex::new(TextCell::default())),
        }
    }
}

#[derive(Debug)]
struct Variable {
    store_type: StoreType,
    cells: Cells,
}

#[derive(Debug, Default)]
struct Layout {
    variables: IndexMap<String, Variable>,
    rows: usize,
}

impl Layout {
    fn variable(&self, index: usize) -> Result<&Variable> {
        index
            .checked_sub(1)
            .and_then(|i| self.variables.get_index(i))
            .map(|(_, v)| v)
            .ok_or_else(|| TransposeError::store(format!("no variable at index {}", index)))
    }

    fn check_row(&self, row: usize) -> Result<usize> {
        if row == 0 || row > self.rows {
            return Err(TransposeError::store(format!(
                "row {} out of range 1..={}",
                row, self.rows
            )));
        }
        Ok(row - 1)
    }

    fn number_cell(&self, index: usize, row: usize) -> Result<&AtomicU64> {
        let slot = self.check_row(row)?;
        match &self.variable(index)?.cells {
            Cells::Numbers(cells) => Ok(&cells[slot]),
            Cells::Text(_) => Err(TransposeError::store(format!(
                "variable {} is not numeric",
                index
            ))),
        }
    }

    fn text_cell(&self, index: usize, row: usize) -> Result<(&Mutex<TextCell>, StoreType)> {
        let slot = self.check_row(row)?;
        let variable = self.variable(index)?;
        match &variable.cells {
            Cells::Text(cells) => Ok((&cells[slot], variable.store_type)),
            Cells::Numbers(_) => Err(TransposeError::store(format!(
                "variable {} is not a string",
                index
            ))),
        }
    }
}

/// Reference [`RowStore`] kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    layout: RwLock<Layout>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the given variables and `rows` empty rows
    pub fn with_layout(variables: &[(&str, StoreType)], rows: usize) -> Result<Self> {
        let store = Self::new();
        for (name, store_type) in variables {
            store.add_variable(name, *store_type)?;
        }
        store.set_row_count(rows)?;
        Ok(store)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.layout.read().variables.keys().cloned().collect()
    }

    /// Raw payload of a string cell, text or binary
    pub fn raw_bytes(&self, index: usize, row: usize) -> Result<Vec<u8>> {
        let layout = self.layout.read();
        let (cell, _) = layout.text_cell(index, row)?;
        let bytes = match &*cell.lock() {
            TextCell::Text(text) => text.as_bytes().to_vec(),
            TextCell::Bytes(bytes) => bytes.clone(),
        };
        Ok(bytes)
    }
}

impl RowStore for MemoryStore {
    fn variable_index(&self, name: &str) -> Option<usize> {
        self.layout
            .read()
            .variables
            .get_index_of(name)
            .map(|i| i + 1)
    }

    fn variable_name(&self, index: usize) -> Option<String> {
        let layout = self.layout.read();
        let (name, _) = layout.variables.get_index(index.checked_sub(1)?)?;
        Some(name.clone())
    }

    fn variable_count(&self) -> usize {
        self.layout.read().variables.len()
    }

    fn store_type(&self, index: usize) -> Result<StoreType> {
        Ok(self.layout.read().variable(index)?.store_type)
    }

    fn row_count(&self) -> usize {
        self.layout.read().rows
    }

    fn number(&self, index: usize, row: usize) -> Result<f64> {
        let layout = self.layout.read();
        let bits = layout.number_cell(index, row)?.load(Ordering::Relaxed);
        Ok(f64::from_bits(bits))
    }

    fn is_missing(&self, value: f64) -> bool {
        value.is_nan() || value >= MISSING
    }

    fn short_string(&self, index: usize, row: usize) -> Result<String> {
        let layout = self.layout.read();
        let (cell, _) = layout.text_cell(index, row)?;
        let value = match &*cell.lock() {
            TextCell::Text(text) => text.clone(),
            TextCell::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        };
        Ok(value)
    }

    fn long_text(&self, index: usize, row: usize) -> Result<String> {
        let layout = self.layout.read();
        let (cell, _) = layout.text_cell(index, row)?;
        let value = match &*cell.lock() {
            TextCell::Text(text) => text.clone(),
            TextCell::Bytes(bytes) if !is_binary_payload(bytes) => {
                String::from_utf8_lossy(bytes).into_owned()
            }
            TextCell::Bytes(_) => {
                return Err(TransposeError::store(format!(
                    "cell ({}, {}) holds binary data",
                    index, row
                )))
            }
        };
        Ok(value)
    }

    fn open_connector(&self, index: usize, row: usize) -> Result<Box<dyn BinaryConnector + '_>> {
        let layout = self.layout.read();
        let (cell, _) = layout.text_cell(index, row)?;
        let connector = match &*cell.lock() {
            TextCell::Text(text) => MemoryConnector {
                data: text.as_bytes().to_vec(),
                position: 0,
                binary: false,
            },
            TextCell::Bytes(bytes) => MemoryConnector {
                binary: is_binary_payload(bytes),
                data: bytes.clone(),
                position: 0,
            },
        };
        Ok(Box::new(connector))
    }

    fn store_number(&self, index: usize, row: usize, value: f64) -> Result<()> {
        let layout = self.layout.read();
        layout
            .number_cell(index, row)?
            .store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn store_text(&self, index: usize, row: usize, value: &str) -> Result<()> {
        let layout = self.layout.read();
        let (cell, store_type) = layout.text_cell(index, row)?;
        if let StoreType::Text { width } = store_type {
            if value.len() > width {
                return Err(TransposeError::store(format!(
                    "value of {} bytes does not fit str{} variable {}",
                    value.len(),
                    width,
                    index
                )));
            }
        }
        *cell.lock() = TextCell::Text(value.to_string());
        Ok(())
    }

    fn store_binary(&self, index: usize, row: usize, value: &[u8]) -> Result<()> {
        let layout = self.layout.read();
        let (cell, store_type) = layout.text_cell(index, row)?;
        if store_type != StoreType::LongText {
            return Err(TransposeError::store(format!(
                "variable {} cannot hold binary data",
                index
            )));
        }
        *cell.lock() = TextCell::Bytes(value.to_vec());
        Ok(())
    }
}

impl StoreLayout for MemoryStore {
    fn add_variable(&self, name: &str, store_type: StoreType) -> Result<usize> {
        let mut layout = self.layout.write();
        if layout.variables.contains_key(name) {
            return Err(TransposeError::invalid_argument(format!(
                "variable {} already exists",
                name
            )));
        }
        let cells = Cells::new(store_type, layout.rows);
        layout
            .variables
            .insert(name.to_string(), Variable { store_type, cells });
        Ok(layout.variables.len())
    }

    fn set_row_count(&self, rows: usize) -> Result<()> {
        let mut layout = self.layout.write();
        for variable in layout.variables.values_mut() {
            variable.cells.resize(rows);
        }
        layout.rows = rows;
        Ok(())
    }
}

struct MemoryConnector {
    data: Vec<u8>,
    position: usize,
    binary: bool,
}

impl BinaryConnector for MemoryConnector {
    fn is_binary(&self) -> bool {
        self.binary
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.data[self.position..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryStore {
        MemoryStore::with_layout(
            &[
                ("id", StoreType::Int32),
                ("name", StoreType::Text { width: 5 }),
                ("notes", StoreType::LongText),
            ],
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_layout_and_defaults() {
        let store = sample();
        assert_eq!(store.variable_count(), 3);
        assert_eq!(store.variable_index("name"), Some(2));
        assert_eq!(store.variable_index("missing"), None);
        assert_eq!(store.variable_name(3).as_deref(), Some("notes"));
        assert_eq!(store.variable_name(0), None);
        assert_eq!(store.row_count(), 3);

        let value = store.number(1, 1).unwrap();
        assert!(store.is_missing(value));
        assert_eq!(store.short_string(2, 3).unwrap(), "");
        assert!(store.number(1, 0).is_err());
        assert!(store.number(1, 4).is_err());
        assert!(store.number(4, 1).is_err());
    }

    #[test]
    fn test_width_enforced() {
        let store = sample();
        store.store_text(2, 1, "abcde").unwrap();
        assert!(store.store_text(2, 2, "abcdef").is_err());
    }

    #[test]
    fn test_binary_cells() {
        let store = sample();
        store.store_binary(3, 1, &[0xff, 0x00, 0x41]).unwrap();
        store.store_long_text(3, 2, "plain").unwrap();

        assert!(store.long_text(3, 1).is_err());
        assert_eq!(store.long_text(3, 2).unwrap(), "plain");

        let mut connector = store.open_connector(3, 1).unwrap();
        assert!(connector.is_binary());
        assert_eq!(connector.len(), 3);
        let mut buf = [0u8; 2];
        assert_eq!(connector.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(buf, [0xff, 0x00]);
        assert_eq!(connector.read_chunk(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x41);
        assert_eq!(connector.read_chunk(&mut buf).unwrap(), 0);

        assert!(store.store_binary(2, 1, b"x").is_err());
    }

    #[test]
    fn test_resize_keeps_values() {
        let store = sample();
        store.store_number(1, 2, 7.0).unwrap();
        store.set_row_count(5).unwrap();
        assert_eq!(store.number(1, 2).unwrap(), 7.0);
        assert!(store.is_missing(store.number(1, 5).unwrap()));
        assert!(store.add_variable("id", StoreType::Int8).is_err());
    }
}
