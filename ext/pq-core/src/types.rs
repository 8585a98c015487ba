//! Type mapping between row-store type tags and Arrow field types

use std::fmt;
use std::str::FromStr;

use arrow_schema::{DataType, Field};

use crate::{Result, TransposeError};

/// Longest fixed-width text a store variable can hold
pub const MAX_TEXT_WIDTH: usize = 2045;

/// Scalar type tag of a row-store variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Fixed-width text, `width` bytes
    Text { width: usize },
    /// Arbitrarily long text or binary payload
    LongText,
}

impl StoreType {
    pub fn is_string(&self) -> bool {
        matches!(self, StoreType::Text { .. } | StoreType::LongText)
    }

    pub fn is_numeric(&self) -> bool {
        !self.is_string()
    }

    /// Text type able to hold values of `len` bytes
    pub fn text_for_len(len: usize) -> Self {
        if len > MAX_TEXT_WIDTH {
            StoreType::LongText
        } else {
            StoreType::Text { width: len.max(1) }
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Int8 => write!(f, "byte"),
            StoreType::Int16 => write!(f, "int"),
            StoreType::Int32 => write!(f, "long"),
            StoreType::Int64 => write!(f, "int64"),
            StoreType::Float32 => write!(f, "float"),
            StoreType::Float64 => write!(f, "double"),
            StoreType::Text { width } => write!(f, "str{}", width),
            StoreType::LongText => write!(f, "strL"),
        }
    }
}

impl FromStr for StoreType {
    type Err = TransposeError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Ok(match s {
            "byte" => StoreType::Int8,
            "int" => StoreType::Int16,
            "long" => StoreType::Int32,
            "int64" => StoreType::Int64,
            "float" => StoreType::Float32,
            "double" => StoreType::Float64,
            "strL" | "strl" => StoreType::LongText,
            _ => {
                let width = s
                    .strip_prefix("str")
                    .and_then(|w| w.parse::<usize>().ok())
                    .filter(|&w| (1..=MAX_TEXT_WIDTH).contains(&w))
                    .ok_or_else(|| {
                        TransposeError::invalid_argument(format!("Unknown store type: {}", s))
                    })?;
                StoreType::Text { width }
            }
        })
    }
}

/// Arrow physical layouts the transfer handlers are specialized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    LargeUtf8,
    Utf8View,
    Binary,
    LargeBinary,
}

impl PhysicalType {
    /// The handled layout for an Arrow type, `None` when no handler exists
    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        Some(match data_type {
            DataType::Int8 => PhysicalType::Int8,
            DataType::Int16 => PhysicalType::Int16,
            DataType::Int32 => PhysicalType::Int32,
            DataType::Int64 => PhysicalType::Int64,
            DataType::Float32 => PhysicalType::Float32,
            DataType::Float64 => PhysicalType::Float64,
            DataType::Utf8 => PhysicalType::Utf8,
            DataType::LargeUtf8 => PhysicalType::LargeUtf8,
            DataType::Utf8View => PhysicalType::Utf8View,
            DataType::Binary => PhysicalType::Binary,
            DataType::LargeBinary => PhysicalType::LargeBinary,
            _ => return None,
        })
    }

    pub fn data_type(&self) -> DataType {
        match self {
            PhysicalType::Int8 => DataType::Int8,
            PhysicalType::Int16 => DataType::Int16,
            PhysicalType::Int32 => DataType::Int32,
            PhysicalType::Int64 => DataType::Int64,
            PhysicalType::Float32 => DataType::Float32,
            PhysicalType::Float64 => DataType::Float64,
            PhysicalType::Utf8 => DataType::Utf8,
            PhysicalType::LargeUtf8 => DataType::LargeUtf8,
            PhysicalType::Utf8View => DataType::Utf8View,
            PhysicalType::Binary => DataType::Binary,
            PhysicalType::LargeBinary => DataType::LargeBinary,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            PhysicalType::Utf8 | PhysicalType::LargeUtf8 | PhysicalType::Utf8View
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, PhysicalType::Binary | PhysicalType::LargeBinary)
    }

    pub fn is_numeric(&self) -> bool {
        !self.is_text() && !self.is_binary()
    }
}

/// Physical layout produced when exporting a store variable
pub fn export_physical_type(store_type: StoreType, binary: bool) -> PhysicalType {
    match store_type {
        StoreType::Int8 => PhysicalType::Int8,
        StoreType::Int16 => PhysicalType::Int16,
        StoreType::Int32 => PhysicalType::Int32,
        StoreType::Int64 => PhysicalType::Int64,
        StoreType::Float32 => PhysicalType::Float32,
        StoreType::Float64 => PhysicalType::Float64,
        StoreType::Text { .. } => PhysicalType::Utf8View,
        StoreType::LongText if binary => PhysicalType::Binary,
        StoreType::LongText => PhysicalType::Utf8View,
    }
}

/// Nullable field for an exported store variable
pub fn export_field(name: &str, store_type: StoreType, binary: bool) -> Field {
    Field::new(
        name,
        export_physical_type(store_type, binary).data_type(),
        true,
    )
}

/// Store type to create for an Arrow column.
///
/// `max_text_len` is the longest value in bytes for text columns. Types with no
/// narrower home fall back to `Float64`, the only store type wide enough for
/// 64-bit integers.
pub fn suggest_store_type(data_type: &DataType, max_text_len: Option<usize>) -> StoreType {
    match data_type {
        DataType::Boolean | DataType::Int8 => StoreType::Int8,
        DataType::UInt8 | DataType::Int16 => StoreType::Int16,
        DataType::UInt16 | DataType::Int32 | DataType::Date32 => StoreType::Int32,
        DataType::Float16 | DataType::Float32 => StoreType::Float32,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            StoreType::text_for_len(max_text_len.unwrap_or(1))
        }
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => StoreType::LongText,
        _ => StoreType::Float64,
    }
}

/// Arrow type a column must be cast to before import when it has no handler
pub fn import_cast_target(store_type: StoreType) -> DataType {
    match store_type {
        StoreType::Int8 => DataType::Int8,
        StoreType::Int16 => DataType::Int16,
        StoreType::Int32 => DataType::Int32,
        StoreType::Int64 => DataType::Int64,
        StoreType::Float32 => DataType::Float32,
        StoreType::Float64 => DataType::Float64,
        StoreType::Text { .. } => DataType::Utf8View,
        StoreType::LongText => DataType::Binary,
    }
}
