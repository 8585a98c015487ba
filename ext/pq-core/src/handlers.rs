//! Typed transfer handlers
//!
//! Handlers are bound once per call to a concrete array or buffer type, so
//! the per-row loops carry no type tests.

use std::ops::Range;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{
    ArrowPrimitiveType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
};
use arrow_array::{
    Array, ArrayAccessor, ArrayRef, BinaryArray, LargeBinaryArray, LargeStringArray,
    PrimitiveArray, StringArray, StringViewArray,
};
use arrow_buffer::{NullBuffer, ScalarBuffer};
use num::traits::AsPrimitive;
use num::ToPrimitive;

use crate::classify::ColumnDescriptor;
use crate::logger::Logger;
use crate::store::RowStore;
use crate::types::PhysicalType;
use crate::wave::RowRange;
use crate::{Result, TransposeError};

fn downcast_failed(descriptor: &ColumnDescriptor, array: &dyn Array) -> TransposeError {
    TransposeError::internal(format!(
        "column '{}' declared {:?} but holds {}",
        descriptor.name,
        descriptor.physical_type,
        array.data_type()
    ))
}

/// Source array of an import handler
enum ImportSource<'a> {
    Int8(&'a PrimitiveArray<Int8Type>),
    Int16(&'a PrimitiveArray<Int16Type>),
    Int32(&'a PrimitiveArray<Int32Type>),
    Int64(&'a PrimitiveArray<Int64Type>),
    Float32(&'a PrimitiveArray<Float32Type>),
    Float64(&'a PrimitiveArray<Float64Type>),
    Utf8(&'a StringArray),
    LargeUtf8(&'a LargeStringArray),
    Utf8View(&'a StringViewArray),
    Binary(&'a BinaryArray),
    LargeBinary(&'a LargeBinaryArray),
}

/// Writes one Arrow column into one store variable
pub(crate) struct ImportHandler<'a> {
    name: &'a str,
    store_index: usize,
    special: bool,
    source: ImportSource<'a>,
}

impl<'a> ImportHandler<'a> {
    pub(crate) fn bind(descriptor: &'a ColumnDescriptor, array: &'a ArrayRef) -> Result<Self> {
        let fail = || downcast_failed(descriptor, array.as_ref());
        let source = match descriptor.physical_type {
            PhysicalType::Int8 => ImportSource::Int8(array.as_primitive_opt().ok_or_else(fail)?),
            PhysicalType::Int16 => {
                ImportSource::Int16(array.as_primitive_opt().ok_or_else(fail)?)
            }
            PhysicalType::Int32 => {
                ImportSource::Int32(array.as_primitive_opt().ok_or_else(fail)?)
            }
            PhysicalType::Int64 => {
                ImportSource::Int64(array.as_primitive_opt().ok_or_else(fail)?)
            }
            PhysicalType::Float32 => {
                ImportSource::Float32(array.as_primitive_opt().ok_or_else(fail)?)
            }
            PhysicalType::Float64 => {
                ImportSource::Float64(array.as_primitive_opt().ok_or_else(fail)?)
            }
            PhysicalType::Utf8 => ImportSource::Utf8(array.as_string_opt().ok_or_else(fail)?),
            PhysicalType::LargeUtf8 => {
                ImportSource::LargeUtf8(array.as_string_opt().ok_or_else(fail)?)
            }
            PhysicalType::Utf8View => {
                ImportSource::Utf8View(array.as_string_view_opt().ok_or_else(fail)?)
            }
            PhysicalType::Binary => {
                ImportSource::Binary(array.as_binary_opt().ok_or_else(fail)?)
            }
            PhysicalType::LargeBinary => {
                ImportSource::LargeBinary(array.as_binary_opt().ok_or_else(fail)?)
            }
        };
        Ok(Self {
            name: &descriptor.name,
            store_index: descriptor.store_index,
            special: descriptor.is_special,
            source,
        })
    }

    pub(crate) fn name(&self) -> &str {
        self.name
    }

    /// Copy non-null cells of `rows` to store rows `base_row + row`
    pub(crate) fn transfer<S: RowStore + ?Sized>(
        &self,
        store: &S,
        rows: Range<usize>,
        base_row: usize,
    ) -> Result<()> {
        match self.source {
            ImportSource::Int8(array) => self.numbers(store, array, rows, base_row),
            ImportSource::Int16(array) => self.numbers(store, array, rows, base_row),
            ImportSource::Int32(array) => self.numbers(store, array, rows, base_row),
            ImportSource::Int64(array) => self.numbers(store, array, rows, base_row),
            ImportSource::Float32(array) => self.numbers(store, array, rows, base_row),
            ImportSource::Float64(array) => self.numbers(store, array, rows, base_row),
            ImportSource::Utf8(array) => self.texts(store, array, rows, base_row),
            ImportSource::LargeUtf8(array) => self.texts(store, array, rows, base_row),
            ImportSource::Utf8View(array) => self.texts(store, array, rows, base_row),
            ImportSource::Binary(array) => self.bytes(store, array, rows, base_row),
            ImportSource::LargeBinary(array) => self.bytes(store, array, rows, base_row),
        }
    }

    fn numbers<S, T>(
        &self,
        store: &S,
        array: &PrimitiveArray<T>,
        rows: Range<usize>,
        base_row: usize,
    ) -> Result<()>
    where
        S: RowStore + ?Sized,
        T: ArrowPrimitiveType,
        T::Native: ToPrimitive,
    {
        for row in rows {
            if array.is_null(row) {
                continue;
            }
            let value = array.value(row).to_f64().unwrap_or(f64::NAN);
            store.store_number(self.store_index, base_row + row, value)?;
        }
        Ok(())
    }

    fn texts<'s, S, A>(&self, store: &S, array: A, rows: Range<usize>, base_row: usize) -> Result<()>
    where
        S: RowStore + ?Sized,
        A: ArrayAccessor<Item = &'s str>,
    {
        for row in rows {
            if array.is_null(row) {
                continue;
            }
            let value = array.value(row);
            if self.special {
                store.store_long_text(self.store_index, base_row + row, value)?;
            } else {
                store.store_text(self.store_index, base_row + row, value)?;
            }
        }
        Ok(())
    }

    fn bytes<'s, S, A>(&self, store: &S, array: A, rows: Range<usize>, base_row: usize) -> Result<()>
    where
        S: RowStore + ?Sized,
        A: ArrayAccessor<Item = &'s [u8]>,
    {
        for row in rows {
            if array.is_null(row) {
                continue;
            }
            store.store_binary(self.store_index, base_row + row, array.value(row))?;
        }
        Ok(())
    }
}

/// Values plus validity for one numeric export column
#[derive(Debug)]
pub(crate) struct NumericColumn<T> {
    values: Vec<T>,
    validity: Vec<bool>,
}

impl<T: Copy + Default> NumericColumn<T> {
    fn new(rows: usize) -> Self {
        Self {
            values: vec![T::default(); rows],
            validity: vec![false; rows],
        }
    }

    fn split(&mut self, ranges: &[RowRange]) -> Vec<NumericSlice<'_, T>> {
        split_mut(&mut self.values, ranges)
            .into_iter()
            .zip(split_mut(&mut self.validity, ranges))
            .map(|(values, validity)| NumericSlice { values, validity })
            .collect()
    }

    fn full(&mut self) -> NumericSlice<'_, T> {
        NumericSlice {
            values: &mut self.values,
            validity: &mut self.validity,
        }
    }
}

fn primitive_array<P: ArrowPrimitiveType>(column: NumericColumn<P::Native>) -> ArrayRef {
    let nulls = NullBuffer::from(column.validity);
    let nulls = (nulls.null_count() > 0).then_some(nulls);
    Arc::new(PrimitiveArray::<P>::new(
        ScalarBuffer::from(column.values),
        nulls,
    ))
}

/// Cut `data` into consecutive sub-slices matching contiguous `ranges`
fn split_mut<'a, T>(mut data: &'a mut [T], ranges: &[RowRange]) -> Vec<&'a mut [T]> {
    let mut parts = Vec::with_capacity(ranges.len());
    for range in ranges {
        let (head, tail) = std::mem::take(&mut data).split_at_mut(range.len());
        parts.push(head);
        data = tail;
    }
    parts
}

/// Full-length destination buffer for one export column
#[derive(Debug)]
pub(crate) enum ColumnBuffer {
    Int8(NumericColumn<i8>),
    Int16(NumericColumn<i16>),
    Int32(NumericColumn<i32>),
    Int64(NumericColumn<i64>),
    Float32(NumericColumn<f32>),
    Float64(NumericColumn<f64>),
    Text(Vec<Option<String>>),
    Binary(Vec<Option<Vec<u8>>>),
}

impl ColumnBuffer {
    pub(crate) fn allocate(descriptor: &ColumnDescriptor, rows: usize) -> Result<Self> {
        Ok(match descriptor.physical_type {
            PhysicalType::Int8 => ColumnBuffer::Int8(NumericColumn::new(rows)),
            PhysicalType::Int16 => ColumnBuffer::Int16(NumericColumn::new(rows)),
            PhysicalType::Int32 => ColumnBuffer::Int32(NumericColumn::new(rows)),
            PhysicalType::Int64 => ColumnBuffer::Int64(NumericColumn::new(rows)),
            PhysicalType::Float32 => ColumnBuffer::Float32(NumericColumn::new(rows)),
            PhysicalType::Float64 => ColumnBuffer::Float64(NumericColumn::new(rows)),
            PhysicalType::Utf8View => ColumnBuffer::Text(vec![None; rows]),
            PhysicalType::Binary => ColumnBuffer::Binary(vec![None; rows]),
            other => {
                return Err(TransposeError::unsupported(
                    descriptor.name.as_str(),
                    format!("{:?} is not an export layout", other),
                ))
            }
        })
    }

    /// One disjoint mutable slice per batch range
    pub(crate) fn split(&mut self, ranges: &[RowRange]) -> Vec<ColumnSlice<'_>> {
        match self {
            ColumnBuffer::Int8(c) => c.split(ranges).into_iter().map(ColumnSlice::Int8).collect(),
            ColumnBuffer::Int16(c) => c.split(ranges).into_iter().map(ColumnSlice::Int16).collect(),
            ColumnBuffer::Int32(c) => c.split(ranges).into_iter().map(ColumnSlice::Int32).collect(),
            ColumnBuffer::Int64(c) => c.split(ranges).into_iter().map(ColumnSlice::Int64).collect(),
            ColumnBuffer::Float32(c) => {
                c.split(ranges).into_iter().map(ColumnSlice::Float32).collect()
            }
            ColumnBuffer::Float64(c) => {
                c.split(ranges).into_iter().map(ColumnSlice::Float64).collect()
            }
            ColumnBuffer::Text(v) => split_mut(v, ranges)
                .into_iter()
                .map(ColumnSlice::Text)
                .collect(),
            ColumnBuffer::Binary(v) => split_mut(v, ranges)
                .into_iter()
                .map(ColumnSlice::Binary)
                .collect(),
        }
    }

    pub(crate) fn full(&mut self) -> ColumnSlice<'_> {
        match self {
            ColumnBuffer::Int8(c) => ColumnSlice::Int8(c.full()),
            ColumnBuffer::Int16(c) => ColumnSlice::Int16(c.full()),
            ColumnBuffer::Int32(c) => ColumnSlice::Int32(c.full()),
            ColumnBuffer::Int64(c) => ColumnSlice::Int64(c.full()),
            ColumnBuffer::Float32(c) => ColumnSlice::Float32(c.full()),
            ColumnBuffer::Float64(c) => ColumnSlice::Float64(c.full()),
            ColumnBuffer::Text(v) => ColumnSlice::Text(v),
            ColumnBuffer::Binary(v) => ColumnSlice::Binary(v),
        }
    }

    pub(crate) fn into_array(self) -> ArrayRef {
        match self {
            ColumnBuffer::Int8(c) => primitive_array::<Int8Type>(c),
            ColumnBuffer::Int16(c) => primitive_array::<Int16Type>(c),
            ColumnBuffer::Int32(c) => primitive_array::<Int32Type>(c),
            ColumnBuffer::Int64(c) => primitive_array::<Int64Type>(c),
            ColumnBuffer::Float32(c) => primitive_array::<Float32Type>(c),
            ColumnBuffer::Float64(c) => primitive_array::<Float64Type>(c),
            ColumnBuffer::Text(v) => Arc::new(v.into_iter().collect::<StringViewArray>()),
            ColumnBuffer::Binary(v) => Arc::new(v.into_iter().collect::<BinaryArray>()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct NumericSlice<'a, T> {
    values: &'a mut [T],
    validity: &'a mut [bool],
}

impl<T> NumericSlice<'_, T>
where
    T: Copy + 'static,
    f64: AsPrimitive<T>,
{
    fn set(&mut self, local: usize, value: f64) {
        self.values[local] = value.as_();
        self.validity[local] = true;
    }
}

/// Mutable window of a [`ColumnBuffer`] owned by one worker
#[derive(Debug)]
pub(crate) enum ColumnSlice<'a> {
    Int8(NumericSlice<'a, i8>),
    Int16(NumericSlice<'a, i16>),
    Int32(NumericSlice<'a, i32>),
    Int64(NumericSlice<'a, i64>),
    Float32(NumericSlice<'a, f32>),
    Float64(NumericSlice<'a, f64>),
    Text(&'a mut [Option<String>]),
    Binary(&'a mut [Option<Vec<u8>>]),
}

impl ColumnSlice<'_> {
    fn set_number(&mut self, local: usize, value: f64) -> Result<()> {
        match self {
            ColumnSlice::Int8(s) => s.set(local, value),
            ColumnSlice::Int16(s) => s.set(local, value),
            ColumnSlice::Int32(s) => s.set(local, value),
            ColumnSlice::Int64(s) => s.set(local, value),
            ColumnSlice::Float32(s) => s.set(local, value),
            ColumnSlice::Float64(s) => s.set(local, value),
            ColumnSlice::Text(_) | ColumnSlice::Binary(_) => {
                return Err(TransposeError::internal("numeric value for a byte column"))
            }
        }
        Ok(())
    }

    fn set_text(&mut self, local: usize, value: String) -> Result<()> {
        match self {
            ColumnSlice::Text(values) => values[local] = Some(value),
            ColumnSlice::Binary(values) => values[local] = Some(value.into_bytes()),
            _ => return Err(TransposeError::internal("text value for a numeric column")),
        }
        Ok(())
    }

    fn set_bytes(&mut self, local: usize, value: Vec<u8>) -> Result<()> {
        match self {
            ColumnSlice::Binary(values) => values[local] = Some(value),
            _ => return Err(TransposeError::internal("binary value for a non-binary column")),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadKind {
    Number,
    ShortText,
    LongText,
    Binary,
}

/// Reads one store variable into a bound column slice
pub(crate) struct ExportSlot<'a> {
    name: &'a str,
    store_index: usize,
    kind: ReadKind,
    slice: ColumnSlice<'a>,
    scratch: Vec<u8>,
}

impl<'a> ExportSlot<'a> {
    pub(crate) fn bind(
        descriptor: &'a ColumnDescriptor,
        slice: ColumnSlice<'a>,
        chunk_size: usize,
    ) -> Self {
        let kind = match descriptor.physical_type {
            PhysicalType::Binary | PhysicalType::LargeBinary => ReadKind::Binary,
            t if t.is_text() && descriptor.is_special => ReadKind::LongText,
            t if t.is_text() => ReadKind::ShortText,
            _ => ReadKind::Number,
        };
        let scratch = if kind == ReadKind::Binary {
            vec![0; chunk_size.max(1)]
        } else {
            Vec::new()
        };
        Self {
            name: &descriptor.name,
            store_index: descriptor.store_index,
            kind,
            slice,
            scratch,
        }
    }

    /// Fill local row `local` from store row `store_row`
    pub(crate) fn fill<S: RowStore + ?Sized>(
        &mut self,
        store: &S,
        logger: &Logger,
        local: usize,
        store_row: usize,
    ) -> Result<()> {
        match self.kind {
            ReadKind::Number => {
                let value = store.number(self.store_index, store_row)?;
                if !store.is_missing(value) {
                    self.slice.set_number(local, value)?;
                }
            }
            ReadKind::ShortText => {
                let value = store.short_string(self.store_index, store_row)?;
                if !value.is_empty() {
                    self.slice.set_text(local, value)?;
                }
            }
            ReadKind::LongText => {
                let value = store.long_text(self.store_index, store_row)?;
                if !value.is_empty() {
                    self.slice.set_text(local, value)?;
                }
            }
            ReadKind::Binary => match self.read_binary(store, store_row) {
                Ok(Some(bytes)) => self.slice.set_bytes(local, bytes)?,
                Ok(None) => {}
                Err(e) => logger.warn(|| {
                    format!(
                        "Could not read binary value of '{}' at row {}: {}; leaving it null",
                        self.name, store_row, e
                    )
                }),
            },
        }
        Ok(())
    }

    /// Fill every local row in `locals`, mapping local row `i` to `first_store_row + i`
    pub(crate) fn fill_rows<S: RowStore + ?Sized>(
        &mut self,
        store: &S,
        logger: &Logger,
        locals: Range<usize>,
        first_store_row: usize,
    ) -> Result<()> {
        for (i, local) in locals.enumerate() {
            self.fill(store, logger, local, first_store_row + i)?;
        }
        Ok(())
    }

    fn read_binary<S: RowStore + ?Sized>(
        &mut self,
        store: &S,
        store_row: usize,
    ) -> Result<Option<Vec<u8>>> {
        let mut connector = store.open_connector(self.store_index, store_row)?;
        if !connector.is_binary() {
            drop(connector);
            let text = store.long_text(self.store_index, store_row)?;
            return Ok((!text.is_empty()).then(|| text.into_bytes()));
        }

        let mut bytes = Vec::with_capacity(connector.len());
        loop {
            let n = connector.read_chunk(&mut self.scratch)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&self.scratch[..n]);
        }
        Ok((!bytes.is_empty()).then_some(bytes))
    }
}
