//! Arrow C data interface handoff
//!
//! A batch crosses the boundary as a struct array: one `FFI_ArrowSchema` and
//! one `FFI_ArrowArray` whose children are the columns. Handles are the
//! addresses of those two structs.

use arrow::ffi::{from_ffi, to_ffi, FFI_ArrowArray, FFI_ArrowSchema};
use arrow_array::{Array, RecordBatch, StructArray};

use crate::{Result, TransposeError};

/// Addresses of a schema/array descriptor pair
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrowHandles {
    pub schema: usize,
    pub array: usize,
}

impl ArrowHandles {
    pub fn new(schema: usize, array: usize) -> Self {
        Self { schema, array }
    }

    pub fn is_null(&self) -> bool {
        self.schema == 0 || self.array == 0
    }
}

/// Move `batch` into freshly allocated descriptors owned by the caller.
///
/// The pair must be passed to [`free_handles`] exactly once.
pub fn export_record_batch(batch: RecordBatch) -> Result<ArrowHandles> {
    let data = StructArray::from(batch).into_data();
    let (array, schema) = to_ffi(&data)?;
    let array = Box::into_raw(Box::new(array));
    let schema = Box::into_raw(Box::new(schema));
    Ok(ArrowHandles {
        schema: schema as usize,
        array: array as usize,
    })
}

/// Take ownership of the content of a foreign descriptor pair.
///
/// The foreign structs are left released, even when decoding fails; their
/// memory stays with the caller.
///
/// # Safety
///
/// Both handles must point to valid, unreleased Arrow C data interface structs
/// describing a struct array, and must not be used concurrently elsewhere.
pub unsafe fn import_record_batch(handles: ArrowHandles) -> Result<RecordBatch> {
    if handles.is_null() {
        return Err(TransposeError::invalid_handle(
            "cannot import from a null descriptor",
        ));
    }
    let array = FFI_ArrowArray::from_raw(handles.array as *mut FFI_ArrowArray);
    let schema = FFI_ArrowSchema::from_raw(handles.schema as *mut FFI_ArrowSchema);
    let data = from_ffi(array, &schema)?;
    let struct_array = StructArray::from(data);
    if struct_array.null_count() > 0 {
        return Err(TransposeError::invalid_argument(
            "imported struct array has top-level nulls",
        ));
    }
    Ok(RecordBatch::from(struct_array))
}

/// Release a pair produced by [`export_record_batch`].
///
/// # Safety
///
/// `handles` must come from [`export_record_batch`] and not have been freed.
pub unsafe fn free_handles(handles: ArrowHandles) {
    if handles.array != 0 {
        drop(Box::from_raw(handles.array as *mut FFI_ArrowArray));
    }
    if handles.schema != 0 {
        drop(Box::from_raw(handles.schema as *mut FFI_ArrowSchema));
    }
}
