//! Row store provided by the host as a table of C callbacks
//!
//! Every callback receives the host's opaque `ctx` pointer. Variables and rows
//! are 1-based. Callbacks returning `i32` use 0 for success; any other value is
//! a store failure. Strings and byte payloads are copied into caller buffers:
//! the callback writes at most `cap` bytes and reports the full length through
//! `needed`, and the caller retries with a larger buffer when it was too small.

use std::ffi::{c_char, c_void};

use pq_core::{BinaryConnector, Result, RowStore, StoreLayout, StoreType, TransposeError};

pub const PQ_TYPE_INT8: i32 = 1;
pub const PQ_TYPE_INT16: i32 = 2;
pub const PQ_TYPE_INT32: i32 = 3;
pub const PQ_TYPE_INT64: i32 = 4;
pub const PQ_TYPE_FLOAT32: i32 = 5;
pub const PQ_TYPE_FLOAT64: i32 = 6;
pub const PQ_TYPE_TEXT: i32 = 7;
pub const PQ_TYPE_LONG_TEXT: i32 = 8;

const INITIAL_STRING_CAPACITY: usize = 256;

/// Callback table describing a host row store
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PqStoreVTable {
    pub ctx: *mut c_void,
    pub variable_count: unsafe extern "C" fn(ctx: *mut c_void) -> usize,
    pub row_count: unsafe extern "C" fn(ctx: *mut c_void) -> usize,
    /// 1-based index of a variable, 0 when there is none
    pub variable_index:
        unsafe extern "C" fn(ctx: *mut c_void, name: *const u8, name_len: usize) -> usize,
    pub variable_name: unsafe extern "C" fn(
        ctx: *mut c_void,
        index: usize,
        buf: *mut u8,
        cap: usize,
        needed: *mut usize,
    ) -> i32,
    /// One of the `PQ_TYPE_*` codes; text widths go to `width`
    pub store_type: unsafe extern "C" fn(ctx: *mut c_void, index: usize, width: *mut usize) -> i32,
    pub number:
        unsafe extern "C" fn(ctx: *mut c_void, index: usize, row: usize, out: *mut f64) -> i32,
    pub is_missing: unsafe extern "C" fn(ctx: *mut c_void, value: f64) -> bool,
    pub short_string: unsafe extern "C" fn(
        ctx: *mut c_void,
        index: usize,
        row: usize,
        buf: *mut u8,
        cap: usize,
        needed: *mut usize,
    ) -> i32,
    /// Fails when the cell holds non-text content
    pub long_text: unsafe extern "C" fn(
        ctx: *mut c_void,
        index: usize,
        row: usize,
        buf: *mut u8,
        cap: usize,
        needed: *mut usize,
    ) -> i32,
    /// Payload length and binary flag of a long-text cell
    pub cell_info: unsafe extern "C" fn(
        ctx: *mut c_void,
        index: usize,
        row: usize,
        len: *mut usize,
        is_binary: *mut bool,
    ) -> i32,
    /// Copy payload bytes from `offset` on; `read` gets the count copied
    pub read_binary_chunk: unsafe extern "C" fn(
        ctx: *mut c_void,
        index: usize,
        row: usize,
        offset: usize,
        buf: *mut u8,
        cap: usize,
        read: *mut usize,
    ) -> i32,
    pub store_number:
        unsafe extern "C" fn(ctx: *mut c_void, index: usize, row: usize, value: f64) -> i32,
    pub store_text: unsafe extern "C" fn(
        ctx: *mut c_void,
        index: usize,
        row: usize,
        value: *const u8,
        len: usize,
    ) -> i32,
    pub store_long_text: unsafe extern "C" fn(
        ctx: *mut c_void,
        index: usize,
        row: usize,
        value: *const u8,
        len: usize,
    ) -> i32,
    pub store_binary: unsafe extern "C" fn(
        ctx: *mut c_void,
        index: usize,
        row: usize,
        value: *const u8,
        len: usize,
    ) -> i32,
    /// Create a variable and return its 1-based index, 0 on failure
    pub add_variable: unsafe extern "C" fn(
        ctx: *mut c_void,
        name: *const u8,
        name_len: usize,
        type_code: i32,
        width: usize,
    ) -> usize,
    pub set_row_count: unsafe extern "C" fn(ctx: *mut c_void, rows: usize) -> i32,
    /// Print a NUL-terminated line to the host's output
    pub display: unsafe extern "C" fn(ctx: *mut c_void, message: *const c_char),
    /// Print a NUL-terminated line to the host's error output
    pub error: unsafe extern "C" fn(ctx: *mut c_void, message: *const c_char),
}

pub(crate) fn type_code(store_type: StoreType) -> (i32, usize) {
    match store_type {
        StoreType::Int8 => (PQ_TYPE_INT8, 0),
        StoreType::Int16 => (PQ_TYPE_INT16, 0),
        StoreType::Int32 => (PQ_TYPE_INT32, 0),
        StoreType::Int64 => (PQ_TYPE_INT64, 0),
        StoreType::Float32 => (PQ_TYPE_FLOAT32, 0),
        StoreType::Float64 => (PQ_TYPE_FLOAT64, 0),
        StoreType::Text { width } => (PQ_TYPE_TEXT, width),
        StoreType::LongText => (PQ_TYPE_LONG_TEXT, 0),
    }
}

pub(crate) fn from_type_code(code: i32, width: usize) -> Option<StoreType> {
    Some(match code {
        PQ_TYPE_INT8 => StoreType::Int8,
        PQ_TYPE_INT16 => StoreType::Int16,
        PQ_TYPE_INT32 => StoreType::Int32,
        PQ_TYPE_INT64 => StoreType::Int64,
        PQ_TYPE_FLOAT32 => StoreType::Float32,
        PQ_TYPE_FLOAT64 => StoreType::Float64,
        PQ_TYPE_TEXT if width > 0 => StoreType::Text { width },
        PQ_TYPE_LONG_TEXT => StoreType::LongText,
        _ => return None,
    })
}

fn check(status: i32, what: &str, index: usize, row: usize) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(TransposeError::store(format!(
            "{} failed for variable {} row {} (status {})",
            what, index, row, status
        )))
    }
}

/// [`RowStore`] backed by a [`PqStoreVTable`]
pub struct FfiStore {
    vtable: PqStoreVTable,
}

// SAFETY: the host promises its callbacks tolerate concurrent calls on
// disjoint rows, which is all the engine does from more than one thread.
unsafe impl Send for FfiStore {}
unsafe impl Sync for FfiStore {}

impl FfiStore {
    /// # Safety
    ///
    /// Every callback in `vtable` must be valid for `vtable.ctx` for the
    /// lifetime of the returned store.
    pub unsafe fn new(vtable: PqStoreVTable) -> Self {
        Self { vtable }
    }

    pub fn vtable(&self) -> &PqStoreVTable {
        &self.vtable
    }

    /// Call a "needed length" callback until the buffer is large enough
    fn read_buffer<F>(&self, what: &str, index: usize, row: usize, call: F) -> Result<Vec<u8>>
    where
        F: Fn(*mut u8, usize, *mut usize) -> i32,
    {
        let mut buf = vec![0u8; INITIAL_STRING_CAPACITY];
        loop {
            let mut needed = 0usize;
            check(
                call(buf.as_mut_ptr(), buf.len(), &mut needed as *mut usize),
                what,
                index,
                row,
            )?;
            if needed <= buf.len() {
                buf.truncate(needed);
                return Ok(buf);
            }
            buf.resize(needed, 0);
        }
    }

    fn text(&self, what: &str, index: usize, row: usize, bytes: Vec<u8>) -> Result<String> {
        String::from_utf8(bytes).map_err(|_| {
            TransposeError::store(format!(
                "{} for variable {} row {} is not valid UTF-8",
                what, index, row
            ))
        })
    }
}

impl RowStore for FfiStore {
    fn variable_index(&self, name: &str) -> Option<usize> {
        let v = &self.vtable;
        match unsafe { (v.variable_index)(v.ctx, name.as_ptr(), name.len()) } {
            0 => None,
            index => Some(index),
        }
    }

    fn variable_name(&self, index: usize) -> Option<String> {
        let v = &self.vtable;
        let bytes = self
            .read_buffer("variable_name", index, 0, |buf, cap, needed| unsafe {
                (v.variable_name)(v.ctx, index, buf, cap, needed)
            })
            .ok()?;
        String::from_utf8(bytes).ok()
    }

    fn variable_count(&self) -> usize {
        unsafe { (self.vtable.variable_count)(self.vtable.ctx) }
    }

    fn store_type(&self, index: usize) -> Result<StoreType> {
        let v = &self.vtable;
        let mut width = 0usize;
        let code = unsafe { (v.store_type)(v.ctx, index, &mut width) };
        from_type_code(code, width).ok_or_else(|| {
            TransposeError::store(format!(
                "variable {} has unknown type code {}",
                index, code
            ))
        })
    }

    fn row_count(&self) -> usize {
        unsafe { (self.vtable.row_count)(self.vtable.ctx) }
    }

    fn number(&self, index: usize, row: usize) -> Result<f64> {
        let v = &self.vtable;
        let mut value = 0f64;
        check(
            unsafe { (v.number)(v.ctx, index, row, &mut value) },
            "number",
            index,
            row,
        )?;
        Ok(value)
    }

    fn is_missing(&self, value: f64) -> bool {
        unsafe { (self.vtable.is_missing)(self.vtable.ctx, value) }
    }

    fn short_string(&self, index: usize, row: usize) -> Result<String> {
        let v = &self.vtable;
        let bytes = self.read_buffer("short_string", index, row, |buf, cap, needed| unsafe {
            (v.short_string)(v.ctx, index, row, buf, cap, needed)
        })?;
        // fixed-width cells may hold arbitrary bytes
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn long_text(&self, index: usize, row: usize) -> Result<String> {
        let v = &self.vtable;
        let bytes = self.read_buffer("long_text", index, row, |buf, cap, needed| unsafe {
            (v.long_text)(v.ctx, index, row, buf, cap, needed)
        })?;
        self.text("long_text", index, row, bytes)
    }

    fn open_connector(&self, index: usize, row: usize) -> Result<Box<dyn BinaryConnector + '_>> {
        let v = &self.vtable;
        let mut len = 0usize;
        let mut binary = false;
        check(
            unsafe { (v.cell_info)(v.ctx, index, row, &mut len, &mut binary) },
            "cell_info",
            index,
            row,
        )?;
        Ok(Box::new(FfiConnector {
            store: self,
            index,
            row,
            len,
            binary,
            offset: 0,
        }))
    }

    fn store_number(&self, index: usize, row: usize, value: f64) -> Result<()> {
        let v = &self.vtable;
        check(
            unsafe { (v.store_number)(v.ctx, index, row, value) },
            "store_number",
            index,
            row,
        )
    }

    fn store_text(&self, index: usize, row: usize, value: &str) -> Result<()> {
        let v = &self.vtable;
        check(
            unsafe { (v.store_text)(v.ctx, index, row, value.as_ptr(), value.len()) },
            "store_text",
            index,
            row,
        )
    }

    fn store_long_text(&self, index: usize, row: usize, value: &str) -> Result<()> {
        let v = &self.vtable;
        check(
            unsafe { (v.store_long_text)(v.ctx, index, row, value.as_ptr(), value.len()) },
            "store_long_text",
            index,
            row,
        )
    }

    fn store_binary(&self, index: usize, row: usize, value: &[u8]) -> Result<()> {
        let v = &self.vtable;
        check(
            unsafe { (v.store_binary)(v.ctx, index, row, value.as_ptr(), value.len()) },
            "store_binary",
            index,
            row,
        )
    }
}

impl StoreLayout for FfiStore {
    fn add_variable(&self, name: &str, store_type: StoreType) -> Result<usize> {
        let v = &self.vtable;
        let (code, width) = type_code(store_type);
        match unsafe { (v.add_variable)(v.ctx, name.as_ptr(), name.len(), code, width) } {
            0 => Err(TransposeError::store(format!(
                "could not create variable {} of type {}",
                name, store_type
            ))),
            index => Ok(index),
        }
    }

    fn set_row_count(&self, rows: usize) -> Result<()> {
        let v = &self.vtable;
        check(
            unsafe { (v.set_row_count)(v.ctx, rows) },
            "set_row_count",
            0,
            rows,
        )
    }
}

struct FfiConnector<'a> {
    store: &'a FfiStore,
    index: usize,
    row: usize,
    len: usize,
    binary: bool,
    offset: usize,
}

impl BinaryConnector for FfiConnector<'_> {
    fn is_binary(&self) -> bool {
        self.binary
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.offset >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let v = &self.store.vtable;
        let cap = buf.len().min(self.len - self.offset);
        let mut read = 0usize;
        check(
            unsafe {
                (v.read_binary_chunk)(
                    v.ctx,
                    self.index,
                    self.row,
                    self.offset,
                    buf.as_mut_ptr(),
                    cap,
                    &mut read,
                )
            },
            "read_binary_chunk",
            self.index,
            self.row,
        )?;
        let read = read.min(cap);
        self.offset += read;
        Ok(read)
    }
}
