//! In-process host backing a [`PqStoreVTable`] with a `MemoryStore`

use std::ffi::{c_char, c_void, CStr};
use std::sync::Mutex;

use pq_core::{MemoryStore, RowStore, StoreLayout};

use crate::store::{from_type_code, type_code, PqStoreVTable};

#[derive(Default)]
pub struct TestHost {
    pub store: MemoryStore,
    pub displayed: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

fn host<'a>(ctx: *mut c_void) -> &'a TestHost {
    unsafe { &*(ctx as *const TestHost) }
}

unsafe fn text<'a>(ptr: *const u8, len: usize) -> Option<&'a str> {
    std::str::from_utf8(std::slice::from_raw_parts(ptr, len)).ok()
}

unsafe fn copy_out(bytes: &[u8], buf: *mut u8, cap: usize, needed: *mut usize) -> i32 {
    *needed = bytes.len();
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len().min(cap));
    0
}

fn status<T>(result: pq_core::Result<T>) -> i32 {
    if result.is_ok() {
        0
    } else {
        1
    }
}

unsafe extern "C" fn variable_count(ctx: *mut c_void) -> usize {
    host(ctx).store.variable_count()
}

unsafe extern "C" fn row_count(ctx: *mut c_void) -> usize {
    host(ctx).store.row_count()
}

unsafe extern "C" fn variable_index(ctx: *mut c_void, name: *const u8, len: usize) -> usize {
    text(name, len)
        .and_then(|name| host(ctx).store.variable_index(name))
        .unwrap_or(0)
}

unsafe extern "C" fn variable_name(
    ctx: *mut c_void,
    index: usize,
    buf: *mut u8,
    cap: usize,
    needed: *mut usize,
) -> i32 {
    match host(ctx).store.variable_name(index) {
        Some(name) => copy_out(name.as_bytes(), buf, cap, needed),
        None => 1,
    }
}

unsafe extern "C" fn store_type(ctx: *mut c_void, index: usize, width: *mut usize) -> i32 {
    match host(ctx).store.store_type(index) {
        Ok(store_type) => {
            let (code, w) = type_code(store_type);
            *width = w;
            code
        }
        Err(_) => 0,
    }
}

unsafe extern "C" fn number(ctx: *mut c_void, index: usize, row: usize, out: *mut f64) -> i32 {
    match host(ctx).store.number(index, row) {
        Ok(value) => {
            *out = value;
            0
        }
        Err(_) => 1,
    }
}

unsafe extern "C" fn is_missing(ctx: *mut c_void, value: f64) -> bool {
    host(ctx).store.is_missing(value)
}

unsafe extern "C" fn short_string(
    ctx: *mut c_void,
    index: usize,
    row: usize,
    buf: *mut u8,
    cap: usize,
    needed: *mut usize,
) -> i32 {
    match host(ctx).store.short_string(index, row) {
        Ok(value) => copy_out(value.as_bytes(), buf, cap, needed),
        Err(_) => 1,
    }
}

unsafe extern "C" fn long_text(
    ctx: *mut c_void,
    index: usize,
    row: usize,
    buf: *mut u8,
    cap: usize,
    needed: *mut usize,
) -> i32 {
    match host(ctx).store.long_text(index, row) {
        Ok(value) => copy_out(value.as_bytes(), buf, cap, needed),
        Err(_) => 1,
    }
}

unsafe extern "C" fn cell_info(
    ctx: *mut c_void,
    index: usize,
    row: usize,
    len: *mut usize,
    is_binary: *mut bool,
) -> i32 {
    match host(ctx).store.open_connector(index, row) {
        Ok(connector) => {
            *len = connector.len();
            *is_binary = connector.is_binary();
            0
        }
        Err(_) => 1,
    }
}

unsafe extern "C" fn read_binary_chunk(
    ctx: *mut c_void,
    index: usize,
    row: usize,
    offset: usize,
    buf: *mut u8,
    cap: usize,
    read: *mut usize,
) -> i32 {
    match host(ctx).store.raw_bytes(index, row) {
        Ok(bytes) => {
            let rest = bytes.get(offset..).unwrap_or(&[]);
            let n = rest.len().min(cap);
            std::ptr::copy_nonoverlapping(rest.as_ptr(), buf, n);
            *read = n;
            0
        }
        Err(_) => 1,
    }
}

unsafe extern "C" fn store_number(ctx: *mut c_void, index: usize, row: usize, value: f64) -> i32 {
    status(host(ctx).store.store_number(index, row, value))
}

unsafe extern "C" fn store_text(
    ctx: *mut c_void,
    index: usize,
    row: usize,
    value: *const u8,
    len: usize,
) -> i32 {
    match text(value, len) {
        Some(value) => status(host(ctx).store.store_text(index, row, value)),
        None => 1,
    }
}

unsafe extern "C" fn store_long_text(
    ctx: *mut c_void,
    index: usize,
    row: usize,
    value: *const u8,
    len: usize,
) -> i32 {
    match text(value, len) {
        Some(value) => status(host(ctx).store.store_long_text(index, row, value)),
        None => 1,
    }
}

unsafe extern "C" fn store_binary(
    ctx: *mut c_void,
    index: usize,
    row: usize,
    value: *const u8,
    len: usize,
) -> i32 {
    let bytes = std::slice::from_raw_parts(value, len);
    status(host(ctx).store.store_binary(index, row, bytes))
}

unsafe extern "C" fn add_variable(
    ctx: *mut c_void,
    name: *const u8,
    len: usize,
    code: i32,
    width: usize,
) -> usize {
    match (text(name, len), from_type_code(code, width)) {
        (Some(name), Some(store_type)) => host(ctx)
            .store
            .add_variable(name, store_type)
            .unwrap_or(0),
        _ => 0,
    }
}

unsafe extern "C" fn set_row_count(ctx: *mut c_void, rows: usize) -> i32 {
    status(host(ctx).store.set_row_count(rows))
}

unsafe extern "C" fn display(ctx: *mut c_void, message: *const c_char) {
    let line = CStr::from_ptr(message).to_string_lossy().into_owned();
    host(ctx).displayed.lock().unwrap().push(line);
}

unsafe extern "C" fn error(ctx: *mut c_void, message: *const c_char) {
    let line = CStr::from_ptr(message).to_string_lossy().into_owned();
    host(ctx).errors.lock().unwrap().push(line);
}

impl TestHost {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            ..Self::default()
        }
    }

    pub fn vtable(&self) -> PqStoreVTable {
        PqStoreVTable {
            ctx: self as *const TestHost as *mut c_void,
            variable_count,
            row_count,
            variable_index,
            variable_name,
            store_type,
            number,
            is_missing,
            short_string,
            long_text,
            cell_info,
            read_binary_chunk,
            store_number,
            store_text,
            store_long_text,
            store_binary,
            add_variable,
            set_row_count,
            display,
            error,
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}
