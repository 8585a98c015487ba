//! Host output through the store's display/error callbacks

use std::ffi::{c_char, c_void, CString};

use pq_host_adapter::HostConsole;

use crate::store::PqStoreVTable;

pub struct FfiConsole {
    ctx: *mut c_void,
    display: unsafe extern "C" fn(*mut c_void, *const c_char),
    error: unsafe extern "C" fn(*mut c_void, *const c_char),
}

// SAFETY: the host's output callbacks may be called from any thread.
unsafe impl Send for FfiConsole {}
unsafe impl Sync for FfiConsole {}

impl FfiConsole {
    pub fn new(vtable: &PqStoreVTable) -> Self {
        Self {
            ctx: vtable.ctx,
            display: vtable.display,
            error: vtable.error,
        }
    }
}

fn to_c_string(message: &str) -> CString {
    // interior NULs would truncate the line on the host side
    CString::new(message.replace('\0', "\\0")).unwrap_or_default()
}

impl HostConsole for FfiConsole {
    fn display(&self, message: &str) {
        let line = to_c_string(message);
        unsafe { (self.display)(self.ctx, line.as_ptr()) }
    }

    fn error(&self, message: &str) {
        let line = to_c_string(message);
        unsafe { (self.error)(self.ctx, line.as_ptr()) }
    }
}
