//! Decoding of C argument arrays

use std::ffi::{c_char, CStr};

use pq_core::TransposeError;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArgError {
    #[error("{0} is a null pointer")]
    Null(&'static str),

    #[error("{what}[{index}] is a null pointer")]
    NullEntry { what: &'static str, index: usize },

    #[error("{what}[{index}] is not valid UTF-8")]
    Utf8 { what: &'static str, index: usize },
}

impl From<ArgError> for TransposeError {
    fn from(e: ArgError) -> Self {
        TransposeError::invalid_argument(e.to_string())
    }
}

/// Borrow `len` items starting at `ptr`; a zero length accepts a null pointer
///
/// # Safety
///
/// A non-null `ptr` must address `len` initialized items that outlive the
/// returned slice.
pub unsafe fn slice<'a, T>(ptr: *const T, len: usize, what: &'static str) -> Result<&'a [T], ArgError> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(ArgError::Null(what));
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

/// Copy an array of NUL-terminated UTF-8 strings
///
/// # Safety
///
/// Same as [`slice`], and every entry must be null or NUL-terminated.
pub unsafe fn strings<'a>(
    ptr: *const *const c_char,
    len: usize,
    what: &'static str,
) -> Result<Vec<&'a str>, ArgError> {
    slice(ptr, len, what)?
        .iter()
        .enumerate()
        .map(|(index, &entry)| {
            if entry.is_null() {
                return Err(ArgError::NullEntry { what, index });
            }
            CStr::from_ptr(entry)
                .to_str()
                .map_err(|_| ArgError::Utf8 { what, index })
        })
        .collect()
}
