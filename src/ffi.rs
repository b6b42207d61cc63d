//! C ABI entry points for host processes that load the library dynamically.
//!
//! Strings cross the boundary as NUL-terminated UTF-8. The report string is
//! allocated here and must be handed back to [`hypercopy_free_string`]; the
//! version string is static and must not be freed.

use crate::cancel::panic_message;
use crate::error::HyperError;
use crate::pipeline::hyper_copy;
use log::error;
use std::ffi::{CStr, CString, c_char};
use std::panic::{self, AssertUnwindSafe};

static VERSION: &CStr = match CStr::from_bytes_with_nul(
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes(),
) {
    Ok(v) => v,
    Err(_) => c"unknown",
};

/// Borrow a C string argument as `&str`, `None` if null or not UTF-8.
///
/// # Safety
/// `ptr` must be null or point at a NUL-terminated string that outlives `'a`.
unsafe fn arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Run a copy. Returns the row count, or a negative error code.
///
/// # Safety
/// Each argument must be null or a valid NUL-terminated string for the
/// duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hypercopy_run(
    pattern: *const c_char,
    output: *const c_char,
    schema_json: *const c_char,
    config_json: *const c_char,
) -> i64 {
    // SAFETY: forwarded from this function's contract.
    let args = unsafe {
        (
            arg(pattern),
            arg(output),
            arg(schema_json),
            arg(config_json),
        )
    };
    let (pattern, output, schema_json, config_json) = match args {
        (None, ..) => return HyperError::InvalidPattern(String::new()).code(),
        (_, None, ..) => return HyperError::InvalidOutput(String::new()).code(),
        (_, _, None, _) => return HyperError::Schema(String::new()).code(),
        (_, _, _, None) => return HyperError::Config(String::new()).code(),
        (Some(p), Some(o), Some(s), Some(c)) => (p, o, s, c),
    };

    panic::catch_unwind(AssertUnwindSafe(|| {
        hyper_copy(pattern, output, schema_json, config_json)
    }))
    .unwrap_or_else(|payload| {
        let err = HyperError::WorkerPanic(panic_message(payload.as_ref()));
        error!("copy panicked at the boundary: {err}");
        err.code()
    })
}

/// Host report as JSON. Release with [`hypercopy_free_string`].
#[unsafe(no_mangle)]
pub extern "C" fn hypercopy_system_report() -> *mut c_char {
    CString::new(crate::system_report_json())
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

/// Free a string returned by [`hypercopy_system_report`]. Null is ignored.
///
/// # Safety
/// `ptr` must be null or come from [`hypercopy_system_report`], and must not
/// be used or freed again afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hypercopy_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        // SAFETY: allocated by `CString::into_raw` in `hypercopy_system_report`.
        drop(unsafe { CString::from_raw(ptr) });
    }
}

/// Crate version as a static C string.
#[unsafe(no_mangle)]
pub extern "C" fn hypercopy_version() -> *const c_char {
    VERSION.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_static_and_matches_package() {
        // SAFETY: static NUL-terminated string.
        let v = unsafe { CStr::from_ptr(hypercopy_version()) };
        assert_eq!(v.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn report_round_trips_through_free() {
        let ptr = hypercopy_system_report();
        assert!(!ptr.is_null());
        // SAFETY: just returned by `hypercopy_system_report`.
        let json = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_owned();
        unsafe { hypercopy_free_string(ptr) };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["threads"].as_u64().unwrap() >= 1);
        unsafe { hypercopy_free_string(std::ptr::null_mut()) };
    }

    #[test]
    fn null_arguments_map_to_their_codes() {
        let p = c"*.csv";
        let o = c"out.hcc";
        let s = c"{}";
        let null = std::ptr::null();
        unsafe {
            assert_eq!(hypercopy_run(null, o.as_ptr(), s.as_ptr(), s.as_ptr()), -1);
            assert_eq!(hypercopy_run(p.as_ptr(), null, s.as_ptr(), s.as_ptr()), -2);
            assert_eq!(hypercopy_run(p.as_ptr(), o.as_ptr(), null, s.as_ptr()), -3);
            assert_eq!(hypercopy_run(p.as_ptr(), o.as_ptr(), s.as_ptr(), null), -4);
        }
    }
}
