//! FFI safety wrappers — converts between C entry-point values and Rust types.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use crate::error::{PluginError, PluginResult};
use crate::traits::PluginMetadata;

use super::abi::PluginBox;

/// Safely converts a C string pointer to a Rust `String`.
///
/// Returns `None` if the pointer is null or the bytes are not UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub unsafe fn c_str_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .ok()
        .map(|s| s.to_string())
}

/// Parses the JSON metadata returned by a module's metadata accessor.
///
/// # Safety
/// Same contract as [`c_str_to_string`].
pub unsafe fn metadata_from_c_str(ptr: *const c_char) -> PluginResult<PluginMetadata> {
    let json = unsafe { c_str_to_string(ptr) }.ok_or_else(|| {
        PluginError::ContractInvalid("metadata accessor returned null or invalid UTF-8".into())
    })?;
    Ok(serde_json::from_str(&json)?)
}

/// Serializes metadata into the C string a metadata accessor returns.
pub fn metadata_to_c_string(metadata: &PluginMetadata) -> PluginResult<CString> {
    let json = serde_json::to_string(metadata)?;
    CString::new(json)
        .map_err(|_| PluginError::ContractInvalid("metadata contains a NUL byte".into()))
}

/// Leaks a boxed plugin into the pointer a factory returns.
pub fn plugin_into_raw(plugin: PluginBox) -> *mut PluginBox {
    Box::into_raw(Box::new(plugin))
}

/// Reclaims a plugin produced by a factory. Returns `None` for null.
///
/// # Safety
/// `raw` must be null or a pointer obtained from [`plugin_into_raw`] that
/// has not been reclaimed yet.
pub unsafe fn plugin_from_raw(raw: *mut PluginBox) -> Option<PluginBox> {
    if raw.is_null() {
        return None;
    }
    Some(*unsafe { Box::from_raw(raw) })
}
