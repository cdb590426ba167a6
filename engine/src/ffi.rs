//! FFI layer for embedding the engine in other runtimes.
//!
//! This module provides C-compatible functions over a [`Document`].
//! All data crosses the boundary as JSON strings.
//!
//! # Memory Management
//!
//! - Strings returned by `grove_*` functions are allocated by Rust
//! - Caller must free them with `grove_string_free`
//! - Document pointers must be freed with `grove_document_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{Action, Document, FactoryDef, Patch};
use serde_json::Value;
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// Result wrapper for FFI responses.
#[derive(serde::Serialize)]
#[serde(untagged)]
enum FfiResult<T: serde::Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: serde::Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

fn error_json(message: impl Into<String>) -> *mut c_char {
    to_c_string(FfiResult::<()>::Err { error: message.into() }.to_json())
}

fn respond<T: serde::Serialize>(result: crate::Result<T>) -> *mut c_char {
    match result {
        Ok(value) => to_c_string(FfiResult::ok(value).to_json()),
        Err(e) => error_json(e.to_string()),
    }
}

/// Caller must free with `grove_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => CString::new(r#"{"error":"string contained null bytes"}"#)
            .unwrap_or_default()
            .into_raw(),
    }
}

/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Parse a JSON argument, producing the error response on failure.
unsafe fn parse_arg<T: serde::de::DeserializeOwned>(
    ptr: *const c_char,
    what: &str,
) -> Result<T, *mut c_char> {
    let raw = from_c_string(ptr).ok_or_else(|| error_json(format!("invalid {what} JSON")))?;
    serde_json::from_str(&raw).map_err(|e| error_json(format!("parse error: {}", e)))
}

// ============================================================================
// Document Lifecycle
// ============================================================================

/// Create a new document.
///
/// # Arguments
/// - `factory_json`: JSON string of a `FactoryDef`
/// - `snapshot_json`: initial snapshot as JSON, or null for defaults
///
/// # Returns
/// Pointer to Document, or null on failure.
///
/// # Safety
/// - `factory_json` must be a valid null-terminated C string or null
/// - `snapshot_json` must be a valid null-terminated C string or null
/// - Caller must free the returned pointer with `grove_document_free`
#[no_mangle]
pub unsafe extern "C" fn grove_document_new(
    factory_json: *const c_char,
    snapshot_json: *const c_char,
) -> *mut Document {
    let def = match from_c_string(factory_json).map(|s| FactoryDef::from_json(&s)) {
        Some(Ok(def)) => def,
        _ => return ptr::null_mut(),
    };

    let snapshot: Option<Value> = match from_c_string(snapshot_json) {
        None => None,
        Some(s) => match serde_json::from_str(&s) {
            Ok(v) => Some(v),
            Err(_) => return ptr::null_mut(),
        },
    };

    match Document::from_def(&def, snapshot.as_ref()) {
        Ok(doc) => Box::into_raw(Box::new(doc)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to create document");
            ptr::null_mut()
        }
    }
}

/// Free a document.
///
/// # Safety
/// - `doc` must be a valid pointer from `grove_document_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn grove_document_free(doc: *mut Document) {
    if !doc.is_null() {
        drop(Box::from_raw(doc));
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from a `grove_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn grove_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Get the root snapshot.
///
/// # Returns
/// JSON string: `{"ok": snapshot}` or `{"error": "message"}`
///
/// # Safety
/// - `doc` must be a valid pointer from `grove_document_new` or null
/// - Caller must free the returned string with `grove_string_free`
#[no_mangle]
pub unsafe extern "C" fn grove_get_snapshot(doc: *const Document) -> *mut c_char {
    let Some(doc) = doc.as_ref() else {
        return error_json("null document pointer");
    };
    respond(doc.snapshot())
}

/// Reconcile the root against a snapshot.
///
/// # Returns
/// JSON string: `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `doc` must be a valid pointer from `grove_document_new` or null
/// - `snapshot_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `grove_string_free`
#[no_mangle]
pub unsafe extern "C" fn grove_apply_snapshot(
    doc: *mut Document,
    snapshot_json: *const c_char,
) -> *mut c_char {
    let Some(doc) = doc.as_mut() else {
        return error_json("null document pointer");
    };
    let snapshot: Value = match parse_arg(snapshot_json, "snapshot") {
        Ok(v) => v,
        Err(response) => return response,
    };
    respond(doc.apply_snapshot(&snapshot))
}

// ============================================================================
// Patches and Actions
// ============================================================================

/// Apply a JSON array of patches in order, stopping at the first failure.
///
/// # Returns
/// JSON string: `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `doc` must be a valid pointer from `grove_document_new` or null
/// - `patches_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `grove_string_free`
#[no_mangle]
pub unsafe extern "C" fn grove_apply_patches(
    doc: *mut Document,
    patches_json: *const c_char,
) -> *mut c_char {
    let Some(doc) = doc.as_mut() else {
        return error_json("null document pointer");
    };
    let patches: Vec<Patch> = match parse_arg(patches_json, "patches") {
        Ok(p) => p,
        Err(response) => return response,
    };
    respond(doc.apply_patches(&patches))
}

/// Replay a JSON array of actions in order, stopping at the first failure.
///
/// # Returns
/// JSON string: `{"ok": [result, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `doc` must be a valid pointer from `grove_document_new` or null
/// - `actions_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `grove_string_free`
#[no_mangle]
pub unsafe extern "C" fn grove_apply_actions(
    doc: *mut Document,
    actions_json: *const c_char,
) -> *mut c_char {
    let Some(doc) = doc.as_mut() else {
        return error_json("null document pointer");
    };
    let actions: Vec<Action> = match parse_arg(actions_json, "actions") {
        Ok(a) => a,
        Err(response) => return response,
    };
    respond(doc.apply_actions(&actions))
}

/// Drain the patches emitted since the last call.
///
/// # Returns
/// JSON string: `{"ok": [Patch, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `doc` must be a valid pointer from `grove_document_new` or null
/// - Caller must free the returned string with `grove_string_free`
#[no_mangle]
pub unsafe extern "C" fn grove_take_patches(doc: *mut Document) -> *mut c_char {
    let Some(doc) = doc.as_mut() else {
        return error_json("null document pointer");
    };
    to_c_string(FfiResult::ok(doc.take_patches()).to_json())
}

// ============================================================================
// Utility
// ============================================================================

/// Get the engine version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn grove_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factory_json() -> CString {
        CString::new(
            r#"{"type": "map", "of": {"type": "model", "name": "Item",
                "fields": {"to": {"default": "world"}}}}"#,
        )
        .unwrap()
    }

    unsafe fn read(ptr: *mut c_char) -> Value {
        let json = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        grove_string_free(ptr);
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn ffi_document_lifecycle() {
        unsafe {
            let factory = factory_json();
            let doc = grove_document_new(factory.as_ptr(), ptr::null());
            assert!(!doc.is_null());
            assert_eq!(read(grove_get_snapshot(doc)), json!({"ok": {}}));
            grove_document_free(doc);
        }
    }

    #[test]
    fn ffi_initial_snapshot() {
        unsafe {
            let factory = factory_json();
            let snapshot = CString::new(r#"{"a": {"to": "x"}}"#).unwrap();
            let doc = grove_document_new(factory.as_ptr(), snapshot.as_ptr());
            assert_eq!(
                read(grove_get_snapshot(doc)),
                json!({"ok": {"a": {"to": "x"}}})
            );
            grove_document_free(doc);
        }
    }

    #[test]
    fn ffi_patches_roundtrip() {
        unsafe {
            let factory = factory_json();
            let doc = grove_document_new(factory.as_ptr(), ptr::null());

            let patches =
                CString::new(r#"[{"op": "add", "path": "/hello", "value": {}}]"#).unwrap();
            assert_eq!(
                read(grove_apply_patches(doc, patches.as_ptr())),
                json!({"ok": null})
            );

            assert_eq!(
                read(grove_take_patches(doc)),
                json!({"ok": [{"op": "add", "path": "/hello", "value": {"to": "world"}}]})
            );
            assert_eq!(read(grove_take_patches(doc)), json!({"ok": []}));

            grove_document_free(doc);
        }
    }

    #[test]
    fn ffi_snapshot_and_actions() {
        unsafe {
            let factory = factory_json();
            let doc = grove_document_new(factory.as_ptr(), ptr::null());

            let snapshot = CString::new(r#"{"a": {}}"#).unwrap();
            read(grove_apply_snapshot(doc, snapshot.as_ptr()));

            let actions =
                CString::new(r#"[{"name": "delete", "path": "", "args": ["a"]}]"#).unwrap();
            assert_eq!(
                read(grove_apply_actions(doc, actions.as_ptr())),
                json!({"ok": [true]})
            );
            assert_eq!(read(grove_get_snapshot(doc)), json!({"ok": {}}));

            grove_document_free(doc);
        }
    }

    #[test]
    fn ffi_version() {
        unsafe {
            let version = grove_version();
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }

    #[test]
    fn ffi_error_handling() {
        unsafe {
            // Null document pointer
            let result = read(grove_get_snapshot(ptr::null()));
            assert!(result.get("error").is_some());

            // Bad factory definition
            let bad = CString::new(r#"{"type": "set"}"#).unwrap();
            assert!(grove_document_new(bad.as_ptr(), ptr::null()).is_null());

            // Invalid patch JSON
            let factory = factory_json();
            let doc = grove_document_new(factory.as_ptr(), ptr::null());
            let invalid = CString::new("not valid json").unwrap();
            let result = read(grove_apply_patches(doc, invalid.as_ptr()));
            assert!(result["error"].as_str().unwrap().starts_with("parse error"));

            // Engine error surfaces as message
            let missing = CString::new(r#"[{"op": "remove", "path": "/a/b"}]"#).unwrap();
            let result = read(grove_apply_patches(doc, missing.as_ptr()));
            assert_eq!(result, json!({"error": "path not found: /a"}));

            grove_document_free(doc);
        }
    }
}
