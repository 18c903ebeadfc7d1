//! Value encoding shared by the typed stores.
//!
//! Values are JSON. A value that fails to encode or decode means the store
//! was corrupted underneath us, which is a fault rather than an error.

use perpclob_types::fault::{self, InvariantViolation};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) fn encode<T: Serialize>(table: &'static str, value: &T) -> Vec<u8> {
    match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(e) => fault::raise(InvariantViolation::CorruptStore {
            table,
            detail: e.to_string(),
        }),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(table: &'static str, bytes: &[u8]) -> T {
    match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => fault::raise(InvariantViolation::CorruptStore {
            table,
            detail: e.to_string(),
        }),
    }
}
