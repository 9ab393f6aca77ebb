//! Deterministic JSON codec.
//!
//! Values are converted through [`serde_json::Value`], whose object map keeps
//! keys sorted, so two encodings of equal entities are byte-identical. Hash
//! preimages and persisted bodies both go through here.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::EntityError;

/// Convert an entity to a JSON value with sorted object keys.
pub fn to_value<T: Serialize>(entity: &T) -> Result<Value, EntityError> {
    serde_json::to_value(entity).map_err(|e| EntityError::Codec(e.to_string()))
}

/// Encode an entity as compact canonical JSON text.
pub fn to_json<T: Serialize>(entity: &T) -> Result<String, EntityError> {
    let value = to_value(entity)?;
    serde_json::to_string(&value).map_err(|e| EntityError::Codec(e.to_string()))
}

/// Encode a prepared JSON value as canonical bytes.
pub fn value_bytes(value: &Value) -> Result<Vec<u8>, EntityError> {
    serde_json::to_vec(value).map_err(|e| EntityError::Codec(e.to_string()))
}

/// Decode an entity from JSON text.
pub fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, EntityError> {
    serde_json::from_str(text).map_err(|e| EntityError::Codec(e.to_string()))
}
