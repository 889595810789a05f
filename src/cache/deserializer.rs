//! # Node data deserialization.
//!
//! [`NodeDeserializer`] turns the raw bytes of a node into the cached value.
//! Any `Fn(&[u8]) -> Result<T, DeserializeError>` closure is a deserializer;
//! [`Utf8Deserializer`] covers the common string case.
//!
//! A deserialization failure is not retryable: the refresh that hit it stops
//! and the previously cached value is kept.

use crate::error::DeserializeError;

/// Converts node bytes into `T`.
pub trait NodeDeserializer<T>: Send + Sync + 'static {
    fn deserialize(&self, data: &[u8]) -> Result<T, DeserializeError>;
}

impl<T, F> NodeDeserializer<T> for F
where
    F: Fn(&[u8]) -> Result<T, DeserializeError> + Send + Sync + 'static,
{
    fn deserialize(&self, data: &[u8]) -> Result<T, DeserializeError> {
        self(data)
    }
}

/// Strict UTF-8 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Deserializer;

impl NodeDeserializer<String> for Utf8Deserializer {
    fn deserialize(&self, data: &[u8]) -> Result<String, DeserializeError> {
        std::str::from_utf8(data)
            .map(str::to_owned)
            .map_err(|e| DeserializeError::new(e.to_string()))
    }
}
