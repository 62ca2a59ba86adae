//! Payload serialization.
//!
//! The wire frame treats payloads as opaque bytes. [`Serializer`] lets
//! handlers and callers exchange typed values instead; [`BincodeSerializer`]
//! is the default used by [`Context::bind`](crate::context::Context::bind) and
//! [`Client::call_value`](crate::client::Client::call_value).

use bincode::{Decode, Encode, config, decode_from_slice, encode_to_vec};

use crate::error::BoxError;

/// Trait for serializing and deserializing payload values.
pub trait Serializer {
    /// Serialize `value` into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    fn serialize<M: Encode>(&self, value: &M) -> Result<Vec<u8>, BoxError>;

    /// Deserialize a value from `bytes`, returning it and the bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be parsed.
    fn deserialize<M: Decode<()>>(&self, bytes: &[u8]) -> Result<(M, usize), BoxError>;
}

/// Serializer using `bincode` with its standard configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<M: Encode>(&self, value: &M) -> Result<Vec<u8>, BoxError> {
        encode_to_vec(value, config::standard()).map_err(|error| Box::new(error) as BoxError)
    }

    fn deserialize<M: Decode<()>>(&self, bytes: &[u8]) -> Result<(M, usize), BoxError> {
        decode_from_slice(bytes, config::standard()).map_err(|error| Box::new(error) as BoxError)
    }
}
