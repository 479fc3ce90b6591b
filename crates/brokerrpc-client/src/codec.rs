use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, Result};

/// Encodes and decodes message bodies of type `T`.
pub trait PayloadCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Serialize + DeserializeOwned> PayloadCodec<T> for JsonCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|err| ClientError::Codec(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|err| ClientError::Codec(err.to_string()))
    }
}

/// Protobuf payloads via `prost`, the body format peer services speak.
#[cfg(feature = "prost")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProstCodec;

#[cfg(feature = "prost")]
impl<T: prost::Message + Default> PayloadCodec<T> for ProstCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        Ok(value.encode_to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        T::decode(bytes).map_err(|err| ClientError::Codec(err.to_string()))
    }
}
