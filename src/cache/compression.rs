//! gzip compression of JSON cache payloads.

use crate::store::{StoreError, StoreResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{Read, Write};

/// Compressed bytes plus the uncompressed size
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedPayload {
    pub bytes: Vec<u8>,
    pub original_size: u64,
}

impl CompressedPayload {
    /// Fraction of the original size saved, in `[0, 1]` for useful compression
    pub fn space_saved(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        1.0 - self.bytes.len() as f64 / self.original_size as f64
    }
}

pub fn compress_json(value: &Value) -> StoreResult<CompressedPayload> {
    let raw = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let bytes = encoder
        .finish()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(CompressedPayload {
        bytes,
        original_size: raw.len() as u64,
    })
}

pub fn decompress_json(bytes: &[u8]) -> StoreResult<Value> {
    let mut decoder = GzDecoder::new(bytes);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repetitive_payload_compresses_well() {
        let items: Vec<Value> = (0..200)
            .map(|i| json!({"sku": format!("SKU-{i:05}"), "status": "active", "stock": 10}))
            .collect();
        let value = Value::Array(items);

        let compressed = compress_json(&value).unwrap();
        assert!(compressed.space_saved() > 0.5);
        assert_eq!(decompress_json(&compressed.bytes).unwrap(), value);
    }

    #[test]
    fn test_garbage_input_is_a_serialization_error() {
        let err = decompress_json(b"not gzip").unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
