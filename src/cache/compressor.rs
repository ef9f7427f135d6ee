//! Compression of entry records written to the partition store.
//!
//! Every compressed blob starts with one format byte so files written with
//! compression disabled stay readable after it is enabled, and vice versa.

use thiserror::Error;

use crate::config::StorageConfig;

const FORMAT_RAW: u8 = 0;
const FORMAT_ZSTD: u8 = 1;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    ZstdError(#[from] std::io::Error),

    #[error("Unknown record format byte {0:#04x}")]
    UnknownFormat(u8),

    #[error("Record has no data")]
    NoData,
}

/// Encodes and decodes entry records.
#[derive(Debug, Clone)]
pub struct Compressor {
    enabled: bool,
    level: i32,
}

impl Compressor {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            enabled: config.compression,
            level: config.zstd_level,
        }
    }

    /// Wrap a record for storage, compressing it if enabled.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if !self.enabled {
            let mut out = Vec::with_capacity(data.len() + 1);
            out.push(FORMAT_RAW);
            out.extend_from_slice(data);
            return Ok(out);
        }

        let compressed = zstd::encode_all(data, self.level)?;
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(FORMAT_ZSTD);
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Reverse [`Compressor::compress`] regardless of the current setting.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let (&format, payload) = data.split_first().ok_or(CompressionError::NoData)?;
        match format {
            FORMAT_RAW => Ok(payload.to_vec()),
            FORMAT_ZSTD => Ok(zstd::decode_all(payload)?),
            other => Err(CompressionError::UnknownFormat(other)),
        }
    }
}
