//! LZ4 block compression.
//!
//! Compressed blocks carry a 4-byte little-endian decompressed size prefix.

use crate::error::TransportError;

/// Largest decompressed size accepted (16 MiB).
pub const MAX_DECOMPRESSED_SIZE: usize = 16 * 1024 * 1024;

/// Compresses a block, prefixing its uncompressed length.
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompresses a size-prefixed block.
///
/// The declared size is checked before any allocation.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, TransportError> {
    if data.len() < 4 {
        return Err(TransportError::Decompression(format!(
            "block too short: {} bytes",
            data.len()
        )));
    }
    let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if declared > MAX_DECOMPRESSED_SIZE {
        return Err(TransportError::DecompressedTooLarge {
            size: declared,
            max: MAX_DECOMPRESSED_SIZE,
        });
    }
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| TransportError::Decompression(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress() {
        let data = b"relaywire relaywire relaywire relaywire relaywire".repeat(20);
        let compressed = compress(&data);
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_rejects_short_block() {
        assert!(matches!(
            decompress(&[1, 0]),
            Err(TransportError::Decompression(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_declaration() {
        let mut block = ((MAX_DECOMPRESSED_SIZE + 1) as u32).to_le_bytes().to_vec();
        block.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(
            decompress(&block),
            Err(TransportError::DecompressedTooLarge { .. })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        let block = [8, 0, 0, 0, 0xFF, 0xFF, 0xFF];
        assert!(decompress(&block).is_err());
    }
}
