//! LZO1x-1 compression for serial chunks (spec §4.2), via the `minilzo-rs`
//! binding — the Rust-ecosystem counterpart of the `minilzo` C library the
//! original host tool links against.

use hostlink_common::Error;

/// Compress `data`. LZO1x-1 never expands pathological input by more than a
/// small constant overhead, so this only fails if the underlying library
/// rejects the buffer outright.
pub fn compress(data: &[u8]) -> Vec<u8> {
    minilzo::compress(data).unwrap_or_else(|_| data.to_vec())
}

/// Decompress a chunk whose original length was `expected_len`.
/// `ProtocolCorrupt` on failure, per spec §7 ("decompression failure");
/// the caller replies `'B'` and the peer resends the chunk.
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>, Error> {
    minilzo::decompress(data, expected_len)
        .map_err(|e| Error::ProtocolCorrupt(format!("lzo decompress: {e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_compress_decompress() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(32);
        let compressed = compress(&data);
        let restored = decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn round_trips_empty_input() {
        let data: Vec<u8> = Vec::new();
        let compressed = compress(&data);
        let restored = decompress(&compressed, 0).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn corrupt_input_reports_protocol_corrupt() {
        let garbage = vec![0xffu8; 16];
        assert!(decompress(&garbage, 1024).is_err());
    }
}
