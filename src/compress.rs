//! Chunked streaming compression
//!
//! Export feeds record chunks into one zlib stream so the artifact is a
//! single valid stream rather than N independent ones, while no more than
//! one chunk of uncompressed text is joined in memory at a time. The
//! capacity monitor reuses the one-shot path to measure each record's
//! as-if-compressed size.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::LogStoreError;

/// Streaming zlib compressor fed one chunk of records at a time
///
/// Chunks are newline-joined, including across chunk boundaries, so the
/// decompressed output equals the newline-join of every record pushed.
pub struct ChunkCompressor {
    encoder: ZlibEncoder<Vec<u8>>,
    wrote_any: bool,
}

impl ChunkCompressor {
    /// Create a compressor at the default compression level
    pub fn new() -> Self {
        Self {
            encoder: ZlibEncoder::new(Vec::new(), Compression::default()),
            wrote_any: false,
        }
    }

    /// Push one chunk of records into the stream
    ///
    /// Joining happens within the chunk only, bounding peak string length
    /// by the chunk size.
    pub fn push_chunk<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<(), LogStoreError> {
        if lines.is_empty() {
            return Ok(());
        }

        let joined = lines
            .iter()
            .map(|l| l.as_ref())
            .collect::<Vec<_>>()
            .join("\n");

        if self.wrote_any {
            self.encoder
                .write_all(b"\n")
                .map_err(|e| LogStoreError::io(e.to_string()))?;
        }
        self.encoder
            .write_all(joined.as_bytes())
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        self.wrote_any = true;

        Ok(())
    }

    /// Finish the stream and return the compressed bytes
    pub fn finish(self) -> Result<Vec<u8>, LogStoreError> {
        self.encoder
            .finish()
            .map_err(|e| LogStoreError::io(e.to_string()))
    }
}

impl Default for ChunkCompressor {
    fn default() -> Self {
        Self::new()
    }
}

/// Compressed size of a single payload, in bytes
///
/// Used by the capacity monitor to measure the store footprint under the
/// same quota semantics as the export size limit.
pub fn compressed_len(data: &[u8]) -> Result<usize, LogStoreError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| LogStoreError::io(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| LogStoreError::io(e.to_string()))?;
    Ok(compressed.len())
}

/// Decompress a zlib stream produced by [`ChunkCompressor`]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, LogStoreError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| LogStoreError::io(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stream() {
        let compressor = ChunkCompressor::new();
        let bytes = compressor.finish().unwrap();
        assert_eq!(decompress(&bytes).unwrap(), b"");
    }

    #[test]
    fn test_single_chunk_roundtrip() {
        let mut compressor = ChunkCompressor::new();
        compressor.push_chunk(&["alpha", "beta", "gamma"]).unwrap();
        let bytes = compressor.finish().unwrap();
        assert_eq!(decompress(&bytes).unwrap(), b"alpha\nbeta\ngamma");
    }

    #[test]
    fn test_chunk_boundary_gets_newline() {
        let mut compressor = ChunkCompressor::new();
        compressor.push_chunk(&["a", "b"]).unwrap();
        compressor.push_chunk(&["c", "d"]).unwrap();
        let bytes = compressor.finish().unwrap();
        assert_eq!(decompress(&bytes).unwrap(), b"a\nb\nc\nd");
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut compressor = ChunkCompressor::new();
        compressor.push_chunk(&["a"]).unwrap();
        compressor.push_chunk::<&str>(&[]).unwrap();
        compressor.push_chunk(&["b"]).unwrap();
        let bytes = compressor.finish().unwrap();
        assert_eq!(decompress(&bytes).unwrap(), b"a\nb");
    }

    #[test]
    fn test_compressed_len_positive() {
        let len = compressed_len(b"some log line").unwrap();
        assert!(len > 0);
    }
}
