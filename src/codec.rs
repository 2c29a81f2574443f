//! Value payload codec seam.
//!
//! Compression internals live outside this crate. The index only records the
//! resulting byte length and the SNAPPY bit of the datatype tag.

/// A payload compressor supplied by the engine.
pub trait ValueCodec: Send + Sync {
    /// Compress `input`, returning `None` if the codec failed.
    fn compress(&self, input: &[u8]) -> Option<Vec<u8>>;

    /// Decompress `input`, returning `None` if the data is not valid for
    /// this codec.
    fn decompress(&self, input: &[u8]) -> Option<Vec<u8>>;
}
