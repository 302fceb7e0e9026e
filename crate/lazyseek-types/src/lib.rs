//! Value types shared by the lazyseek crates.

mod byterange;

pub use byterange::{ByteRange, ByteRanges, ByteRangesIter};
