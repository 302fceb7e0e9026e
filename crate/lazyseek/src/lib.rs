//! Seekable streams on top of forward-only sources.
//!
//! A [LazySeekStream] reads its source only as far as necessary and
//! keeps what it read in a backing store, so it can go back to data
//! it has already seen. Writes go to the backing store and hide the
//! source data at the same offsets.
//!
//! [AsyncLazySeekStream] is the tokio version.

mod async_stream;
pub mod backing;
pub mod config;
mod error;
pub mod logging;
mod source;
mod stream;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod tracker;

pub use async_stream::AsyncLazySeekStream;
pub use backing::{AsyncBacking, Backing, BackingStore};
pub use config::{ByteValue, Options};
pub use error::LazySeekError;
pub use lazyseek_types::{ByteRange, ByteRanges};
pub use source::ForwardSource;
pub use stream::LazySeekStream;
