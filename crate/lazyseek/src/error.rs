/// Error returned by the lazy seek streams.
///
/// Errors coming from the source or the backing store are kept as
/// they are, in [LazySeekError::Io]. The [std::io] trait
/// implementations convert back to [std::io::Error] without wrapping
/// them.
#[derive(Debug, thiserror::Error)]
pub enum LazySeekError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error(
        "source is {source_len} bytes, more than the in-memory backing store can hold ({limit} bytes); pass an explicit backing store"
    )]
    Configuration { source_len: u64, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LazySeekError {
    /// Return the [std::io::ErrorKind] corresponding to this error.
    pub fn io_kind(&self) -> std::io::ErrorKind {
        match self {
            LazySeekError::InvalidArgument(_) => std::io::ErrorKind::InvalidInput,
            LazySeekError::Unsupported(_) => std::io::ErrorKind::Unsupported,
            LazySeekError::Configuration { .. } => std::io::ErrorKind::InvalidInput,
            LazySeekError::Io(err) => err.kind(),
        }
    }
}

impl From<LazySeekError> for std::io::Error {
    fn from(err: LazySeekError) -> Self {
        match err {
            LazySeekError::Io(err) => err,
            _ => std::io::Error::new(err.io_kind(), err),
        }
    }
}
