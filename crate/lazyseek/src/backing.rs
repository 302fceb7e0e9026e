use crate::config::Options;
use crate::error::LazySeekError;
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};

/// A seekable, writable store that caches what a lazy seek stream
/// has seen.
pub trait Backing: Read + Write + Seek {
    /// Truncate or extend the store to `len` bytes.
    ///
    /// Extending fills the new space with zeroes. The current position
    /// is left unchanged.
    fn set_len(&mut self, len: u64) -> std::io::Result<()>;
}

/// Async version of [Backing].
#[async_trait::async_trait]
pub trait AsyncBacking: AsyncRead + AsyncWrite + AsyncSeek + Unpin + Send {
    /// Truncate or extend the store to `len` bytes.
    async fn set_len(&mut self, len: u64) -> std::io::Result<()>;
}

impl Backing for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        resize_vec(self.get_mut(), len)
    }
}

impl Backing for std::fs::File {
    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        std::fs::File::set_len(self, len)
    }
}

impl<B: Backing + ?Sized> Backing for &mut B {
    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        (**self).set_len(len)
    }
}

#[async_trait::async_trait]
impl AsyncBacking for Cursor<Vec<u8>> {
    async fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        resize_vec(self.get_mut(), len)
    }
}

#[async_trait::async_trait]
impl AsyncBacking for tokio::fs::File {
    async fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        tokio::fs::File::set_len(self, len).await
    }
}

fn resize_vec(vec: &mut Vec<u8>, len: u64) -> std::io::Result<()> {
    let len = reserve(vec, len)?;
    vec.resize(len, 0);

    Ok(())
}

/// Make room for `len` bytes in `vec`, failing instead of aborting
/// when that much memory isn't available.
fn reserve(vec: &mut Vec<u8>, len: u64) -> std::io::Result<usize> {
    let len = usize::try_from(len).map_err(|_| {
        std::io::Error::new(ErrorKind::InvalidInput, "length exceeds addressable memory")
    })?;
    if len > vec.len() {
        vec.try_reserve(len - vec.len())
            .map_err(|err| std::io::Error::new(ErrorKind::OutOfMemory, err))?;
    }

    Ok(len)
}

/// Make room for writing `buf` at the current position of `cursor`.
fn reserve_for_write(cursor: &mut Cursor<Vec<u8>>, buf: &[u8]) -> std::io::Result<()> {
    let end = cursor.position().saturating_add(buf.len() as u64);
    reserve(cursor.get_mut(), end)?;

    Ok(())
}

/// Make sure a source of `source_len` bytes fits into the in-memory
/// backing store.
pub(crate) fn check_memory_limit(source_len: u64, options: &Options) -> Result<(), LazySeekError> {
    let limit = options.memory_limit();
    if source_len > limit {
        return Err(LazySeekError::Configuration { source_len, limit });
    }

    Ok(())
}

/// The backing store of a lazy seek stream.
///
/// Either an in-memory buffer created by the stream itself, which
/// is limited in size, or a store passed in by the caller.
#[derive(Debug)]
pub enum BackingStore<B> {
    /// In-memory buffer.
    Memory(Cursor<Vec<u8>>),

    /// Caller-supplied store.
    Custom(B),
}

impl<B> BackingStore<B> {
    pub(crate) fn memory() -> Self {
        BackingStore::Memory(Cursor::new(Vec::new()))
    }

    /// Returns true for the in-memory store.
    pub fn is_memory(&self) -> bool {
        matches!(self, BackingStore::Memory(_))
    }

    /// Give back the caller-supplied store, if any.
    pub fn into_custom(self) -> Option<B> {
        match self {
            BackingStore::Memory(_) => None,
            BackingStore::Custom(b) => Some(b),
        }
    }

    /// Give back the content of the in-memory store, if any.
    pub fn into_memory(self) -> Option<Vec<u8>> {
        match self {
            BackingStore::Memory(c) => Some(c.into_inner()),
            BackingStore::Custom(_) => None,
        }
    }
}

impl<B: Read> Read for BackingStore<B> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            BackingStore::Memory(c) => c.read(buf),
            BackingStore::Custom(b) => b.read(buf),
        }
    }
}

impl<B: Write> Write for BackingStore<B> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            BackingStore::Memory(c) => {
                reserve_for_write(c, buf)?;
                c.write(buf)
            }
            BackingStore::Custom(b) => b.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            BackingStore::Memory(c) => c.flush(),
            BackingStore::Custom(b) => b.flush(),
        }
    }
}

impl<B: Seek> Seek for BackingStore<B> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            BackingStore::Memory(c) => c.seek(pos),
            BackingStore::Custom(b) => b.seek(pos),
        }
    }
}

impl<B: Backing> Backing for BackingStore<B> {
    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        match self {
            BackingStore::Memory(c) => Backing::set_len(c, len),
            BackingStore::Custom(b) => b.set_len(len),
        }
    }
}

impl<B: AsyncRead + Unpin> AsyncRead for BackingStore<B> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackingStore::Memory(c) => Pin::new(c).poll_read(cx, buf),
            BackingStore::Custom(b) => Pin::new(b).poll_read(cx, buf),
        }
    }
}

impl<B: AsyncWrite + Unpin> AsyncWrite for BackingStore<B> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            BackingStore::Memory(c) => {
                if let Err(err) = reserve_for_write(c, buf) {
                    return Poll::Ready(Err(err));
                }
                Pin::new(c).poll_write(cx, buf)
            }
            BackingStore::Custom(b) => Pin::new(b).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackingStore::Memory(c) => Pin::new(c).poll_flush(cx),
            BackingStore::Custom(b) => Pin::new(b).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackingStore::Memory(c) => Pin::new(c).poll_shutdown(cx),
            BackingStore::Custom(b) => Pin::new(b).poll_shutdown(cx),
        }
    }
}

impl<B: AsyncSeek + Unpin> AsyncSeek for BackingStore<B> {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        match self.get_mut() {
            BackingStore::Memory(c) => Pin::new(c).start_seek(position),
            BackingStore::Custom(b) => Pin::new(b).start_seek(position),
        }
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        match self.get_mut() {
            BackingStore::Memory(c) => Pin::new(c).poll_complete(cx),
            BackingStore::Custom(b) => Pin::new(b).poll_complete(cx),
        }
    }
}

#[async_trait::async_trait]
impl<B: AsyncBacking> AsyncBacking for BackingStore<B> {
    async fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        match self {
            BackingStore::Memory(c) => resize_vec(c.get_mut(), len),
            BackingStore::Custom(b) => b.set_len(len).await,
        }
    }
}
