//! Sources and backing stores for tests.

use crate::backing::{AsyncBacking, Backing};
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};

/// Return `len` bytes with values 0, 1, 2, ... wrapping at 256.
pub fn sequential_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

/// Number of bytes handed out by a [CountingSource].
#[derive(Clone, Default, Debug)]
pub struct PullCounter(Arc<AtomicU64>);

impl PullCounter {
    pub fn pulled(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn add(&self, count: usize) {
        self.0.fetch_add(count as u64, Ordering::SeqCst);
    }
}

/// A forward-only reader over in-memory data that counts the bytes
/// it hands out.
///
/// Works as blocking or async reader.
pub struct CountingSource {
    data: Vec<u8>,
    offset: usize,
    max_chunk: usize,
    fail_at: Option<usize>,
    counter: PullCounter,
}

impl CountingSource {
    pub fn new(data: Vec<u8>) -> (Self, PullCounter) {
        let counter = PullCounter::default();
        (
            Self {
                data,
                offset: 0,
                max_chunk: usize::MAX,
                fail_at: None,
                counter: counter.clone(),
            },
            counter,
        )
    }

    /// Hand out at most `max_chunk` bytes per read.
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    /// Fail all reads once `offset` is reached.
    pub fn failing_at(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }

    fn next_chunk(&mut self, requested: usize) -> std::io::Result<&[u8]> {
        if let Some(fail_at) = self.fail_at {
            if self.offset >= fail_at {
                return Err(std::io::Error::new(
                    ErrorKind::ConnectionReset,
                    "source connection reset",
                ));
            }
        }
        let mut end = self.data.len().min(self.offset + requested.min(self.max_chunk));
        if let Some(fail_at) = self.fail_at {
            end = end.min(fail_at);
        }
        let start = self.offset;
        self.offset = end;
        self.counter.add(end - start);

        Ok(&self.data[start..end])
    }
}

impl Read for CountingSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let chunk = self.next_chunk(buf.len())?;
        let len = chunk.len();
        buf[..len].copy_from_slice(chunk);

        Ok(len)
    }
}

impl AsyncRead for CountingSource {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let chunk = self.get_mut().next_chunk(buf.remaining())?;
        buf.put_slice(chunk);

        Poll::Ready(Ok(()))
    }
}

/// Switch that makes a [FlakyBacking] fail or a [StallingBacking] stall.
#[derive(Clone, Default, Debug)]
pub struct FailSwitch(Arc<AtomicBool>);

impl FailSwitch {
    pub fn set(&self, fail: bool) {
        self.0.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> std::io::Result<()> {
        if self.0.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("backing store failure"));
        }

        Ok(())
    }
}

/// An in-memory backing store whose writes fail on demand.
pub struct FlakyBacking {
    inner: Cursor<Vec<u8>>,
    fail_writes: FailSwitch,
}

impl FlakyBacking {
    pub fn new() -> (Self, FailSwitch) {
        let switch = FailSwitch::default();
        (
            Self {
                inner: Cursor::new(Vec::new()),
                fail_writes: switch.clone(),
            },
            switch,
        )
    }
}

impl Read for FlakyBacking {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for FlakyBacking {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.fail_writes.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.fail_writes.check()
    }
}

impl Seek for FlakyBacking {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Backing for FlakyBacking {
    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        self.fail_writes.check()?;
        Backing::set_len(&mut self.inner, len)
    }
}

/// An async in-memory backing store whose writes never complete
/// while its switch is on.
pub struct StallingBacking {
    inner: Cursor<Vec<u8>>,
    stall_writes: FailSwitch,
}

impl StallingBacking {
    pub fn new() -> (Self, FailSwitch) {
        let switch = FailSwitch::default();
        (
            Self {
                inner: Cursor::new(Vec::new()),
                stall_writes: switch.clone(),
            },
            switch,
        )
    }
}

impl AsyncRead for StallingBacking {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for StallingBacking {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.stall_writes.check().is_err() {
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }

        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl AsyncSeek for StallingBacking {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.get_mut().inner).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Pin::new(&mut self.get_mut().inner).poll_complete(cx)
    }
}

#[async_trait::async_trait]
impl AsyncBacking for StallingBacking {
    async fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        AsyncBacking::set_len(&mut self.inner, len).await
    }
}
