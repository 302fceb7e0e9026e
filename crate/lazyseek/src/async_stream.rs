use crate::backing::{self, AsyncBacking, BackingStore};
use crate::config::Options;
use crate::error::LazySeekError;
use crate::source::ForwardSource;
use crate::stream::chunk_len;
use crate::tracker::{CatchUp, ReadStep, Tracker};
use lazyseek_types::ByteRanges;
use std::io::{Cursor, SeekFrom};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Async version of [crate::LazySeekStream].
///
/// Behaves exactly as the blocking version. I/O happens only when
/// calling the source or the backing store, and the bookkeeping is
/// updated right after each such call completes, so dropping a future
/// leaves the stream consistent with the data actually transferred.
pub struct AsyncLazySeekStream<R, B = Cursor<Vec<u8>>> {
    source: ForwardSource<R>,
    backing: BackingStore<B>,
    tracker: Tracker,
    options: Options,
    scratch: Vec<u8>,
}

impl<R: AsyncRead + Unpin> AsyncLazySeekStream<R> {
    /// Create a stream that keeps source data in memory.
    ///
    /// Fails with [LazySeekError::Configuration] if the source is
    /// larger than [Options::memory_limit].
    pub fn new(source: ForwardSource<R>, options: Options) -> Result<Self, LazySeekError> {
        backing::check_memory_limit(source.len(), &options)?;

        Ok(Self::create(source, BackingStore::memory(), 0, options))
    }
}

impl<R: AsyncRead + Unpin, B: AsyncBacking> AsyncLazySeekStream<R, B> {
    /// Create a stream that keeps source data in `backing`.
    pub async fn with_backing(
        source: ForwardSource<R>,
        mut backing: B,
        options: Options,
    ) -> Result<Self, LazySeekError> {
        let backing_len = backing.seek(SeekFrom::End(0)).await?;
        backing.seek(SeekFrom::Start(0)).await?;

        Ok(Self::create(
            source,
            BackingStore::Custom(backing),
            backing_len,
            options,
        ))
    }

    fn create(
        source: ForwardSource<R>,
        backing: BackingStore<B>,
        backing_len: u64,
        options: Options,
    ) -> Self {
        log::debug!(
            "async lazy seek stream on a {}-byte source, {} backing store of {backing_len} bytes",
            source.len(),
            if backing.is_memory() { "memory" } else { "custom" },
        );
        Self {
            source,
            backing,
            tracker: Tracker::new(backing_len),
            options,
            scratch: Vec::new(),
        }
    }

    /// Current logical position.
    pub fn position(&self) -> u64 {
        self.tracker.position()
    }

    /// Number of bytes consumed from the source so far.
    pub fn source_position(&self) -> u64 {
        self.source.position()
    }

    /// Logical length: the larger of the source and backing store lengths.
    pub fn len(&self) -> u64 {
        self.tracker.len(&self.source.state())
    }

    /// Returns true if the logical length is 0.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ranges whose data is held by the backing store.
    pub fn written_ranges(&self) -> &ByteRanges {
        self.tracker.written()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn can_read(&self) -> bool {
        true
    }

    /// Returns false for read-only streams.
    pub fn can_write(&self) -> bool {
        self.options.writable
    }

    pub fn can_seek(&self) -> bool {
        true
    }

    /// Read data at the current position into `buf`.
    ///
    /// Returns less than the size of `buf` only at the end of the data.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, LazySeekError> {
        self.store_pending().await?;
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = buf.len() - filled;
            let count = match self.tracker.next_read(&self.source.state(), remaining) {
                ReadStep::End => break,
                ReadStep::Backing(len) => {
                    let count = self.read_backing(&mut buf[filled..filled + len]).await?;
                    if count > 0 {
                        let position = self.tracker.position();
                        if self.source.position() < position {
                            self.pull_source(position).await?;
                        }
                    }
                    count
                }
                ReadStep::Fill(len) => self.read_backing(&mut buf[filled..filled + len]).await?,
                ReadStep::Source(len) => {
                    let pos = self.tracker.position();
                    if self.source.position() < pos {
                        self.pull_source(pos).await?;
                        continue;
                    }
                    let count = self
                        .source
                        .read_async(&mut buf[filled..filled + len])
                        .await?;
                    if count == 0 {
                        continue;
                    }
                    self.store_pulled(pos, &buf[filled..filled + count]).await?;
                    self.tracker.set_position(pos + count as u64);
                    count
                }
            };
            if count == 0 {
                break;
            }
            filled += count;
        }

        Ok(filled)
    }

    /// Write `buf` at the current position.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, LazySeekError> {
        self.check_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let position = self.tracker.position();
        self.check_memory_growth(position.saturating_add(buf.len() as u64))?;
        self.store_pending().await?;
        self.backing_at(position).await?;
        self.tracker.backing_failed();
        let count = self.backing.write(buf).await?;
        self.tracker.record_transfer(count);

        Ok(count)
    }

    /// Write all of `buf` at the current position.
    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<(), LazySeekError> {
        while !buf.is_empty() {
            let count = self.write(buf).await?;
            if count == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
            buf = &buf[count..];
        }

        Ok(())
    }

    /// Write a single byte at the current position.
    pub async fn write_byte(&mut self, value: u8) -> Result<(), LazySeekError> {
        self.write_all(&[value]).await
    }

    /// Move to `position`, pulling source data into the backing store
    /// when moving past its end.
    pub async fn set_position(&mut self, position: u64) -> Result<(), LazySeekError> {
        self.store_pending().await?;
        if position > self.tracker.backing_len() {
            self.pull_source(position).await?;
        }
        self.backing_at(position).await?;
        self.tracker.set_position(position);

        Ok(())
    }

    /// Move the position and return the new position.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64, LazySeekError> {
        let target = self.tracker.resolve_seek(&self.source.state(), pos)?;
        self.set_position(target).await?;

        Ok(target)
    }

    /// Truncate or extend the backing store to `len` bytes.
    pub async fn set_len(&mut self, len: u64) -> Result<(), LazySeekError> {
        self.check_writable()?;
        self.check_memory_growth(len)?;
        self.store_pending().await?;
        self.backing.set_len(len).await?;
        self.tracker.record_set_len(len);

        Ok(())
    }

    /// Flush the backing store.
    pub async fn flush(&mut self) -> Result<(), LazySeekError> {
        Ok(self.backing.flush().await?)
    }

    /// Shut down the backing store and release both the source and the
    /// backing store.
    pub async fn close(mut self) -> Result<(), LazySeekError> {
        let result = match self.store_pending().await {
            Ok(()) => self.backing.shutdown().await.map_err(LazySeekError::from),
            Err(err) => Err(err),
        };
        let Self {
            source, backing, ..
        } = self;
        drop(backing);
        drop(source);

        result
    }

    /// Give back the source and the backing store.
    pub fn into_parts(self) -> (ForwardSource<R>, BackingStore<B>) {
        (self.source, self.backing)
    }

    fn check_writable(&self) -> Result<(), LazySeekError> {
        if !self.options.writable {
            return Err(LazySeekError::Unsupported("stream is read-only"));
        }

        Ok(())
    }

    fn check_memory_growth(&self, end: u64) -> Result<(), LazySeekError> {
        if self.backing.is_memory() && end > self.options.memory_limit() {
            return Err(LazySeekError::InvalidArgument(
                "in-memory backing store would grow past its memory limit",
            ));
        }

        Ok(())
    }

    async fn backing_at(&mut self, offset: u64) -> Result<(), LazySeekError> {
        if let Some(target) = self.tracker.backing_seek_needed(offset) {
            self.tracker.backing_failed();
            self.backing.seek(SeekFrom::Start(target)).await?;
            self.tracker.backing_moved(target);
        }

        Ok(())
    }

    async fn read_backing(&mut self, buf: &mut [u8]) -> Result<usize, LazySeekError> {
        self.backing_at(self.tracker.position()).await?;
        // The cursor is unknown until the read completes.
        self.tracker.backing_failed();
        let count = self.backing.read(buf).await?;
        self.tracker.record_backing_read(count);

        Ok(count)
    }

    /// Store `data`, just pulled from the source at `offset`.
    ///
    /// The data is kept by the tracker until it is stored, so it
    /// survives both a failure and a dropped future.
    async fn store_pulled(&mut self, offset: u64, data: &[u8]) -> Result<(), LazySeekError> {
        self.tracker.set_pending(offset, data);

        self.store_pending().await
    }

    /// Store source data left over from a failed or interrupted
    /// transfer, if any.
    async fn store_pending(&mut self) -> Result<(), LazySeekError> {
        let Some((offset, _)) = self.tracker.pending() else {
            return Ok(());
        };
        self.backing_at(offset).await?;
        self.tracker.backing_failed();
        if let Some((_, data)) = self.tracker.pending() {
            log::debug!("store {} source bytes at {offset}", data.len());
            self.backing.write_all(data).await?;
        }
        self.tracker.record_pending_stored();

        Ok(())
    }

    async fn pull_source(&mut self, target: u64) -> Result<(), LazySeekError> {
        let steps = self.tracker.catch_up(&self.source.state(), target);
        if steps.is_empty() {
            return Ok(());
        }
        log::debug!(
            "advance source from {} to {}",
            self.source.position(),
            target.min(self.source.len())
        );

        let mut scratch = std::mem::take(&mut self.scratch);
        if scratch.is_empty() {
            scratch = vec![0; self.options.chunk_size()];
        }
        let result = self.run_catch_up(&steps, &mut scratch).await;
        self.scratch = scratch;

        result
    }

    async fn run_catch_up(
        &mut self,
        steps: &[CatchUp],
        scratch: &mut [u8],
    ) -> Result<(), LazySeekError> {
        for step in steps {
            match *step {
                CatchUp::Discard(range) => {
                    let count = self
                        .source
                        .discard_async(range.bytecount(), scratch)
                        .await?;
                    if count < range.bytecount() {
                        return Ok(());
                    }
                }
                CatchUp::Store(range) => {
                    let mut offset = range.start;
                    while offset < range.end {
                        let len = chunk_len(range.end - offset, scratch.len());
                        let count = self.source.read_async(&mut scratch[..len]).await?;
                        if count == 0 {
                            return Ok(());
                        }
                        self.store_pulled(offset, &scratch[..count]).await?;
                        offset += count as u64;
                    }
                }
            }
        }

        Ok(())
    }
}
