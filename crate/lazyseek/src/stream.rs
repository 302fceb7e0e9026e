use crate::backing::{self, Backing, BackingStore};
use crate::config::Options;
use crate::error::LazySeekError;
use crate::source::ForwardSource;
use crate::tracker::{CatchUp, ReadStep, Tracker};
use lazyseek_types::{ByteRange, ByteRanges};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

/// A seekable, writable stream on top of a forward-only source.
///
/// Data pulled from the source is copied into a backing store, so it
/// can be read again after seeking back. Data written to the stream
/// goes to the backing store only and, from then on, hides whatever
/// the source has at the same offsets.
///
/// The source is read only as far as necessary and no source byte is
/// ever read twice.
///
/// Errors from the source or the backing store are returned as they
/// are. The stream remains usable afterwards; only completed transfers
/// are taken into account.
pub struct LazySeekStream<R, B = Cursor<Vec<u8>>> {
    source: ForwardSource<R>,
    backing: BackingStore<B>,
    tracker: Tracker,
    options: Options,
    scratch: Vec<u8>,
}

impl<R: Read> LazySeekStream<R> {
    /// Create a stream that keeps source data in memory.
    ///
    /// Fails with [LazySeekError::Configuration] if the source is
    /// larger than [Options::memory_limit]. Use
    /// [LazySeekStream::with_backing] for such sources.
    pub fn new(source: ForwardSource<R>, options: Options) -> Result<Self, LazySeekError> {
        backing::check_memory_limit(source.len(), &options)?;

        Ok(Self::create(source, BackingStore::memory(), 0, options))
    }
}

impl<R: Read, B: Backing> LazySeekStream<R, B> {
    /// Create a stream that keeps source data in `backing`.
    ///
    /// The current content of `backing` is overwritten as necessary.
    pub fn with_backing(
        source: ForwardSource<R>,
        mut backing: B,
        options: Options,
    ) -> Result<Self, LazySeekError> {
        let backing_len = backing.seek(SeekFrom::End(0))?;
        backing.seek(SeekFrom::Start(0))?;

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
            "lazy seek stream on a {}-byte source, {} backing store of {backing_len} bytes",
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

    pub fn can_write(&self) -> bool {
        self.options.writable
    }

    pub fn can_seek(&self) -> bool {
        true
    }

    /// Read data at the current position into `buf`.
    ///
    /// Returns the number of bytes read, which is less than the size
    /// of `buf` only at the end of the data.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, LazySeekError> {
        self.store_pending()?;
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = buf.len() - filled;
            let count = match self.tracker.next_read(&self.source.state(), remaining) {
                ReadStep::End => break,
                ReadStep::Backing(len) => {
                    let count = self.read_backing(&mut buf[filled..filled + len])?;
                    if count > 0 {
                        self.resync_source()?;
                    }
                    count
                }
                ReadStep::Fill(len) => self.read_backing(&mut buf[filled..filled + len])?,
                ReadStep::Source(len) => {
                    let pos = self.tracker.position();
                    if self.source.position() < pos {
                        self.pull_source(pos)?;
                        // Re-evaluate, as the source might have ended early.
                        continue;
                    }
                    self.backing_at(pos)?;
                    let count = self.source.read(&mut buf[filled..filled + len])?;
                    if count == 0 {
                        continue;
                    }
                    self.store_pulled(pos, &buf[filled..filled + count])?;
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
    ///
    /// Written data takes precedence over the source data at the same
    /// offsets. Writing past the end extends the stream.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, LazySeekError> {
        self.check_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let position = self.tracker.position();
        self.check_memory_growth(position.saturating_add(buf.len() as u64))?;
        self.store_pending()?;
        self.backing_at(position)?;
        let count = match self.backing.write(buf) {
            Ok(count) => count,
            Err(err) => {
                self.tracker.backing_failed();
                return Err(err.into());
            }
        };
        self.tracker.record_transfer(count);

        Ok(count)
    }

    /// Write all of `buf` at the current position.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<(), LazySeekError> {
        while !buf.is_empty() {
            let count = self.write(buf)?;
            if count == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
            buf = &buf[count..];
        }

        Ok(())
    }

    /// Write a single byte at the current position.
    pub fn write_byte(&mut self, value: u8) -> Result<(), LazySeekError> {
        self.write_all(&[value])
    }

    /// Move to `position`.
    ///
    /// Moving past the end of the backing store first copies the
    /// source data up to that point into it.
    pub fn set_position(&mut self, position: u64) -> Result<(), LazySeekError> {
        self.store_pending()?;
        if position > self.tracker.backing_len() {
            self.pull_source(position)?;
        }
        self.backing_at(position)?;
        self.tracker.set_position(position);

        Ok(())
    }

    /// Move the position and return the new position.
    ///
    /// [SeekFrom::End] is relative to the logical length, see
    /// [LazySeekStream::len]. Seeking before 0 fails with
    /// [LazySeekError::InvalidArgument].
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, LazySeekError> {
        let target = self.tracker.resolve_seek(&self.source.state(), pos)?;
        self.set_position(target)?;

        Ok(target)
    }

    /// Truncate or extend the backing store to `len` bytes.
    ///
    /// Written data past `len` is forgotten. The position is not
    /// changed.
    pub fn set_len(&mut self, len: u64) -> Result<(), LazySeekError> {
        self.check_writable()?;
        self.check_memory_growth(len)?;
        self.store_pending()?;
        self.backing.set_len(len)?;
        self.tracker.record_set_len(len);

        Ok(())
    }

    /// Flush the backing store.
    pub fn flush(&mut self) -> Result<(), LazySeekError> {
        Ok(self.backing.flush()?)
    }

    /// Flush the backing store and release both the source and the
    /// backing store.
    ///
    /// Both are released even if flushing fails.
    pub fn close(mut self) -> Result<(), LazySeekError> {
        let result = self.store_pending().and_then(|()| self.flush());
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

    /// Refuse to grow the in-memory backing store to more than
    /// [Options::memory_limit] bytes.
    fn check_memory_growth(&self, end: u64) -> Result<(), LazySeekError> {
        if self.backing.is_memory() && end > self.options.memory_limit() {
            return Err(LazySeekError::InvalidArgument(
                "in-memory backing store would grow past its memory limit",
            ));
        }

        Ok(())
    }

    /// Make sure the backing store is positioned at `offset`.
    fn backing_at(&mut self, offset: u64) -> Result<(), LazySeekError> {
        if let Some(target) = self.tracker.backing_seek_needed(offset) {
            if let Err(err) = self.backing.seek(SeekFrom::Start(target)) {
                self.tracker.backing_failed();
                return Err(err.into());
            }
            self.tracker.backing_moved(target);
        }

        Ok(())
    }

    /// Read from the backing store at the current position.
    fn read_backing(&mut self, buf: &mut [u8]) -> Result<usize, LazySeekError> {
        self.backing_at(self.tracker.position())?;
        match self.backing.read(buf) {
            Ok(count) => {
                self.tracker.record_backing_read(count);
                Ok(count)
            }
            Err(err) => {
                self.tracker.backing_failed();
                Err(err.into())
            }
        }
    }

    /// Write all of `buf` to the backing store, at its current position.
    ///
    /// The caller must record the transfer.
    fn write_backing_all(&mut self, buf: &[u8]) -> Result<(), LazySeekError> {
        if let Err(err) = self.backing.write_all(buf) {
            self.tracker.backing_failed();
            return Err(err.into());
        }

        Ok(())
    }

    /// Store `data`, just pulled from the source at `offset`.
    ///
    /// The source can't give it again, so on failure it is kept and
    /// stored by the next operation.
    fn store_pulled(&mut self, offset: u64, data: &[u8]) -> Result<(), LazySeekError> {
        match self
            .backing_at(offset)
            .and_then(|()| self.write_backing_all(data))
        {
            Ok(()) => {
                self.tracker
                    .record_stored(ByteRange::at(offset, data.len() as u64));
                Ok(())
            }
            Err(err) => {
                self.tracker.set_pending(offset, data);
                Err(err)
            }
        }
    }

    /// Store source data left over from a failed transfer, if any.
    fn store_pending(&mut self) -> Result<(), LazySeekError> {
        let Some((offset, _)) = self.tracker.pending() else {
            return Ok(());
        };
        self.backing_at(offset)?;
        let result = match self.tracker.pending() {
            Some((_, data)) => {
                log::debug!("store {} source bytes at {offset}", data.len());
                self.backing.write_all(data)
            }
            None => return Ok(()),
        };
        if let Err(err) = result {
            self.tracker.backing_failed();
            return Err(err.into());
        }
        self.tracker.record_pending_stored();

        Ok(())
    }

    /// After reading written data, bring the source up to the current
    /// position, so it is in the right place once reads go back to
    /// the source.
    fn resync_source(&mut self) -> Result<(), LazySeekError> {
        let position = self.tracker.position();
        if self.source.position() < position {
            self.pull_source(position)?;
        }

        Ok(())
    }

    /// Advance the source up to `target`, copying into the backing store
    /// what hasn't been written.
    fn pull_source(&mut self, target: u64) -> Result<(), LazySeekError> {
        let steps = self.tracker.catch_up(&self.source.state(), target);
        if steps.is_empty() {
            return Ok(());
        }
        log::debug!(
            "advance source from {} to {}",
            self.source.position(),
            target.min(self.source.len())
        );

        let mut scratch = self.take_scratch();
        let result = self.run_catch_up(&steps, &mut scratch);
        self.scratch = scratch;

        result
    }

    fn run_catch_up(&mut self, steps: &[CatchUp], scratch: &mut [u8]) -> Result<(), LazySeekError> {
        for step in steps {
            match *step {
                CatchUp::Discard(range) => {
                    let count = self.source.discard(range.bytecount(), scratch)?;
                    if count < range.bytecount() {
                        return Ok(());
                    }
                }
                CatchUp::Store(range) => {
                    let mut offset = range.start;
                    while offset < range.end {
                        let len = chunk_len(range.end - offset, scratch.len());
                        let count = self.source.read(&mut scratch[..len])?;
                        if count == 0 {
                            return Ok(());
                        }
                        self.store_pulled(offset, &scratch[..count])?;
                        offset += count as u64;
                    }
                }
            }
        }

        Ok(())
    }

    fn take_scratch(&mut self) -> Vec<u8> {
        let scratch = std::mem::take(&mut self.scratch);
        if scratch.is_empty() {
            vec![0; self.options.chunk_size()]
        } else {
            scratch
        }
    }
}

/// Size of the next transfer: `remaining`, capped at `scratch_len`.
pub(crate) fn chunk_len(remaining: u64, scratch_len: usize) -> usize {
    usize::try_from(remaining)
        .map(|remaining| remaining.min(scratch_len))
        .unwrap_or(scratch_len)
}

impl<R: Read, B: Backing> Read for LazySeekStream<R, B> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(LazySeekStream::read(self, buf)?)
    }
}

impl<R: Read, B: Backing> Write for LazySeekStream<R, B> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(LazySeekStream::write(self, buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(LazySeekStream::flush(self)?)
    }
}

impl<R: Read, B: Backing> Seek for LazySeekStream<R, B> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        Ok(LazySeekStream::seek(self, pos)?)
    }

    fn stream_position(&mut self) -> std::io::Result<u64> {
        Ok(self.position())
    }
}
