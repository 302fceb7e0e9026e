//! Bookkeeping for lazy seek streams.
//!
//! [Tracker] decides where the bytes at the current position come
//! from and records what each transfer did. It does no I/O, so the
//! blocking and async streams share it. Streams must report each
//! transfer right after it succeeds, with the number of bytes actually
//! transferred.

use crate::error::LazySeekError;
use crate::source::SourceState;
use lazyseek_types::{ByteRange, ByteRanges};
use std::cmp::min;
use std::io::SeekFrom;

/// Where the next bytes of a read come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStep {
    /// The position is within a written range; read that many bytes
    /// from the backing store.
    Backing(usize),

    /// The source must provide that many bytes, which must then be
    /// copied into the backing store.
    ///
    /// If the source is behind the current position, it must be caught
    /// up first.
    Source(usize),

    /// The source can't provide the bytes at this position anymore, so
    /// whatever the backing store has is authoritative. Read up to
    /// that many bytes from the backing store.
    Fill(usize),

    /// No more data.
    End,
}

/// What to do with source data skipped over to reach a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CatchUp {
    /// Copy source data into the backing store.
    Store(ByteRange),

    /// Throw away source data; the range has been written to.
    Discard(ByteRange),
}

#[derive(Debug)]
pub(crate) struct Tracker {
    /// Ranges the backing store holds authoritative data for.
    written: ByteRanges,

    /// Logical position.
    position: u64,

    /// Length of the backing store.
    backing_len: u64,

    /// Position of the backing store, if known.
    ///
    /// Unknown after a failed backing store operation.
    backing_cursor: Option<u64>,

    /// Offset of source data that was pulled but not yet stored.
    pending_offset: Option<u64>,

    /// Source data that was pulled but not yet stored.
    ///
    /// The source can't provide it again, so it must reach the backing
    /// store before anything else happens.
    pending: Vec<u8>,
}

impl Tracker {
    /// Create a tracker for a backing store of `backing_len` bytes,
    /// whose position is 0.
    ///
    /// The initial content of the backing store is not trusted.
    pub(crate) fn new(backing_len: u64) -> Self {
        Self {
            written: ByteRanges::new(),
            position: 0,
            backing_len,
            backing_cursor: Some(0),
            pending_offset: None,
            pending: Vec::new(),
        }
    }

    pub(crate) fn written(&self) -> &ByteRanges {
        &self.written
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn backing_len(&self) -> u64 {
        self.backing_len
    }

    /// Logical length: the larger of the source and backing store lengths.
    pub(crate) fn len(&self, source: &SourceState) -> u64 {
        self.backing_len.max(source.len)
    }

    /// Decide where to read at most `remaining` bytes at the current
    /// position from.
    pub(crate) fn next_read(&self, source: &SourceState, remaining: usize) -> ReadStep {
        if remaining == 0 {
            return ReadStep::End;
        }
        let pos = self.position;
        if let Some(range) = self.written.range_containing(pos) {
            return ReadStep::Backing(clamp(remaining, range.end - pos));
        }

        // Never go past the next written range, as data must then come
        // from the backing store.
        let bound = self.written.next_start_after(pos).unwrap_or(u64::MAX);
        if source.can_supply(pos) {
            return ReadStep::Source(clamp(remaining, min(source.len, bound) - pos));
        }
        if pos >= self.backing_len {
            return ReadStep::End;
        }

        ReadStep::Fill(clamp(remaining, min(self.backing_len, bound) - pos))
    }

    /// Plan advancing the source up to `target`.
    ///
    /// Source data that isn't shadowed by a write is stored; the rest
    /// is discarded. Returns nothing if the source is already at or
    /// past `target`.
    pub(crate) fn catch_up(&self, source: &SourceState, target: u64) -> Vec<CatchUp> {
        let end = min(target, source.len);
        if source.exhausted || end <= source.position {
            return vec![];
        }

        let mut steps = vec![];
        let mut cursor = source.position;
        for gap in self.written.gaps(&ByteRange::new(source.position, end)) {
            if gap.start > cursor {
                steps.push(CatchUp::Discard(ByteRange::new(cursor, gap.start)));
            }
            steps.push(CatchUp::Store(gap));
            cursor = gap.end;
        }
        if cursor < end {
            steps.push(CatchUp::Discard(ByteRange::new(cursor, end)));
        }

        steps
    }

    /// Compute the target of a seek.
    ///
    /// [SeekFrom::End] is relative to the logical length.
    pub(crate) fn resolve_seek(
        &self,
        source: &SourceState,
        pos: SeekFrom,
    ) -> Result<u64, LazySeekError> {
        let (base, offset) = match pos {
            SeekFrom::Start(offset) => return Ok(offset),
            SeekFrom::Current(offset) => (self.position, offset),
            SeekFrom::End(offset) => (self.len(source), offset),
        };

        match base.checked_add_signed(offset) {
            Some(target) => Ok(target),
            None if offset < 0 => Err(LazySeekError::InvalidArgument(
                "seek before start of stream",
            )),
            None => Err(LazySeekError::InvalidArgument("seek position overflow")),
        }
    }

    /// Return the position the backing store must be moved to before
    /// accessing `offset`, or `None` if it's already there.
    pub(crate) fn backing_seek_needed(&self, offset: u64) -> Option<u64> {
        if self.backing_cursor == Some(offset) {
            None
        } else {
            Some(offset)
        }
    }

    /// The backing store was moved to `offset`.
    pub(crate) fn backing_moved(&mut self, offset: u64) {
        self.backing_cursor = Some(offset);
    }

    /// A backing store operation failed; its position is unknown.
    pub(crate) fn backing_failed(&mut self) {
        self.backing_cursor = None;
    }

    /// Move the logical position.
    pub(crate) fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// `count` bytes were read from the backing store at the current position.
    pub(crate) fn record_backing_read(&mut self, count: usize) {
        self.position += count as u64;
        self.backing_cursor = Some(self.position);
    }

    /// `count` bytes were written to the backing store at the current
    /// position, either by the caller or copied from the source.
    pub(crate) fn record_transfer(&mut self, count: usize) {
        let range = ByteRange::at(self.position, count as u64);
        self.record_stored(range);
        self.position = range.end;
    }

    /// Source data was copied into the backing store at `range`,
    /// without moving the logical position.
    pub(crate) fn record_stored(&mut self, range: ByteRange) {
        self.written.add(&range);
        self.backing_len = self.backing_len.max(range.end);
        self.backing_cursor = Some(range.end);
    }

    /// Keep `data`, pulled from the source at `offset`, until it is stored.
    pub(crate) fn set_pending(&mut self, offset: u64, data: &[u8]) {
        self.pending.clear();
        self.pending.extend_from_slice(data);
        self.pending_offset = Some(offset);
    }

    /// Source data waiting to be stored, and its offset.
    pub(crate) fn pending(&self) -> Option<(u64, &[u8])> {
        self.pending_offset.map(|offset| (offset, self.pending.as_slice()))
    }

    /// The pending source data was written to the backing store.
    pub(crate) fn record_pending_stored(&mut self) {
        if let Some(offset) = self.pending_offset.take() {
            self.record_stored(ByteRange::at(offset, self.pending.len() as u64));
            self.pending.clear();
        }
    }

    /// The backing store was truncated or extended to `len`.
    pub(crate) fn record_set_len(&mut self, len: u64) {
        if len < self.backing_len {
            log::debug!("truncate written ranges {} to {len}", self.written);
        }
        self.written.truncate(len);
        self.backing_len = len;
    }
}

/// Number of bytes to transfer: at most `remaining`, at most `available`.
fn clamp(remaining: usize, available: u64) -> usize {
    usize::try_from(available)
        .map(|available| min(available, remaining))
        .unwrap_or(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(len: u64, position: u64) -> SourceState {
        SourceState {
            len,
            position,
            exhausted: false,
        }
    }

    #[test]
    fn read_from_source_first() {
        let tracker = Tracker::new(0);
        assert_eq!(ReadStep::Source(10), tracker.next_read(&source(100, 0), 10));
        assert_eq!(ReadStep::Source(100), tracker.next_read(&source(100, 0), 1000));
        assert_eq!(ReadStep::End, tracker.next_read(&source(0, 0), 10));
        assert_eq!(ReadStep::End, tracker.next_read(&source(100, 0), 0));
    }

    #[test]
    fn read_written_range_from_backing() {
        let mut tracker = Tracker::new(0);
        tracker.record_transfer(10);
        tracker.set_position(4);
        assert_eq!(ReadStep::Backing(6), tracker.next_read(&source(100, 10), 20));
        assert_eq!(ReadStep::Backing(2), tracker.next_read(&source(100, 10), 2));
    }

    #[test]
    fn source_read_stops_at_written_range() {
        let mut tracker = Tracker::new(0);
        tracker.set_position(20);
        tracker.record_transfer(5);
        tracker.set_position(0);
        assert_eq!(ReadStep::Source(20), tracker.next_read(&source(100, 0), 50));
    }

    #[test]
    fn fill_when_source_cannot_supply() {
        let mut tracker = Tracker::new(0);
        // write [20, 25) past the end of a 10-byte source
        tracker.set_position(20);
        tracker.record_transfer(5);

        tracker.set_position(10);
        assert_eq!(ReadStep::Fill(10), tracker.next_read(&source(10, 10), 50));

        tracker.set_position(25);
        assert_eq!(ReadStep::End, tracker.next_read(&source(10, 10), 50));
    }

    #[test]
    fn exhausted_source_falls_back_to_backing() {
        let tracker = Tracker::new(0);
        let exhausted = SourceState {
            len: 100,
            position: 0,
            exhausted: true,
        };
        assert_eq!(ReadStep::End, tracker.next_read(&exhausted, 10));
    }

    #[test]
    fn catch_up_stores_and_discards() {
        let mut tracker = Tracker::new(0);
        tracker.set_position(5);
        tracker.record_transfer(5);
        tracker.set_position(20);
        tracker.record_transfer(2);

        assert_eq!(
            vec![
                CatchUp::Store(ByteRange::new(0, 5)),
                CatchUp::Discard(ByteRange::new(5, 10)),
                CatchUp::Store(ByteRange::new(10, 20)),
                CatchUp::Discard(ByteRange::new(20, 22)),
                CatchUp::Store(ByteRange::new(22, 30)),
            ],
            tracker.catch_up(&source(100, 0), 30)
        );
    }

    #[test]
    fn catch_up_only_within_source() {
        let tracker = Tracker::new(0);
        assert_eq!(
            vec![CatchUp::Store(ByteRange::new(4, 10))],
            tracker.catch_up(&source(10, 4), 30)
        );
        assert!(tracker.catch_up(&source(10, 10), 30).is_empty());
        assert!(tracker.catch_up(&source(100, 50), 30).is_empty());
    }

    #[test]
    fn catch_up_over_written_data_only_discards() {
        let mut tracker = Tracker::new(0);
        tracker.record_transfer(5);
        assert_eq!(
            vec![CatchUp::Discard(ByteRange::new(0, 5))],
            tracker.catch_up(&source(100, 0), 5)
        );
    }

    #[test]
    fn resolve_seek() -> anyhow::Result<()> {
        let mut tracker = Tracker::new(0);
        tracker.set_position(10);
        let src = source(100, 0);

        assert_eq!(3, tracker.resolve_seek(&src, SeekFrom::Start(3))?);
        assert_eq!(7, tracker.resolve_seek(&src, SeekFrom::Current(-3))?);
        assert_eq!(15, tracker.resolve_seek(&src, SeekFrom::Current(5))?);
        assert_eq!(90, tracker.resolve_seek(&src, SeekFrom::End(-10))?);
        assert_eq!(110, tracker.resolve_seek(&src, SeekFrom::End(10))?);

        assert!(matches!(
            tracker.resolve_seek(&src, SeekFrom::Current(-11)),
            Err(LazySeekError::InvalidArgument(_))
        ));
        assert!(matches!(
            tracker.resolve_seek(&src, SeekFrom::End(-101)),
            Err(LazySeekError::InvalidArgument(_))
        ));

        Ok(())
    }

    #[test]
    fn length_is_max_of_source_and_backing() {
        let mut tracker = Tracker::new(0);
        assert_eq!(100, tracker.len(&source(100, 0)));

        tracker.set_position(95);
        tracker.record_transfer(10);
        assert_eq!(105, tracker.len(&source(100, 0)));

        tracker.record_set_len(20);
        assert_eq!(100, tracker.len(&source(100, 0)));
    }

    #[test]
    fn set_len_clips_written_ranges() {
        let mut tracker = Tracker::new(0);
        tracker.record_transfer(10);
        tracker.record_set_len(3);
        assert_eq!(&ByteRanges::single(0, 3), tracker.written());
        assert_eq!(3, tracker.backing_len());
    }

    #[test]
    fn pending_source_data() {
        let mut tracker = Tracker::new(0);
        assert_eq!(None, tracker.pending());

        tracker.set_pending(5, b"abc");
        assert_eq!(Some((5, b"abc".as_slice())), tracker.pending());
        assert!(tracker.written().is_empty());

        tracker.record_pending_stored();
        assert_eq!(None, tracker.pending());
        assert_eq!(&ByteRanges::single(5, 8), tracker.written());
        assert_eq!(8, tracker.backing_len());
        assert_eq!(None, tracker.backing_seek_needed(8));

        // Nothing left to record.
        tracker.record_pending_stored();
        assert_eq!(&ByteRanges::single(5, 8), tracker.written());
    }

    #[test]
    fn backing_cursor() {
        let mut tracker = Tracker::new(0);
        assert_eq!(None, tracker.backing_seek_needed(0));
        assert_eq!(Some(5), tracker.backing_seek_needed(5));

        tracker.record_transfer(5);
        assert_eq!(None, tracker.backing_seek_needed(5));

        tracker.backing_failed();
        assert_eq!(Some(5), tracker.backing_seek_needed(5));

        tracker.backing_moved(5);
        assert_eq!(None, tracker.backing_seek_needed(5));
    }
}
