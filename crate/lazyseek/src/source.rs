use std::cmp::min;
use std::io::{ErrorKind, Read};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A reader that can only move forward, with a declared length.
///
/// Plain readers don't know their length, so the caller declares it
/// when creating the source. A source that ends before its declared
/// length is considered exhausted; that is not an error.
///
/// [ForwardSource::position] counts the bytes consumed so far. It
/// never decreases.
pub struct ForwardSource<R> {
    reader: R,
    state: SourceState,
}

/// Position and length of a [ForwardSource].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SourceState {
    /// Declared length.
    pub(crate) len: u64,

    /// Number of bytes consumed from the source.
    pub(crate) position: u64,

    /// Set once the source returned no data before reaching `len`.
    pub(crate) exhausted: bool,
}

impl SourceState {
    /// Number of bytes the source can still provide.
    pub(crate) fn remaining(&self) -> u64 {
        if self.exhausted {
            0
        } else {
            self.len.saturating_sub(self.position)
        }
    }

    /// Check whether the byte at `offset` can still come from the
    /// source, possibly after skipping some data.
    pub(crate) fn can_supply(&self, offset: u64) -> bool {
        !self.exhausted && offset >= self.position && offset < self.len
    }
}

impl<R> ForwardSource<R> {
    /// Wrap `reader`, which is expected to produce `len` bytes.
    pub fn new(reader: R, len: u64) -> Self {
        Self {
            reader,
            state: SourceState {
                len,
                position: 0,
                exhausted: false,
            },
        }
    }

    /// Declared length of the source.
    pub fn len(&self) -> u64 {
        self.state.len
    }

    /// Returns true if the declared length is 0.
    pub fn is_empty(&self) -> bool {
        self.state.len == 0
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.state.position
    }

    /// Number of bytes the source can still provide, as far as we know.
    pub fn remaining(&self) -> u64 {
        self.state.remaining()
    }

    /// Returns true once no more data can come from the source.
    pub fn is_exhausted(&self) -> bool {
        self.state.remaining() == 0
    }

    /// Access the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Give back the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    pub(crate) fn state(&self) -> SourceState {
        self.state
    }

    /// How many bytes of a buffer of `buflen` bytes a read may fill.
    fn read_limit(&self, buflen: usize) -> usize {
        usize::try_from(self.state.remaining())
            .map(|remaining| min(remaining, buflen))
            .unwrap_or(buflen)
    }

    /// Account for a read of `count` bytes, out of `requested`.
    fn advance(&mut self, count: usize, requested: usize) {
        if count == 0 && requested > 0 {
            log::debug!(
                "source ended at {}, {} bytes short of its declared length",
                self.state.position,
                self.state.len - self.state.position
            );
            self.state.exhausted = true;
        }
        self.state.position += count as u64;
    }
}

impl<R: Read> ForwardSource<R> {
    /// Read some data from the source into `buf`.
    ///
    /// Never reads past the declared length. Returns 0 once the source
    /// is exhausted.
    pub fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let limit = self.read_limit(buf.len());
        if limit == 0 {
            return Ok(0);
        }
        let count = self.reader.read(&mut buf[..limit])?;
        self.advance(count, limit);

        Ok(count)
    }

    /// Read from the source until `buf` is full or the source is exhausted.
    ///
    /// Returns the number of bytes read, which is less than the buffer
    /// size only at the end of the source.
    pub fn read_full(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }

        Ok(filled)
    }

    /// Read and throw away `count` bytes, using `scratch` as buffer.
    ///
    /// Returns the number of bytes actually skipped, which is less than
    /// `count` if the source ended early.
    pub fn discard(&mut self, count: u64, scratch: &mut [u8]) -> std::io::Result<u64> {
        let mut discarded = 0;
        while discarded < count {
            let chunk = usize::try_from(count - discarded)
                .map(|c| min(c, scratch.len()))
                .unwrap_or(scratch.len());
            let n = self.read_full(&mut scratch[..chunk])?;
            discarded += n as u64;
            if n < chunk {
                break;
            }
        }
        if discarded < count {
            log::debug!("skipped only {discarded} source bytes out of {count}");
        }

        Ok(discarded)
    }
}

impl<R: AsyncRead + Unpin> ForwardSource<R> {
    /// Async version of [ForwardSource::read].
    pub async fn read_async(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let limit = self.read_limit(buf.len());
        if limit == 0 {
            return Ok(0);
        }
        let count = self.reader.read(&mut buf[..limit]).await?;
        self.advance(count, limit);

        Ok(count)
    }

    /// Async version of [ForwardSource::read_full].
    pub async fn read_full_async(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_async(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }

        Ok(filled)
    }

    /// Async version of [ForwardSource::discard].
    pub async fn discard_async(&mut self, count: u64, scratch: &mut [u8]) -> std::io::Result<u64> {
        let mut discarded = 0;
        while discarded < count {
            let chunk = usize::try_from(count - discarded)
                .map(|c| min(c, scratch.len()))
                .unwrap_or(scratch.len());
            let n = self.read_full_async(&mut scratch[..chunk]).await?;
            discarded += n as u64;
            if n < chunk {
                break;
            }
        }
        if discarded < count {
            log::debug!("skipped only {discarded} source bytes out of {count}");
        }

        Ok(discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::io::Cursor;

    #[test]
    fn read_within_declared_length() -> anyhow::Result<()> {
        let mut source = ForwardSource::new(Cursor::new(testing::sequential_bytes(10)), 4);
        let mut buf = [0u8; 8];
        assert_eq!(4, source.read_full(&mut buf)?);
        assert_eq!([0, 1, 2, 3], buf[..4]);
        assert_eq!(4, source.position());
        assert!(source.is_exhausted());
        assert_eq!(0, source.read(&mut buf)?);

        Ok(())
    }

    #[test]
    fn short_source_is_exhausted() -> anyhow::Result<()> {
        let mut source = ForwardSource::new(Cursor::new(testing::sequential_bytes(3)), 10);
        let mut buf = [0u8; 8];
        assert_eq!(3, source.read_full(&mut buf)?);
        assert!(source.is_exhausted());
        assert_eq!(0, source.remaining());
        assert_eq!(3, source.position());
        assert_eq!(10, source.len());

        Ok(())
    }

    #[test]
    fn discard_skips_bytes() -> anyhow::Result<()> {
        let mut source = ForwardSource::new(Cursor::new(testing::sequential_bytes(100)), 100);
        let mut scratch = [0u8; 7];
        assert_eq!(30, source.discard(30, &mut scratch)?);
        assert_eq!(30, source.position());

        let mut buf = [0u8; 2];
        source.read_full(&mut buf)?;
        assert_eq!([30, 31], buf);

        Ok(())
    }

    #[test]
    fn discard_tolerates_short_source() -> anyhow::Result<()> {
        let mut source = ForwardSource::new(Cursor::new(testing::sequential_bytes(5)), 100);
        let mut scratch = [0u8; 4];
        assert_eq!(5, source.discard(20, &mut scratch)?);
        assert!(source.is_exhausted());

        Ok(())
    }

    #[test]
    fn position_never_decreases() -> anyhow::Result<()> {
        let (reader, counter) = testing::CountingSource::new(testing::sequential_bytes(50));
        let mut source = ForwardSource::new(reader, 50);
        let mut buf = [0u8; 9];
        let mut last = 0;
        while source.read(&mut buf)? > 0 {
            assert!(source.position() > last);
            last = source.position();
        }
        assert_eq!(50, last);
        assert_eq!(50, counter.pulled());

        Ok(())
    }

    #[tokio::test]
    async fn read_async() -> anyhow::Result<()> {
        let mut source = ForwardSource::new(Cursor::new(testing::sequential_bytes(10)), 10);
        let mut scratch = [0u8; 3];
        assert_eq!(4, source.discard_async(4, &mut scratch).await?);

        let mut buf = [0u8; 10];
        assert_eq!(6, source.read_full_async(&mut buf).await?);
        assert_eq!([4, 5, 6, 7, 8, 9], buf[..6]);
        assert!(source.is_exhausted());

        Ok(())
    }
}
