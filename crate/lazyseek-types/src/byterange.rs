//! ByteRange and ByteRanges types.
//!
//! # ByteRange
//!
//! - Represents a closed-open range `[start, end)` of byte offsets.
//! - Two ranges that only touch, such as `[2, 5)` and `[5, 8)`, do not
//!   overlap.
//!
//! # ByteRanges
//!
//! - A sorted set of non-empty ranges, none of which overlap or touch
//!   each other. Adjacent or overlapping ranges are merged on insert.
//!
//! # Examples
//!
//! ```rust
//! use lazyseek_types::{ByteRange, ByteRanges};
//!
//! let mut written = ByteRanges::new();
//! written.add(&ByteRange::new(0, 5));
//! written.add(&ByteRange::new(5, 10));
//! assert_eq!(written.range_containing(7), Some(ByteRange::new(0, 10)));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// A closed-open range of bytes: `[start, end)`.
///
/// A range whose `end` is not after its `start` is empty and
/// contains nothing.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Debug,
    Default,
    serde::Serialize,
    serde::Deserialize,
    PartialOrd,
    Ord,
)]
pub struct ByteRange {
    /// The start offset (inclusive).
    pub start: u64,
    /// The end offset (exclusive).
    pub end: u64,
}

impl ByteRange {
    /// Create a new range from `start` to `end` (exclusive).
    ///
    /// Callers should ensure `start <= end`; anything else is treated
    /// as empty.
    pub fn new(start: u64, end: u64) -> Self {
        ByteRange { start, end }
    }

    /// Create a range of `len` bytes starting at `start`.
    ///
    /// The end is capped at `u64::MAX`.
    pub fn at(start: u64, len: u64) -> Self {
        ByteRange {
            start,
            end: start.saturating_add(len),
        }
    }

    /// Returns true if the range contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns the number of bytes in this range.
    pub fn bytecount(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Returns true if this range shares any bytes with `other`.
    ///
    /// Ranges that only touch, such as `[2, 5)` and `[5, 8)`, don't
    /// overlap.
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check whether an offset is within the range.
    pub fn contains(&self, val: u64) -> bool {
        val >= self.start && val < self.end
    }
}

impl fmt::Display for ByteRange {
    /// Formats the range as `[start, end)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A minimal, sorted set of [ByteRange].
///
/// All contained ranges are non-empty, sorted by start, and neither
/// overlap nor touch each other.
///
/// Ranges are kept in a [BTreeMap] keyed by start, so finding where a
/// range belongs is logarithmic; merging then only looks at the
/// neighbours of that position.
#[derive(Clone, Eq, PartialEq, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ByteRanges {
    // start -> end
    ranges: BTreeMap<u64, u64>,
}

impl ByteRanges {
    /// Creates an empty ByteRanges set.
    pub fn new() -> Self {
        ByteRanges {
            ranges: BTreeMap::new(),
        }
    }

    pub fn single(start: u64, end: u64) -> Self {
        ByteRanges::for_range(ByteRange::new(start, end))
    }

    /// Creates a ByteRanges containing a single range.
    pub fn for_range(range: ByteRange) -> Self {
        let mut ranges = ByteRanges::new();
        ranges.add(&range);
        ranges
    }

    /// Creates and fills a ByteRanges set.
    pub fn from_ranges(into_iter: impl IntoIterator<Item = ByteRange>) -> Self {
        let mut ranges = ByteRanges::new();
        for range in into_iter.into_iter() {
            ranges.add(&range);
        }
        ranges
    }

    /// Returns true if there are no ranges.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns the total number of bytes within the ranges.
    pub fn bytecount(&self) -> u64 {
        self.ranges
            .iter()
            .fold(0, |sum, (&start, &end)| sum + (end - start))
    }

    /// Adds a range, merging it with any range it overlaps or touches.
    ///
    /// Adding an empty range, or a range that is already covered, leaves
    /// the set unchanged.
    pub fn add(&mut self, range: &ByteRange) {
        if range.is_empty() {
            return;
        }

        let mut new_start = range.start;
        let mut new_end = range.end;

        // The closest range starting at or before the new one might
        // reach into it or end right where it starts.
        if let Some((&start, &end)) = self.ranges.range(..=range.start).next_back() {
            if end >= range.start {
                new_start = start;
                new_end = new_end.max(end);
            }
        }

        // Everything starting within [new_start, new_end] gets swallowed.
        let swallowed = self
            .ranges
            .range(new_start..=new_end)
            .map(|(&start, &end)| (start, end))
            .collect::<Vec<_>>();
        for (start, end) in swallowed {
            self.ranges.remove(&start);
            new_end = new_end.max(end);
        }

        self.ranges.insert(new_start, new_end);
    }

    /// Drop everything at or after `len`.
    ///
    /// Ranges that start at or after `len` are removed and a range
    /// straddling `len` is clipped to end there.
    pub fn truncate(&mut self, len: u64) {
        self.ranges.split_off(&len);
        if let Some((_, end)) = self.ranges.iter_mut().next_back() {
            if *end > len {
                *end = len;
            }
        }
    }

    /// Returns the parts of `window` that no range covers.
    pub fn gaps(&self, window: &ByteRange) -> ByteRanges {
        let mut result = ByteRanges::new();
        if window.is_empty() {
            return result;
        }

        let first = self
            .ranges
            .range(..=window.start)
            .next_back()
            .map(|(&start, _)| start)
            .unwrap_or(window.start);
        let mut cursor = window.start;
        for (&start, &end) in self.ranges.range(first..window.end) {
            if end <= cursor {
                continue;
            }
            if start > cursor {
                result.add(&ByteRange::new(cursor, start));
            }
            cursor = end;
            if cursor >= window.end {
                break;
            }
        }
        if cursor < window.end {
            result.add(&ByteRange::new(cursor, window.end));
        }

        result
    }

    /// Returns an iterator over the contained ByteRanges.
    pub fn iter(&self) -> ByteRangesIter<'_> {
        ByteRangesIter {
            inner: self.ranges.iter(),
        }
    }

    /// Returns the range containing the given offset, if any.
    ///
    /// Only `range.end - offset` bytes starting at `offset` are
    /// covered; what follows the range end is not.
    pub fn range_containing(&self, offset: u64) -> Option<ByteRange> {
        let (&start, &end) = self.ranges.range(..=offset).next_back()?;
        if offset < end {
            Some(ByteRange::new(start, end))
        } else {
            None
        }
    }

    /// Returns the start of the first range that begins strictly after
    /// `offset`, if any.
    pub fn next_start_after(&self, offset: u64) -> Option<u64> {
        self.ranges
            .range((Bound::Excluded(offset), Bound::Unbounded))
            .next()
            .map(|(&start, _)| start)
    }
}

impl IntoIterator for ByteRanges {
    type Item = ByteRange;
    type IntoIter = std::iter::Map<
        std::collections::btree_map::IntoIter<u64, u64>,
        fn((u64, u64)) -> ByteRange,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges
            .into_iter()
            .map(pair_to_range as fn((u64, u64)) -> ByteRange)
    }
}

fn pair_to_range((start, end): (u64, u64)) -> ByteRange {
    ByteRange::new(start, end)
}

impl FromIterator<ByteRange> for ByteRanges {
    fn from_iter<T: IntoIterator<Item = ByteRange>>(iter: T) -> Self {
        ByteRanges::from_ranges(iter)
    }
}

/// Iterator over ByteRanges
#[derive(Clone)]
pub struct ByteRangesIter<'a> {
    inner: std::collections::btree_map::Iter<'a, u64, u64>,
}

impl<'a> Iterator for ByteRangesIter<'a> {
    type Item = ByteRange;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(&start, &end)| ByteRange::new(start, end))
    }
}

impl fmt::Display for ByteRanges {
    /// Formats as a comma-separated list of ranges.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        f.write_str("{")?;
        for range in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
            first = false;
        }
        f.write_str("}")?;
        Ok(())
    }
}


#[cfg(test)]
mod byteranges_tests {
    use super::*;

    fn ranges(b: &ByteRanges) -> Vec<ByteRange> {
        b.iter().collect()
    }

    #[test]
    fn test_empty() {
        let b = ByteRanges::new();
        assert!(b.is_empty());
        assert_eq!(b.len(), 0);
        assert_eq!(b.to_string(), "{}");
    }

    #[test]
    fn test_add_and_merge() {
        let mut b = ByteRanges::new();
        b.add(&ByteRange::new(0, 5));
        b.add(&ByteRange::new(5, 10));
        b.add(&ByteRange::new(12, 15));
        b.add(&ByteRange::new(8, 13));
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 15)]);
    }

    #[test]
    fn adjacent_ranges_merge() {
        let mut b = ByteRanges::new();
        b.add(&ByteRange::new(0, 5));
        b.add(&ByteRange::new(5, 10));
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 10)]);

        // also when inserted in reverse order
        let mut b = ByteRanges::new();
        b.add(&ByteRange::new(5, 10));
        b.add(&ByteRange::new(0, 5));
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 10)]);
    }

    #[test]
    fn disjoint_ranges_stay_apart() {
        let mut b = ByteRanges::new();
        b.add(&ByteRange::new(5, 8));
        b.add(&ByteRange::new(0, 3));
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 3), ByteRange::new(5, 8)]);
    }

    #[test]
    fn add_is_idempotent() {
        let mut once = ByteRanges::new();
        once.add(&ByteRange::new(0, 3));
        once.add(&ByteRange::new(7, 12));

        let mut twice = once.clone();
        twice.add(&ByteRange::new(7, 12));
        twice.add(&ByteRange::new(7, 12));
        twice.add(&ByteRange::new(0, 3));

        assert_eq!(once, twice);
    }

    #[test]
    fn add_ignores_empty_and_covered() {
        let mut b = ByteRanges::single(10, 20);
        b.add(&ByteRange::new(4, 4));
        b.add(&ByteRange::new(12, 18));
        assert_eq!(ranges(&b), vec![ByteRange::new(10, 20)]);
    }

    #[test]
    fn add_bridges_several_ranges() {
        let mut b = ByteRanges::from_ranges(vec![
            ByteRange::new(0, 2),
            ByteRange::new(4, 6),
            ByteRange::new(8, 10),
            ByteRange::new(20, 30),
        ]);
        b.add(&ByteRange::new(1, 9));
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 10), ByteRange::new(20, 30)]);

        b.add(&ByteRange::new(10, 20));
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 30)]);
    }

    #[test]
    fn add_extends_previous_range() {
        let mut b = ByteRanges::single(0, 10);
        b.add(&ByteRange::new(5, 15));
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 15)]);
    }

    #[test]
    fn test_truncate() {
        let mut b = ByteRanges::single(0, 10);
        b.truncate(3);
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 3)]);

        let mut b = ByteRanges::from_ranges(vec![
            ByteRange::new(0, 5),
            ByteRange::new(8, 12),
            ByteRange::new(20, 30),
        ]);
        b.truncate(10);
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 5), ByteRange::new(8, 10)]);

        b.truncate(8);
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 5)]);

        b.truncate(100);
        assert_eq!(ranges(&b), vec![ByteRange::new(0, 5)]);

        b.truncate(0);
        assert!(b.is_empty());
    }

    #[test]
    fn test_gaps() {
        let b = ByteRanges::from_ranges(vec![ByteRange::new(2, 4), ByteRange::new(6, 8)]);
        assert_eq!(
            ranges(&b.gaps(&ByteRange::new(0, 10))),
            vec![
                ByteRange::new(0, 2),
                ByteRange::new(4, 6),
                ByteRange::new(8, 10)
            ]
        );
        assert_eq!(
            ranges(&b.gaps(&ByteRange::new(3, 7))),
            vec![ByteRange::new(4, 6)]
        );
        assert!(b.gaps(&ByteRange::new(2, 4)).is_empty());
        assert!(b.gaps(&ByteRange::new(5, 5)).is_empty());
        assert_eq!(
            ranges(&ByteRanges::new().gaps(&ByteRange::new(1, 3))),
            vec![ByteRange::new(1, 3)]
        );
    }

    #[test]
    fn test_bytecount() {
        assert_eq!(0, ByteRanges::new().bytecount());
        assert_eq!(10, ByteRanges::single(10, 20).bytecount());
        assert_eq!(
            20,
            ByteRanges::from_ranges(vec![
                ByteRange::new(5, 12),
                ByteRange::new(10, 15),
                ByteRange::new(30, 40)
            ])
            .bytecount()
        );
    }

    #[test]
    fn test_display() {
        let b = ByteRanges::from_ranges(vec![ByteRange::new(0, 5), ByteRange::new(10, 15)]);
        assert_eq!(b.to_string(), "{[0, 5), [10, 15)}");
    }

    #[test]
    fn test_range_containing() {
        let empty = ByteRanges::new();
        assert_eq!(empty.range_containing(0), None);

        let mut multiple = ByteRanges::new();
        multiple.add(&ByteRange::new(0, 10));
        multiple.add(&ByteRange::new(20, 30));

        assert_eq!(multiple.range_containing(0), Some(ByteRange::new(0, 10)));
        assert_eq!(multiple.range_containing(9), Some(ByteRange::new(0, 10)));
        assert_eq!(multiple.range_containing(10), None);
        assert_eq!(multiple.range_containing(19), None);
        assert_eq!(multiple.range_containing(20), Some(ByteRange::new(20, 30)));
        assert_eq!(multiple.range_containing(30), None);
        assert_eq!(multiple.range_containing(u64::MAX), None);

        let large = ByteRanges::single(u64::MAX - 10, u64::MAX - 5);
        assert_eq!(
            large.range_containing(u64::MAX - 7),
            Some(ByteRange::new(u64::MAX - 10, u64::MAX - 5))
        );
        assert_eq!(large.range_containing(u64::MAX - 5), None);
    }

    #[test]
    fn test_next_start_after() {
        let b = ByteRanges::from_ranges(vec![ByteRange::new(5, 10), ByteRange::new(20, 30)]);
        assert_eq!(b.next_start_after(0), Some(5));
        assert_eq!(b.next_start_after(5), Some(20));
        assert_eq!(b.next_start_after(12), Some(20));
        assert_eq!(b.next_start_after(20), None);
        assert_eq!(b.next_start_after(u64::MAX), None);
    }

    #[test]
    fn into_iter_and_collect() {
        let b: ByteRanges = vec![ByteRange::new(5, 10), ByteRange::new(0, 5)]
            .into_iter()
            .collect();
        assert_eq!(b.into_iter().collect::<Vec<_>>(), vec![ByteRange::new(0, 10)]);
    }

    #[test]
    fn serialize() -> anyhow::Result<()> {
        let b = ByteRanges::from_ranges(vec![ByteRange::new(0, 5), ByteRange::new(10, 15)]);
        let bytes = bincode::serialize(&b)?;
        assert_eq!(b, bincode::deserialize::<ByteRanges>(&bytes)?);

        Ok(())
    }
}
