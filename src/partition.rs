//! Token range partitioning
//!
//! Splits a [`TokenSpace`] into `n` contiguous, non-overlapping ranges that
//! cover it exactly once. Range sizes differ by at most one token: with
//! `chunk = size / n` and `remainder = size - chunk * n`, the first
//! `remainder` ranges hold `chunk + 1` tokens and the rest hold `chunk`.
//!
//! # Example
//!
//! ```rust
//! use token_scan::partition::RangePartitioner;
//! use token_scan::types::TokenSpace;
//!
//! let space = TokenSpace::new(0, 19).unwrap();
//! let ranges = RangePartitioner::new(space).partition(3).unwrap();
//!
//! let bounds: Vec<_> = ranges.iter().map(|r| (r.lower(), r.upper())).collect();
//! assert_eq!(bounds, vec![(0, 6), (7, 13), (14, 19)]);
//! ```

use crate::error::ScanError;
use crate::types::{TokenRange, TokenSpace};

/// Deterministic equal-split partitioner over a token space
#[derive(Debug, Clone, Copy, Default)]
pub struct RangePartitioner {
    space: TokenSpace,
}

impl RangePartitioner {
    /// Create a partitioner for the given space
    pub fn new(space: TokenSpace) -> Self {
        Self { space }
    }

    /// Partitioner over the full token ring
    pub fn full_ring() -> Self {
        Self::new(TokenSpace::FULL)
    }

    /// The space being partitioned
    pub fn space(&self) -> TokenSpace {
        self.space
    }

    /// Lazily produce the `n` sub-ranges in ascending order
    ///
    /// # Errors
    ///
    /// `InvalidPartitionCount` when `n` is zero or exceeds the number of
    /// tokens in the space, since some ranges would have to be empty.
    pub fn subranges(&self, n: u64) -> Result<Subranges, ScanError> {
        let size = self.space.size();
        if n == 0 || n as u128 > size {
            return Err(ScanError::InvalidPartitionCount {
                requested: n as u128,
                domain_size: size,
            });
        }

        let chunk = size / n as u128;
        Ok(Subranges {
            next_lower: self.space.min() as i128,
            index: 0,
            count: n,
            chunk,
            remainder: size - chunk * n as u128,
        })
    }

    /// Produce all `n` sub-ranges at once
    pub fn partition(&self, n: u64) -> Result<Vec<TokenRange>, ScanError> {
        Ok(self.subranges(n)?.collect())
    }
}

/// Split `space` into `n` ranges; shorthand for [`RangePartitioner::partition`]
pub fn partition(space: TokenSpace, n: u64) -> Result<Vec<TokenRange>, ScanError> {
    RangePartitioner::new(space).partition(n)
}

/// Iterator over the ranges of one partitioning
///
/// Holds no references, so it can be moved into a dispatching task.
#[derive(Debug, Clone)]
pub struct Subranges {
    next_lower: i128,
    index: u64,
    count: u64,
    chunk: u128,
    remainder: u128,
}

impl Subranges {
    /// Total number of ranges in this partitioning
    pub fn count_total(&self) -> u64 {
        self.count
    }

    /// Ranges not yet yielded
    pub fn remaining(&self) -> u64 {
        self.count - self.index
    }
}

impl Iterator for Subranges {
    type Item = TokenRange;

    fn next(&mut self) -> Option<TokenRange> {
        if self.index >= self.count {
            return None;
        }

        let extra = u128::from((self.index as u128) < self.remainder);
        let size = (self.chunk + extra) as i128;
        let lower = self.next_lower;
        let upper = lower + size - 1;

        self.next_lower = upper + 1;
        self.index += 1;

        // Bounds stay inside the space, which is itself inside i64.
        Some(TokenRange::new_unchecked(lower as i64, upper as i64))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining()) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TOKEN_MAX, TOKEN_MIN};

    fn assert_tiles(space: TokenSpace, ranges: &[TokenRange]) {
        assert_eq!(ranges.first().map(|r| r.lower()), Some(space.min()));
        assert_eq!(ranges.last().map(|r| r.upper()), Some(space.max()));
        for pair in ranges.windows(2) {
            assert!(pair[0].is_followed_by(&pair[1]), "gap between {} and {}", pair[0], pair[1]);
        }
        let total: u128 = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, space.size());
    }

    #[test]
    fn test_small_domain_example() {
        let space = TokenSpace::with_size(0, 20).unwrap();
        let ranges = partition(space, 3).unwrap();
        assert_eq!(
            ranges,
            vec![
                TokenRange::new_unchecked(0, 6),
                TokenRange::new_unchecked(7, 13),
                TokenRange::new_unchecked(14, 19),
            ]
        );
    }

    #[test]
    fn test_single_partition_is_whole_ring() {
        let ranges = RangePartitioner::full_ring().partition(1).unwrap();
        assert_eq!(ranges, vec![TokenRange::new_unchecked(TOKEN_MIN, TOKEN_MAX)]);
    }

    #[test]
    fn test_full_ring_tiles() {
        for n in [2, 3, 7, 64, 1200] {
            let ranges = RangePartitioner::full_ring().partition(n).unwrap();
            assert_eq!(ranges.len() as u64, n);
            assert_tiles(TokenSpace::FULL, &ranges);
        }
    }

    #[test]
    fn test_one_token_per_range() {
        let space = TokenSpace::new(-2, 2).unwrap();
        let ranges = partition(space, 5).unwrap();
        assert!(ranges.iter().all(|r| r.len() == 1));
        assert_tiles(space, &ranges);
    }

    #[test]
    fn test_invalid_counts() {
        let space = TokenSpace::new(0, 9).unwrap();
        assert!(matches!(
            partition(space, 0),
            Err(ScanError::InvalidPartitionCount { requested: 0, .. })
        ));
        assert!(matches!(
            partition(space, 11),
            Err(ScanError::InvalidPartitionCount {
                requested: 11,
                domain_size: 10
            })
        ));
        assert!(partition(space, 10).is_ok());
    }

    #[test]
    fn test_iterator_bookkeeping() {
        let mut iter = RangePartitioner::full_ring().subranges(4).unwrap();
        assert_eq!(iter.count_total(), 4);
        assert_eq!(iter.size_hint(), (4, Some(4)));
        iter.next();
        assert_eq!(iter.remaining(), 3);
        assert_eq!(iter.by_ref().count(), 3);
        assert!(iter.next().is_none());
    }
}
