//! Core data types used throughout the scanner
//!
//! # Key Types
//!
//! - **`TokenRange`**: an inclusive interval of partitioner tokens
//! - **`TokenSpace`**: the domain a scan covers, by default the full token ring
//!
//! The Murmur3 partitioner hashes partition keys into signed 64-bit tokens but
//! never produces `i64::MIN`, so the usable ring is
//! `[-(2^63 - 1), 2^63 - 1]`, which holds exactly `2^64 - 1` tokens.
//!
//! # Example
//!
//! ```rust
//! use token_scan::types::{TokenRange, TokenSpace, TOKEN_MAX, TOKEN_MIN};
//!
//! let space = TokenSpace::FULL;
//! assert_eq!(space.min(), TOKEN_MIN);
//! assert_eq!(space.max(), TOKEN_MAX);
//! assert_eq!(space.size(), u64::MAX as u128);
//!
//! let range = TokenRange::new(-5, 5).unwrap();
//! assert!(range.contains(0));
//! assert_eq!(range.len(), 11);
//! ```

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest token produced by the partitioner
pub const TOKEN_MIN: i64 = -i64::MAX;

/// Largest token produced by the partitioner
pub const TOKEN_MAX: i64 = i64::MAX;

/// Inclusive range of tokens `[lower, upper]`
///
/// Both bounds are part of the range, matching a
/// `token(k) >= ? AND token(k) <= ?` restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenRange {
    lower: i64,
    upper: i64,
}

impl TokenRange {
    /// Create a new token range with validation
    ///
    /// # Example
    ///
    /// ```rust
    /// use token_scan::types::TokenRange;
    ///
    /// assert!(TokenRange::new(1, 1).is_ok());
    /// assert!(TokenRange::new(2, 1).is_err());
    /// ```
    pub fn new(lower: i64, upper: i64) -> Result<Self, ScanError> {
        if lower > upper {
            return Err(ScanError::InvalidRange { lower, upper });
        }
        Ok(Self { lower, upper })
    }

    /// Create a range without checking `lower <= upper`
    ///
    /// Only for bounds that are already known to be ordered.
    pub fn new_unchecked(lower: i64, upper: i64) -> Self {
        Self { lower, upper }
    }

    /// Lower bound (inclusive)
    pub fn lower(&self) -> i64 {
        self.lower
    }

    /// Upper bound (inclusive)
    pub fn upper(&self) -> i64 {
        self.upper
    }

    /// Number of tokens in the range
    ///
    /// Returned as `u128` since the full ring holds `2^64 - 1` tokens.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u128 {
        (self.upper as i128 - self.lower as i128 + 1) as u128
    }

    /// Check if a token falls within this range (inclusive)
    pub fn contains(&self, token: i64) -> bool {
        token >= self.lower && token <= self.upper
    }

    /// Whether `next` starts right after this range ends
    pub fn is_followed_by(&self, next: &TokenRange) -> bool {
        self.upper.checked_add(1) == Some(next.lower)
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// Closed token domain to be scanned
///
/// `TokenSpace::FULL` is the whole ring. Narrower spaces are useful for
/// rescanning a known slice or for tests over small domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpace {
    min: i64,
    max: i64,
}

impl TokenSpace {
    /// The full Murmur3 token ring
    pub const FULL: TokenSpace = TokenSpace {
        min: TOKEN_MIN,
        max: TOKEN_MAX,
    };

    /// Create a token space covering `[min, max]`
    pub fn new(min: i64, max: i64) -> Result<Self, ScanError> {
        if min > max {
            return Err(ScanError::InvalidRange {
                lower: min,
                upper: max,
            });
        }
        Ok(Self { min, max })
    }

    /// Create a token space of `size` tokens starting at `min`
    ///
    /// ```rust
    /// use token_scan::types::TokenSpace;
    ///
    /// let space = TokenSpace::with_size(0, 20).unwrap();
    /// assert_eq!(space.max(), 19);
    /// ```
    pub fn with_size(min: i64, size: u128) -> Result<Self, ScanError> {
        let invalid = ScanError::InvalidRange {
            lower: min,
            upper: i64::MAX,
        };
        // No i64 interval holds more than 2^64 - 1 tokens
        if size == 0 || size > u64::MAX as u128 {
            return Err(invalid);
        }

        let max = i128::try_from(size - 1)
            .ok()
            .map(|span| min as i128 + span)
            .filter(|max| *max <= i64::MAX as i128)
            .ok_or(invalid)?;
        Ok(Self {
            min,
            max: max as i64,
        })
    }

    /// First token of the domain
    pub fn min(&self) -> i64 {
        self.min
    }

    /// Last token of the domain
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Number of tokens in the domain
    pub fn size(&self) -> u128 {
        (self.max as i128 - self.min as i128 + 1) as u128
    }

    /// The whole domain as a single range
    pub fn as_range(&self) -> TokenRange {
        TokenRange::new_unchecked(self.min, self.max)
    }
}

impl Default for TokenSpace {
    fn default() -> Self {
        Self::FULL
    }
}
