// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::ops::RangeInclusive;

use serde::Deserialize;
use serde::Serialize;

/// An inclusive range of VRAM addresses, `start..=end`.
///
/// Ranges are never empty: an `AddressRange` always contains at least `start`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AddressRange {
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    /// Creates a new `AddressRange` from `start` and `end` (inclusive) addresses.
    ///
    /// Returns `None` if `end` is below `start`.
    pub const fn from_start_and_end(start: u64, end: u64) -> Option<Self> {
        if end < start {
            None
        } else {
            Some(AddressRange { start, end })
        }
    }

    /// Creates a new `AddressRange` from `start` extending `size` bytes.
    ///
    /// Returns `None` for a zero size or if the range would wrap past `u64::MAX`.
    pub const fn from_start_and_size(start: u64, size: u64) -> Option<Self> {
        if size == 0 {
            return None;
        }
        match start.checked_add(size - 1) {
            Some(end) => Some(AddressRange { start, end }),
            None => None,
        }
    }

    /// Returns `true` if this range contains `address`.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address <= self.end
    }

    /// Returns `true` if `other` lies entirely inside this range.
    pub fn contains_range(&self, other: AddressRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Returns `true` if the two ranges share at least one address.
    pub fn overlaps(&self, other: AddressRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Number of bytes in the range, or `None` for the full `0..=u64::MAX` range.
    pub fn len(&self) -> Option<u64> {
        (self.end - self.start).checked_add(1)
    }

    /// Splits off the part of `self` below `other` and the part above it. Either side is `None`
    /// when `other` reaches the corresponding edge of `self`.
    pub(crate) fn carve(&self, other: AddressRange) -> (Option<AddressRange>, Option<AddressRange>) {
        let below = if other.start > self.start {
            Some(AddressRange {
                start: self.start,
                end: other.start - 1,
            })
        } else {
            None
        };
        let above = if other.end < self.end {
            Some(AddressRange {
                start: other.end + 1,
                end: self.end,
            })
        } else {
            None
        };
        (below, above)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}..={:#x}", self.start, self.end)
    }
}

impl fmt::Debug for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<AddressRange> for RangeInclusive<u64> {
    fn from(range: AddressRange) -> RangeInclusive<u64> {
        range.start..=range.end
    }
}
