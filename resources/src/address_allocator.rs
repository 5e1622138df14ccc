// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::ops::Bound;

use log::debug;

use crate::AddressRange;
use crate::Alloc;
use crate::Error;
use crate::Result;

/// First-fit allocator over a single pool of VRAM addresses.
///
/// Every allocation is tagged with a unique `Alloc` that is later used to release it, plus a
/// human-readable tag kept for debugging.
#[derive(Debug)]
pub struct AddressAllocator {
    pool: AddressRange,
    min_align: u64,
    allocs: HashMap<Alloc, (AddressRange, String)>,
    /// Free regions, ordered by start address and never adjacent to one another.
    free: BTreeSet<AddressRange>,
}

impl AddressAllocator {
    /// Creates an allocator managing `pool`.
    ///
    /// * `min_align` - Alignment applied to every allocation, defaults to four bytes.
    pub fn new(pool: AddressRange, min_align: Option<u64>) -> Result<Self> {
        let min_align = min_align.unwrap_or(4);
        if !min_align.is_power_of_two() {
            return Err(Error::BadAlignment);
        }
        if pool.end < pool.start {
            return Err(Error::EmptyPool);
        }
        let mut free = BTreeSet::new();
        free.insert(pool);
        Ok(AddressAllocator {
            pool,
            min_align,
            allocs: HashMap::new(),
            free,
        })
    }

    /// The range this allocator was created with.
    pub fn pool(&self) -> AddressRange {
        self.pool
    }

    /// Allocates `size` bytes with the minimum alignment.
    pub fn allocate(&mut self, size: u64, alloc: Alloc, tag: String) -> Result<u64> {
        self.allocate_with_align(size, alloc, tag, self.min_align)
    }

    /// Allocates `size` bytes starting at a multiple of `alignment`, taking the lowest free
    /// address that fits.
    pub fn allocate_with_align(
        &mut self,
        size: u64,
        alloc: Alloc,
        tag: String,
        alignment: u64,
    ) -> Result<u64> {
        if self.allocs.contains_key(&alloc) {
            return Err(Error::ExistingAlloc(alloc));
        }
        if size == 0 {
            return Err(Error::AllocSizeZero);
        }
        if !alignment.is_power_of_two() {
            return Err(Error::BadAlignment);
        }
        let alignment = cmp::max(self.min_align, alignment);

        let (slot, range) = self
            .free
            .iter()
            .find_map(|slot| {
                let start = slot.start.checked_add(alignment - 1)? & !(alignment - 1);
                let range = AddressRange::from_start_and_size(start, size)?;
                slot.contains_range(range).then_some((*slot, range))
            })
            .ok_or(Error::OutOfSpace)?;

        self.free.remove(&slot);
        let (below, above) = slot.carve(range);
        self.free.extend(below);
        self.free.extend(above);

        debug!("vram: allocated {} for {:?} ({})", range, alloc, tag);
        self.allocs.insert(alloc, (range, tag));
        Ok(range.start)
    }

    /// Returns the allocation tagged `alloc` to the free pool, merging it with free neighbours.
    pub fn release(&mut self, alloc: Alloc) -> Result<AddressRange> {
        let (range, _tag) = self.allocs.remove(&alloc).ok_or(Error::BadAlloc(alloc))?;
        self.insert_free(range)?;
        debug!("vram: released {} for {:?}", range, alloc);
        Ok(range)
    }

    /// Returns the range and tag of `alloc`, if allocated.
    pub fn get(&self, alloc: &Alloc) -> Option<&(AddressRange, String)> {
        self.allocs.get(alloc)
    }

    /// Total number of unallocated bytes.
    pub fn free_bytes(&self) -> u64 {
        self.free
            .iter()
            .map(|r| r.len().unwrap_or(u64::MAX))
            .fold(0, u64::saturating_add)
    }

    fn insert_free(&mut self, mut range: AddressRange) -> Result<()> {
        let before = self
            .free
            .range((Bound::Unbounded, Bound::Included(range)))
            .next_back()
            .copied();
        if let Some(before) = before {
            if before.overlaps(range) {
                return Err(Error::RegionOverlap(range));
            }
            if before.end.checked_add(1) == Some(range.start) {
                self.free.remove(&before);
                range.start = before.start;
            }
        }

        let after = self
            .free
            .range((Bound::Excluded(range), Bound::Unbounded))
            .next()
            .copied();
        if let Some(after) = after {
            if after.overlaps(range) {
                return Err(Error::RegionOverlap(range));
            }
            if range.end.checked_add(1) == Some(after.start) {
                self.free.remove(&after);
                range.end = after.end;
            }
        }

        self.free.insert(range);
        Ok(())
    }
}
