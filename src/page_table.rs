// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! In-VRAM layouts of the shadow BAR1 channel: the instance block's directory fields, page
//! directory entries and leaf page table entries.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use crate::Error;
use crate::Result;

/// Byte offset of `InstanceDirectory` inside the instance block.
pub const INSTANCE_DIRECTORY_OFFSET: u64 = 0x200;

pub const PDE_PRESENT: u32 = 0x1;
// Low bits of word1 carry flags; the table address starts at bit 4.
const PDE_FLAGS_MASK: u32 = 0xf;

/// Page directory pointer and address-space limit of a channel instance block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct InstanceDirectory {
    directory_low: u32,
    directory_high: u32,
    size_low: u32,
    size_high: u32,
}

impl InstanceDirectory {
    pub fn new(directory_address: u64, vm_size: u64) -> Self {
        InstanceDirectory {
            directory_low: directory_address as u32,
            directory_high: (directory_address >> 32) as u32,
            size_low: vm_size as u32,
            size_high: (vm_size >> 32) as u32,
        }
    }

    pub fn directory_address(&self) -> u64 {
        u64::from(self.directory_high) << 32 | u64::from(self.directory_low)
    }

    pub fn vm_size(&self) -> u64 {
        u64::from(self.size_high) << 32 | u64::from(self.size_low)
    }
}

/// One page directory entry pointing at a small-page leaf table.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PageDirectoryEntry {
    word0: u32,
    word1: u32,
}

impl PageDirectoryEntry {
    pub const SIZE: u64 = 8;

    pub fn small_pages(table_address: u64) -> Self {
        PageDirectoryEntry {
            word0: 0,
            word1: (table_address >> 8) as u32 | PDE_PRESENT,
        }
    }

    pub fn is_present(&self) -> bool {
        self.word1 & PDE_PRESENT != 0
    }

    pub fn small_table_address(&self) -> u64 {
        u64::from(self.word1 & !PDE_FLAGS_MASK) << 8
    }

    pub fn words(&self) -> (u32, u32) {
        (self.word0, self.word1)
    }
}

/// One leaf entry: a raw 64-bit translation stored as low and high words.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PageTableEntry {
    low: u32,
    high: u32,
}

impl PageTableEntry {
    pub const SIZE: u64 = 8;

    pub fn from_raw(raw: u64) -> Self {
        PageTableEntry {
            low: raw as u32,
            high: (raw >> 32) as u32,
        }
    }

    pub fn raw(&self) -> u64 {
        u64::from(self.high) << 32 | u64::from(self.low)
    }

    pub fn low(&self) -> u32 {
        self.low
    }

    pub fn high(&self) -> u32 {
        self.high
    }
}

/// Geometry of a page directory holding a single entry, which translates
/// `[0, covered_size)` through one leaf table of small pages.
///
/// All lookups from a virtual address to a leaf slot go through `leaf_slot`; a directory with
/// more entries only needs a different lookup here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SingleEntryDirectory {
    covered_size: u64,
    small_page_size: u64,
}

impl SingleEntryDirectory {
    pub fn new(covered_size: u64, small_page_size: u64) -> Self {
        SingleEntryDirectory {
            covered_size,
            small_page_size,
        }
    }

    pub fn covered_size(&self) -> u64 {
        self.covered_size
    }

    /// Bytes needed for a leaf table spanning the covered range.
    pub fn table_size(&self) -> u64 {
        self.covered_size / self.small_page_size * PageTableEntry::SIZE
    }

    /// Leaf slot translating `virt`. `Ok(None)` when `virt` lies outside the covered range,
    /// which callers treat as nothing to do; a misaligned `virt` is a caller bug.
    pub fn leaf_slot(&self, virt: u64) -> Result<Option<u64>> {
        if virt >= self.covered_size {
            return Ok(None);
        }
        if virt % self.small_page_size != 0 {
            return Err(Error::MisalignedMapping {
                virt,
                align: self.small_page_size,
            });
        }
        Ok(Some(virt / self.small_page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pde_layout() {
        let pde = PageDirectoryEntry::small_pages(0x20_3000);
        assert_eq!(pde.words(), (0, 0x2031));
        assert!(pde.is_present());
        assert_eq!(pde.small_table_address(), 0x20_3000);
        assert_eq!(pde.as_bytes(), &[0, 0, 0, 0, 0x31, 0x20, 0, 0]);
        assert!(!PageDirectoryEntry::default().is_present());
    }

    #[test]
    fn pte_halves() {
        let pte = PageTableEntry::from_raw(0x0000_0001_8000_0005);
        assert_eq!(pte.low(), 0x8000_0005);
        assert_eq!(pte.high(), 0x1);
        assert_eq!(pte.raw(), 0x0000_0001_8000_0005);
        assert_eq!(PageTableEntry::read_from_bytes(pte.as_bytes()).unwrap(), pte);
    }

    #[test]
    fn instance_directory() {
        let dir = InstanceDirectory::new(0x1_2345_6000, 0x80000);
        assert_eq!(dir.directory_address(), 0x1_2345_6000);
        assert_eq!(dir.vm_size(), 0x80000);
        assert_eq!(std::mem::size_of::<InstanceDirectory>(), 16);
    }

    #[test]
    fn single_entry_lookup() {
        let dir = SingleEntryDirectory::new(0x800_0000, 0x1000);
        assert_eq!(dir.table_size(), 0x4_0000);
        assert_eq!(dir.leaf_slot(0).unwrap(), Some(0));
        assert_eq!(dir.leaf_slot(0x7ff_f000).unwrap(), Some(0x7fff));
        assert_eq!(dir.leaf_slot(0x800_0000).unwrap(), None);
        assert_eq!(dir.leaf_slot(u64::MAX).unwrap(), None);
        assert!(matches!(
            dir.leaf_slot(0x1800),
            Err(Error::MisalignedMapping {
                virt: 0x1800,
                align: 0x1000
            })
        ));
    }
}
