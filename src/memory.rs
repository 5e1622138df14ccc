// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::mem::size_of;

use resources::AddressRange;
use resources::Alloc;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

use crate::device::DeviceState;
use crate::Error;
use crate::Result;

/// Size of a VRAM page as seen by the memory objects.
pub const GPU_PAGE_SIZE: u64 = 0x1000;

/// A block of VRAM owned by the hypervisor, accessed in 32-bit words through PRAMIN.
///
/// The object only records where it lives; every access borrows the locked `DeviceState`.
#[derive(Debug)]
pub struct GpuMemory {
    alloc: Alloc,
    range: AddressRange,
}

impl GpuMemory {
    /// Allocates `size` bytes of page-aligned VRAM tagged `alloc`.
    pub fn new(state: &mut DeviceState, alloc: Alloc, size: u64, tag: &str) -> Result<GpuMemory> {
        let start = state
            .vram()
            .allocate_with_align(size, alloc, tag.to_string(), GPU_PAGE_SIZE)
            .map_err(Error::VramAllocation)?;
        let range = AddressRange::from_start_and_size(start, size)
            .ok_or(Error::VramAllocation(resources::Error::OutOfSpace))?;
        Ok(GpuMemory { alloc, range })
    }

    /// Allocates `pages` VRAM pages.
    pub fn with_pages(
        state: &mut DeviceState,
        alloc: Alloc,
        pages: u64,
        tag: &str,
    ) -> Result<GpuMemory> {
        Self::new(state, alloc, pages * GPU_PAGE_SIZE, tag)
    }

    /// Physical VRAM address of the first byte.
    pub fn address(&self) -> u64 {
        self.range.start
    }

    pub fn size(&self) -> u64 {
        self.range.end - self.range.start + 1
    }

    pub fn write32(&self, state: &mut DeviceState, offset: u64, value: u32) -> Result<()> {
        let address = self.checked_address(offset, 4)?;
        state.pramin_write32(address, value);
        Ok(())
    }

    pub fn read32(&self, state: &mut DeviceState, offset: u64) -> Result<u32> {
        let address = self.checked_address(offset, 4)?;
        Ok(state.pramin_read32(address))
    }

    /// Stores `obj` at `offset` one 32-bit word at a time. `T` must be made of whole words.
    pub fn write_obj<T: IntoBytes + Immutable>(
        &self,
        state: &mut DeviceState,
        offset: u64,
        obj: &T,
    ) -> Result<()> {
        let bytes = obj.as_bytes();
        debug_assert_eq!(bytes.len() % 4, 0);
        self.checked_address(offset, bytes.len() as u64)?;
        for (i, word) in bytes.chunks_exact(4).enumerate() {
            let value = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]);
            self.write32(state, offset + 4 * i as u64, value)?;
        }
        Ok(())
    }

    /// Loads a `T` from `offset` one 32-bit word at a time.
    pub fn read_obj<T: FromBytes>(&self, state: &mut DeviceState, offset: u64) -> Result<T> {
        let len = size_of::<T>() as u64;
        self.checked_address(offset, len)?;
        let mut bytes = Vec::with_capacity(size_of::<T>());
        for i in 0..len.div_ceil(4) {
            bytes.extend_from_slice(&self.read32(state, offset + 4 * i)?.to_ne_bytes());
        }
        bytes.truncate(size_of::<T>());
        T::read_from_bytes(&bytes).map_err(|_| Error::MemoryOutOfBounds {
            offset,
            size: self.size(),
        })
    }

    /// Returns the VRAM to the device allocator.
    pub fn release(self, state: &mut DeviceState) -> Result<()> {
        state
            .vram()
            .release(self.alloc)
            .map(|_| ())
            .map_err(Error::VramAllocation)
    }

    fn checked_address(&self, offset: u64, len: u64) -> Result<u64> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(self.range.start + offset),
            _ => Err(Error::MemoryOutOfBounds {
                offset,
                size: self.size(),
            }),
        }
    }
}
