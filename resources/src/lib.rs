// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Manages GPU-resident memory that the hypervisor hands out to its shadow structures.

use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use crate::address_allocator::AddressAllocator;
pub use crate::address_range::AddressRange;

mod address_allocator;
mod address_range;

/// Used to tag VRAM allocations.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, Serialize, Deserialize)]
pub enum Alloc {
    /// An anonymous allocation, numbered by its owner.
    Anon(usize),
    /// Instance block of the shadow BAR1 channel.
    Bar1Instance,
    /// Page directory of the shadow BAR1 channel.
    Bar1Directory,
    /// Leaf page table of the shadow BAR1 channel.
    Bar1Table,
}

#[sorted]
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    #[error("Allocation cannot have size of 0")]
    AllocSizeZero,
    #[error("Alignment must be a power of 2")]
    BadAlignment,
    #[error("Alloc does not exist: {0:?}")]
    BadAlloc(Alloc),
    #[error("Pool is empty")]
    EmptyPool,
    #[error("Alloc already exists: {0:?}")]
    ExistingAlloc(Alloc),
    #[error("Out of space")]
    OutOfSpace,
    #[error("Overlapping region {0}")]
    RegionOverlap(AddressRange),
}

pub type Result<T> = std::result::Result<T, Error>;
