// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! What the BAR1 engine needs to know about a guest context.
//!
//! Contexts are owned by the session layer; the engine only ever reads them.

use crate::device::AccessSize;

/// A guest's private view of its BAR1 channel mappings.
pub trait ShadowPageTable {
    /// Resolves a guest BAR1 offset to the raw 64-bit PTE value it should map to, or `None` when
    /// the guest has not mapped that offset.
    fn resolve(&self, offset: u64) -> Option<u64>;
}

/// A guest context sharing the GPU.
pub trait Context {
    /// Context slot id, as handed out by `GpuDevice::acquire_virt`.
    fn id(&self) -> u32;
    /// Guest BAR1 offset at which the guest's poll area begins.
    fn poll_area(&self) -> u64;
    /// Physical channel backing the guest's virtual channel `vcid`.
    fn phys_channel_id(&self, vcid: u32) -> u32;
    fn bar1_table(&self) -> &dyn ShadowPageTable;
}

/// A trapped guest MMIO access, with `offset` in the guest's BAR1 address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    pub offset: u64,
    pub value: u32,
    pub size: AccessSize,
}

impl Command {
    pub fn read(offset: u64, size: AccessSize) -> Self {
        Command {
            offset,
            value: 0,
            size,
        }
    }

    pub fn write(offset: u64, value: u32, size: AccessSize) -> Self {
        Command {
            offset,
            value,
            size,
        }
    }
}
