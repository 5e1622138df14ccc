// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Mock GPU and guest implementations, for unit-tests.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::thread::ThreadId;

use sync::Mutex;

use crate::context::Context;
use crate::context::ShadowPageTable;
use crate::device::AccessSize;
use crate::device::BarAccess;
use crate::device::BarIndex;
use crate::device::APERTURE_BAR;
use crate::device::REGISTER_BAR;
use crate::registers::PRAMIN_DATA;
use crate::registers::PRAMIN_WINDOW;
use crate::registers::PRAMIN_WINDOW_SIZE;
use crate::registers::TLB_FLUSH_DONE;
use crate::registers::TLB_FLUSH_SPACE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One access seen by `MockBars`, in the order it happened.
#[derive(Clone, Debug)]
pub struct Access {
    pub thread: ThreadId,
    pub kind: AccessKind,
    pub bar: BarIndex,
    pub offset: u64,
    pub value: u32,
    pub size: AccessSize,
}

impl Access {
    pub fn is_write(&self) -> bool {
        self.kind == AccessKind::Write
    }
}

#[derive(Default)]
struct MockState {
    registers: HashMap<u64, u32>,
    vram: HashMap<u64, u32>,
    aperture: HashMap<u64, u8>,
    log: Vec<Access>,
}

impl MockState {
    fn pramin_address(&self, offset: u64) -> Option<u64> {
        let data = u64::from(PRAMIN_DATA);
        if offset < data || offset >= data + PRAMIN_WINDOW_SIZE {
            return None;
        }
        let window = self
            .registers
            .get(&u64::from(PRAMIN_WINDOW.offset))
            .copied()
            .unwrap_or(0);
        Some((u64::from(window) << 16) + (offset - data))
    }
}

/// A fake GPU: BAR0 registers, VRAM reachable through the PRAMIN window, and a byte-addressed
/// BAR1. Clones share state, so a test can keep one handle while the device owns another.
///
/// The flush status register reads as "queue has space, flush done" unless a test overrides it.
#[derive(Clone)]
pub struct MockBars {
    state: Arc<Mutex<MockState>>,
}

impl MockBars {
    pub fn new() -> MockBars {
        let mut state = MockState::default();
        state.registers.insert(
            u64::from(TLB_FLUSH_SPACE.offset),
            TLB_FLUSH_SPACE.mask | TLB_FLUSH_DONE.mask,
        );
        MockBars {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn register(&self, offset: u32) -> u32 {
        self.state
            .lock()
            .registers
            .get(&u64::from(offset))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_register(&self, offset: u32, value: u32) {
        self.state
            .lock()
            .registers
            .insert(u64::from(offset), value);
    }

    /// Makes every translation-cache flush hang.
    pub fn stall_flush(&self) {
        self.set_register(TLB_FLUSH_SPACE.offset, 0);
    }

    /// VRAM word at physical `address`, bypassing PRAMIN.
    pub fn vram32(&self, address: u64) -> u32 {
        self.state
            .lock()
            .vram
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Copy of every VRAM word written so far.
    pub fn vram_snapshot(&self) -> BTreeMap<u64, u32> {
        self.state
            .lock()
            .vram
            .iter()
            .map(|(&k, &v)| (k, v))
            .collect()
    }

    /// Byte of BAR1 at `offset`.
    pub fn aperture8(&self, offset: u64) -> u8 {
        self.state
            .lock()
            .aperture
            .get(&offset)
            .copied()
            .unwrap_or(0)
    }

    pub fn accesses(&self) -> Vec<Access> {
        self.state.lock().log.clone()
    }

    pub fn clear_accesses(&self) {
        self.state.lock().log.clear();
    }

    /// Register writes only, as `(offset, value)`, leaving out PRAMIN traffic.
    pub fn register_writes(&self) -> Vec<(u64, u32)> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|a| a.is_write() && a.bar == REGISTER_BAR)
            .filter(|a| {
                a.offset != u64::from(PRAMIN_WINDOW.offset)
                    && (a.offset < u64::from(PRAMIN_DATA)
                        || a.offset >= u64::from(PRAMIN_DATA) + PRAMIN_WINDOW_SIZE)
            })
            .map(|a| (a.offset, a.value))
            .collect()
    }
}

impl Default for MockBars {
    fn default() -> Self {
        Self::new()
    }
}

impl BarAccess for MockBars {
    fn read(&mut self, bar: BarIndex, offset: u64, size: AccessSize) -> u32 {
        let mut state = self.state.lock();
        let value = match bar {
            REGISTER_BAR => match state.pramin_address(offset) {
                Some(address) => state.vram.get(&address).copied().unwrap_or(0),
                None => state.registers.get(&offset).copied().unwrap_or(0),
            },
            APERTURE_BAR => (0..size.bytes() as u64).fold(0, |acc, i| {
                let byte = state.aperture.get(&(offset + i)).copied().unwrap_or(0);
                acc | (u32::from(byte) << (8 * i))
            }),
            _ => 0,
        } & size.mask();
        state.log.push(Access {
            thread: thread::current().id(),
            kind: AccessKind::Read,
            bar,
            offset,
            value,
            size,
        });
        value
    }

    fn write(&mut self, bar: BarIndex, offset: u64, value: u32, size: AccessSize) {
        let mut state = self.state.lock();
        let value = value & size.mask();
        match bar {
            REGISTER_BAR => match state.pramin_address(offset) {
                Some(address) => {
                    state.vram.insert(address, value);
                }
                None => {
                    state.registers.insert(offset, value);
                }
            },
            APERTURE_BAR => {
                for i in 0..size.bytes() as u64 {
                    state.aperture.insert(offset + i, (value >> (8 * i)) as u8);
                }
            }
            _ => (),
        }
        state.log.push(Access {
            thread: thread::current().id(),
            kind: AccessKind::Write,
            bar,
            offset,
            value,
            size,
        });
    }
}

/// A guest shadow page table backed by an exact-offset map.
#[derive(Clone, Debug, Default)]
pub struct MockShadowTable {
    entries: BTreeMap<u64, u64>,
}

impl ShadowPageTable for MockShadowTable {
    fn resolve(&self, offset: u64) -> Option<u64> {
        self.entries.get(&offset).copied()
    }
}

/// A guest context whose virtual channel `v` defaults to physical channel
/// `id * domain_channels + v`.
#[derive(Clone, Debug)]
pub struct MockContext {
    id: u32,
    poll_area: u64,
    channels: Vec<u32>,
    table: MockShadowTable,
}

impl MockContext {
    pub fn new(id: u32, poll_area: u64, domain_channels: u32) -> MockContext {
        MockContext {
            id,
            poll_area,
            channels: (0..domain_channels)
                .map(|vcid| id * domain_channels + vcid)
                .collect(),
            table: MockShadowTable::default(),
        }
    }

    pub fn set_channel(&mut self, vcid: u32, pcid: u32) {
        self.channels[vcid as usize] = pcid;
    }

    /// Makes the guest table resolve `offset` to `value`.
    pub fn map(&mut self, offset: u64, value: u64) {
        self.table.entries.insert(offset, value);
    }

    pub fn unmap(&mut self, offset: u64) {
        self.table.entries.remove(&offset);
    }
}

impl Context for MockContext {
    fn id(&self) -> u32 {
        self.id
    }

    fn poll_area(&self) -> u64 {
        self.poll_area
    }

    fn phys_channel_id(&self, vcid: u32) -> u32 {
        self.channels[vcid as usize]
    }

    fn bar1_table(&self) -> &dyn ShadowPageTable {
        &self.table
    }
}
