// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Named BAR0 register fields and a bounded-polling accessor over them.

use std::thread;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::warn;

use crate::device::AccessSize;
use crate::device::BarAccess;
use crate::device::REGISTER_BAR;
use crate::Error;
use crate::Result;

/// A bit field inside a 32-bit BAR0 register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterField {
    pub name: &'static str,
    pub offset: u32,
    pub mask: u32,
    pub shift: u32,
}

impl RegisterField {
    pub const fn new(name: &'static str, offset: u32, mask: u32, shift: u32) -> Self {
        RegisterField {
            name,
            offset,
            mask,
            shift,
        }
    }

    /// Places `value` into the field's bit position, dropping bits that do not fit.
    pub const fn encode(&self, value: u32) -> u32 {
        (value << self.shift) & self.mask
    }

    /// Extracts the field from a full register value.
    pub const fn decode(&self, raw: u32) -> u32 {
        (raw & self.mask) >> self.shift
    }
}

/// PRAMIN window base, in 64 KiB units.
pub const PRAMIN_WINDOW: RegisterField =
    RegisterField::new("PRAMIN_WINDOW", 0x001700, 0xffff_ffff, 0);
/// Start of the 1 MiB PRAMIN data window in BAR0.
pub const PRAMIN_DATA: u32 = 0x700000;
pub const PRAMIN_WINDOW_SIZE: u64 = 0x10_0000;

/// BAR1 channel instance block address, in 4 KiB units.
pub const BAR1_CHANNEL_INSTANCE: RegisterField =
    RegisterField::new("BAR1_CHANNEL_INSTANCE", 0x001704, 0x0fff_ffff, 0);
pub const BAR1_CHANNEL_VALID: RegisterField =
    RegisterField::new("BAR1_CHANNEL_VALID", 0x001704, 0x8000_0000, 31);

pub const POLL_AREA_REMAP_ENABLE: RegisterField =
    RegisterField::new("POLL_AREA_REMAP_ENABLE", 0x002200, 0x0000_0001, 0);
pub const POLL_AREA_BASE: RegisterField =
    RegisterField::new("POLL_AREA_BASE", 0x002254, 0x0fff_ffff, 0);
pub const POLL_AREA_ENABLE: RegisterField =
    RegisterField::new("POLL_AREA_ENABLE", 0x002254, 0x1000_0000, 28);

/// Free slots in the translation-cache flush queue.
pub const TLB_FLUSH_SPACE: RegisterField =
    RegisterField::new("TLB_FLUSH_SPACE", 0x100c80, 0x00ff_0000, 16);
pub const TLB_FLUSH_DONE: RegisterField =
    RegisterField::new("TLB_FLUSH_DONE", 0x100c80, 0x0000_8000, 15);
/// Page directory to invalidate, in 256-byte units.
pub const TLB_FLUSH_PDB: RegisterField =
    RegisterField::new("TLB_FLUSH_PDB", 0x100cb8, 0xffff_ffff, 0);
pub const TLB_FLUSH_PAGE_ALL: RegisterField =
    RegisterField::new("TLB_FLUSH_PAGE_ALL", 0x100cbc, 0x0000_0001, 0);
pub const TLB_FLUSH_HUB_ONLY: RegisterField =
    RegisterField::new("TLB_FLUSH_HUB_ONLY", 0x100cbc, 0x0000_0004, 2);

/// 32-bit access to BAR0 registers.
///
/// A `Registers` borrows the BAR backend mutably, so it can only exist while the device-wide lock
/// is held.
pub struct Registers<'a> {
    bars: &'a mut dyn BarAccess,
    timeout: Duration,
}

impl<'a> Registers<'a> {
    pub fn new(bars: &'a mut dyn BarAccess, timeout: Duration) -> Self {
        Registers { bars, timeout }
    }

    pub fn read32(&mut self, offset: u32) -> u32 {
        self.bars
            .read(REGISTER_BAR, u64::from(offset), AccessSize::Dword)
    }

    pub fn write32(&mut self, offset: u32, value: u32) {
        self.bars
            .write(REGISTER_BAR, u64::from(offset), value, AccessSize::Dword)
    }

    /// Replaces the bits in `mask` with those of `value`, leaving the rest of the register as is.
    /// Returns the previous register value.
    pub fn mask32(&mut self, offset: u32, mask: u32, value: u32) -> u32 {
        let old = self.read32(offset);
        self.write32(offset, (old & !mask) | (value & mask));
        old
    }

    /// Writes one or more fields that share a register; other bits are written as zero.
    pub fn write_fields(&mut self, fields: &[(RegisterField, u32)]) {
        if let Some((first, _)) = fields.first() {
            debug_assert!(fields.iter().all(|(f, _)| f.offset == first.offset));
            let value = fields
                .iter()
                .fold(0, |acc, (field, value)| acc | field.encode(*value));
            self.write32(first.offset, value);
        }
    }

    /// Read-modify-writes a single field.
    pub fn set_field(&mut self, field: RegisterField, value: u32) -> u32 {
        self.mask32(field.offset, field.mask, field.encode(value))
    }

    /// Polls until `field` reads as `value`.
    pub fn wait_eq(&mut self, field: RegisterField, value: u32) -> Result<u32> {
        self.wait(field, |v| v == value)
    }

    /// Polls until `field` reads as anything but `value`.
    pub fn wait_ne(&mut self, field: RegisterField, value: u32) -> Result<u32> {
        self.wait(field, |v| v != value)
    }

    fn wait<F>(&mut self, field: RegisterField, done: F) -> Result<u32>
    where
        F: Fn(u32) -> bool,
    {
        let start = Instant::now();
        let mut polls = 0u64;
        loop {
            let raw = self.read32(field.offset);
            polls += 1;
            if done(field.decode(raw)) {
                if polls > 1 {
                    debug!("{} settled after {} polls", field.name, polls);
                }
                return Ok(raw);
            }
            if start.elapsed() >= self.timeout {
                warn!(
                    "{} ({:#08x}) did not settle within {:?}, last {:#010x}",
                    field.name, field.offset, self.timeout, raw
                );
                return Err(Error::RegisterTimeout {
                    name: field.name,
                    offset: field.offset,
                    last: raw,
                });
            }
            thread::yield_now();
        }
    }
}
