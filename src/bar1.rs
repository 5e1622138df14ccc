// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shadow BAR1 channel.
//!
//! Guests never see the real BAR1 page table. Instead the hypervisor owns one channel whose page
//! table it fills from each guest's private table, and binds that channel as the hardware's BAR1
//! channel. Each guest context is given a disjoint window of `channel_stride` bytes of the
//! aperture, and trapped poll-area accesses are rebased into that window.
//!
//! Writes to the page table are not visible to the GPU until `Bar1::flush` has invalidated the
//! translation cache.

use log::debug;
use log::info;
use log::warn;
use resources::Alloc;

use crate::config::Bar1Config;
use crate::context::Command;
use crate::context::Context;
use crate::device::DeviceState;
use crate::device::GpuDevice;
use crate::device::APERTURE_BAR;
use crate::memory::GpuMemory;
use crate::page_table::InstanceDirectory;
use crate::page_table::PageDirectoryEntry;
use crate::page_table::PageTableEntry;
use crate::page_table::SingleEntryDirectory;
use crate::page_table::INSTANCE_DIRECTORY_OFFSET;
use crate::registers::BAR1_CHANNEL_INSTANCE;
use crate::registers::BAR1_CHANNEL_VALID;
use crate::registers::POLL_AREA_BASE;
use crate::registers::POLL_AREA_ENABLE;
use crate::registers::POLL_AREA_REMAP_ENABLE;
use crate::registers::TLB_FLUSH_DONE;
use crate::registers::TLB_FLUSH_HUB_ONLY;
use crate::registers::TLB_FLUSH_PAGE_ALL;
use crate::registers::TLB_FLUSH_PDB;
use crate::registers::TLB_FLUSH_SPACE;
use crate::Error;
use crate::Result;

const INSTANCE_PAGES: u64 = 2;

/// What `Bar1::map` did with an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapOutcome {
    /// The leaf entry at `slot` now holds the new value.
    Mapped { slot: u64 },
    /// The address is beyond what the page directory translates; nothing was written.
    OutOfRange,
}

/// The shadow BAR1 channel of one GPU.
#[derive(Debug)]
pub struct Bar1 {
    config: Bar1Config,
    directory_layout: SingleEntryDirectory,
    instance: GpuMemory,
    directory: GpuMemory,
    table: GpuMemory,
}

impl Bar1 {
    /// Allocates and fills the shadow channel, then points the poll area at BAR1 offset zero.
    ///
    /// Holds the device lock for the whole construction.
    pub fn new(device: &GpuDevice) -> Result<Bar1> {
        let config = device.config().bar1.clone();
        let directory_layout = SingleEntryDirectory::new(
            config.page_directory_covered_size,
            config.small_page_size,
        );

        let mut state = device.lock();
        let instance =
            GpuMemory::with_pages(&mut state, Alloc::Bar1Instance, INSTANCE_PAGES, "bar1 instance")?;
        let directory = GpuMemory::new(
            &mut state,
            Alloc::Bar1Directory,
            config.directory_entries * PageDirectoryEntry::SIZE,
            "bar1 page directory",
        )?;
        let table = GpuMemory::new(
            &mut state,
            Alloc::Bar1Table,
            directory_layout.table_size(),
            "bar1 page table",
        )?;

        let bar1 = Bar1 {
            config,
            directory_layout,
            instance,
            directory,
            table,
        };
        bar1.write_instance_directory(&mut state)?;
        bar1.directory.write_obj(
            &mut state,
            0,
            &PageDirectoryEntry::small_pages(bar1.table.address()),
        )?;
        bar1.refresh_poll_area(&mut state)?;

        info!(
            "bar1: shadow channel {:#x} with PDE {:#x} PTE {:#x}",
            bar1.instance.address(),
            bar1.directory.address(),
            bar1.table.address()
        );
        Ok(bar1)
    }

    pub fn config(&self) -> &Bar1Config {
        &self.config
    }

    pub fn instance_address(&self) -> u64 {
        self.instance.address()
    }

    pub fn directory_address(&self) -> u64 {
        self.directory.address()
    }

    pub fn table_address(&self) -> u64 {
        self.table.address()
    }

    /// Binds the shadow channel as the hardware BAR1 channel. Run on every switch to a context
    /// whose BAR1 traffic must be decoded.
    pub fn refresh_channel(&self, state: &mut DeviceState, context: &dyn Context) -> Result<()> {
        self.write_instance_directory(state)?;
        let instance = (self.instance.address() >> 12) as u32;
        debug_assert_eq!(
            BAR1_CHANNEL_INSTANCE.decode(BAR1_CHANNEL_INSTANCE.encode(instance)),
            instance
        );
        state.registers().write_fields(&[
            (BAR1_CHANNEL_VALID, 1),
            (BAR1_CHANNEL_INSTANCE, instance),
        ]);
        debug!("bar1: channel bound for context {}", context.id());
        Ok(())
    }

    /// Enables poll-area remapping with the poll area based at offset zero.
    pub fn refresh_poll_area(&self, state: &mut DeviceState) -> Result<()> {
        let mut regs = state.registers();
        regs.set_field(POLL_AREA_REMAP_ENABLE, 1);
        regs.write_fields(&[(POLL_AREA_ENABLE, 1), (POLL_AREA_BASE, 0)]);
        Ok(())
    }

    /// Copies the translations of `context`'s poll-area channels into the shadow table.
    ///
    /// Channels the guest has not mapped keep whatever the shadow table held before. Returns the
    /// number of entries written.
    pub fn shadow(&self, state: &mut DeviceState, context: &dyn Context) -> Result<usize> {
        info!("bar1: shadowing context {}", context.id());
        let table = context.bar1_table();
        let mut mapped = 0;
        for vcid in 0..self.config.domain_channels {
            let offset = match (u64::from(vcid) * self.config.page_size)
                .checked_add(context.poll_area())
            {
                Some(offset) => offset,
                None => {
                    warn!(
                        "bar1: context {} channel {} lies past the end of BAR1",
                        context.id(),
                        vcid
                    );
                    continue;
                }
            };
            let pcid = context.phys_channel_id(vcid);
            let virt = match u64::from(pcid).checked_mul(self.config.page_size) {
                Some(virt) => virt,
                None => {
                    debug!("bar1: channel {} is outside the page directory", pcid);
                    continue;
                }
            };
            if let Some(value) = table.resolve(offset) {
                if let MapOutcome::Mapped { .. } = self.map(state, virt, value)? {
                    mapped += 1;
                }
            }
        }
        Ok(mapped)
    }

    /// Points the shadow table entry for `virt` at `data`.
    ///
    /// Addresses past the page directory's reach are ignored. A `virt` that is not aligned to
    /// the small page size is rejected with `Error::MisalignedMapping`.
    pub fn map(&self, state: &mut DeviceState, virt: u64, data: u64) -> Result<MapOutcome> {
        let slot = match self.directory_layout.leaf_slot(virt)? {
            Some(slot) => slot,
            None => {
                debug!("bar1: {:#x} is outside the page directory, not mapped", virt);
                return Ok(MapOutcome::OutOfRange);
            }
        };
        self.table.write_obj(
            state,
            slot * PageTableEntry::SIZE,
            &PageTableEntry::from_raw(data),
        )?;
        debug!("bar1: table {:#x} mapped to {:#x}", virt, data);
        Ok(MapOutcome::Mapped { slot })
    }

    /// Reads back the shadow table entry at `slot`.
    pub fn entry(&self, state: &mut DeviceState, slot: u64) -> Result<PageTableEntry> {
        self.table.read_obj(state, slot * PageTableEntry::SIZE)
    }

    /// Invalidates the GPU's cached BAR1 translations so earlier `map` calls take effect.
    ///
    /// Takes the device lock for the whole sequence.
    pub fn flush(&self, device: &GpuDevice) -> Result<()> {
        let mut state = device.lock();
        let mut regs = state.registers();
        regs.wait_ne(TLB_FLUSH_SPACE, 0)?;
        regs.write32(TLB_FLUSH_PDB.offset, (self.directory.address() >> 8) as u32);
        regs.write_fields(&[(TLB_FLUSH_PAGE_ALL, 1), (TLB_FLUSH_HUB_ONLY, 1)]);
        regs.wait_eq(TLB_FLUSH_DONE, 1)?;
        Ok(())
    }

    /// Forwards a trapped guest write into the context's window of the real aperture.
    pub fn write(&self, device: &GpuDevice, context: &dyn Context, command: &Command) -> Result<()> {
        let offset = self.aperture_offset(context, command)?;
        device.write(APERTURE_BAR, offset, command.value, command.size);
        Ok(())
    }

    /// Forwards a trapped guest read from the context's window of the real aperture.
    pub fn read(&self, device: &GpuDevice, context: &dyn Context, command: &Command) -> Result<u32> {
        let offset = self.aperture_offset(context, command)?;
        Ok(device.read(APERTURE_BAR, offset, command.size))
    }

    /// Real BAR1 offset for a guest access at `command.offset`.
    pub fn aperture_offset(&self, context: &dyn Context, command: &Command) -> Result<u64> {
        let max = self.config.max_contexts();
        if context.id() >= max {
            warn!("bar1: context {} has no slot in the aperture", context.id());
            return Err(Error::ContextOutOfRange {
                context: context.id(),
                max,
            });
        }
        let stride = self.config.channel_stride();
        let outside = || {
            warn!(
                "bar1: context {} access at {:#x} is outside its poll area",
                context.id(),
                command.offset
            );
            Error::OutsidePollArea {
                context: context.id(),
                offset: command.offset,
            }
        };
        let local = command
            .offset
            .checked_sub(context.poll_area())
            .ok_or_else(outside)?;
        let end = local
            .checked_add(command.size.bytes() as u64)
            .ok_or_else(outside)?;
        if end > stride {
            return Err(outside());
        }
        Ok(local + stride * u64::from(context.id()))
    }

    /// Frees the shadow channel's VRAM. The channel must no longer be bound.
    pub fn release(self, state: &mut DeviceState) -> Result<()> {
        self.table.release(state)?;
        self.directory.release(state)?;
        self.instance.release(state)
    }

    fn write_instance_directory(&self, state: &mut DeviceState) -> Result<()> {
        self.instance.write_obj(
            state,
            INSTANCE_DIRECTORY_OFFSET,
            &InstanceDirectory::new(self.directory.address(), self.config.vm_size()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::device::AccessSize;
    use crate::mock::MockBars;
    use crate::mock::MockContext;

    fn setup(config: Config) -> (GpuDevice, MockBars, Bar1) {
        let mock = MockBars::new();
        let device = GpuDevice::new(Box::new(mock.clone()), config).unwrap();
        let bar1 = Bar1::new(&device).unwrap();
        (device, mock, bar1)
    }

    fn default_setup() -> (GpuDevice, MockBars, Bar1) {
        setup(Config::default())
    }

    #[test]
    fn construction_layout() {
        let (_device, mock, bar1) = default_setup();
        let instance = bar1.instance_address();
        let directory = bar1.directory_address();
        let table = bar1.table_address();

        assert_eq!(mock.vram32(instance + 0x200), directory as u32);
        assert_eq!(mock.vram32(instance + 0x204), (directory >> 32) as u32);
        assert_eq!(mock.vram32(instance + 0x208), 0x1000 * 128);
        assert_eq!(mock.vram32(instance + 0x20c), 0);

        assert_eq!(mock.vram32(directory), 0);
        assert_eq!(mock.vram32(directory + 4), (table >> 8) as u32 | 0x1);

        assert_eq!(mock.register(0x2200) & 0x1, 0x1);
        assert_eq!(mock.register(0x2254), 0x1000_0000);
    }

    #[test]
    fn memory_objects_do_not_overlap() {
        let (_device, _mock, bar1) = default_setup();
        let instance_end = bar1.instance_address() + 0x2000;
        let directory_end = bar1.directory_address() + 8 * 8;
        assert!(bar1.directory_address() >= instance_end);
        assert!(bar1.table_address() >= directory_end);
    }

    #[test]
    fn construction_fails_without_vram() {
        let mut config = Config::default();
        config.device.vram = resources::AddressRange {
            start: 0,
            end: 0x2fff,
        };
        let device = GpuDevice::new(Box::new(MockBars::new()), config).unwrap();
        assert!(matches!(
            Bar1::new(&device),
            Err(Error::VramAllocation(resources::Error::OutOfSpace))
        ));
    }

    #[test]
    fn refresh_channel_binds_instance() {
        let (device, mock, bar1) = default_setup();
        let context = MockContext::new(0, 0, 8);
        mock.clear_accesses();
        bar1.refresh_channel(&mut device.lock(), &context).unwrap();
        assert_eq!(
            mock.register(0x1704),
            0x8000_0000 | (bar1.instance_address() >> 12) as u32
        );
        assert_eq!(
            mock.vram32(bar1.instance_address() + 0x200),
            bar1.directory_address() as u32
        );
        assert_eq!(mock.register_writes(), vec![(0x1704, mock.register(0x1704))]);
    }

    #[test]
    fn refresh_poll_area_is_idempotent() {
        let (device, mock, bar1) = default_setup();
        mock.set_register(0x2200, 0x100);
        let mut state = device.lock();
        bar1.refresh_poll_area(&mut state).unwrap();
        bar1.refresh_poll_area(&mut state).unwrap();
        assert_eq!(mock.register(0x2200), 0x101);
        assert_eq!(mock.register(0x2254), 0x1000_0000);
    }

    #[test]
    fn map_writes_both_halves() {
        let (device, mock, bar1) = default_setup();
        let mut state = device.lock();
        for (virt, data) in [
            (0u64, 0x0000_0001_0000_0005u64),
            (0x5000, 0xdead_beef_0000_1001),
            (0x7ff_f000, 0x42),
        ] {
            let slot = virt / 0x1000;
            assert_eq!(
                bar1.map(&mut state, virt, data).unwrap(),
                MapOutcome::Mapped { slot }
            );
            let base = bar1.table_address() + slot * 8;
            assert_eq!(mock.vram32(base), data as u32);
            assert_eq!(mock.vram32(base + 4), (data >> 32) as u32);
            assert_eq!(bar1.entry(&mut state, slot).unwrap().raw(), data);
        }
    }

    #[test]
    fn map_out_of_range_is_noop() {
        let (device, mock, bar1) = default_setup();
        let mut state = device.lock();
        bar1.map(&mut state, 0x3000, 0x77).unwrap();
        let before = mock.vram_snapshot();
        for virt in [0x800_0000, 0x800_1000, 0x800_0800, u64::MAX] {
            assert_eq!(
                bar1.map(&mut state, virt, 0x1234).unwrap(),
                MapOutcome::OutOfRange
            );
        }
        assert_eq!(mock.vram_snapshot(), before);
    }

    #[test]
    fn map_misaligned_is_error() {
        let (device, mock, bar1) = default_setup();
        let mut state = device.lock();
        let before = mock.vram_snapshot();
        assert!(matches!(
            bar1.map(&mut state, 0x1004, 0x1),
            Err(Error::MisalignedMapping {
                virt: 0x1004,
                align: 0x1000
            })
        ));
        assert_eq!(mock.vram_snapshot(), before);
    }

    #[test]
    fn shadow_maps_resolved_channels_only() {
        let (device, mock, bar1) = default_setup();
        let mut context = MockContext::new(2, 0x4000, 8);
        // vcid 1 -> pcid 17 and vcid 6 -> pcid 22 are mapped by the guest.
        context.map(0x4000 + 0x1000, 0xaaaa_0001);
        context.map(0x4000 + 6 * 0x1000, 0x1_bbbb_0001);

        let mut state = device.lock();
        // Stale entry for vcid 3 (pcid 19) must survive.
        bar1.map(&mut state, 19 * 0x1000, 0x5151).unwrap();
        assert_eq!(bar1.shadow(&mut state, &context).unwrap(), 2);

        let table = bar1.table_address();
        assert_eq!(mock.vram32(table + 17 * 8), 0xaaaa_0001);
        assert_eq!(mock.vram32(table + 22 * 8), 0xbbbb_0001);
        assert_eq!(mock.vram32(table + 22 * 8 + 4), 0x1);
        assert_eq!(mock.vram32(table + 19 * 8), 0x5151);
        for pcid in [16u64, 18, 20, 21, 23] {
            assert_eq!(bar1.entry(&mut state, pcid).unwrap().raw(), 0);
        }
    }

    #[test]
    fn shadow_follows_channel_assignment() {
        let (device, mock, bar1) = default_setup();
        let mut context = MockContext::new(0, 0, 8);
        context.map(0, 0x9001);
        context.set_channel(0, 40);
        let mut state = device.lock();
        assert_eq!(bar1.shadow(&mut state, &context).unwrap(), 1);
        assert_eq!(mock.vram32(bar1.table_address() + 40 * 8), 0x9001);
        assert_eq!(mock.vram32(bar1.table_address()), 0);
    }

    #[test]
    fn shadow_skips_channels_beyond_directory() {
        let mut config = Config::default();
        config.bar1.page_directory_covered_size = config.bar1.vm_size();
        let (device, mock, bar1) = setup(config);
        let mut context = MockContext::new(0, 0, 8);
        context.map(0, 0x1);
        context.set_channel(0, 128);
        let before = mock.vram_snapshot();
        assert_eq!(bar1.shadow(&mut device.lock(), &context).unwrap(), 0);
        assert_eq!(mock.vram_snapshot(), before);
    }

    #[test]
    fn shadow_skips_channels_past_end_of_bar1() {
        let (device, mock, bar1) = default_setup();
        let mut context = MockContext::new(0, u64::MAX - 0x1000, 8);
        context.map(u64::MAX - 0x1000, 0x7001);
        context.set_channel(1, u32::MAX);
        context.map(u64::MAX, 0x7002);
        assert_eq!(bar1.shadow(&mut device.lock(), &context).unwrap(), 1);
        assert_eq!(mock.vram32(bar1.table_address()), 0x7001);
    }

    #[test]
    fn instance_address_keeps_high_bits() {
        let mut config = Config::default();
        config.device.vram = resources::AddressRange {
            start: 0xff_fff0_0000,
            end: 0xff_ffff_ffff,
        };
        let (device, mock, bar1) = setup(config);
        let context = MockContext::new(0, 0, 8);
        bar1.refresh_channel(&mut device.lock(), &context).unwrap();
        assert_eq!(bar1.instance_address(), 0xff_fff0_0000);
        assert_eq!(mock.register(0x1704), 0x8fff_ff00);
        assert_eq!(
            mock.vram32(bar1.instance_address() + 0x204),
            (bar1.directory_address() >> 32) as u32
        );
    }

    #[test]
    fn flush_sequence() {
        let (device, mock, bar1) = default_setup();
        mock.clear_accesses();
        bar1.flush(&device).unwrap();
        assert_eq!(
            mock.register_writes(),
            vec![
                (0x100cb8, (bar1.directory_address() >> 8) as u32),
                (0x100cbc, 0x5),
            ]
        );
        let accesses = mock.accesses();
        assert!(!accesses[0].is_write());
        assert_eq!(accesses[0].offset, 0x100c80);
        let last = accesses.last().unwrap();
        assert!(!last.is_write());
        assert_eq!(last.offset, 0x100c80);
    }

    #[test]
    fn flush_times_out() {
        let mut config = Config::default();
        config.bar1.poll_timeout_ms = 10;
        let (device, mock, bar1) = setup(config);
        mock.stall_flush();
        mock.clear_accesses();
        assert!(matches!(
            bar1.flush(&device),
            Err(Error::RegisterTimeout {
                name: "TLB_FLUSH_SPACE",
                offset: 0x100c80,
                ..
            })
        ));
        assert!(mock.register_writes().is_empty());
        // The lock is released on failure.
        assert!(device.lock().vram().free_bytes() > 0);
    }

    #[test]
    fn flush_times_out_waiting_for_done() {
        let mut config = Config::default();
        config.bar1.poll_timeout_ms = 10;
        let (device, mock, bar1) = setup(config);
        mock.set_register(0x100c80, 0x00ff_0000);
        assert!(matches!(
            bar1.flush(&device),
            Err(Error::RegisterTimeout {
                name: "TLB_FLUSH_DONE",
                ..
            })
        ));
    }

    #[test]
    fn access_translation_example() {
        let (_device, _mock, bar1) = default_setup();
        let context = MockContext::new(3, 0x2000, 8);
        let command = Command::write(0x2000 + 5 * 0x1000, 0, AccessSize::Dword);
        assert_eq!(bar1.aperture_offset(&context, &command).unwrap(), 0x1d000);
    }

    #[test]
    fn write_then_read() {
        let (device, mock, bar1) = default_setup();
        let context = MockContext::new(3, 0x2000, 8);
        let offset = 0x2000 + 5 * 0x1000 + 0x40;
        bar1.write(
            &device,
            &context,
            &Command::write(offset, 0x1122_3344, AccessSize::Dword),
        )
        .unwrap();
        assert_eq!(mock.aperture8(0x1d040), 0x44);
        assert_eq!(mock.aperture8(0x1d043), 0x11);
        assert_eq!(
            bar1.read(&device, &context, &Command::read(offset, AccessSize::Dword))
                .unwrap(),
            0x1122_3344
        );
        assert_eq!(
            bar1.read(&device, &context, &Command::read(offset + 2, AccessSize::Word))
                .unwrap(),
            0x1122
        );
    }

    #[test]
    fn accesses_outside_window_rejected() {
        let (device, mock, bar1) = default_setup();
        let context = MockContext::new(1, 0x2000, 8);
        for command in [
            Command::read(0x1ffc, AccessSize::Dword),
            Command::read(0x2000 + 0x8000, AccessSize::Byte),
            Command::read(0x2000 + 0x7ffe, AccessSize::Dword),
        ] {
            assert!(matches!(
                bar1.read(&device, &context, &command),
                Err(Error::OutsidePollArea { context: 1, .. })
            ));
        }
        mock.clear_accesses();
        assert!(bar1
            .write(
                &device,
                &context,
                &Command::write(0x1000, 1, AccessSize::Byte)
            )
            .is_err());
        assert!(mock.accesses().is_empty());
        // Last byte of the window is still reachable.
        assert!(bar1
            .read(&device, &context, &Command::read(0x2000 + 0x7fff, AccessSize::Byte))
            .is_ok());
    }

    #[test]
    fn context_without_slot_rejected() {
        let (device, mock, bar1) = default_setup();
        let context = MockContext::new(16, 0x2000, 8);
        mock.clear_accesses();
        assert!(matches!(
            bar1.read(&device, &context, &Command::read(0x2000, AccessSize::Dword)),
            Err(Error::ContextOutOfRange {
                context: 16,
                max: 16
            })
        ));
        assert!(matches!(
            bar1.write(
                &device,
                &context,
                &Command::write(0x2010, 1, AccessSize::Byte)
            ),
            Err(Error::ContextOutOfRange { .. })
        ));
        assert!(mock.accesses().is_empty());
        let last = MockContext::new(15, 0x2000, 8);
        assert_eq!(
            bar1.aperture_offset(&last, &Command::read(0x2000 + 0x7ffc, AccessSize::Dword))
                .unwrap(),
            0x7fffc
        );
    }

    #[test]
    fn release_frees_vram() {
        let mock = MockBars::new();
        let device = GpuDevice::new(Box::new(mock), Config::default()).unwrap();
        let before = device.lock().vram().free_bytes();
        let bar1 = Bar1::new(&device).unwrap();
        assert!(device.lock().vram().free_bytes() < before);
        bar1.release(&mut device.lock()).unwrap();
        assert_eq!(device.lock().vram().free_bytes(), before);
        // A fresh channel can be built in the same place.
        Bar1::new(&device).unwrap();
    }
}
