// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The physical GPU handle and the state guarded by its device-wide lock.

use std::sync::MutexGuard;
use std::time::Duration;

use log::debug;
use log::info;
use resources::AddressAllocator;
use sync::Mutex;

use crate::config::Config;
use crate::registers::Registers;
use crate::registers::PRAMIN_DATA;
use crate::registers::PRAMIN_WINDOW;
use crate::registers::PRAMIN_WINDOW_SIZE;
use crate::Error;
use crate::Result;

/// Index of a PCI BAR of the GPU.
pub type BarIndex = usize;

/// BAR0: control registers and the PRAMIN window.
pub const REGISTER_BAR: BarIndex = 0;
/// BAR1: the channel aperture virtualized by `Bar1`.
pub const APERTURE_BAR: BarIndex = 1;

// VRAM allocations never straddle a 256-byte boundary below this.
const VRAM_MIN_ALIGN: u64 = 0x100;

/// Width of a single MMIO access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, enumn::N)]
#[repr(usize)]
pub enum AccessSize {
    Byte = 1,
    Word = 2,
    Dword = 4,
}

impl AccessSize {
    pub fn bytes(self) -> usize {
        self as usize
    }

    /// Mask selecting the low `bytes()` bytes of a 32-bit value.
    pub fn mask(self) -> u32 {
        match self {
            AccessSize::Byte => 0xff,
            AccessSize::Word => 0xffff,
            AccessSize::Dword => 0xffff_ffff,
        }
    }
}

impl TryFrom<usize> for AccessSize {
    type Error = Error;

    fn try_from(size: usize) -> Result<Self> {
        AccessSize::n(size).ok_or(Error::InvalidAccessSize(size))
    }
}

/// Raw access to the GPU's PCI BARs, provided by the platform layer.
pub trait BarAccess: Send {
    /// Reads `size` bytes at `offset` of `bar`, zero-extended.
    fn read(&mut self, bar: BarIndex, offset: u64, size: AccessSize) -> u32;
    /// Writes the low `size` bytes of `value` at `offset` of `bar`.
    fn write(&mut self, bar: BarIndex, offset: u64, value: u32, size: AccessSize);
}

/// Everything that may only be touched with the device-wide lock held.
pub struct DeviceState {
    bars: Box<dyn BarAccess>,
    vram: AddressAllocator,
    pramin_window: Option<u32>,
    contexts: Vec<bool>,
    poll_timeout: Duration,
}

impl DeviceState {
    pub fn read(&mut self, bar: BarIndex, offset: u64, size: AccessSize) -> u32 {
        self.bars.read(bar, offset, size)
    }

    pub fn write(&mut self, bar: BarIndex, offset: u64, value: u32, size: AccessSize) {
        self.bars.write(bar, offset, value, size)
    }

    /// BAR0 register accessor; polls give up after the configured timeout.
    pub fn registers(&mut self) -> Registers<'_> {
        Registers::new(self.bars.as_mut(), self.poll_timeout)
    }

    pub fn vram(&mut self) -> &mut AddressAllocator {
        &mut self.vram
    }

    /// Reads the VRAM word at physical `address` through the PRAMIN window.
    pub fn pramin_read32(&mut self, address: u64) -> u32 {
        let offset = self.pramin_offset(address);
        self.registers().read32(offset)
    }

    /// Writes the VRAM word at physical `address` through the PRAMIN window.
    pub fn pramin_write32(&mut self, address: u64, value: u32) {
        let offset = self.pramin_offset(address);
        self.registers().write32(offset, value)
    }

    // Slides the window over `address` if needed and returns the BAR0 offset that reaches it.
    fn pramin_offset(&mut self, address: u64) -> u32 {
        let base = address & !(PRAMIN_WINDOW_SIZE - 1);
        let window = (base >> 16) as u32;
        if self.pramin_window != Some(window) {
            debug!("pramin: window moved to {:#x}", base);
            self.registers().write32(PRAMIN_WINDOW.offset, window);
            self.pramin_window = Some(window);
        }
        PRAMIN_DATA + (address & (PRAMIN_WINDOW_SIZE - 1)) as u32
    }
}

/// Handle to one physical GPU. All shared hardware state lives behind a single lock.
pub struct GpuDevice {
    state: Mutex<DeviceState>,
    config: Config,
}

impl GpuDevice {
    pub fn new(bars: Box<dyn BarAccess>, config: Config) -> Result<GpuDevice> {
        config.validate()?;
        let vram = AddressAllocator::new(config.device.vram, Some(VRAM_MIN_ALIGN))
            .map_err(Error::VramAllocation)?;
        let max_contexts = config.bar1.max_contexts();
        info!(
            "gpu: vram {}, {} context slots of {} channels",
            config.device.vram, max_contexts, config.bar1.domain_channels
        );
        Ok(GpuDevice {
            state: Mutex::new(DeviceState {
                bars,
                vram,
                pramin_window: None,
                contexts: vec![false; max_contexts as usize],
                poll_timeout: config.bar1.poll_timeout(),
            }),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Takes the device-wide lock.
    pub fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock()
    }

    /// Single locked read. Must not be called while the caller already holds `lock()`.
    pub fn read(&self, bar: BarIndex, offset: u64, size: AccessSize) -> u32 {
        self.lock().read(bar, offset, size)
    }

    /// Single locked write. Must not be called while the caller already holds `lock()`.
    pub fn write(&self, bar: BarIndex, offset: u64, value: u32, size: AccessSize) {
        self.lock().write(bar, offset, value, size)
    }

    /// Reserves the lowest free context id. Each id owns one `channel_stride` window of BAR1.
    pub fn acquire_virt(&self) -> Result<u32> {
        let mut state = self.lock();
        let id = state
            .contexts
            .iter()
            .position(|used| !used)
            .ok_or(Error::NoFreeContext(state.contexts.len() as u32))?;
        state.contexts[id] = true;
        debug!("gpu: context slot {} acquired", id);
        Ok(id as u32)
    }

    pub fn release_virt(&self, id: u32) -> Result<()> {
        let mut state = self.lock();
        match state.contexts.get_mut(id as usize) {
            Some(used) if *used => {
                *used = false;
                debug!("gpu: context slot {} released", id);
                Ok(())
            }
            _ => Err(Error::ContextNotAcquired(id)),
        }
    }
}
