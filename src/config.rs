// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tunables for the device and the shadow BAR1 channel, loadable from a JSON file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use resources::AddressRange;
use serde::Deserialize;
use serde::Serialize;

use crate::page_table::PageDirectoryEntry;
use crate::page_table::PageTableEntry;
use crate::Error;
use crate::Result;

const DEFAULT_VRAM: AddressRange = AddressRange {
    start: 0,
    end: 0x3fff_ffff,
};

/// VRAM above this cannot hold the BAR1 instance block: the channel register keeps 28 bits of
/// the 4 KiB-aligned instance address.
pub const VRAM_ADDRESS_LIMIT: u64 = 1 << 40;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub device: DeviceConfig,
    pub bar1: Bar1Config,
}

impl Config {
    /// Parses and validates a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Config> {
        let config: Config = serde_json::from_str(json).map_err(Error::ParseConfig)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the JSON configuration file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let json = fs::read_to_string(path).map_err(Error::ReadConfig)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.device.validate()?;
        self.bar1.validate()
    }
}

/// Physical device parameters.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct DeviceConfig {
    /// VRAM handed to the hypervisor's allocator.
    pub vram: AddressRange,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig { vram: DEFAULT_VRAM }
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<()> {
        if self.vram.end < self.vram.start {
            return Err(Error::InvalidConfig(format!(
                "vram range {} is empty",
                self.vram
            )));
        }
        if self.vram.end >= VRAM_ADDRESS_LIMIT {
            return Err(Error::InvalidConfig(format!(
                "vram range {} reaches past {:#x}",
                self.vram, VRAM_ADDRESS_LIMIT
            )));
        }
        Ok(())
    }
}

/// Geometry of the virtualized BAR1 aperture.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Bar1Config {
    /// Bytes of BAR1 given to one channel.
    pub page_size: u64,
    /// Granule of the leaf page table.
    pub small_page_size: u64,
    /// Channels owned by one guest context.
    pub domain_channels: u32,
    /// Channels reachable through the virtualized aperture.
    pub aperture_channels: u32,
    /// Virtual range translated by one page directory entry.
    pub page_directory_covered_size: u64,
    /// Directory slots provisioned in the page directory object.
    pub directory_entries: u64,
    /// Upper bound on each hardware poll in `flush`.
    pub poll_timeout_ms: u64,
}

impl Default for Bar1Config {
    fn default() -> Self {
        Bar1Config {
            page_size: 0x1000,
            small_page_size: 0x1000,
            domain_channels: 8,
            aperture_channels: 128,
            page_directory_covered_size: 0x800_0000,
            directory_entries: 8,
            poll_timeout_ms: 2000,
        }
    }
}

impl Bar1Config {
    /// Size of the virtualized address space programmed into the instance block. Only meaningful
    /// once `validate` has passed.
    pub fn vm_size(&self) -> u64 {
        self.page_size * u64::from(self.aperture_channels)
    }

    /// Bytes of BAR1 reserved for one context.
    pub fn channel_stride(&self) -> u64 {
        self.page_size * u64::from(self.domain_channels)
    }

    /// Number of contexts that fit in the aperture.
    pub fn max_contexts(&self) -> u32 {
        self.aperture_channels / self.domain_channels
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if !self.page_size.is_power_of_two() {
            return invalid(format!("page_size {:#x} is not a power of two", self.page_size));
        }
        if !self.small_page_size.is_power_of_two() {
            return invalid(format!(
                "small_page_size {:#x} is not a power of two",
                self.small_page_size
            ));
        }
        if self.page_size % self.small_page_size != 0 {
            return invalid(format!(
                "page_size {:#x} is not a multiple of small_page_size {:#x}",
                self.page_size, self.small_page_size
            ));
        }
        if self.domain_channels == 0 {
            return invalid("domain_channels must be non-zero".to_string());
        }
        if self.aperture_channels == 0 || self.aperture_channels % self.domain_channels != 0 {
            return invalid(format!(
                "aperture_channels {} is not a non-zero multiple of domain_channels {}",
                self.aperture_channels, self.domain_channels
            ));
        }
        if self.page_directory_covered_size % self.small_page_size != 0 {
            return invalid(format!(
                "page_directory_covered_size {:#x} is not a multiple of small_page_size",
                self.page_directory_covered_size
            ));
        }
        let vm_size = match self
            .page_size
            .checked_mul(u64::from(self.aperture_channels))
        {
            Some(size) => size,
            None => {
                return invalid(format!(
                    "{} channels of {:#x} bytes overflow the address space",
                    self.aperture_channels, self.page_size
                ))
            }
        };
        if self.page_directory_covered_size < vm_size {
            return invalid(format!(
                "page_directory_covered_size {:#x} does not cover the {:#x}-byte aperture",
                self.page_directory_covered_size, vm_size
            ));
        }
        if (self.page_directory_covered_size / self.small_page_size)
            .checked_mul(PageTableEntry::SIZE)
            .is_none()
        {
            return invalid(format!(
                "page table for {:#x} bytes does not fit the address space",
                self.page_directory_covered_size
            ));
        }
        if self.directory_entries == 0
            || self
                .directory_entries
                .checked_mul(PageDirectoryEntry::SIZE)
                .is_none()
        {
            return invalid(format!(
                "directory_entries {} is out of range",
                self.directory_entries
            ));
        }
        if self.poll_timeout_ms == 0 {
            return invalid("poll_timeout_ms must be non-zero".to_string());
        }
        Ok(())
    }
}
