// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! BAR1 virtualization for a GPU shared between guest contexts.
//!
//! The hypervisor owns a shadow BAR1 channel (`bar1::Bar1`) whose page table is rebuilt from each
//! guest's private mappings, and rewrites trapped poll-area accesses into per-context windows of
//! the real aperture. All hardware access is serialized by the lock in `device::GpuDevice`.

pub mod bar1;
pub mod config;
pub mod context;
pub mod device;
mod error;
pub mod memory;
pub mod mock;
pub mod page_table;
pub mod registers;

pub use bar1::Bar1;
pub use bar1::MapOutcome;
pub use config::Bar1Config;
pub use config::Config;
pub use config::DeviceConfig;
pub use context::Command;
pub use context::Context;
pub use context::ShadowPageTable;
pub use device::AccessSize;
pub use device::BarAccess;
pub use device::DeviceState;
pub use device::GpuDevice;
pub use error::Error;
pub use error::Result;
