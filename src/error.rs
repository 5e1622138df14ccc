// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;

use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("context {0} is not acquired")]
    ContextNotAcquired(u32),
    #[error("context {context} is beyond the {max} slots of the aperture")]
    ContextOutOfRange { context: u32, max: u32 },
    #[error("{0}-byte accesses are not supported")]
    InvalidAccessSize(usize),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("offset {offset:#x} is out of bounds for a {size:#x}-byte gpu memory object")]
    MemoryOutOfBounds { offset: u64, size: u64 },
    #[error("mapping address {virt:#x} is not aligned to {align:#x}")]
    MisalignedMapping { virt: u64, align: u64 },
    #[error("all {0} context slots are in use")]
    NoFreeContext(u32),
    #[error("offset {offset:#x} is outside the poll area of context {context}")]
    OutsidePollArea { context: u32, offset: u64 },
    #[error("failed to parse config: {0}")]
    ParseConfig(serde_json::Error),
    #[error("failed to read config file: {0}")]
    ReadConfig(io::Error),
    #[error("timed out waiting on {name} ({offset:#08x}), last read {last:#010x}")]
    RegisterTimeout {
        name: &'static str,
        offset: u32,
        last: u32,
    },
    #[error("failed to allocate gpu memory: {0}")]
    VramAllocation(resources::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
