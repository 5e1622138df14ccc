// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Lock types that panic on poison instead of returning an error.
//!
//! A panic while the device lock is held leaves GPU state half-programmed, and the hypervisor is
//! built with `panic = "abort"`, so callers never have to handle a poisoned lock.

mod mutex;

pub use crate::mutex::Mutex;
pub use crate::mutex::WouldBlock;
