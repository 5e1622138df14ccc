// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::sync::TryLockError;

static MUTEX_POISONED: &str = "mutex is poisoned";

/// A mutual exclusion lock around `T`.
#[derive(Default)]
pub struct Mutex<T: ?Sized> {
    std: StdMutex<T>,
}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex holding `value`.
    pub const fn new(value: T) -> Mutex<T> {
        Mutex {
            std: StdMutex::new(value),
        }
    }

    /// Consumes the mutex and returns the protected value.
    pub fn into_inner(self) -> T {
        self.std.into_inner().expect(MUTEX_POISONED)
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Blocks until the lock is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.std.lock().expect(MUTEX_POISONED)
    }

    /// Acquires the lock only if nobody else holds it.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        match self.std.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(_)) => panic!("{}", MUTEX_POISONED),
            Err(TryLockError::WouldBlock) => Err(WouldBlock),
        }
    }

    /// Mutable access without locking; the borrow checker proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.std.get_mut().expect(MUTEX_POISONED)
    }
}

impl<T: ?Sized + Debug> Debug for Mutex<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(&self.std, formatter)
    }
}

/// Returned by `try_lock` when the lock is already held.
#[derive(Debug)]
pub struct WouldBlock;

impl Display for WouldBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "lock is held by another thread")
    }
}

impl std::error::Error for WouldBlock {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn lock_and_into_inner() {
        let mutex = Mutex::new(1u32);
        *mutex.lock() += 1;
        assert_eq!(mutex.into_inner(), 2);
    }

    #[test]
    fn try_lock_while_held() {
        let mutex = Mutex::new(());
        let _guard = mutex.lock();
        assert!(mutex.try_lock().is_err());
    }

    #[test]
    fn shared_across_threads() {
        let mutex = Arc::new(Mutex::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*mutex.lock(), 4000);
    }
}
