// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives

use std::sync::{Condvar, Mutex, MutexGuard};

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
pub(crate) struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Applies the given update to the status and notifies one waiting thread.
    pub fn update_notify_one(&self, f: impl FnOnce(&mut T)) {
        let mut locked = self.mutex.lock().unwrap();
        f(&mut locked);
        self.condvar.notify_one();
    }

    /// Waits until the predicate is false on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify
    /// the status.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<T> {
        self.condvar
            .wait_while(self.mutex.lock().unwrap(), predicate)
            .unwrap()
    }
}

/// A counting semaphore: a blocking resource counter.
///
/// [`acquire()`](Self::acquire) blocks while the count is zero, then
/// decrements it; [`release()`](Self::release) increments the count and wakes
/// one waiter.
pub(crate) struct Semaphore {
    count: Status<usize>,
}

impl Semaphore {
    /// Creates a semaphore with the given initial resource count.
    pub fn new(count: usize) -> Self {
        Self {
            count: Status::new(count),
        }
    }

    /// Blocks until a resource is available, then consumes it.
    pub fn acquire(&self) {
        let mut guard = self.count.wait_while(|count| *count == 0);
        *guard -= 1;
    }

    /// Makes one resource available, waking one blocked waiter.
    pub fn release(&self) {
        self.count.update_notify_one(|count| *count += 1);
    }
}
