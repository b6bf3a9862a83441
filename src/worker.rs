// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker identities and registry entries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

/// Process-wide counter backing worker id allocation.
static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(0);

/// Allocates a process-unique, monotonically increasing worker id.
pub(crate) fn next_worker_id() -> usize {
    NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Registry entry for one worker thread.
///
/// The pool's registry is the sole owner of the running thread's handle:
/// workers are joined during shutdown, never detached. A worker that exits on
/// its own (idle reap) takes its handle out of the registry and parks it for
/// shutdown to join, since a thread cannot join itself.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(id: usize, handle: JoinHandle<()>) -> Self {
        Self {
            id,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn take_handle(&mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }
}
