// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Result handles: a one-shot handoff between a task and its submitter,
//! across threads.

use crate::sync::Semaphore;
use crate::task::{TaskValue, ValueError};
use std::sync::{Arc, Mutex};

/// State shared between a [`TaskResult`] and its [`ResultSink`].
struct Shared {
    /// Signals "the value is ready". Initialized at zero; released exactly
    /// once, when the sink resolves.
    ready: Semaphore,
    /// Slot for the produced value.
    value: Mutex<Option<TaskValue>>,
}

/// Creates the two halves of a result handoff: the sink travels with the task
/// through the queue, the result stays with the submitter.
pub(crate) fn result_channel() -> (ResultSink, TaskResult) {
    let shared = Arc::new(Shared {
        ready: Semaphore::new(0),
        value: Mutex::new(None),
    });
    (
        ResultSink {
            shared: Some(shared.clone()),
        },
        TaskResult {
            shared: Some(shared),
        },
    )
}

/// The producing half of a result handoff, owned by the queued task.
///
/// [`fulfill()`](Self::fulfill) consumes the sink, so a result can never be
/// fulfilled twice. A sink dropped without fulfilling (e.g. because the task
/// panicked) resolves the handle to an empty value, so the submitter doesn't
/// block forever.
pub(crate) struct ResultSink {
    shared: Option<Arc<Shared>>,
}

impl ResultSink {
    /// Stores the task's output and wakes the submitter.
    pub fn fulfill(mut self, value: TaskValue) {
        self.resolve(value);
    }

    fn resolve(&mut self, value: TaskValue) {
        if let Some(shared) = self.shared.take() {
            *shared.value.lock().unwrap() = Some(value);
            shared.ready.release();
        }
    }
}

impl Drop for ResultSink {
    fn drop(&mut self) {
        self.resolve(TaskValue::none());
    }
}

/// A handle to the future output of a submitted task, fulfilled exactly once
/// by the worker that executed it.
///
/// A handle is *invalid* when the pool rejected the submission under
/// backpressure: the task never runs, and [`get()`](Self::get) returns an
/// empty [`TaskValue`] immediately instead of blocking.
#[must_use = "dropping a TaskResult discards the task's output"]
pub struct TaskResult {
    shared: Option<Arc<Shared>>,
}

impl TaskResult {
    /// Creates a handle for a rejected submission.
    pub(crate) fn invalid() -> Self {
        Self { shared: None }
    }

    /// Returns whether the associated task was accepted by the pool.
    pub fn is_valid(&self) -> bool {
        self.shared.is_some()
    }

    /// Retrieves the task's output, blocking until the task has run.
    ///
    /// On an invalid handle this returns an empty value without blocking.
    pub fn get(self) -> TaskValue {
        match self.shared {
            None => TaskValue::none(),
            Some(shared) => {
                shared.ready.acquire();
                shared
                    .value
                    .lock()
                    .unwrap()
                    .take()
                    .unwrap_or_else(TaskValue::none)
            }
        }
    }

    /// Retrieves the task's output as the given type.
    ///
    /// Blocks like [`get()`](Self::get); fails with a [`ValueError`] if the
    /// handle is invalid or the output is of a different type.
    pub fn get_as<T: 'static>(self) -> Result<T, ValueError> {
        self.get().downcast()
    }
}
