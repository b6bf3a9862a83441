// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Units of work submitted to a pool, and the type-erased values they produce.

use crate::macros::log_error;
use crate::result::ResultSink;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Error returned when extracting a concrete type out of a [`TaskValue`]
/// fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The value is empty: the task never ran, or didn't produce an output.
    #[error("the value is empty")]
    Empty,
    /// The stored value is of a different type than the requested one.
    #[error("the stored value is not of type {requested}")]
    TypeMismatch {
        /// Name of the type the caller asked for.
        requested: &'static str,
    },
}

/// A type-erased value produced by a [`Task`].
///
/// Heterogeneous tasks share one queue, so their outputs are stored behind a
/// uniform handle and recovered with a checked cast:
/// [`downcast()`](Self::downcast) reports a [`ValueError::TypeMismatch`]
/// instead of returning garbage.
pub struct TaskValue {
    inner: Option<Box<dyn Any + Send>>,
}

impl TaskValue {
    /// Wraps the given value.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            inner: Some(Box::new(value)),
        }
    }

    /// Creates an empty value, standing in for the output of a task that
    /// never ran.
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// Returns whether this value holds an output.
    pub fn is_some(&self) -> bool {
        self.inner.is_some()
    }

    /// Extracts the stored value as the given type.
    pub fn downcast<T: 'static>(self) -> Result<T, ValueError> {
        match self.inner {
            None => Err(ValueError::Empty),
            Some(boxed) => boxed.downcast::<T>().map(|value| *value).map_err(|_| {
                ValueError::TypeMismatch {
                    requested: std::any::type_name::<T>(),
                }
            }),
        }
    }
}

impl std::fmt::Debug for TaskValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(_) => f.write_str("TaskValue(..)"),
            None => f.write_str("TaskValue(empty)"),
        }
    }
}

/// A polymorphic unit of work.
///
/// Implement this to submit heterogeneous tasks via
/// [`ThreadPool::submit_task()`](crate::ThreadPool::submit_task); plain
/// closures go through [`ThreadPool::submit()`](crate::ThreadPool::submit)
/// instead.
pub trait Task: Send {
    /// Runs the task, producing its output.
    ///
    /// Called at most once per task, by the worker thread that dequeued it.
    fn run(&mut self) -> TaskValue;
}

/// Adapter running a closure as a [`Task`].
pub(crate) struct FnTask<F> {
    f: Option<F>,
}

impl<F> FnTask<F> {
    pub fn new(f: F) -> Self {
        Self { f: Some(f) }
    }
}

impl<T, F> Task for FnTask<F>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send,
{
    fn run(&mut self) -> TaskValue {
        match self.f.take() {
            Some(f) => TaskValue::new(f()),
            None => TaskValue::none(),
        }
    }
}

/// A task bound to the sink of its result handle, as stored in the pool's
/// queue.
///
/// The pair is created at submission time and consumed as a unit, so a queued
/// task always has exactly one fulfillment target.
pub(crate) struct QueuedTask {
    task: Box<dyn Task>,
    sink: ResultSink,
}

impl QueuedTask {
    pub fn new(task: Box<dyn Task>, sink: ResultSink) -> Self {
        Self { task, sink }
    }

    /// Runs the task and hands its output to the bound result handle.
    ///
    /// A panicking task is contained here: the sink then resolves the handle
    /// to an empty value, so the submitter never blocks forever and the
    /// worker thread survives.
    pub fn execute(mut self) {
        match catch_unwind(AssertUnwindSafe(|| self.task.run())) {
            Ok(value) => self.sink.fulfill(value),
            Err(_) => {
                log_error!("[pool] A task panicked! Resolving its handle to an empty value.");
                drop(self.sink);
            }
        }
    }
}
