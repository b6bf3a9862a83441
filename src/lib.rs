// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs, unsafe_code)]

mod macros;
mod result;
mod sync;
mod task;
mod thread_pool;
mod worker;

pub use result::TaskResult;
pub use task::{Task, TaskValue, ValueError};
pub use thread_pool::{
    CpuPinningPolicy, PoolError, PoolMode, ThreadPool, ThreadPoolBuilder, WorkerCount,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_CEILING,
};
