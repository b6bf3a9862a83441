// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Demo of an elastic pool: a burst of slow tasks makes a cached pool grow
//! beyond its initial worker count, and idleness shrinks it back.
//!
//! Run with `RUST_LOG=debug` and the `log` feature to watch workers come and
//! go.

use std::time::Duration;
use workpool::{PoolMode, ThreadPoolBuilder, WorkerCount};

fn main() {
    env_logger::init();

    let pool = ThreadPoolBuilder {
        mode: PoolMode::Cached,
        worker_ceiling: 4,
        idle_timeout: Duration::from_secs(2),
        ..Default::default()
    }
    .build();
    pool.start(WorkerCount::try_from(2).unwrap())
        .expect("Starting the pool failed");
    println!("initial workers: {}", pool.worker_count());

    let results = (0..8u64)
        .map(|i| {
            pool.submit(move || {
                std::thread::sleep(Duration::from_secs(1));
                i * 10
            })
            .expect("Submitting a task failed")
        })
        .collect::<Vec<_>>();
    println!("workers after the burst: {}", pool.worker_count());

    for result in results {
        let value = result
            .get_as::<u64>()
            .expect("Retrieving a task output failed");
        println!("task output: {value}");
    }

    std::thread::sleep(Duration::from_secs(5));
    println!("workers after the idle period: {}", pool.worker_count());
}
