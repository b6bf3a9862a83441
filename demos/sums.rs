// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that computes the sum of an integer range by splitting it
//! into partial sums submitted to a fixed pool.

use workpool::{PoolMode, ThreadPoolBuilder, WorkerCount};

const NUM_TASKS: u64 = 4;
const RANGE_END: u64 = 100_000_000;

fn main() {
    env_logger::init();

    let pool = ThreadPoolBuilder {
        mode: PoolMode::Fixed,
        ..Default::default()
    }
    .build();
    pool.start(WorkerCount::AvailableParallelism)
        .expect("Starting the pool failed");

    let chunk = RANGE_END / NUM_TASKS;
    let results = (0..NUM_TASKS)
        .map(|i| {
            let start = i * chunk + 1;
            let end = if i == NUM_TASKS - 1 {
                RANGE_END
            } else {
                (i + 1) * chunk
            };
            pool.submit(move || (start..=end).sum::<u64>())
                .expect("Submitting a task failed")
        })
        .collect::<Vec<_>>();

    let sum = results
        .into_iter()
        .map(|result| {
            result
                .get_as::<u64>()
                .expect("Retrieving a partial sum failed")
        })
        .sum::<u64>();
    println!("sum = {sum}");
}
