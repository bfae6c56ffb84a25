//! Filling the key space before measurement.
//!
//! Population is skipped when the store already holds at least half of the key space, unless it
//! is forced. Otherwise every key `k:0` to `k:<n_keys - 1>` is written with the run's payload, in
//! pipelined batches.
//!
//! A store running at its memory limit with a no-eviction policy rejects writes. When a batch is
//! rejected, its keys are retried one by one until the first rejection. If not a single key of
//! the batch made it, the store is considered full and population stops. Population never fails
//! a run: the measured phase has to cope with whatever was written.
//!
//! Raising the run's stop flag (Ctrl-C) ends population after the batch in flight.

use crate::workload::{key_of, payload, WorkloadConfig};
use crate::{KVStoreHandle, Operation, StoreError};
use log::{debug, info, warn};
use quanta::Instant;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Number of writes sent per pipelined batch when none is configured.
pub const DEFAULT_BATCH: usize = 1000;

/// Options of the population phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulateOpt {
    /// Write every key, even if the store looks warm.
    pub force: bool,
    /// Writes per pipelined batch.
    pub batch: usize,
}

impl Default for PopulateOpt {
    fn default() -> Self {
        Self {
            force: false,
            batch: DEFAULT_BATCH,
        }
    }
}

/// What happened to a failed batch after the per-key retry.
enum Fallback {
    /// At least one key was written.
    Progress(usize),
    /// Not a single key could be written; the store is full.
    Exhausted,
}

fn needs_populate(handle: &mut dyn KVStoreHandle, n_keys: usize, force: bool) -> bool {
    if force {
        return true;
    }
    match handle.dbsize() {
        Ok(size) => {
            debug!("Store holds {} keys, key space is {}", size, n_keys);
            size < (n_keys / 2) as u64
        }
        Err(e) => {
            warn!("Cannot probe key count, populating anyway: {}", e);
            true
        }
    }
}

fn retry_one_by_one(handle: &mut dyn KVStoreHandle, batch: &[Operation]) -> Fallback {
    let mut filled = 0;
    for op in batch {
        match op.apply(handle) {
            Ok(()) => filled += 1,
            Err(e) => {
                debug!("Single write rejected after {} keys: {}", filled, e);
                break;
            }
        }
    }
    match filled {
        0 => Fallback::Exhausted,
        n => Fallback::Progress(n),
    }
}

/// Populate the key space if needed. Returns the time spent writing, zero if skipped.
pub fn populate(
    handle: &mut dyn KVStoreHandle,
    workload: &WorkloadConfig,
    opt: &PopulateOpt,
    stop: &AtomicBool,
) -> Duration {
    let n_keys = workload.n_keys;
    if !needs_populate(handle, n_keys, opt.force) {
        info!("Store is warm, skipping population");
        return Duration::ZERO;
    }

    info!("Populating {} keys of {} bytes", n_keys, workload.value_size);
    let value = payload(workload.value_size);
    let nr_batch = opt.batch.max(1);
    let mut batch = Vec::<Operation>::with_capacity(nr_batch);
    let mut written = 0usize;
    let start = Instant::now();

    for i in 0..n_keys {
        if batch.is_empty() && stop.load(Ordering::Relaxed) {
            info!("Population interrupted after {} keys", written);
            break;
        }
        batch.push(Operation::Set {
            key: key_of(i),
            value: value.clone(),
        });
        if batch.len() < nr_batch {
            continue;
        }
        match handle.pipeline(&batch) {
            Ok(()) => written += batch.len(),
            Err(StoreError::Capacity) => match retry_one_by_one(handle, &batch) {
                Fallback::Progress(n) => written += n,
                Fallback::Exhausted => {
                    info!("Store is full after {} keys, stopping population", written);
                    batch.clear();
                    break;
                }
            },
            Err(e) => warn!("Population batch ending at key {} failed: {}", i, e),
        }
        batch.clear();
    }

    if !batch.is_empty() {
        match handle.pipeline(&batch) {
            Ok(()) => written += batch.len(),
            Err(StoreError::Capacity) => debug!("Last population batch rejected, store is full"),
            Err(e) => warn!("Last population batch failed: {}", e),
        }
    }

    let elapsed = start.elapsed();
    info!(
        "Population done: {} keys written in {:.2}s",
        written,
        elapsed.as_secs_f64()
    );
    elapsed
}
