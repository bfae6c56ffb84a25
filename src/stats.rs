//! Reduction of raw measurements into a report.
//!
//! ## Output Format
//!
//! A [`RunReport`] serializes into a single JSON object:
//!
//! ```txt
//! {"stats":{"host":"127.0.0.1","port":6379,"db":0,"n_keys":200000,"value_size":1024,
//!  "read_p":0.8,"distribution":"zipfian","duration_s":60.0,"pipeline":1,"threads":1,
//!  "ops":1234567,"samples":1234567,"rejected":0,"failed":0,"throughput":20576.1,
//!  "p50_ms":0.04,"p95_ms":0.07,"p99_ms":0.11,"min_ms":0.02,"max_ms":3.1,"avg_ms":0.05,
//!  "warmup_sec":2.5,"elapsed_sec":60.0,"ts":1700000000},
//!  "info_before":{...},"info_after":{...},"deltas":{...},
//!  "hit_ratio":0.93,"hits":987654,"misses":74321}
//! ```
//!
//! Where:
//!
//! - `ops`: logical operations attempted, including rejected ones.
//! - `samples`: latency samples. Equal to `ops` without pipelining; with pipelining, one sample
//! is taken per completed batch.
//! - `rejected`/`failed`: round trips that ended in an over-capacity rejection or in any other
//! failure.
//! - `info_before`/`info_after`: store counters ([`StoreSnapshot`]) right before and right after
//! the measured window, and `deltas` their difference.
//! - `hit_ratio`, `hits`, `misses`: computed from the deltas, so they only cover the window.
//!
//! When `cdf` is enabled, a `cdf` array of `{"ms": <latency>, "percentile": <0-100>}` points is
//! appended.

use crate::bench::RunConfig;
use crate::workload::KeyDistribution;
use crate::StoreResult;
use hdrhistogram::Histogram;
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Granularity of the latency CDF, in microseconds.
const CDF_STEP_US: u64 = 100;

/// A point-in-time read of the store's cumulative counters.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    pub evicted_keys: u64,
    pub expired_keys: u64,
    pub used_memory: u64,
}

/// Field-wise `after - before` of two [`StoreSnapshot`]s. Signed, because memory usage can
/// shrink and counters can be reset under our feet.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotDelta {
    pub keyspace_hits: i64,
    pub keyspace_misses: i64,
    pub evicted_keys: i64,
    pub expired_keys: i64,
    pub used_memory: i64,
}

fn diff(after: u64, before: u64) -> i64 {
    (after as i128 - before as i128) as i64
}

impl StoreSnapshot {
    pub fn since(&self, before: &StoreSnapshot) -> SnapshotDelta {
        SnapshotDelta {
            keyspace_hits: diff(self.keyspace_hits, before.keyspace_hits),
            keyspace_misses: diff(self.keyspace_misses, before.keyspace_misses),
            evicted_keys: diff(self.evicted_keys, before.evicted_keys),
            expired_keys: diff(self.expired_keys, before.expired_keys),
            used_memory: diff(self.used_memory, before.used_memory),
        }
    }
}

impl SnapshotDelta {
    /// `hits / (hits + misses)` over the window, or 0 if there was no lookup at all.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.keyspace_hits + self.keyspace_misses;
        if total > 0 {
            self.keyspace_hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Percentile of an ascending sequence, with linear interpolation between the two closest
/// order statistics. `p` is within `[0, 1]`. An empty sequence yields 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let k = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let f = k.floor();
    let c = k.ceil();
    if f == c {
        return sorted[k as usize];
    }
    sorted[f as usize] * (c - k) + sorted[c as usize] * (k - f)
}

/// How a single round trip to the store ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    RejectedCapacity,
    Failed,
}

impl<T> From<&StoreResult<T>> for Outcome {
    fn from(result: &StoreResult<T>) -> Self {
        match result {
            Ok(_) => Outcome::Ok,
            Err(crate::StoreError::Capacity) => Outcome::RejectedCapacity,
            Err(crate::StoreError::Other(_)) => Outcome::Failed,
        }
    }
}

/// Latency samples of one worker, in milliseconds, in completion order.
#[derive(Debug, Default, Clone)]
pub struct Latency {
    samples: Vec<f64>,
}

impl Latency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, duration: Duration) {
        self.samples.push(duration.as_secs_f64() * 1000.0);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn merge(&mut self, other: Latency) {
        self.samples.extend(other.samples);
    }

    /// Consume the samples, ascending.
    pub fn into_sorted(self) -> Vec<f64> {
        let mut samples = self.samples;
        samples.sort_unstable_by(|a, b| a.total_cmp(b));
        samples
    }
}

/// What a worker observed during the measured window.
#[derive(Debug, Default)]
pub struct Measurement {
    /// Logical operations attempted. Every queued operation of a batch counts.
    pub ops: u64,

    /// One sample per solo operation or per flushed batch.
    pub latency: Latency,

    /// Round trips rejected for capacity.
    pub rejected: u64,

    /// Round trips failed for any other reason.
    pub failed: u64,
}

impl Measurement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account a completed round trip, successful or not.
    pub fn record(&mut self, duration: Duration, outcome: Outcome) {
        self.latency.record(duration);
        self.tally(outcome);
    }

    /// Account the outcome of a round trip that does not get a latency sample.
    pub fn tally(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Ok => {}
            Outcome::RejectedCapacity => self.rejected += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: Measurement) {
        self.ops += other.ops;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.latency.merge(other.latency);
    }
}

/// Percentile statistics of a sorted latency sequence, in milliseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl LatencySummary {
    pub fn new(sorted: &[f64]) -> Self {
        if sorted.is_empty() {
            return Self::default();
        }
        Self {
            p50: percentile(sorted, 0.50),
            p95: percentile(sorted, 0.95),
            p99: percentile(sorted, 0.99),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg: sorted.iter().sum::<f64>() / sorted.len() as f64,
        }
    }
}

/// A point of the latency CDF.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CdfPoint {
    /// Upper bound of the bucket, in milliseconds.
    pub ms: f64,
    /// Percentage of samples at or below `ms`, from 0 to 100.
    pub percentile: f64,
}

/// Bucket the samples into an HDR histogram and walk it linearly.
pub fn cdf(sorted: &[f64]) -> Vec<CdfPoint> {
    let mut points = Vec::new();
    if sorted.is_empty() {
        return points;
    }
    let mut hdr = match Histogram::<u64>::new(3) {
        Ok(hdr) => hdr,
        Err(e) => {
            warn!("Cannot create latency histogram: {}", e);
            return points;
        }
    };
    for ms in sorted {
        let us = (ms * 1000.0).round() as u64;
        if let Err(e) = hdr.record(us) {
            warn!("Cannot record latency {} ms into histogram: {}", ms, e);
        }
    }
    let total = hdr.len();
    let mut acc = 0u64;
    for v in hdr.iter_linear(CDF_STEP_US) {
        acc += v.count_since_last_iteration();
        points.push(CdfPoint {
            ms: (v.value_iterated_to() + 1) as f64 / 1000.0,
            percentile: acc as f64 * 100.0 / total as f64,
        });
        if acc >= total {
            break;
        }
    }
    points
}

/// The run-level figures of a report. Configuration is echoed so that a report is
/// self-describing.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunStats {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub n_keys: usize,
    pub value_size: usize,
    pub read_p: f64,
    pub distribution: KeyDistribution,
    /// Wall-clock budget in seconds, `null` for operation-count runs.
    pub duration_s: Option<f64>,
    pub pipeline: usize,
    pub threads: usize,
    pub ops: u64,
    pub samples: usize,
    pub rejected: u64,
    pub failed: u64,
    /// Operations per second over the measured window.
    pub throughput: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub warmup_sec: f64,
    pub elapsed_sec: f64,
    /// Unix timestamp of report creation, in seconds.
    pub ts: u64,
}

/// The terminal artifact of a run.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    pub stats: RunStats,
    pub info_before: StoreSnapshot,
    pub info_after: StoreSnapshot,
    pub deltas: SnapshotDelta,
    pub hit_ratio: f64,
    pub hits: i64,
    pub misses: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdf: Option<Vec<CdfPoint>>,
}

impl RunReport {
    pub fn new(
        config: &RunConfig,
        measurement: Measurement,
        warmup: Duration,
        elapsed: Duration,
        before: StoreSnapshot,
        after: StoreSnapshot,
    ) -> Self {
        let Measurement {
            ops,
            latency,
            rejected,
            failed,
        } = measurement;
        let sorted = latency.into_sorted();
        let summary = LatencySummary::new(&sorted);
        let deltas = after.since(&before);
        let elapsed_sec = elapsed.as_secs_f64();
        let throughput = if elapsed_sec > 0.0 {
            ops as f64 / elapsed_sec
        } else {
            0.0
        };
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let stats = RunStats {
            host: config.store.host.clone(),
            port: config.store.port,
            db: config.store.db,
            n_keys: config.workload.n_keys,
            value_size: config.workload.value_size,
            read_p: config.workload.read_p,
            distribution: config.workload.distribution,
            duration_s: config.duration().map(|d| d.as_secs_f64()),
            pipeline: config.pipeline,
            threads: config.threads,
            ops,
            samples: sorted.len(),
            rejected,
            failed,
            throughput,
            p50_ms: summary.p50,
            p95_ms: summary.p95,
            p99_ms: summary.p99,
            min_ms: summary.min,
            max_ms: summary.max,
            avg_ms: summary.avg,
            warmup_sec: warmup.as_secs_f64(),
            elapsed_sec,
            ts,
        };
        let cdf = match config.cdf {
            true => Some(cdf(&sorted)),
            false => None,
        };
        Self {
            stats,
            info_before: before,
            info_after: after,
            deltas,
            hit_ratio: deltas.hit_ratio(),
            hits: deltas.keyspace_hits,
            misses: deltas.keyspace_misses,
            cdf,
        }
    }
}
