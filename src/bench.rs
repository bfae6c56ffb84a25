//! The core benchmark functionality.
//!
//! A run has three phases: population (see [`mod@crate::populate`]), the measured window, and
//! the reduction into a [`RunReport`]. The store's counters are read right before and right after
//! the measured window, so the deltas in the report cover exactly the traffic generated here
//! (plus whatever else the store was serving at the same time).
//!
//! ## Configuration Format
//!
//! A run is configured in TOML, with a `[store]` section (see [`mod@crate::stores`]) and a
//! `[benchmark]` section:
//!
//! ```toml
//! [store]
//! name = "redis"
//! host = "127.0.0.1"
//! port = 6379
//!
//! [benchmark]
//! n_keys = 200000
//! value_size = 1024
//! read_p = 0.8
//! distribution = "zipfian"
//! duration = 60.0
//! pipeline = 1
//! ```
//!
//! Available options and their usage can be found in [`BenchmarkOpt`] and
//! [`crate::workload::WorkloadOpt`] (whose fields go directly in `[benchmark]`).
//!
//! Every option can be overridden via environment variables without changing the TOML file.
//! Variables are prefixed with `KVLOAD_` and nested with `__`: for example,
//! `KVLOAD_BENCHMARK__PIPELINE=16` overrides `pipeline` in `[benchmark]`.
//!
//! ## Measurement
//!
//! Without pipelining, every operation is timed on its own, from right before it is sent to
//! right after its reply is read. With a pipeline depth of `n`, operations are queued, and every
//! `n` operations the batch is sent in one round trip; the batch gets a single latency sample,
//! taken from right before its first operation was queued to right after the last reply. The
//! operation count still counts every queued operation.
//!
//! Rejected or failed operations are timed and counted like successful ones.

use crate::populate::{populate, PopulateOpt, DEFAULT_BATCH};
use crate::stats::{Measurement, Outcome, RunReport};
use crate::stores::{StoreConfig, StoreOpt};
use crate::workload::{Workload, WorkloadConfig, WorkloadOpt};
use crate::*;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use log::{debug, info, warn};
use quanta::Instant;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Prefix of environment variables that override the configuration.
pub const ENV_PREFIX: &str = "KVLOAD_";

/// Length determines when the measured window ends.
#[derive(Clone, Debug, PartialEq)]
pub enum Length {
    /// All workers stop at the same deadline.
    Timeout(Duration),
    /// Each worker stops after a number of operations.
    Count(u64),
}

/// The `[benchmark]` section, deserialized from TOML.
///
/// The fields are optional to ease layering configuration sources; defaults are applied in
/// [`RunConfig::new`].
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct BenchmarkOpt {
    /// How long the measured window lasts, in seconds. Cannot be given together with `ops`.
    ///
    /// Default: 60, if `ops` is not given either.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// How many operations each worker executes, instead of a deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ops: Option<u64>,

    /// Pipeline depth. 1 sends every operation on its own.
    ///
    /// Default: 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<usize>,

    /// Number of workers, each with its own connection.
    ///
    /// Default: 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,

    /// Populate the key space even if the store already looks warm.
    ///
    /// Default: false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_populate: Option<bool>,

    /// Writes per pipelined batch during population.
    ///
    /// Default: 1000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub populate_batch: Option<usize>,

    /// Seed of the random number generators. Worker `i` uses `seed + i`. Random if not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Whether or not to include the latency CDF in the report.
    ///
    /// Default: false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdf: Option<bool>,

    /// The definition of the workload.
    ///
    /// This section is embedded and flattened, so that you can directly use options in
    /// [`WorkloadOpt`].
    #[serde(flatten)]
    pub workload: WorkloadOpt,
}

/// A whole configuration file.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RunOpt {
    #[serde(default)]
    pub store: StoreOpt,
    #[serde(default)]
    pub benchmark: BenchmarkOpt,
}

/// The validated configuration of a run. Created once, never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub store: StoreConfig,
    pub workload: WorkloadConfig,
    pub len: Length,
    pub pipeline: usize,
    pub threads: usize,
    pub populate: PopulateOpt,
    pub seed: Option<u64>,
    pub cdf: bool,
}

impl RunConfig {
    pub fn new(opt: &RunOpt) -> Result<Self, Error> {
        let b = &opt.benchmark;
        let len = match (b.duration, b.ops) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "duration and ops cannot be provided at the same time".into(),
                ))
            }
            (Some(d), None) => {
                let d = Duration::try_from_secs_f64(d).map_err(|e| {
                    Error::Config(format!(
                        "duration should be a non-negative number of seconds within range, got {}: {}",
                        d, e
                    ))
                })?;
                Length::Timeout(d)
            }
            (None, Some(c)) => Length::Count(c),
            (None, None) => Length::Timeout(Duration::from_secs(60)),
        };
        let pipeline = b.pipeline.unwrap_or(1);
        if pipeline == 0 {
            return Err(Error::Config("pipeline should be positive".into()));
        }
        let threads = b.threads.unwrap_or(1);
        if threads == 0 {
            return Err(Error::Config("threads should be positive".into()));
        }
        let batch = b.populate_batch.unwrap_or(DEFAULT_BATCH);
        if batch == 0 {
            return Err(Error::Config("populate_batch should be positive".into()));
        }
        Ok(Self {
            store: opt.store.resolve(),
            workload: b.workload.resolve()?,
            len,
            pipeline,
            threads,
            populate: PopulateOpt {
                force: b.force_populate.unwrap_or(false),
                batch,
            },
            seed: b.seed,
            cdf: b.cdf.unwrap_or(false),
        })
    }

    /// The wall-clock budget, if the run is time-limited.
    pub fn duration(&self) -> Option<Duration> {
        match self.len {
            Length::Timeout(d) => Some(d),
            Length::Count(_) => None,
        }
    }
}

/// The configuration sources, in increasing priority: the TOML text, then the environment.
pub fn figment(text: &str) -> Figment {
    Figment::new()
        .merge(Toml::string(text))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Extract and validate the configuration, and create the store it names.
pub fn init(figment: &Figment) -> Result<(Arc<dyn KVStore>, RunConfig), Error> {
    let opt: RunOpt = figment.extract()?;
    debug!("Creating run with the following options: {:?}", opt);
    let config = RunConfig::new(&opt)?;
    debug!("Resolved configuration: {:?}", config);
    let store = stores::open(&config.store)?;
    Ok((store, config))
}

fn bench_should_break(len: &Length, count: u64, start: &Instant, stop: &AtomicBool) -> bool {
    if stop.load(Ordering::Relaxed) {
        return true;
    }
    match len {
        Length::Count(c) => count >= *c,
        Length::Timeout(duration) => Instant::now().duration_since(*start) >= *duration,
    }
}

/// Everything a worker needs besides its connection.
pub struct WorkerContext<'a> {
    pub config: &'a RunConfig,

    /// The beginning of the measured window, shared by all workers
    pub start: Instant,

    /// Raised to end the window early
    pub stop: &'a AtomicBool,

    /// `(worker_id, nr_workers)` pair
    pub thread_info: (usize, usize),
}

fn bench_worker_solo(
    handle: &mut dyn KVStoreHandle,
    context: &WorkerContext,
    workload: &mut Workload,
    rng: &mut impl Rng,
) -> Measurement {
    let WorkerContext {
        config,
        start,
        stop,
        ..
    } = context;
    let mut measurement = Measurement::new();
    loop {
        if bench_should_break(&config.len, measurement.ops, start, stop) {
            break;
        }
        let op = workload.next(rng);
        let op_start = Instant::now();
        let result = op.apply(handle);
        measurement.record(op_start.elapsed(), Outcome::from(&result));
        measurement.ops += 1;
        if let Err(StoreError::Other(e)) = result {
            debug!("Operation failed: {}", e);
        }
    }
    measurement
}

fn bench_worker_pipelined(
    handle: &mut dyn KVStoreHandle,
    context: &WorkerContext,
    workload: &mut Workload,
    rng: &mut impl Rng,
) -> Measurement {
    let WorkerContext {
        config,
        start,
        stop,
        ..
    } = context;
    let depth = config.pipeline;
    let mut measurement = Measurement::new();
    let mut batch = Vec::<Operation>::with_capacity(depth);
    let mut batch_start = Instant::now();
    loop {
        if bench_should_break(&config.len, measurement.ops, start, stop) {
            break;
        }
        let op = workload.next(rng);
        if batch.is_empty() {
            batch_start = Instant::now();
        }
        batch.push(op);
        // every queued operation counts, even though the batch gets a single sample
        measurement.ops += 1;
        if batch.len() >= depth {
            let result = handle.pipeline(&batch);
            measurement.record(batch_start.elapsed(), Outcome::from(&result));
            if let Err(StoreError::Other(e)) = result {
                debug!("Batch failed: {}", e);
            }
            batch.clear();
        }
    }

    // the partial batch is sent but not timed
    if !batch.is_empty() {
        let result = handle.pipeline(&batch);
        measurement.tally(Outcome::from(&result));
        match result {
            Ok(()) => {}
            Err(StoreError::Capacity) => debug!("Last batch rejected, store is full"),
            Err(e) => debug!("Last batch failed: {}", e),
        }
    }
    measurement
}

/// Run the measured window on one connection.
pub fn bench_worker(handle: &mut dyn KVStoreHandle, context: &WorkerContext) -> Measurement {
    let config = context.config;
    let (id, _) = context.thread_info;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
        None => StdRng::from_os_rng(),
    };
    let mut workload = Workload::new(&config.workload, Some(context.thread_info));
    let measurement = match config.pipeline {
        1 => bench_worker_solo(handle, context, &mut workload, &mut rng),
        _ => bench_worker_pipelined(handle, context, &mut workload, &mut rng),
    };
    debug!(
        "Worker {} done: {} ops, {} samples",
        id,
        measurement.ops,
        measurement.latency.len()
    );
    measurement
}

/// Run the measured window on all connections at once, and merge what the workers saw.
pub fn bench_phase(
    handles: &mut [Box<dyn KVStoreHandle>],
    config: &RunConfig,
    start: Instant,
    stop: &AtomicBool,
) -> Measurement {
    let nr_threads = handles.len();
    let mut measurement = Measurement::new();
    if nr_threads == 1 {
        let context = WorkerContext {
            config,
            start,
            stop,
            thread_info: (0, 1),
        };
        measurement.merge(bench_worker(&mut *handles[0], &context));
        return measurement;
    }
    std::thread::scope(|s| {
        let workers: Vec<_> = handles
            .iter_mut()
            .enumerate()
            .map(|(id, handle)| {
                let context = WorkerContext {
                    config,
                    start,
                    stop,
                    thread_info: (id, nr_threads),
                };
                s.spawn(move || bench_worker(&mut **handle, &context))
            })
            .collect();
        for worker in workers {
            match worker.join() {
                Ok(m) => measurement.merge(m),
                Err(_) => warn!("A worker panicked, its measurement is lost"),
            }
        }
    });
    measurement
}

/// Open every connection and check that the store is alive.
fn connect(store: &dyn KVStore, nr: usize) -> Result<Vec<Box<dyn KVStoreHandle>>, Error> {
    let mut handles = Vec::with_capacity(nr);
    for _ in 0..nr {
        let mut handle = store.handle()?;
        handle
            .ping()
            .map_err(|e| Error::Unreachable(e.to_string()))?;
        handles.push(handle);
    }
    Ok(handles)
}

/// A whole run: populate, snapshot, measure, snapshot, reduce.
///
/// Only an unreachable store (or unreadable counters) is an error. Rejections and failures during
/// population and measurement end up in the report.
pub fn run(store: &dyn KVStore, config: &RunConfig, stop: &AtomicBool) -> Result<RunReport, Error> {
    let mut handles = connect(store, config.threads)?;
    info!("Connected to store with {} connection(s)", handles.len());

    let warmup = populate(&mut *handles[0], &config.workload, &config.populate, stop);

    let before = handles[0].info()?;
    info!(
        "Running {:?} with {} worker(s), pipeline depth {}, {} distribution",
        config.len, config.threads, config.pipeline, config.workload.distribution
    );
    let start = Instant::now();
    let measurement = bench_phase(&mut handles, config, start, stop);
    let elapsed = start.elapsed();
    let after = handles[0].info()?;

    info!(
        "Run done: {} ops in {:.2}s",
        measurement.ops,
        elapsed.as_secs_f64()
    );
    if measurement.rejected > 0 || measurement.failed > 0 {
        warn!(
            "{} round trip(s) rejected for capacity, {} failed",
            measurement.rejected, measurement.failed
        );
    }
    Ok(RunReport::new(
        config,
        measurement,
        warmup,
        elapsed,
        before,
        after,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::{MemoryStore, MemoryStoreOpt};
    use crate::workload::KeyDistribution;
    use std::sync::atomic::AtomicUsize;

    fn parse(text: &str) -> Result<RunConfig, Error> {
        let opt: RunOpt = Figment::new().merge(Toml::string(text)).extract()?;
        RunConfig::new(&opt)
    }

    fn memory_config(benchmark: &str) -> RunConfig {
        let text = format!("[store]\nname = \"memory\"\n\n[benchmark]\n{}", benchmark);
        parse(&text).unwrap()
    }

    fn measure(store: &MemoryStore, config: &RunConfig) -> Measurement {
        let mut handles = connect(store, config.threads).unwrap();
        let stop = AtomicBool::new(false);
        bench_phase(&mut handles, config, Instant::now(), &stop)
    }

    #[test]
    fn options_are_applied() {
        let config = parse(
            r#"
            [store]
            name = "memory"
            host = "10.0.0.1"
            port = 7000
            db = 2
            max_keys = 100

            [benchmark]
            n_keys = 1000
            value_size = 64
            read_p = 0.5
            distribution = "sequential"
            zipf_s = 0.9
            duration = 2.5
            pipeline = 16
            threads = 4
            force_populate = true
            populate_batch = 500
            seed = 7
            cdf = true
        "#,
        )
        .unwrap();

        let mut opt = toml::Table::new();
        opt.insert("max_keys".to_string(), toml::Value::Integer(100));
        let expected = RunConfig {
            store: StoreConfig {
                name: "memory".to_string(),
                host: "10.0.0.1".to_string(),
                port: 7000,
                db: 2,
                password: None,
                opt,
            },
            workload: WorkloadConfig {
                n_keys: 1000,
                value_size: 64,
                read_p: 0.5,
                distribution: KeyDistribution::Sequential,
                zipf_s: 0.9,
            },
            len: Length::Timeout(Duration::from_secs_f64(2.5)),
            pipeline: 16,
            threads: 4,
            populate: PopulateOpt {
                force: true,
                batch: 500,
            },
            seed: Some(7),
            cdf: true,
        };
        assert_eq!(config, expected);
    }

    #[test]
    fn defaults_are_applied() {
        let config = parse("").unwrap();
        assert_eq!(config.store, StoreOpt::default().resolve());
        assert_eq!(config.workload, WorkloadOpt::default().resolve().unwrap());
        assert_eq!(config.len, Length::Timeout(Duration::from_secs(60)));
        assert_eq!(config.duration(), Some(Duration::from_secs(60)));
        assert_eq!(config.pipeline, 1);
        assert_eq!(config.threads, 1);
        assert_eq!(config.populate, PopulateOpt::default());
        assert_eq!(config.seed, None);
        assert!(!config.cdf);
    }

    #[test]
    fn ops_instead_of_duration() {
        let config = memory_config("ops = 1000");
        assert_eq!(config.len, Length::Count(1000));
        assert_eq!(config.duration(), None);
    }

    #[test]
    fn invalid_length() {
        let r = parse("[benchmark]\nduration = 1.0\nops = 1000");
        assert!(matches!(r, Err(Error::Config(_))));
        let r = parse("[benchmark]\nduration = -1.0");
        assert!(matches!(r, Err(Error::Config(_))));
    }

    #[test]
    fn duration_out_of_range() {
        for text in ["duration = nan", "duration = 1e20", "duration = inf"] {
            let r = parse(&format!("[benchmark]\n{}", text));
            match r {
                Err(Error::Config(msg)) => assert!(msg.contains("within range"), "{}", msg),
                other => panic!("{} accepted: {:?}", text, other.map(|c| c.len)),
            }
        }
    }

    #[test]
    fn invalid_pipeline_and_threads() {
        assert!(matches!(
            parse("[benchmark]\npipeline = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse("[benchmark]\nthreads = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse("[benchmark]\npopulate_batch = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse("[benchmark]\nread_p = 2.0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn invalid_distribution() {
        assert!(matches!(
            parse("[benchmark]\ndistribution = \"shuffle\""),
            Err(Error::Figment(_))
        ));
    }

    #[test]
    fn solo_one_sample_per_op() {
        let store = MemoryStore::new(&MemoryStoreOpt::default());
        let config = memory_config("ops = 100\nn_keys = 10\nseed = 1");
        let m = measure(&store, &config);
        assert_eq!(m.ops, 100);
        assert_eq!(m.latency.len(), 100);
        assert_eq!(m.rejected, 0);
    }

    #[test]
    fn pipelined_one_sample_per_batch() {
        let store = MemoryStore::new(&MemoryStoreOpt::default());
        let config = memory_config("ops = 30\npipeline = 10\nn_keys = 10");
        let m = measure(&store, &config);
        assert_eq!(m.ops, 30);
        assert_eq!(m.latency.len(), 3);
    }

    #[test]
    fn pipelined_partial_batch_is_flushed_not_sampled() {
        let store = MemoryStore::new(&MemoryStoreOpt::default());
        let config = memory_config(
            "ops = 35\npipeline = 10\nn_keys = 100\nread_p = 0.0\ndistribution = \"sequential\"",
        );
        let m = measure(&store, &config);
        assert_eq!(m.ops, 35);
        assert_eq!(m.latency.len(), 3);
        // all 35 writes landed, including the 5 of the partial batch
        assert_eq!(store.len(), 35);
    }

    #[test]
    fn zero_duration_does_nothing() {
        let store = MemoryStore::new(&MemoryStoreOpt::default());
        for pipeline in [1, 8] {
            let config = memory_config(&format!("duration = 0.0\npipeline = {}", pipeline));
            let m = measure(&store, &config);
            assert_eq!(m.ops, 0);
            assert!(m.latency.is_empty());
        }
        assert!(store.is_empty());
    }

    #[test]
    fn short_duration_stops_on_time() {
        let store = MemoryStore::new(&MemoryStoreOpt::default());
        let config = memory_config("duration = 0.2\nn_keys = 100\nthreads = 2");
        let start = std::time::Instant::now();
        let m = measure(&store, &config);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(5));
        assert!(m.ops > 0);
        assert_eq!(m.ops as usize, m.latency.len());
    }

    #[test]
    fn stop_flag_ends_window() {
        let store = MemoryStore::new(&MemoryStoreOpt::default());
        let config = memory_config("duration = 3600.0");
        let mut handles = connect(&store, 1).unwrap();
        let stop = AtomicBool::new(true);
        let m = bench_phase(&mut handles, &config, Instant::now(), &stop);
        assert_eq!(m.ops, 0);
    }

    #[test]
    fn workers_are_merged() {
        let store = MemoryStore::new(&MemoryStoreOpt::default());
        let config = memory_config("ops = 50\npipeline = 5\nthreads = 4\nn_keys = 100");
        let m = measure(&store, &config);
        assert_eq!(m.ops, 200);
        assert_eq!(m.latency.len(), 40);
    }

    #[test]
    fn rejections_are_timed_and_counted() {
        let opt = MemoryStoreOpt {
            max_keys: Some(0),
            maxmemory: None,
        };
        let store = MemoryStore::new(&opt);
        let config = memory_config("ops = 20\nread_p = 0.0\nn_keys = 10");
        let m = measure(&store, &config);
        assert_eq!(m.ops, 20);
        assert_eq!(m.latency.len(), 20);
        assert_eq!(m.rejected, 20);
        assert_eq!(m.failed, 0);

        let config = memory_config("ops = 20\nread_p = 0.0\nn_keys = 10\npipeline = 4");
        let m = measure(&store, &config);
        assert_eq!(m.ops, 20);
        assert_eq!(m.latency.len(), 5);
        assert_eq!(m.rejected, 5);
    }

    #[test]
    fn seeded_runs_are_repeatable() {
        let config = memory_config("ops = 200\nread_p = 0.0\nn_keys = 1000\nseed = 99");
        let a = MemoryStore::new(&MemoryStoreOpt::default());
        let b = MemoryStore::new(&MemoryStoreOpt::default());
        measure(&a, &config);
        measure(&b, &config);
        let mut ha = a.handle().unwrap();
        let mut hb = b.handle().unwrap();
        assert_eq!(ha.dbsize(), hb.dbsize());
        for i in 0..1000 {
            let key = crate::workload::key_of(i);
            assert_eq!(ha.get(&key).unwrap().is_some(), hb.get(&key).unwrap().is_some());
        }
    }

    #[test]
    fn run_read_only_report() {
        let store = MemoryStore::new(&MemoryStoreOpt::default());
        let config = memory_config("ops = 500\nread_p = 1.0\nn_keys = 200\nthreads = 2");
        let stop = AtomicBool::new(false);
        let report = run(&store, &config, &stop).unwrap();
        assert_eq!(store.len(), 200);
        assert_eq!(report.stats.ops, 1000);
        assert_eq!(report.stats.samples, 1000);
        assert_eq!(report.stats.threads, 2);
        assert_eq!(report.stats.duration_s, None);
        // every read hits a populated key, and only the window is counted
        assert_eq!(report.hits, 1000);
        assert_eq!(report.misses, 0);
        assert_eq!(report.hit_ratio, 1.0);
        assert_eq!(report.info_before.keyspace_hits, 0);
        assert_eq!(report.info_after.keyspace_hits, 1000);
        assert!(report.stats.p50_ms <= report.stats.p95_ms);
        assert!(report.stats.p95_ms <= report.stats.p99_ms);
        assert!(report.stats.warmup_sec > 0.0);
        assert!(report.cdf.is_none());
    }

    #[test]
    fn run_zero_duration_report() {
        let store = MemoryStore::new(&MemoryStoreOpt::default());
        let config = memory_config("duration = 0.0\nn_keys = 10\ncdf = true");
        let stop = AtomicBool::new(false);
        let report = run(&store, &config, &stop).unwrap();
        assert_eq!(report.stats.ops, 0);
        assert_eq!(report.stats.p50_ms, 0.0);
        assert_eq!(report.stats.p95_ms, 0.0);
        assert_eq!(report.stats.p99_ms, 0.0);
        assert_eq!(report.hit_ratio, 0.0);
        assert_eq!(report.stats.duration_s, Some(0.0));
        assert_eq!(report.cdf, Some(vec![]));
    }

    /// Calls that reached a store whose liveness check always fails.
    #[derive(Default)]
    struct Calls {
        pings: AtomicUsize,
        others: AtomicUsize,
    }

    struct DownStore {
        calls: Arc<Calls>,
    }

    struct DownHandle {
        calls: Arc<Calls>,
    }

    impl KVStore for DownStore {
        fn handle(&self) -> Result<Box<dyn KVStoreHandle>, Error> {
            Ok(Box::new(DownHandle {
                calls: self.calls.clone(),
            }))
        }
    }

    impl DownHandle {
        fn other<T>(&self) -> StoreResult<T> {
            self.calls.others.fetch_add(1, Ordering::Relaxed);
            Err(StoreError::Other("connection reset".into()))
        }
    }

    impl KVStoreHandle for DownHandle {
        fn ping(&mut self) -> StoreResult<()> {
            self.calls.pings.fetch_add(1, Ordering::Relaxed);
            Err(StoreError::Other("down".into()))
        }

        fn get(&mut self, _key: &[u8]) -> StoreResult<Option<Box<[u8]>>> {
            self.other()
        }

        fn set(&mut self, _key: &[u8], _value: &[u8]) -> StoreResult<()> {
            self.other()
        }

        fn pipeline(&mut self, _ops: &[Operation]) -> StoreResult<()> {
            self.other()
        }

        fn info(&mut self) -> StoreResult<crate::stats::StoreSnapshot> {
            self.other()
        }

        fn dbsize(&mut self) -> StoreResult<u64> {
            self.other()
        }
    }

    #[test]
    fn run_aborts_when_ping_fails() {
        let calls = Arc::new(Calls::default());
        let store = DownStore {
            calls: calls.clone(),
        };
        let config = memory_config("ops = 5\nthreads = 3\nforce_populate = true");
        let stop = AtomicBool::new(false);
        match run(&store, &config, &stop) {
            Err(Error::Unreachable(msg)) => assert!(msg.contains("down"), "{}", msg),
            other => panic!("run went on: {:?}", other.map(|r| r.stats.ops)),
        }
        // the first failed check ends the run, nothing else is sent
        assert_eq!(calls.pings.load(Ordering::Relaxed), 1);
        assert_eq!(calls.others.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn run_against_full_store() {
        let opt = MemoryStoreOpt {
            max_keys: Some(0),
            maxmemory: None,
        };
        let store = MemoryStore::new(&opt);
        let config = memory_config("ops = 100\nn_keys = 5000\npipeline = 10");
        let stop = AtomicBool::new(false);
        let report = run(&store, &config, &stop).unwrap();
        assert!(store.is_empty());
        assert_eq!(report.stats.ops, 100);
        assert_eq!(report.stats.samples, 10);
    }

    const EXAMPLE_MEMORY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/presets/memory.toml"
    ));

    #[test]
    fn example_memory() {
        let _ = env_logger::try_init();
        let (store, config) = init(&figment(EXAMPLE_MEMORY)).unwrap();
        let stop = AtomicBool::new(false);
        let report = run(&*store, &config, &stop).unwrap();
        assert!(report.stats.ops > 0);
        let json = serde_json::to_value(&report).unwrap();
        for k in ["stats", "info_before", "info_after", "deltas", "hit_ratio", "hits", "misses"] {
            assert!(json.get(k).is_some(), "missing {}", k);
        }
        for k in ["p50_ms", "p95_ms", "p99_ms", "warmup_sec", "ops", "ts", "distribution"] {
            assert!(json["stats"].get(k).is_some(), "missing stats.{}", k);
        }
    }
}
