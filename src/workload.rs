//! Key popularity and read/write mix.
//!
//! A [`Workload`] turns a random number generator into a stream of [`Operation`]s. For each
//! operation it first decides between a read and a write (with probability `read_p` it is a
//! read), then picks a key index from the configured [`KeyDistribution`] and renders it as
//! `k:<index>`.

use crate::{Error, Operation};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix of every generated key.
pub const KEY_PREFIX: &str = "k:";

/// Skew used by the zipfian distribution when none is given.
pub const DEFAULT_ZIPF_S: f64 = 1.2;

/// Below this distance from 1.0, the zipfian skew is treated as exactly 1.0.
const ZIPF_S_EPSILON: f64 = 1e-9;

/// The distribution of keys.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KeyDistribution {
    /// Every key is equally likely.
    #[serde(alias = "random")]
    #[value(alias = "random")]
    Uniform,

    /// Walk the key space in order, wrapping around at the end.
    Sequential,

    /// Heavy-tailed: low indices are much more popular than high ones.
    #[serde(alias = "zipf")]
    #[value(alias = "zipf")]
    Zipfian,
}

impl std::fmt::Display for KeyDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KeyDistribution::Uniform => "uniform",
            KeyDistribution::Sequential => "sequential",
            KeyDistribution::Zipfian => "zipfian",
        };
        f.write_str(s)
    }
}

/// Map a uniform draw `u` in `[0, 1)` to an approximately Zipf-distributed index in `[0, n)`,
/// through the inverse CDF of the continuous power law with exponent `s`.
///
/// The general formula has a singularity at `s == 1`, where the closed form `n^u` is used
/// instead.
pub fn zipf_index(n: usize, s: f64, u: f64) -> usize {
    if n <= 1 {
        return 0;
    }
    let nf = n as f64;
    let x = if (s - 1.0).abs() < ZIPF_S_EPSILON {
        (u * nf.ln()).exp()
    } else {
        let t = 1.0 - s;
        (u * (nf.powf(t) - 1.0) + 1.0).powf(1.0 / t)
    };
    let x = x.clamp(1.0, nf);
    // x is within [1, n], so the index is within [0, n - 1]
    (x.floor() as usize).min(n) - 1
}

/// Draw an approximately Zipf-distributed index in `[0, n)`. See [`zipf_index`].
pub fn approx_zipf_index(n: usize, s: f64, rng: &mut impl Rng) -> usize {
    if n <= 1 {
        return 0;
    }
    zipf_index(n, s, rng.random::<f64>())
}

/// The textual key of an index.
pub fn key_of(index: usize) -> Box<[u8]> {
    format!("{}{}", KEY_PREFIX, index).into_bytes().into_boxed_slice()
}

/// A constant payload of `len` bytes.
pub fn payload(len: usize) -> Box<[u8]> {
    vec![b'a'; len].into_boxed_slice()
}

#[derive(Debug, Clone, Copy)]
enum OperationType {
    Set,
    Get,
}

/// Mix defines the probability of an operation being a read. Everything else is a write.
#[derive(Debug)]
struct Mix {
    read_p: f64,
}

impl Mix {
    fn new(read_p: f64) -> Self {
        Self { read_p }
    }

    fn next(&self, rng: &mut impl Rng) -> OperationType {
        if rng.random::<f64>() < self.read_p {
            OperationType::Get
        } else {
            OperationType::Set
        }
    }
}

/// Key index generator. The serial number is the only state, and it only matters to the
/// sequential distribution.
#[derive(Debug)]
struct KeyGenerator {
    nr_keys: usize,
    dist: KeyDistribution,
    zipf_s: f64,
    serial: usize,
}

impl KeyGenerator {
    fn new(nr_keys: usize, dist: KeyDistribution, zipf_s: f64, serial: usize) -> Self {
        assert!(nr_keys > 0);
        Self {
            nr_keys,
            dist,
            zipf_s,
            serial,
        }
    }

    fn next(&mut self, rng: &mut impl Rng) -> usize {
        let index = match self.dist {
            KeyDistribution::Sequential => self.serial % self.nr_keys,
            KeyDistribution::Uniform => rng.random_range(0..self.nr_keys),
            KeyDistribution::Zipfian => approx_zipf_index(self.nr_keys, self.zipf_s, rng),
        };
        self.serial = self.serial.wrapping_add(1);
        debug_assert!(index < self.nr_keys);
        index
    }
}

/// The workload section as it is written in the configuration. Missing fields fall back to
/// defaults in [`WorkloadOpt::resolve`].
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct WorkloadOpt {
    /// Size of the key space. Keys are `k:0` to `k:<n_keys - 1>`.
    ///
    /// Default: 200000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_keys: Option<usize>,

    /// Size of written values, in bytes.
    ///
    /// Default: 1024.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_size: Option<usize>,

    /// Probability that an operation is a read.
    ///
    /// Default: 0.8.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_p: Option<f64>,

    /// Key distribution: "uniform" (or "random"), "sequential", "zipfian" (or "zipf").
    ///
    /// Default: "zipfian".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<KeyDistribution>,

    /// Skew of the zipfian distribution. Higher is more skewed toward low indices.
    ///
    /// Default: 1.2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zipf_s: Option<f64>,
}

/// A fully resolved and validated workload.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct WorkloadConfig {
    pub n_keys: usize,
    pub value_size: usize,
    pub read_p: f64,
    pub distribution: KeyDistribution,
    pub zipf_s: f64,
}

impl WorkloadOpt {
    pub fn resolve(&self) -> Result<WorkloadConfig, Error> {
        let config = WorkloadConfig {
            n_keys: self.n_keys.unwrap_or(200_000),
            value_size: self.value_size.unwrap_or(1024),
            read_p: self.read_p.unwrap_or(0.8),
            distribution: self.distribution.unwrap_or(KeyDistribution::Zipfian),
            zipf_s: self.zipf_s.unwrap_or(DEFAULT_ZIPF_S),
        };
        if config.n_keys == 0 {
            return Err(Error::Config("n_keys should be positive".into()));
        }
        if !(0.0..=1.0).contains(&config.read_p) {
            return Err(Error::Config("read_p should be within [0, 1]".into()));
        }
        if !(config.zipf_s.is_finite() && config.zipf_s > 0.0) {
            return Err(Error::Config("zipf_s should be positive".into()));
        }
        Ok(config)
    }
}

/// The per-worker generator of operations.
#[derive(Debug)]
pub struct Workload {
    mix: Mix,
    kgen: KeyGenerator,
    value: Box<[u8]>,
    /// How many operations have been generated so far
    count: u64,
}

impl Workload {
    /// `thread_info` is `(worker_id, nr_workers)`. It only shifts the starting point of the
    /// sequential distribution, so that workers begin in disjoint regions of the key space.
    pub fn new(config: &WorkloadConfig, thread_info: Option<(usize, usize)>) -> Self {
        let serial = match thread_info {
            Some((id, nr)) => {
                assert!(id < nr);
                id * (config.n_keys / nr)
            }
            None => 0,
        };
        Self {
            mix: Mix::new(config.read_p),
            kgen: KeyGenerator::new(config.n_keys, config.distribution, config.zipf_s, serial),
            value: payload(config.value_size),
            count: 0,
        }
    }

    pub fn next(&mut self, rng: &mut impl Rng) -> Operation {
        self.count += 1;
        let ty = self.mix.next(rng);
        let key = key_of(self.kgen.next(rng));
        match ty {
            OperationType::Set => Operation::Set {
                key,
                value: self.value.clone(),
            },
            OperationType::Get => Operation::Get { key },
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
