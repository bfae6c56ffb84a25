#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A workload generator and latency benchmark for remote key-value stores.
//!
//! With `kvload`, you describe a run in TOML (or on the command line): the size of the key space,
//! the value size, the read/write mix, the key popularity distribution, how long to run and how
//! deep to pipeline. A run goes through four steps:
//!
//! 1. The key space is populated if the store looks cold (see [`mod@populate`]). Over-capacity
//!    rejections from a store with a no-eviction memory policy are absorbed, not fatal.
//! 2. The store's counters are snapshotted.
//! 3. The timed loop issues reads and writes, one by one or in pipelined batches, and records a
//!    latency sample per completed operation (or per completed batch). See [`mod@bench`].
//! 4. The counters are snapshotted again and everything is reduced into a [`stats::RunReport`].
//!
//! A few key design choices include:
//!
//! - Keys and values are plain byte arrays. Keys are textual (`k:<index>`) so they can be
//! inspected with any store client.
//! - Stores are black boxes behind [`KVStore`]/[`KVStoreHandle`], created by name from the
//! `[store]` section and dynamically dispatched. New stores can be registered from other crates
//! via [`inventory`], without touching this crate.
//! - Failures of the store during a run are values ([`StoreError`]), not panics. Only the initial
//! liveness check is fatal.
//!
//! More detailed usage could be found in the module-level rustdocs:
//!
//! - [`mod@bench`] for the config format of a run.
//! - [`mod@stores`] for the config format of a built-in store.
//! - [`cmdline()`] for the usage of the default command line interface.

use serde::{Deserialize, Serialize};

/// A key-value store that a run is driven against.
///
/// The store itself only knows how to open connections. All traffic goes through the handles.
pub trait KVStore: Send + Sync + 'static {
    /// Open a new connection to the store. Each worker owns exactly one handle.
    fn handle(&self) -> Result<Box<dyn KVStoreHandle>, Error>;
}

/// A single connection to a [`KVStore`].
///
/// Handles are `Send` so that all of them can be opened (and checked) before the measured window
/// starts, then moved into worker threads.
pub trait KVStoreHandle: Send {
    /// Liveness check.
    fn ping(&mut self) -> StoreResult<()>;

    /// Retrieving the value of a key if it exists.
    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Box<[u8]>>>;

    /// Adding a new key-value pair or blindly updating an existing key's value.
    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Send all operations in one round trip and wait for every reply. Replies to reads are
    /// discarded. If any of the operations is rejected, the first rejection is returned.
    fn pipeline(&mut self, ops: &[Operation]) -> StoreResult<()>;

    /// Read the store's cumulative counters.
    fn info(&mut self) -> StoreResult<stats::StoreSnapshot>;

    /// Number of keys currently held by the store.
    fn dbsize(&mut self) -> StoreResult<u64>;
}

/// A single operation that is applied to the key-value store.
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
pub enum Operation {
    /// Adding a new key-value pair or blindly updating an existing key's value.
    Set { key: Box<[u8]>, value: Box<[u8]> },

    /// Retrieving the value of a key if it exists.
    Get { key: Box<[u8]> },
}

impl Operation {
    /// Apply this operation alone, outside of a pipeline.
    pub fn apply(&self, handle: &mut dyn KVStoreHandle) -> StoreResult<()> {
        match self {
            Operation::Set { key, value } => handle.set(key, value),
            Operation::Get { key } => handle.get(key).map(|_| ()),
        }
    }
}

/// A failed store request.
///
/// Over-capacity rejection is kept apart from every other failure, because it is an expected
/// condition when the store runs with a no-eviction memory policy and the benchmark has to keep
/// going when it happens.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The write was refused because the store reached its memory limit.
    #[error("write rejected: store is over capacity")]
    Capacity,

    /// Anything else: broken connection, protocol error, unexpected reply.
    #[error("store request failed: {0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that stop a run.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot load configuration: {0}")]
    Figment(#[from] figment::Error),

    #[error("store is unreachable: {0}")]
    Unreachable(String),

    #[error("cannot read store counters: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cannot serialize report: {0}")]
    Report(#[from] serde_json::Error),
}

pub mod bench;
mod cmdline;
pub mod populate;
pub mod stats;
pub mod stores;
pub mod workload;

pub use cmdline::cmdline;

pub extern crate inventory;
pub extern crate toml;
