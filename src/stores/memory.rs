//! An in-process store that behaves like a cache server running with a no-eviction policy.
//!
//! ## Configuration Format
//!
//! ``` toml
//! [store]
//! name = "memory"
//! max_keys = ...  # optional, maximum number of keys
//! maxmemory = ... # optional, maximum bytes of keys + values
//! ```
//!
//! Once a limit is reached, writes that would grow the store are rejected with
//! [`StoreError::Capacity`]. Hits, misses and memory usage are counted like a server would.

use crate::stats::StoreSnapshot;
use crate::stores::{parse_opt, Registry, StoreConfig};
use crate::*;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize, Default, Debug, Clone)]
pub struct MemoryStoreOpt {
    pub max_keys: Option<usize>,
    pub maxmemory: Option<usize>,
}

#[derive(Default)]
struct Inner {
    map: HashMap<Box<[u8]>, Box<[u8]>>,
    hits: u64,
    misses: u64,
    used_memory: usize,
}

impl Inner {
    fn get(&mut self, key: &[u8]) -> Option<Box<[u8]>> {
        match self.map.get(key) {
            Some(v) => {
                self.hits += 1;
                Some(v.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn set(&mut self, opt: &MemoryStoreOpt, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let old = self.map.get(key).map(|v| key.len() + v.len());
        let new = key.len() + value.len();
        if old.is_none() {
            if let Some(max) = opt.max_keys {
                if self.map.len() >= max {
                    return Err(StoreError::Capacity);
                }
            }
        }
        if let Some(max) = opt.maxmemory {
            let used = self.used_memory - old.unwrap_or(0) + new;
            if used > max && new > old.unwrap_or(0) {
                return Err(StoreError::Capacity);
            }
        }
        self.used_memory = self.used_memory - old.unwrap_or(0) + new;
        self.map.insert(key.into(), value.into());
        Ok(())
    }
}

/// The store, cheaply clonable. All handles share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    opt: MemoryStoreOpt,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new(opt: &MemoryStoreOpt) -> Self {
        Self {
            opt: opt.clone(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn new_kvstore(config: &StoreConfig) -> Result<Arc<dyn KVStore>, Error> {
        let opt: MemoryStoreOpt = parse_opt(&config.opt)?;
        Ok(Arc::new(Self::new(&opt)))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KVStore for MemoryStore {
    fn handle(&self) -> Result<Box<dyn KVStoreHandle>, Error> {
        Ok(Box::new(self.clone()))
    }
}

impl KVStoreHandle for MemoryStore {
    fn ping(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Box<[u8]>>> {
        Ok(self.inner.lock().get(key))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.lock().set(&self.opt, key, value)
    }

    fn pipeline(&mut self, ops: &[Operation]) -> StoreResult<()> {
        // every operation is applied, like a server does; only the first rejection is kept
        let mut inner = self.inner.lock();
        let mut result = Ok(());
        for op in ops {
            let r = match op {
                Operation::Set { key, value } => inner.set(&self.opt, key, value),
                Operation::Get { key } => {
                    let _ = inner.get(key);
                    Ok(())
                }
            };
            if result.is_ok() {
                result = r;
            }
        }
        result
    }

    fn info(&mut self) -> StoreResult<StoreSnapshot> {
        let inner = self.inner.lock();
        Ok(StoreSnapshot {
            keyspace_hits: inner.hits,
            keyspace_misses: inner.misses,
            evicted_keys: 0,
            expired_keys: 0,
            used_memory: inner.used_memory as u64,
        })
    }

    fn dbsize(&mut self) -> StoreResult<u64> {
        Ok(self.inner.lock().map.len() as u64)
    }
}

inventory::submit! {
    Registry::new("memory", MemoryStore::new_kvstore)
}
