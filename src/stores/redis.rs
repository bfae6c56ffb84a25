//! A Redis server, or anything that speaks its protocol (Valkey, KeyDB, Dragonfly...).
//!
//! ## Configuration Format
//!
//! ``` toml
//! [store]
//! name = "redis"
//! host = "..."     # hostname of the server
//! port = ...       # port of the server
//! db = ...         # logical database
//! password = "..." # optional
//! ```
//!
//! Pipelines are sent without `MULTI`/`EXEC`. A write refused with an `OOM` reply (the server is
//! at `maxmemory` with the `noeviction` policy) is reported as [`StoreError::Capacity`].

use crate::stats::StoreSnapshot;
use crate::stores::{Registry, StoreConfig};
use crate::*;
use ::redis::{Client, Connection, InfoDict, RedisError};
use log::debug;
use std::sync::Arc;

pub struct RedisStore {
    client: Client,
}

fn classify(e: RedisError) -> StoreError {
    if e.code() == Some("OOM") || e.to_string().starts_with("OOM") {
        StoreError::Capacity
    } else {
        StoreError::Other(e.to_string())
    }
}

/// `redis://[:password@]host:port/db`
pub fn url(config: &StoreConfig) -> String {
    match config.password {
        Some(ref password) => format!(
            "redis://:{}@{}:{}/{}",
            password, config.host, config.port, config.db
        ),
        None => format!("redis://{}:{}/{}", config.host, config.port, config.db),
    }
}

impl RedisStore {
    pub fn new(config: &StoreConfig) -> Result<Self, Error> {
        let client = Client::open(url(config)).map_err(|e| Error::Config(e.to_string()))?;
        debug!(
            "Redis client created for {}:{} db {}",
            config.host, config.port, config.db
        );
        Ok(Self { client })
    }

    pub fn new_kvstore(config: &StoreConfig) -> Result<Arc<dyn KVStore>, Error> {
        Ok(Arc::new(Self::new(config)?))
    }
}

impl KVStore for RedisStore {
    fn handle(&self) -> Result<Box<dyn KVStoreHandle>, Error> {
        let con = self
            .client
            .get_connection()
            .map_err(|e| Error::Unreachable(e.to_string()))?;
        Ok(Box::new(RedisHandle { con }))
    }
}

pub struct RedisHandle {
    con: Connection,
}

impl KVStoreHandle for RedisHandle {
    fn ping(&mut self) -> StoreResult<()> {
        ::redis::cmd("PING")
            .query::<String>(&mut self.con)
            .map(|_| ())
            .map_err(classify)
    }

    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Box<[u8]>>> {
        ::redis::cmd("GET")
            .arg(key)
            .query::<Option<Vec<u8>>>(&mut self.con)
            .map(|v| v.map(|v| v.into_boxed_slice()))
            .map_err(classify)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query::<()>(&mut self.con)
            .map_err(classify)
    }

    fn pipeline(&mut self, ops: &[Operation]) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = ::redis::pipe();
        for op in ops {
            match op {
                Operation::Set { key, value } => {
                    pipe.cmd("SET").arg(&key[..]).arg(&value[..]).ignore();
                }
                Operation::Get { key } => {
                    pipe.cmd("GET").arg(&key[..]).ignore();
                }
            }
        }
        pipe.query::<()>(&mut self.con).map_err(classify)
    }

    fn info(&mut self) -> StoreResult<StoreSnapshot> {
        let info = ::redis::cmd("INFO")
            .query::<InfoDict>(&mut self.con)
            .map_err(classify)?;
        let field = |name: &str| info.get::<u64>(name).unwrap_or(0);
        Ok(StoreSnapshot {
            keyspace_hits: field("keyspace_hits"),
            keyspace_misses: field("keyspace_misses"),
            evicted_keys: field("evicted_keys"),
            expired_keys: field("expired_keys"),
            used_memory: field("used_memory"),
        })
    }

    fn dbsize(&mut self) -> StoreResult<u64> {
        ::redis::cmd("DBSIZE")
            .query::<u64>(&mut self.con)
            .map_err(classify)
    }
}

inventory::submit! {
    Registry::new("redis", RedisStore::new_kvstore)
}
