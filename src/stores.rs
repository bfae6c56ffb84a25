//! Adapters for built-in and external key-value stores.
//!
//! ## Configuration Format
//!
//! The store is described by the `[store]` section of a run's configuration:
//!
//! ```toml
//! [store]
//! name = "redis"       # registered name of the store, default "redis"
//! host = "127.0.0.1"   # default "127.0.0.1"
//! port = 6379          # default 6379
//! db = 0               # default 0
//! password = "..."     # optional
//! ```
//!
//! Any other key in the section is kept as is and handed to the store's constructor, see the
//! documentation of each built-in store.
//!
//! ## Built-in Stores
//!
//! - [`redis`]: a Redis (or protocol compatible) server.
//! - [`memory`]: an in-process store with optional capacity limits, handy for dry runs.
//!
//! ## Registering New Stores
//!
//! Implement [`KVStore`]/[`KVStoreHandle`] for the store, write a constructor with a signature of
//! `fn(&StoreConfig) -> Result<Arc<dyn KVStore>, Error>`, then register it using [`inventory`]:
//! `inventory::submit! { Registry::new("name", constructor_fn) };`.

use crate::{Error, KVStore};
use hashbrown::HashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use toml::Table;

/// The store section as it is written in the configuration.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct StoreOpt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Store specific options.
    #[serde(flatten)]
    pub opt: Table,
}

/// A resolved store section. The endpoint is always known, even for stores that ignore it, so
/// that it can be echoed in the report.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub opt: Table,
}

impl StoreOpt {
    pub fn resolve(&self) -> StoreConfig {
        StoreConfig {
            name: self.name.clone().unwrap_or("redis".to_string()),
            host: self.host.clone().unwrap_or("127.0.0.1".to_string()),
            port: self.port.unwrap_or(6379),
            db: self.db.unwrap_or(0),
            password: self.password.clone(),
            opt: self.opt.clone(),
        }
    }
}

/// The centralized registry that maps the name of a store to its constructor function.
///
/// A user-defined store can use the [`inventory::submit!`] macro to register itself.
pub struct Registry<'a> {
    pub(crate) name: &'a str,
    constructor: fn(&StoreConfig) -> Result<Arc<dyn KVStore>, Error>,
}

impl<'a> Registry<'a> {
    pub const fn new(
        name: &'a str,
        constructor: fn(&StoreConfig) -> Result<Arc<dyn KVStore>, Error>,
    ) -> Self {
        Self { name, constructor }
    }
}

inventory::collect!(Registry<'static>);

/// Names of all registered stores, sorted.
pub fn registered() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = inventory::iter::<Registry>
        .into_iter()
        .map(|r| r.name)
        .collect();
    names.sort_unstable();
    names
}

/// Create the store named in the configuration.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn KVStore>, Error> {
    let mut registered: HashMap<&'static str, fn(&StoreConfig) -> Result<Arc<dyn KVStore>, Error>> =
        HashMap::new();
    for r in inventory::iter::<Registry> {
        debug!("Adding supported store: {}", r.name);
        if registered.insert(r.name, r.constructor).is_some() {
            return Err(Error::Config(format!("store {} is registered twice", r.name)));
        }
    }
    let f = registered
        .get(config.name.as_str())
        .ok_or_else(|| Error::Config(format!("store {} not found in registry", config.name)))?;
    f(config)
}

/// Deserialize the store specific options of a section.
pub(crate) fn parse_opt<T: serde::de::DeserializeOwned>(opt: &Table) -> Result<T, Error> {
    opt.clone()
        .try_into()
        .map_err(|e: toml::de::Error| Error::Config(e.to_string()))
}

pub mod memory;
pub mod redis;
