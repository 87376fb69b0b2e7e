//! Watchdog: heartbeat storage and the execution scope that feeds it.
//!
//! Each monitored unit gets its own [`HeartbeatStore`]; [`WatchdogRegistry`]
//! hands them out by [`UnitKey`] so two units never share history.

pub mod scope;
pub mod store;

pub use scope::{ExecutionScope, ScopeError};
pub use store::HeartbeatStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::clock::Clock;
use crate::types::UnitKey;

/// Keyed container of heartbeat stores sharing one clock.
#[derive(Debug)]
pub struct WatchdogRegistry {
    clock: Arc<dyn Clock>,
    stores: RwLock<HashMap<UnitKey, Arc<HeartbeatStore>>>,
}

impl WatchdogRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Store for `key`, created with `window` if it does not exist yet.
    ///
    /// An existing store keeps its current window.
    pub fn store_for(&self, key: &UnitKey, window: Duration) -> Arc<HeartbeatStore> {
        if let Some(store) = self.stores.read().get(key) {
            return store.clone();
        }
        self.stores
            .write()
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(HeartbeatStore::new(key.clone(), window, self.clock.clone()))
            })
            .clone()
    }

    /// Existing store for `key`.
    pub fn get(&self, key: &UnitKey) -> Option<Arc<HeartbeatStore>> {
        self.stores.read().get(key).cloned()
    }

    /// Fresh scope bound to `key`'s store.
    pub fn scope(&self, key: &UnitKey) -> Option<ExecutionScope> {
        self.get(key)
            .map(|store| ExecutionScope::new(store, self.clock.clone()))
    }

    pub fn keys(&self) -> Vec<UnitKey> {
        let mut keys: Vec<UnitKey> = self.stores.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
