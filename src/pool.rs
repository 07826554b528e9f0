//! Pool registry.
//!
//! One pool per distinct connection configuration. Pools are created on
//! first checkout and forgotten once their sweep reports them empty.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Result;
use crate::gds::{ConnectionFactory, ConnectionOptions, FbPool, PooledConnection};

type Registry = Mutex<HashMap<String, FbPool>>;

/// Owns every pool opened through one factory.
pub struct PoolManager {
    factory: Arc<dyn ConnectionFactory>,
    pools: Arc<Registry>,
}

impl PoolManager {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            pools: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The pool for `options`, created if this is the first request for
    /// its configuration.
    pub fn get_or_create(&self, options: &ConnectionOptions) -> Result<FbPool> {
        let key = options.key();
        if let Some(pool) = self.pools.lock().get(&key) {
            return Ok(pool.clone());
        }

        // Opening the minimum population can take a while; do it unlocked.
        let pool = FbPool::new(options.clone(), Arc::clone(&self.factory))?;
        let registry: Weak<Registry> = Arc::downgrade(&self.pools);
        pool.set_empty_callback(Arc::new(move |key: &str| {
            if let Some(pools) = registry.upgrade() {
                if pools.lock().remove(key).is_some() {
                    tracing::debug!(target: "fbcore::pool", key, "removed empty pool");
                }
            }
        }));

        let mut pools = self.pools.lock();
        match pools.get(&key) {
            Some(existing) => {
                let existing = existing.clone();
                drop(pools);
                pool.clear();
                Ok(existing)
            }
            None => {
                pools.insert(key, pool.clone());
                Ok(pool)
            }
        }
    }

    /// Check out a connection for `options`. With pooling disabled the
    /// attachment is opened directly and not tracked.
    pub fn checkout(&self, options: &ConnectionOptions) -> Result<Connection> {
        if !options.pooling {
            options.validate()?;
            return Ok(Connection::Direct(self.factory.connect(options)?));
        }
        let pool = self.get_or_create(options)?;
        Ok(Connection::Pooled(pool.checkout()?))
    }

    pub fn pool(&self, key: &str) -> Option<FbPool> {
        self.pools.lock().get(key).cloned()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Close and forget the pool for `key`.
    pub fn clear_pool(&self, key: &str) -> bool {
        let pool = self.pools.lock().remove(key);
        match pool {
            Some(pool) => {
                pool.clear();
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&self) {
        let pools: Vec<FbPool> = self.pools.lock().drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.clear();
        }
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        self.clear_all();
    }
}

/// An attachment from [`PoolManager::checkout`].
pub enum Connection {
    Pooled(PooledConnection),
    Direct(Box<dyn crate::gds::Attachment>),
}

impl Connection {
    pub fn attachment(&mut self) -> Result<&mut (dyn crate::gds::Attachment + 'static)> {
        match self {
            Connection::Pooled(conn) => conn.attachment(),
            Connection::Direct(conn) => Ok(conn.as_mut()),
        }
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, Connection::Pooled(_))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Connection::Direct(conn) = self {
            if let Err(err) = conn.detach() {
                tracing::warn!(target: "fbcore::pool", error = %err, "detach failed");
            }
        }
    }
}
