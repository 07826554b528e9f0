//! Blocking connection pool.
//!
//! Each pool keeps two membership sets: idle entries and checked-out
//! entries. Population counts both plus connections being opened, and never
//! exceeds the configured maximum. A checkout past the maximum waits on a
//! condition variable until a checkin, an eviction or the timeout.
//!
//! When a lifetime is configured, a sweep thread evicts expired idle
//! entries without dropping below the minimum, and reports when the pool
//! has emptied so its owner can forget it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::attachment::Attachment;
use super::connection::{ConnectionFactory, ConnectionOptions};
use crate::error::{FbError, Result};

/// Upper bound on the sweep interval.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Called with the pool key once a sweep leaves the pool empty.
pub type EmptyPoolCallback = Arc<dyn Fn(&str) + Send + Sync>;

// ============================================================================
// Pool Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FbPoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    /// Zero disables expiry and the sweep thread.
    pub lifetime: Duration,
    pub timeout: Duration,
}

impl FbPoolConfig {
    pub fn from_options(options: &ConnectionOptions) -> Self {
        Self {
            min_size: options.min_pool_size,
            max_size: options.max_pool_size,
            lifetime: options.connection_lifetime,
            timeout: options.connection_timeout,
        }
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        if self.lifetime.is_zero() {
            None
        } else {
            Some(self.lifetime.min(MAX_SWEEP_INTERVAL))
        }
    }
}

// ============================================================================
// Pool State
// ============================================================================

struct IdleEntry {
    id: u64,
    conn: Box<dyn Attachment>,
    /// Stamped on creation and again on every checkin.
    created: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<IdleEntry>,
    checked_out: HashSet<u64>,
    creating: usize,
    cleared: bool,
}

impl PoolState {
    fn population(&self) -> usize {
        self.idle.len() + self.checked_out.len() + self.creating
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

struct Sweeper {
    signal: Arc<StopSignal>,
    thread: JoinHandle<()>,
}

impl Sweeper {
    fn stop(self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        // The sweep thread may end up stopping itself when it drops the
        // last pool reference; it must not join itself.
        if self.thread.thread().id() != thread::current().id() {
            let _ = self.thread.join();
        }
    }
}

struct PoolInner {
    key: String,
    options: ConnectionOptions,
    config: FbPoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    available: Condvar,
    next_id: AtomicU64,
    sweeper: Mutex<Option<Sweeper>>,
    on_empty: Mutex<Option<EmptyPoolCallback>>,
}

impl PoolInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_expired(&self, entry: &IdleEntry, now: Instant) -> bool {
        !self.config.lifetime.is_zero() && now.duration_since(entry.created) > self.config.lifetime
    }

    /// Newest idle entry that may be served, moving it to checked-out.
    /// Expired entries are evicted on the way unless that would drop the
    /// pool below its minimum.
    fn take_idle(&self, state: &mut PoolState, evicted: &mut Vec<Box<dyn Attachment>>) -> Option<IdleEntry> {
        let now = Instant::now();
        while let Some(entry) = state.idle.pop() {
            if self.is_expired(&entry, now) && state.population() >= self.config.min_size {
                evicted.push(entry.conn);
                continue;
            }
            state.checked_out.insert(entry.id);
            return Some(entry);
        }
        None
    }

    fn checkin(&self, id: u64, conn: Box<dyn Attachment>) {
        let mut state = self.state.lock();
        state.checked_out.remove(&id);
        if state.cleared {
            drop(state);
            close_all(vec![conn]);
            return;
        }
        state.idle.push(IdleEntry {
            id,
            conn,
            created: Instant::now(),
        });
        drop(state);
        self.available.notify_one();
    }

    fn discard(&self, id: u64, conn: Box<dyn Attachment>) {
        self.state.lock().checked_out.remove(&id);
        self.available.notify_one();
        tracing::debug!(target: "fbcore::pool", key = %self.key, id, "discarding connection");
        close_all(vec![conn]);
    }

    /// Evict expired idle entries, oldest first, while the pool stays at or
    /// above its minimum. Fires the empty-pool callback when this sweep
    /// evicted the last connection.
    fn sweep(&self) {
        let now = Instant::now();
        let (evicted, empty) = {
            let mut state = self.state.lock();
            let mut evicted = Vec::new();
            let mut kept = Vec::with_capacity(state.idle.len());
            let mut population = state.population();
            for entry in std::mem::take(&mut state.idle) {
                if self.is_expired(&entry, now) && population > self.config.min_size {
                    population -= 1;
                    evicted.push(entry.conn);
                } else {
                    kept.push(entry);
                }
            }
            state.idle = kept;
            let emptied = !evicted.is_empty() && !state.cleared && state.population() == 0;
            (evicted, emptied)
        };

        if !evicted.is_empty() {
            tracing::debug!(target: "fbcore::pool", key = %self.key, evicted = evicted.len(), "sweep evicted idle connections");
            self.available.notify_all();
            close_all(evicted);
        }
        if empty {
            let callback = self.on_empty.lock().clone();
            if let Some(callback) = callback {
                tracing::debug!(target: "fbcore::pool", key = %self.key, "pool is empty");
                callback(&self.key);
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.stop();
        }
        let idle = std::mem::take(&mut self.state.get_mut().idle);
        close_all(idle.into_iter().map(|e| e.conn).collect());
    }
}

fn close_all(conns: Vec<Box<dyn Attachment>>) {
    for mut conn in conns {
        if let Err(err) = conn.detach() {
            tracing::warn!(target: "fbcore::pool", error = %err, "detach failed");
        }
    }
}

fn spawn_sweeper(inner: &Arc<PoolInner>, interval: Duration) -> Result<Sweeper> {
    let signal = Arc::new(StopSignal {
        stopped: Mutex::new(false),
        wake: Condvar::new(),
    });
    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    let thread_signal = Arc::clone(&signal);
    let thread = thread::Builder::new()
        .name("fbcore-pool-sweep".to_string())
        .spawn(move || loop {
            {
                let mut stopped = thread_signal.stopped.lock();
                if !*stopped {
                    thread_signal.wake.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    break;
                }
            }
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.sweep();
        })?;
    Ok(Sweeper { signal, thread })
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out from the pool.
///
/// When dropped, the connection is returned to the pool, or closed if it
/// was marked broken.
pub struct PooledConnection {
    conn: Option<Box<dyn Attachment>>,
    id: u64,
    pool: Arc<PoolInner>,
    broken: bool,
}

impl PooledConnection {
    pub fn attachment(&mut self) -> Result<&mut (dyn Attachment + 'static)> {
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(FbError::PoolError("connection already returned".to_string())),
        }
    }

    /// Close instead of reuse on return.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Mark the connection broken if `err` means it cannot be reused.
    pub fn observe_error(&mut self, err: &FbError) {
        if err.is_fatal_for_connection() {
            self.broken = true;
        }
    }

    /// Return the connection now.
    pub fn checkin(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken {
                self.pool.discard(self.id, conn);
            } else {
                self.pool.checkin(self.id, conn);
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("key", &self.pool.key)
            .field("returned", &self.conn.is_none())
            .field("broken", &self.broken)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Connection Pool
// ============================================================================

enum Acquire {
    Idle(IdleEntry),
    Create(u64),
    Timeout,
    Cleared,
}

/// Connection pool for one configuration key.
#[derive(Clone)]
pub struct FbPool {
    inner: Arc<PoolInner>,
}

impl FbPool {
    /// Create the pool, open its minimum population and start the sweep
    /// thread when a lifetime is configured.
    pub fn new(options: ConnectionOptions, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        options.validate()?;
        let config = FbPoolConfig::from_options(&options);
        let inner = Arc::new(PoolInner {
            key: options.key(),
            options,
            config,
            factory,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            next_id: AtomicU64::new(1),
            sweeper: Mutex::new(None),
            on_empty: Mutex::new(None),
        });

        for _ in 0..inner.config.min_size {
            let conn = inner.factory.connect(&inner.options)?;
            let id = inner.next_id();
            inner.state.lock().idle.push(IdleEntry {
                id,
                conn,
                created: Instant::now(),
            });
        }

        if let Some(interval) = inner.config.sweep_interval() {
            let sweeper = spawn_sweeper(&inner, interval)?;
            *inner.sweeper.lock() = Some(sweeper);
        }

        tracing::debug!(
            target: "fbcore::pool",
            min = inner.config.min_size,
            max = inner.config.max_size,
            lifetime_ms = inner.config.lifetime.as_millis() as u64,
            "pool created"
        );
        Ok(Self { inner })
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn config(&self) -> &FbPoolConfig {
        &self.inner.config
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    pub fn set_empty_callback(&self, callback: EmptyPoolCallback) {
        *self.inner.on_empty.lock() = Some(callback);
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.inner.state.lock().checked_out.len()
    }

    pub fn population(&self) -> usize {
        self.inner.state.lock().population()
    }

    pub fn is_cleared(&self) -> bool {
        self.inner.state.lock().cleared
    }

    /// Get a connection, waiting up to the configured timeout when the
    /// pool is at its maximum.
    pub fn checkout(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.config.timeout;

        loop {
            let mut evicted = Vec::new();
            let acquire = {
                let mut state = inner.state.lock();
                loop {
                    if state.cleared {
                        break Acquire::Cleared;
                    }
                    if let Some(entry) = inner.take_idle(&mut state, &mut evicted) {
                        break Acquire::Idle(entry);
                    }
                    if state.population() < inner.config.max_size {
                        state.creating += 1;
                        break Acquire::Create(inner.next_id());
                    }
                    if Instant::now() >= deadline {
                        break Acquire::Timeout;
                    }
                    inner.available.wait_until(&mut state, deadline);
                }
            };
            if !evicted.is_empty() {
                tracing::debug!(target: "fbcore::pool", evicted = evicted.len(), "evicted expired connections on checkout");
                close_all(evicted);
            }

            match acquire {
                Acquire::Idle(mut entry) => {
                    if entry.conn.verify() {
                        return Ok(self.guard(entry.id, entry.conn));
                    }
                    inner.discard(entry.id, entry.conn);
                }
                Acquire::Create(id) => {
                    let result = inner.factory.connect(&inner.options);
                    let mut state = inner.state.lock();
                    state.creating -= 1;
                    match result {
                        Ok(conn) => {
                            state.checked_out.insert(id);
                            drop(state);
                            tracing::debug!(target: "fbcore::pool", id, "opened pooled connection");
                            return Ok(self.guard(id, conn));
                        }
                        Err(err) => {
                            drop(state);
                            inner.available.notify_one();
                            return Err(err);
                        }
                    }
                }
                Acquire::Timeout => {
                    tracing::debug!(target: "fbcore::pool", timeout_ms = inner.config.timeout.as_millis() as u64, "checkout timed out");
                    return Err(FbError::PoolTimeout {
                        timeout: inner.config.timeout,
                    });
                }
                Acquire::Cleared => {
                    return Err(FbError::PoolError("pool has been cleared".to_string()));
                }
            }
        }
    }

    fn guard(&self, id: u64, conn: Box<dyn Attachment>) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            id,
            pool: Arc::clone(&self.inner),
            broken: false,
        }
    }

    /// Run one sweep now.
    pub fn sweep(&self) {
        self.inner.sweep();
    }

    /// Close idle connections, stop the sweep thread and fail every later
    /// checkout. Connections still checked out are closed on return.
    pub fn clear(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            state.cleared = true;
            std::mem::take(&mut state.idle)
        };
        self.inner.available.notify_all();
        close_all(idle.into_iter().map(|e| e.conn).collect());
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }
        tracing::debug!(target: "fbcore::pool", key = %self.inner.key, "pool cleared");
    }
}
