//! Transaction lifecycle.
//!
//! `Active -> Committed | RolledBack`. The retaining variants keep the
//! transaction active under a new generation. Statements register as
//! observers and are told when the transaction terminates so they can drop
//! handles scoped to it.

use std::sync::Weak;

use super::attachment::{Attachment, Handle};
use super::parameter::*;
use crate::error::{FbError, Result};

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Table-level consistency.
    Serializable,
    /// Snapshot.
    RepeatableRead,
    #[default]
    ReadCommitted,
    /// Read committed without record versions: waits on uncommitted writes.
    ReadCommittedNoVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReservation {
    pub table: String,
    pub write: bool,
    pub shared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    pub wait: bool,
    /// Seconds to wait on a lock conflict; ignored in no-wait mode.
    pub lock_timeout: Option<i32>,
    pub read_only: bool,
    pub no_auto_undo: bool,
    pub reservations: Vec<TableReservation>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            wait: true,
            lock_timeout: None,
            read_only: false,
            no_auto_undo: false,
            reservations: Vec::new(),
        }
    }
}

impl TransactionOptions {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            ..Default::default()
        }
    }

    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn lock_timeout(mut self, seconds: i32) -> Self {
        self.lock_timeout = Some(seconds);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn reserve(mut self, table: &str, write: bool, shared: bool) -> Self {
        self.reservations.push(TableReservation {
            table: table.to_string(),
            write,
            shared,
        });
        self
    }

    pub fn to_tpb(&self) -> Result<ParameterBuffer> {
        let mut tpb = ParameterBuffer::transaction();
        match self.isolation {
            IsolationLevel::Serializable => {
                tpb.append(ISC_TPB_CONSISTENCY);
            }
            IsolationLevel::RepeatableRead => {
                tpb.append(ISC_TPB_CONCURRENCY);
            }
            IsolationLevel::ReadCommitted => {
                tpb.append(ISC_TPB_READ_COMMITTED).append(ISC_TPB_REC_VERSION);
            }
            IsolationLevel::ReadCommittedNoVersion => {
                tpb.append(ISC_TPB_READ_COMMITTED).append(ISC_TPB_NO_REC_VERSION);
            }
        }
        tpb.append(if self.read_only { ISC_TPB_READ } else { ISC_TPB_WRITE });
        if self.wait {
            tpb.append(ISC_TPB_WAIT);
            if let Some(timeout) = self.lock_timeout {
                tpb.append_int(ISC_TPB_LOCK_TIMEOUT, timeout);
            }
        } else {
            tpb.append(ISC_TPB_NOWAIT);
        }
        for r in &self.reservations {
            let tag = if r.write { ISC_TPB_LOCK_WRITE } else { ISC_TPB_LOCK_READ };
            tpb.append_string(tag, &r.table)?;
            tpb.append(if r.shared { ISC_TPB_SHARED } else { ISC_TPB_PROTECTED });
        }
        if self.no_auto_undo {
            tpb.append(ISC_TPB_NO_AUTO_UNDO);
        }
        Ok(tpb)
    }
}

// ============================================================================
// Observers
// ============================================================================

/// Notified once when a transaction commits or rolls back.
pub trait TransactionObserver: Send + Sync {
    fn transaction_ended(&self, transaction: Handle);
}

// ============================================================================
// Transaction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

pub struct Transaction {
    handle: Handle,
    state: TransactionState,
    generation: u32,
    observers: Vec<Weak<dyn TransactionObserver>>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Transaction {
    pub fn begin(att: &mut dyn Attachment, options: &TransactionOptions) -> Result<Self> {
        let tpb = options.to_tpb()?;
        Self::begin_with(att, &tpb)
    }

    pub fn begin_with(att: &mut dyn Attachment, tpb: &ParameterBuffer) -> Result<Self> {
        let handle = att.start_transaction(tpb.as_bytes())?;
        tracing::debug!(target: "fbcore::transaction", handle, "transaction started");
        Ok(Self {
            handle,
            state: TransactionState::Active,
            generation: 0,
            observers: Vec::new(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Incremented by every retaining commit or rollback.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Register a dependent; dead observers are pruned on each call.
    pub fn register(&mut self, observer: Weak<dyn TransactionObserver>) {
        self.observers.retain(|o| o.strong_count() > 0);
        if !self.observers.iter().any(|o| o.ptr_eq(&observer)) {
            self.observers.push(observer);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.iter().filter(|o| o.strong_count() > 0).count()
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(FbError::StateError(format!(
                "cannot {} transaction {} in state {:?}",
                operation, self.handle, self.state
            )))
        }
    }

    pub fn commit(&mut self, att: &mut dyn Attachment) -> Result<()> {
        self.ensure_active("commit")?;
        att.commit(self.handle)?;
        self.terminate(TransactionState::Committed);
        Ok(())
    }

    pub fn commit_retaining(&mut self, att: &mut dyn Attachment) -> Result<()> {
        self.ensure_active("commit retaining")?;
        att.commit_retaining(self.handle)?;
        self.generation += 1;
        tracing::debug!(target: "fbcore::transaction", handle = self.handle, generation = self.generation, "commit retaining");
        Ok(())
    }

    pub fn rollback(&mut self, att: &mut dyn Attachment) -> Result<()> {
        self.ensure_active("rollback")?;
        att.rollback(self.handle)?;
        self.terminate(TransactionState::RolledBack);
        Ok(())
    }

    pub fn rollback_retaining(&mut self, att: &mut dyn Attachment) -> Result<()> {
        self.ensure_active("rollback retaining")?;
        att.rollback_retaining(self.handle)?;
        self.generation += 1;
        tracing::debug!(target: "fbcore::transaction", handle = self.handle, generation = self.generation, "rollback retaining");
        Ok(())
    }

    fn terminate(&mut self, state: TransactionState) {
        self.state = state;
        tracing::debug!(target: "fbcore::transaction", handle = self.handle, ?state, "transaction terminated");
        for observer in self.observers.drain(..) {
            if let Some(observer) = observer.upgrade() {
                observer.transaction_ended(self.handle);
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::warn!(target: "fbcore::transaction", handle = self.handle, "transaction dropped while active");
        }
    }
}
