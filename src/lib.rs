//! fbcore - protocol data layer and connection pool for a Firebird-family
//! database driver.
//!
//! The transport is not part of this crate. A backend implements
//! [`gds::Attachment`], [`gds::ServiceManager`] and
//! [`gds::ConnectionFactory`]; everything above those traits (parameter
//! buffers, value conversion, statement and transaction lifecycles, blob
//! and array streaming, services, events, pooling) lives here.
//!
//! Logging goes through `tracing` under `fbcore::*` targets. No subscriber
//! is installed.

pub mod error;
pub mod gds;
pub mod pool;

pub use error::{FbError, Result};
pub use gds::{
    Attachment, Blob, Charset, ConnectionFactory, ConnectionOptions, DbArray, DbDataType, DbValue,
    EventSubscription, FbPool, FbPoolConfig, IsolationLevel, PooledConnection, ServiceClient,
    ServiceManager, Statement, Transaction, TransactionOptions,
};
pub use pool::{Connection, PoolManager};
