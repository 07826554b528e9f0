//! Protocol data layer for the GDS wire family.
//!
//! This module turns typed values and administrative requests into the
//! byte buffers a transport sends, and decodes what comes back:
//! - Encodes parameter buffers and the message-layout opcode stream
//! - Streams blobs in segments and arrays as whole slices
//! - Drives statement and transaction state machines
//! - Pools attachments per configuration
//!
//! Architecture:
//! - `protocol`: Info-stream constants, reader and truncation retry
//! - `parameter`: DPB/TPB/SPB/EPB builders
//! - `charset`, `types`: Wire types and value conversion
//! - `descriptor`: Row shapes and the native message codec
//! - `attachment`: Backend traits the transport implements
//! - `transaction`, `statement`: Lifecycles over an attachment
//! - `blob`, `array`: Large-object streaming
//! - `services`: Administrative actions and info decoding
//! - `events`: Event count subscriptions
//! - `connection`, `pool`: Connection options and the blocking pool

pub mod protocol;
pub mod parameter;
pub mod charset;
pub mod types;
pub mod descriptor;
pub mod attachment;
pub mod transaction;
pub mod statement;
pub mod blob;
pub mod array;
pub mod services;
pub mod events;
pub mod connection;
pub mod pool;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(test)]
mod tests;

// Public API re-exports for library consumers
pub use attachment::{Attachment, FetchBatch, Handle, QuadId, Segment, SegmentStatus, ServiceManager};
#[allow(unused_imports)]
pub use array::{ArrayBound, ArrayDesc, ArrayHandle};
pub use blob::Blob;
pub use charset::Charset;
pub use connection::{ConnectionFactory, ConnectionOptions};
#[allow(unused_imports)]
pub use descriptor::{Descriptor, FieldDescriptor};
pub use events::EventSubscription;
pub use parameter::ParameterBuffer;
pub use pool::{FbPool, FbPoolConfig, PooledConnection};
#[allow(unused_imports)]
pub use services::{ServiceAction, ServiceClient, ServiceOptions};
pub use statement::{Statement, StatementKind, StatementState};
pub use transaction::{IsolationLevel, Transaction, TransactionOptions};
pub use types::{DbArray, DbDataType, DbValue};
