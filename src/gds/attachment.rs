//! Backend contracts consumed by the core.
//!
//! A transport implements these traits over its own framing. Every call
//! is one request/response round-trip; buffers passed in are already
//! encoded by the core and buffers returned are raw server responses.

use super::charset::Charset;
use super::protocol::FreeOption;
use crate::error::Result;

/// Server-side object handle.
pub type Handle = u32;

/// Blob or array id as stored in a row.
pub type QuadId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    /// A whole segment was delivered.
    Complete,
    /// The segment was longer than the requested size; more follows.
    Partial,
    /// No more data.
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub data: Vec<u8>,
    pub status: SegmentStatus,
}

/// One round of rows from an open cursor, as native messages.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub rows: Vec<Vec<u8>>,
    pub end_of_cursor: bool,
}

/// An open database attachment.
pub trait Attachment: Send {
    fn packet_size(&self) -> usize;
    fn charset(&self) -> Charset;
    fn dialect(&self) -> u16;

    fn detach(&mut self) -> Result<()>;

    /// Cheap liveness probe; `false` means the attachment must be discarded.
    fn verify(&mut self) -> bool;

    fn database_info(&mut self, items: &[u8], buffer_length: usize) -> Result<Vec<u8>>;

    // Transactions
    fn start_transaction(&mut self, tpb: &[u8]) -> Result<Handle>;
    fn commit(&mut self, transaction: Handle) -> Result<()>;
    fn commit_retaining(&mut self, transaction: Handle) -> Result<()>;
    fn rollback(&mut self, transaction: Handle) -> Result<()>;
    fn rollback_retaining(&mut self, transaction: Handle) -> Result<()>;

    // Statements
    fn allocate_statement(&mut self) -> Result<Handle>;

    /// Prepare `sql` and return the info response for `items`.
    fn prepare(
        &mut self,
        transaction: Handle,
        statement: Handle,
        sql: &str,
        dialect: u16,
        items: &[u8],
        buffer_length: usize,
    ) -> Result<Vec<u8>>;

    fn statement_info(
        &mut self,
        statement: Handle,
        items: &[u8],
        buffer_length: usize,
    ) -> Result<Vec<u8>>;

    /// Execute with one input message. Returns the singleton output
    /// message when `output_layout` is non-empty.
    fn execute(
        &mut self,
        transaction: Handle,
        statement: Handle,
        input_layout: &[u8],
        input_message: &[u8],
        output_layout: &[u8],
    ) -> Result<Option<Vec<u8>>>;

    fn fetch(
        &mut self,
        statement: Handle,
        output_layout: &[u8],
        fetch_size: usize,
    ) -> Result<FetchBatch>;

    fn free_statement(&mut self, statement: Handle, option: FreeOption) -> Result<()>;

    // Blobs
    fn create_blob(&mut self, transaction: Handle) -> Result<(Handle, QuadId)>;
    fn open_blob(&mut self, transaction: Handle, blob_id: QuadId) -> Result<Handle>;
    fn get_segment(&mut self, blob: Handle, max_length: usize) -> Result<Segment>;
    fn put_segment(&mut self, blob: Handle, data: &[u8]) -> Result<()>;
    fn close_blob(&mut self, blob: Handle) -> Result<()>;
    fn cancel_blob(&mut self, blob: Handle) -> Result<()>;

    // Arrays
    fn get_slice(
        &mut self,
        transaction: Handle,
        array_id: QuadId,
        sdl: &[u8],
        slice_length: usize,
    ) -> Result<Vec<u8>>;

    /// Store a whole slice; returns the id of the written array.
    fn put_slice(
        &mut self,
        transaction: Handle,
        array_id: QuadId,
        sdl: &[u8],
        slice: &[u8],
    ) -> Result<QuadId>;

    // Events
    fn queue_events(&mut self, epb: &[u8]) -> Result<Handle>;
    fn cancel_events(&mut self, event: Handle) -> Result<()>;
}

/// An attachment to the services manager.
pub trait ServiceManager: Send {
    fn attach(&mut self, service: &str, spb: &[u8]) -> Result<()>;
    fn detach(&mut self) -> Result<()>;
    fn start(&mut self, spb: &[u8]) -> Result<()>;
    fn query(&mut self, send_spb: &[u8], items: &[u8], buffer_length: usize) -> Result<Vec<u8>>;
}
