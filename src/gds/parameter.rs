//! Parameter buffers (DPB, TPB, SPB, EPB).
//!
//! A parameter buffer is a version byte followed by tagged items. All
//! flavors share one encoder; they differ in their version prefix and in
//! the width of explicit lengths:
//!
//! | flavor          | prefix   | string length | int item            |
//! |-----------------|----------|---------------|---------------------|
//! | database attach | `1`      | 1 byte        | `tag, 4, i32 LE`    |
//! | transaction     | `3`      | 1 byte        | `tag, 4, i32 LE`    |
//! | service attach  | `2, 2`   | 1 byte        | `tag, 4, i32 LE`    |
//! | service start   | none     | 2 bytes LE    | `tag, i32 LE`       |
//! | event           | `1`      | 1 byte        | `len, name, i32 LE` |
//!
//! Tag legality is not checked here; the server rejects bad combinations.

use bytes::{BufMut, Bytes, BytesMut};

use super::charset::Charset;
use crate::error::{FbError, Result};

// ============================================================================
// Version prefixes
// ============================================================================

pub const ISC_DPB_VERSION1: u8 = 1;
pub const ISC_TPB_VERSION3: u8 = 3;
pub const ISC_SPB_VERSION: u8 = 2;
pub const ISC_SPB_CURRENT_VERSION: u8 = 2;
pub const EPB_VERSION1: u8 = 1;

// ============================================================================
// Database attach items
// ============================================================================

pub const ISC_DPB_PAGE_SIZE: u8 = 4;
pub const ISC_DPB_NUM_BUFFERS: u8 = 5;
pub const ISC_DPB_DUMMY_PACKET_INTERVAL: u8 = 58;
pub const ISC_DPB_SQL_ROLE_NAME: u8 = 60;
pub const ISC_DPB_SQL_DIALECT: u8 = 63;
pub const ISC_DPB_SET_DB_CHARSET: u8 = 68;
pub const ISC_DPB_USER_NAME: u8 = 28;
pub const ISC_DPB_PASSWORD: u8 = 29;
pub const ISC_DPB_LC_CTYPE: u8 = 48;
pub const ISC_DPB_CONNECT_TIMEOUT: u8 = 57;
pub const ISC_DPB_PROCESS_NAME: u8 = 74;
pub const ISC_DPB_PROCESS_ID: u8 = 71;

// ============================================================================
// Transaction items
// ============================================================================

pub const ISC_TPB_CONSISTENCY: u8 = 1;
pub const ISC_TPB_CONCURRENCY: u8 = 2;
pub const ISC_TPB_SHARED: u8 = 3;
pub const ISC_TPB_PROTECTED: u8 = 4;
pub const ISC_TPB_EXCLUSIVE: u8 = 5;
pub const ISC_TPB_WAIT: u8 = 6;
pub const ISC_TPB_NOWAIT: u8 = 7;
pub const ISC_TPB_READ: u8 = 8;
pub const ISC_TPB_WRITE: u8 = 9;
pub const ISC_TPB_LOCK_READ: u8 = 10;
pub const ISC_TPB_LOCK_WRITE: u8 = 11;
pub const ISC_TPB_READ_COMMITTED: u8 = 15;
pub const ISC_TPB_REC_VERSION: u8 = 17;
pub const ISC_TPB_NO_REC_VERSION: u8 = 18;
pub const ISC_TPB_NO_AUTO_UNDO: u8 = 20;
pub const ISC_TPB_LOCK_TIMEOUT: u8 = 21;

/// Which kind of buffer is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    DatabaseAttach,
    Transaction,
    ServiceAttach,
    ServiceStart,
    Event,
}

impl BufferKind {
    fn wide_lengths(self) -> bool {
        self == BufferKind::ServiceStart
    }
}

/// A growable tagged parameter list.
#[derive(Debug, Clone)]
pub struct ParameterBuffer {
    kind: BufferKind,
    charset: Charset,
    buf: BytesMut,
}

impl ParameterBuffer {
    fn with_prefix(kind: BufferKind, charset: Charset, prefix: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(prefix);
        Self { kind, charset, buf }
    }

    /// Database-attach buffer. Strings use the connection charset.
    pub fn database(charset: Charset) -> Self {
        Self::with_prefix(BufferKind::DatabaseAttach, charset, &[ISC_DPB_VERSION1])
    }

    pub fn transaction() -> Self {
        Self::with_prefix(BufferKind::Transaction, Charset::Utf8, &[ISC_TPB_VERSION3])
    }

    /// Service-attach buffer. Administrative buffers always carry UTF-8.
    pub fn service_attach() -> Self {
        Self::with_prefix(
            BufferKind::ServiceAttach,
            Charset::Utf8,
            &[ISC_SPB_VERSION, ISC_SPB_CURRENT_VERSION],
        )
    }

    /// Service-start buffer; the first item is the action code.
    pub fn service_start() -> Self {
        Self::with_prefix(BufferKind::ServiceStart, Charset::Utf8, &[])
    }

    pub fn event(charset: Charset) -> Self {
        Self::with_prefix(BufferKind::Event, charset, &[EPB_VERSION1])
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    // ========================================================================
    // Appends
    // ========================================================================

    /// Bare tag with no value.
    pub fn append(&mut self, tag: u8) -> &mut Self {
        self.buf.put_u8(tag);
        self
    }

    pub fn append_byte(&mut self, tag: u8, value: u8) -> &mut Self {
        self.buf.put_u8(tag);
        if !self.kind.wide_lengths() {
            self.buf.put_u8(1);
        }
        self.buf.put_u8(value);
        self
    }

    pub fn append_short(&mut self, tag: u8, value: i16) -> &mut Self {
        self.buf.put_u8(tag);
        if !self.kind.wide_lengths() {
            self.buf.put_u8(2);
        }
        self.buf.put_i16_le(value);
        self
    }

    pub fn append_int(&mut self, tag: u8, value: i32) -> &mut Self {
        self.buf.put_u8(tag);
        if !self.kind.wide_lengths() {
            self.buf.put_u8(4);
        }
        self.buf.put_i32_le(value);
        self
    }

    pub fn append_string(&mut self, tag: u8, value: &str) -> Result<&mut Self> {
        let bytes = self.charset.encode(value);
        self.append_bytes(tag, &bytes)
    }

    pub fn append_bytes(&mut self, tag: u8, value: &[u8]) -> Result<&mut Self> {
        let limit = if self.kind.wide_lengths() {
            u16::MAX as usize
        } else {
            u8::MAX as usize
        };
        if value.len() > limit {
            return Err(FbError::ConfigError(format!(
                "parameter value too long: {} bytes",
                value.len()
            )));
        }
        self.buf.put_u8(tag);
        if self.kind.wide_lengths() {
            self.buf.put_u16_le(value.len() as u16);
        } else {
            self.buf.put_u8(value.len() as u8);
        }
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Event registration: `name length, name, last seen count`.
    pub fn append_event(&mut self, name: &str, count: i32) -> Result<&mut Self> {
        let bytes = self.charset.encode(name);
        if bytes.len() > u8::MAX as usize {
            return Err(FbError::ConfigError(format!(
                "event name too long: {} bytes",
                bytes.len()
            )));
        }
        self.buf.put_u8(bytes.len() as u8);
        self.buf.put_slice(&bytes);
        self.buf.put_i32_le(count);
        Ok(self)
    }

    // ========================================================================
    // Serialize
    // ========================================================================

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}
