//! Wire constants and info-buffer decoding.
//!
//! Info responses are self-describing streams of `tag, length(2 LE), value`
//! items terminated by `isc_info_end`. Integers inside them are
//! "VAX integers": little-endian, as wide as their declared length.

use crate::error::{FbError, Result};

// ============================================================================
// Structural info codes
// ============================================================================

pub const ISC_INFO_END: u8 = 1;
pub const ISC_INFO_TRUNCATED: u8 = 2;
pub const ISC_INFO_ERROR: u8 = 3;
pub const ISC_INFO_DATA_NOT_READY: u8 = 4;
pub const ISC_INFO_FLAG_END: u8 = 127;

// ============================================================================
// Message layout language
// ============================================================================

pub const BLR_VERSION5: u8 = 5;
pub const BLR_BEGIN: u8 = 2;
pub const BLR_MESSAGE: u8 = 4;
pub const BLR_EOC: u8 = 76;
pub const BLR_END: u8 = 255;

pub const BLR_TEXT: u8 = 14;
pub const BLR_TEXT2: u8 = 15;
pub const BLR_SHORT: u8 = 7;
pub const BLR_LONG: u8 = 8;
pub const BLR_QUAD: u8 = 9;
pub const BLR_INT64: u8 = 16;
pub const BLR_FLOAT: u8 = 10;
pub const BLR_DOUBLE: u8 = 27;
pub const BLR_D_FLOAT: u8 = 11;
pub const BLR_TIMESTAMP: u8 = 35;
pub const BLR_VARYING: u8 = 37;
pub const BLR_VARYING2: u8 = 38;
pub const BLR_CSTRING: u8 = 40;
pub const BLR_CSTRING2: u8 = 41;
pub const BLR_BLOB_ID: u8 = 45;
pub const BLR_SQL_DATE: u8 = 12;
pub const BLR_SQL_TIME: u8 = 13;
pub const BLR_BOOL: u8 = 23;
pub const BLR_BLOB: i32 = 261;

// ============================================================================
// Statement info items
// ============================================================================

pub const ISC_INFO_SQL_SELECT: u8 = 4;
pub const ISC_INFO_SQL_BIND: u8 = 5;
pub const ISC_INFO_SQL_NUM_VARIABLES: u8 = 6;
pub const ISC_INFO_SQL_DESCRIBE_VARS: u8 = 7;
pub const ISC_INFO_SQL_DESCRIBE_END: u8 = 8;
pub const ISC_INFO_SQL_SQLDA_SEQ: u8 = 9;
pub const ISC_INFO_SQL_MESSAGE_SEQ: u8 = 10;
pub const ISC_INFO_SQL_TYPE: u8 = 11;
pub const ISC_INFO_SQL_SUB_TYPE: u8 = 12;
pub const ISC_INFO_SQL_SCALE: u8 = 13;
pub const ISC_INFO_SQL_LENGTH: u8 = 14;
pub const ISC_INFO_SQL_NULL_IND: u8 = 15;
pub const ISC_INFO_SQL_FIELD: u8 = 16;
pub const ISC_INFO_SQL_RELATION: u8 = 17;
pub const ISC_INFO_SQL_OWNER: u8 = 18;
pub const ISC_INFO_SQL_ALIAS: u8 = 19;
pub const ISC_INFO_SQL_SQLDA_START: u8 = 20;
pub const ISC_INFO_SQL_STMT_TYPE: u8 = 21;
pub const ISC_INFO_SQL_GET_PLAN: u8 = 22;
pub const ISC_INFO_SQL_RECORDS: u8 = 23;

pub const ISC_INFO_REQ_SELECT_COUNT: u8 = 13;
pub const ISC_INFO_REQ_INSERT_COUNT: u8 = 14;
pub const ISC_INFO_REQ_UPDATE_COUNT: u8 = 15;
pub const ISC_INFO_REQ_DELETE_COUNT: u8 = 16;

// ============================================================================
// Statement free options
// ============================================================================

/// `op_free_statement` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FreeOption {
    /// Close the open cursor, keep the prepared form.
    Close = 1,
    /// Drop the statement handle.
    Drop = 2,
    /// Unprepare without dropping the handle.
    Unprepare = 4,
}

// ============================================================================
// VAX integers
// ============================================================================

/// Decode a little-endian integer of 1..=8 bytes.
pub fn vax_integer(bytes: &[u8]) -> i64 {
    let mut value: i64 = 0;
    for (shift, b) in bytes.iter().take(8).enumerate() {
        value += (*b as i64) << (shift * 8);
    }
    value
}

/// Encode a 16-bit length in the stream's byte order.
#[inline]
pub fn vax_u16(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

// ============================================================================
// Info stream reader
// ============================================================================

/// Cursor over an info response. Every read advances the offset by exactly
/// the bytes consumed so nested records stay in sync with the outer stream.
#[derive(Debug, Clone)]
pub struct InfoReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> InfoReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Next tag byte, or `isc_info_end` once the buffer is exhausted.
    pub fn read_tag(&mut self) -> u8 {
        match self.buf.get(self.pos) {
            Some(tag) => {
                self.pos += 1;
                *tag
            }
            None => ISC_INFO_END,
        }
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(FbError::ProtocolError(format!(
                "info buffer underflow at offset {}: needed {} bytes, {} available",
                self.pos,
                len,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Two-byte little-endian length.
    pub fn read_length(&mut self) -> Result<usize> {
        Ok(vax_integer(self.read_bytes(2)?) as usize)
    }

    /// Fixed-width little-endian integer.
    pub fn read_int(&mut self, len: usize) -> Result<i64> {
        Ok(vax_integer(self.read_bytes(len)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_int(4)? as i32)
    }

    /// Length-prefixed integer item body.
    pub fn read_prefixed_int(&mut self) -> Result<i64> {
        let len = self.read_length()?;
        self.read_int(len)
    }

    /// Length-prefixed byte item body.
    pub fn read_prefixed_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_length()?;
        self.read_bytes(len)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Skip a length-prefixed item body.
    pub fn skip_item(&mut self) -> Result<()> {
        let len = self.read_length()?;
        self.skip(len)
    }
}

/// True when the server flagged the response as cut short.
pub fn is_truncated(buf: &[u8]) -> bool {
    buf.first() == Some(&ISC_INFO_TRUNCATED)
}

/// How many times a truncated info response is re-requested.
pub const MAX_TRUNCATION_RETRIES: u32 = 4;

/// Issue an info request, doubling the buffer while `parse` reports
/// truncation (`Ok(None)`), at most [`MAX_TRUNCATION_RETRIES`] times.
pub fn request_info<T>(
    initial_length: usize,
    mut request: impl FnMut(usize) -> Result<Vec<u8>>,
    mut parse: impl FnMut(&[u8]) -> Result<Option<T>>,
) -> Result<T> {
    let mut length = initial_length;
    for attempt in 0..=MAX_TRUNCATION_RETRIES {
        let buf = request(length)?;
        if let Some(value) = parse(&buf)? {
            return Ok(value);
        }
        tracing::debug!(
            target: "fbcore::protocol",
            attempt,
            length,
            "info response truncated, retrying with a larger buffer"
        );
        length *= 2;
    }
    Err(FbError::Truncated {
        attempts: MAX_TRUNCATION_RETRIES + 1,
    })
}
