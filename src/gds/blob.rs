//! Segmented blob streaming.
//!
//! A blob is read by opening it and pulling segments until the server
//! reports end of stream, and written by creating it and pushing chunks of
//! at most one segment. Any failure between open/create and close cancels
//! the server-side handle before the error is returned.

use std::ops::{Deref, DerefMut};

use super::attachment::{Attachment, Handle, QuadId, SegmentStatus};
use super::charset::Charset;
use super::transaction::Transaction;
use crate::error::Result;

/// Largest segment the wire length field can carry.
pub const MAX_SEGMENT_SIZE: usize = u16::MAX as usize;

/// Cancels an open blob on drop unless disarmed.
struct CancelOnError<'a> {
    att: &'a mut dyn Attachment,
    blob: Handle,
    armed: bool,
}

impl<'a> CancelOnError<'a> {
    fn new(att: &'a mut dyn Attachment, blob: Handle) -> Self {
        Self {
            att,
            blob,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<'a> Deref for CancelOnError<'a> {
    type Target = dyn Attachment + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.att
    }
}

impl<'a> DerefMut for CancelOnError<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.att
    }
}

impl Drop for CancelOnError<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(target: "fbcore::blob", blob = self.blob, "cancelling blob after failure");
        if let Err(err) = self.att.cancel_blob(self.blob) {
            tracing::warn!(target: "fbcore::blob", blob = self.blob, error = %err, "blob cancel failed");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    /// No server handle yet.
    Created,
    Open,
    Closed,
}

#[derive(Debug)]
pub struct Blob {
    id: QuadId,
    transaction: Handle,
    charset: Charset,
    segment_size: usize,
    state: BlobState,
}

impl Blob {
    /// A blob bound to `transaction`, addressing `id` (0 for a new blob).
    pub fn new(att: &dyn Attachment, transaction: &Transaction, id: QuadId) -> Self {
        Self {
            id,
            transaction: transaction.handle(),
            charset: att.charset(),
            segment_size: att.packet_size().clamp(1, MAX_SEGMENT_SIZE),
            state: BlobState::Created,
        }
    }

    pub fn id(&self) -> QuadId {
        self.id
    }

    pub fn state(&self) -> BlobState {
        self.state
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub fn set_segment_size(&mut self, size: usize) {
        self.segment_size = size.clamp(1, MAX_SEGMENT_SIZE);
    }

    pub fn set_charset(&mut self, charset: Charset) {
        self.charset = charset;
    }

    /// Read the whole blob.
    pub fn read(&mut self, att: &mut dyn Attachment) -> Result<Vec<u8>> {
        let handle = att.open_blob(self.transaction, self.id)?;
        self.state = BlobState::Open;
        let result = Self::read_segments(CancelOnError::new(att, handle), handle, self.segment_size);
        self.state = BlobState::Closed;
        result
    }

    fn read_segments(
        mut att: CancelOnError<'_>,
        handle: Handle,
        segment_size: usize,
    ) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let segment = att.get_segment(handle, segment_size)?;
            tracing::trace!(
                target: "fbcore::blob",
                blob = handle,
                bytes = segment.data.len(),
                status = ?segment.status,
                "segment received"
            );
            data.extend_from_slice(&segment.data);
            if segment.status == SegmentStatus::Eof {
                break;
            }
        }
        att.close_blob(handle)?;
        att.disarm();
        Ok(data)
    }

    /// Read the whole blob as text in the blob's charset.
    pub fn read_string(&mut self, att: &mut dyn Attachment) -> Result<String> {
        let bytes = self.read(att)?;
        Ok(self.charset.decode(&bytes))
    }

    /// Write `data` as a new blob and return its id.
    pub fn write(&mut self, att: &mut dyn Attachment, data: &[u8]) -> Result<QuadId> {
        let (handle, id) = att.create_blob(self.transaction)?;
        self.state = BlobState::Open;
        let result = Self::write_segments(CancelOnError::new(att, handle), handle, self.segment_size, data);
        self.state = BlobState::Closed;
        result?;
        self.id = id;
        tracing::debug!(target: "fbcore::blob", blob_id = id, bytes = data.len(), "blob written");
        Ok(id)
    }

    fn write_segments(
        mut att: CancelOnError<'_>,
        handle: Handle,
        segment_size: usize,
        data: &[u8],
    ) -> Result<()> {
        for chunk in data.chunks(segment_size) {
            att.put_segment(handle, chunk)?;
            tracing::trace!(target: "fbcore::blob", blob = handle, bytes = chunk.len(), "segment sent");
        }
        att.close_blob(handle)?;
        att.disarm();
        Ok(())
    }

    pub fn write_string(&mut self, att: &mut dyn Attachment, text: &str) -> Result<QuadId> {
        let bytes = self.charset.encode(text);
        self.write(att, &bytes)
    }
}
