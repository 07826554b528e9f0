//! Database event subscriptions.
//!
//! The server is sent the last-seen count of each event name and answers
//! once any count moves past it. Each answer is compared with the previous
//! counts; only names that grew are reported, and the subscription is
//! re-queued at once with the new counts.

use super::attachment::{Attachment, Handle};
use super::charset::Charset;
use super::parameter::{ParameterBuffer, EPB_VERSION1};
use super::protocol::InfoReader;
use crate::error::{FbError, Result};

/// Names one event parameter buffer can carry.
pub const MAX_EVENTS_PER_BUFFER: usize = 15;

#[derive(Debug)]
pub struct EventSubscription {
    names: Vec<String>,
    counts: Vec<i32>,
    charset: Charset,
    handle: Option<Handle>,
    baseline: bool,
}

impl EventSubscription {
    pub fn new<S: AsRef<str>>(names: &[S], charset: Charset) -> Result<Self> {
        if names.is_empty() || names.len() > MAX_EVENTS_PER_BUFFER {
            return Err(FbError::ConfigError(format!(
                "an event subscription takes 1 to {} names, got {}",
                MAX_EVENTS_PER_BUFFER,
                names.len()
            )));
        }
        Ok(Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            counts: vec![0; names.len()],
            charset,
            handle: None,
            baseline: false,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn counts(&self) -> &[i32] {
        &self.counts
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn is_queued(&self) -> bool {
        self.handle.is_some()
    }

    pub fn to_epb(&self) -> Result<ParameterBuffer> {
        let mut epb = ParameterBuffer::event(self.charset);
        for (name, count) in self.names.iter().zip(&self.counts) {
            epb.append_event(name, *count)?;
        }
        Ok(epb)
    }

    /// Register interest with the server using the current counts.
    pub fn queue(&mut self, att: &mut dyn Attachment) -> Result<Handle> {
        let epb = self.to_epb()?;
        let handle = att.queue_events(epb.as_bytes())?;
        self.handle = Some(handle);
        tracing::debug!(target: "fbcore::events", handle, events = self.names.len(), "events queued");
        Ok(handle)
    }

    pub fn cancel(&mut self, att: &mut dyn Attachment) -> Result<()> {
        match self.handle.take() {
            Some(handle) => att.cancel_events(handle),
            None => Ok(()),
        }
    }

    /// Process one delivery and re-queue. Returns each name whose count
    /// grew together with the increase; the first delivery only records
    /// the baseline.
    pub fn handle_notification(
        &mut self,
        att: &mut dyn Attachment,
        buf: &[u8],
    ) -> Result<Vec<(String, i32)>> {
        self.handle = None;
        let current = self.parse_counts(buf)?;

        let mut fired = Vec::new();
        if self.baseline {
            for (i, (now, before)) in current.iter().zip(&self.counts).enumerate() {
                if now > before {
                    fired.push((self.names[i].clone(), now - before));
                }
            }
        }
        self.counts = current;
        self.baseline = true;

        if !fired.is_empty() {
            tracing::debug!(target: "fbcore::events", fired = fired.len(), "event counts advanced");
        }
        self.queue(att)?;
        Ok(fired)
    }

    /// Counts in subscription order; names missing from `buf` keep their
    /// previous count.
    fn parse_counts(&self, buf: &[u8]) -> Result<Vec<i32>> {
        let mut counts = self.counts.clone();
        let mut reader = InfoReader::new(buf);
        if reader.read_u8()? != EPB_VERSION1 {
            return Err(FbError::ProtocolError("unknown event buffer version".to_string()));
        }
        while !reader.is_empty() {
            let len = reader.read_u8()? as usize;
            let name = self.charset.decode(reader.read_bytes(len)?);
            let count = reader.read_i32()?;
            if let Some(i) = self.names.iter().position(|n| *n == name) {
                counts[i] = count;
            }
        }
        Ok(counts)
    }
}
