//! # Pending Echo
//!
//! Single-slot holder for the next report to send. A newer delta overwrites
//! an unsent echo; this is a slot, not a queue.
//!
//! ```text
//!   on_delta ──store──►  [ buf | len | token | pending ]  ──take──► send_report
//!                         ▲ overwrite drops the older echo
//! ```

use restswitch_core::{CodecResult, ReportBuilder};

use crate::transport::EchoReport;

/// Fixed-capacity buffer holding at most one unsent report.
#[derive(Debug)]
pub struct PendingEcho {
    buf: Box<[u8]>,
    len: usize,
    client_token: String,
    pending: bool,
}

impl PendingEcho {
    /// `capacity` includes the terminator byte.
    pub fn with_capacity(capacity: usize) -> Self {
        PendingEcho {
            buf: vec![0; capacity].into_boxed_slice(),
            len: 0,
            client_token: String::new(),
            pending: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Builds a report for `delta` into the slot.
    ///
    /// Returns whether an unsent echo was overwritten. Any unsent echo is
    /// discarded before building, so on failure the slot is empty.
    pub fn store(&mut self, builder: &mut ReportBuilder, delta: &[u8]) -> CodecResult<bool> {
        let replaced = std::mem::replace(&mut self.pending, false);
        let built = builder.build(delta, &mut self.buf)?;

        self.len = built.len;
        self.client_token = built.client_token;
        self.pending = true;

        Ok(replaced)
    }

    /// Clears the pending flag and returns the report to send, if any.
    pub fn take(&mut self) -> Option<EchoReport<'_>> {
        if !self.pending {
            return None;
        }
        self.pending = false;

        Some(EchoReport {
            document: &self.buf[..self.len],
            client_token: &self.client_token,
        })
    }
}
