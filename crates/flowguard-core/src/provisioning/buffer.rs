use alloc::string::String;

use super::{END_MARKER, START_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Nothing buffered.
    Idle,
    /// A transfer is in progress.
    Accumulating,
}

/// Result of feeding one write into a [`PendingWriteBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Start marker: any partial value was discarded.
    Started,
    /// Payload appended to the pending value.
    Appended,
    /// End marker: the pending value is complete and must be persisted.
    Committed(String),
}

/// Reassembles one attribute's value from chunked writes.
///
/// An end marker commits whatever has been buffered, even when no start
/// marker was seen or the buffer is empty; validating the value is left to
/// whoever uses it.
#[derive(Debug)]
pub struct PendingWriteBuffer {
    pending: String,
    state: TransferState,
}

impl PendingWriteBuffer {
    pub const fn new() -> Self {
        Self {
            pending: String::new(),
            state: TransferState::Idle,
        }
    }

    pub fn feed(&mut self, payload: &str) -> WriteOutcome {
        match payload {
            START_MARKER => {
                self.pending.clear();
                self.state = TransferState::Accumulating;
                WriteOutcome::Started
            }
            END_MARKER => {
                self.state = TransferState::Idle;
                WriteOutcome::Committed(core::mem::take(&mut self.pending))
            }
            chunk => {
                self.pending.push_str(chunk);
                self.state = TransferState::Accumulating;
                WriteOutcome::Appended
            }
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.state = TransferState::Idle;
    }
}

impl Default for PendingWriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
