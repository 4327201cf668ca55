use std::collections::VecDeque;

use bytes::Bytes;

use crate::{Result, WebSocketError};

/// Most control frames (handshake request and pings) that may wait for the transport.
pub(crate) const MAX_PENDING_CONTROL: usize = 16;

/// Encoded frames waiting for the transport.
///
/// Control frames (the handshake request and pings) are always drained before data, and
/// at most [`MAX_PENDING_CONTROL`] of them may be pending. Pongs use a single slot: a pong
/// that was not written yet is replaced by the answer to a newer ping. The data lane
/// carries message fragments and close frames, in the order they were pushed, and is
/// bounded by a byte budget.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    control: VecDeque<Bytes>,
    pong: Option<Bytes>,
    data: VecDeque<Bytes>,
    data_bytes: usize,
    max_data_bytes: usize,
}

impl OutboundQueue {
    pub fn new(max_data_bytes: usize) -> Self {
        Self {
            control: VecDeque::new(),
            pong: None,
            data: VecDeque::new(),
            data_bytes: 0,
            max_data_bytes,
        }
    }

    pub fn push_control(&mut self, bytes: Bytes) -> Result<()> {
        if self.control.len() >= MAX_PENDING_CONTROL {
            return Err(WebSocketError::QueueFull);
        }
        self.control.push_back(bytes);
        Ok(())
    }

    /// Queues a pong. Returns `true` when it replaced one still waiting to be written.
    pub fn push_pong(&mut self, bytes: Bytes) -> bool {
        self.pong.replace(bytes).is_some()
    }

    /// Appends all of `frames` contiguously, or none of them when they exceed the budget.
    pub fn push_data(&mut self, frames: Vec<Bytes>) -> Result<()> {
        let size: usize = frames.iter().map(Bytes::len).sum();
        if self.data_bytes + size > self.max_data_bytes {
            return Err(WebSocketError::QueueFull);
        }

        self.data_bytes += size;
        self.data.extend(frames);
        Ok(())
    }

    /// Appends a close frame behind the queued data. Close frames are not counted against the budget.
    pub fn push_close(&mut self, bytes: Bytes) {
        self.data.push_back(bytes);
    }

    /// Takes the next frame to write.
    pub fn pop(&mut self) -> Option<Bytes> {
        if let Some(bytes) = self.control.pop_front() {
            return Some(bytes);
        }
        if let Some(bytes) = self.pong.take() {
            return Some(bytes);
        }

        let bytes = self.data.pop_front()?;
        self.data_bytes = self.data_bytes.saturating_sub(bytes.len());
        Some(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.control.is_empty() && self.pong.is_none() && self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.control.clear();
        self.pong = None;
        self.data.clear();
        self.data_bytes = 0;
    }
}
