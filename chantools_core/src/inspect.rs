//! Occupancy reporting and threshold batch reads.
//!
//! Both operations take the channel guard once, work from that single
//! snapshot, and only talk to the diagnostic sink after letting go of it.

use std::fmt;

use serde::Serialize;

use crate::buffer::AlignedBuf;
use crate::channel::{Channel, ChannelId, ChannelState};
use crate::error::ChannelError;

/// Where the ring cursors stood, if there is a ring at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RingView {
    Buffered { send_index: usize, recv_index: usize },
    Unbuffered,
}

/// Point-in-time view of a channel. Stale as soon as it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeekReport {
    pub channel: ChannelId,
    pub type_tag: String,
    pub elem_size: usize,
    pub capacity: usize,
    pub count: usize,
    pub closed: bool,
    pub waiting_senders: usize,
    pub waiting_receivers: usize,
    pub ring: RingView,
}

impl PeekReport {
    /// `(send_index, recv_index)`, or [`ChannelError::NoBackingStore`] for
    /// an unbuffered channel.
    pub fn cursor(&self) -> Result<(usize, usize), ChannelError> {
        match self.ring {
            RingView::Buffered { send_index, recv_index } => Ok((send_index, recv_index)),
            RingView::Unbuffered => Err(ChannelError::NoBackingStore),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Type: {}, ChanPtr: {}", self.type_tag, self.channel),
            format!("QSize:{}, Elem:{}", self.capacity, self.elem_size),
            format!("Value count: {}", self.count),
        ];
        match self.ring {
            RingView::Unbuffered => lines.push("Cannot peek on an unbuffered channel".to_string()),
            RingView::Buffered { send_index, recv_index } => lines.push(format!(
                "Peeking at [recv:{} send:{} {}/{}]",
                recv_index, send_index, self.count, self.capacity
            )),
        }
        if self.waiting_senders > 0 || self.waiting_receivers > 0 {
            lines.push(format!(
                "Waiters: {} send, {} recv",
                self.waiting_senders, self.waiting_receivers
            ));
        }
        if self.closed {
            lines.push("Closed".to_string());
        }
        lines
    }
}

impl fmt::Display for PeekReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Whether a successful batch read leaves the elements in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Copy only; the channel is untouched.
    Copy,
    /// Copy, then consume everything that was copied.
    Drain,
}

impl fmt::Display for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchPolicy::Copy => write!(f, "copy"),
            BatchPolicy::Drain => write!(f, "drain"),
        }
    }
}

/// Elements copied out of a channel, oldest first, in one owned buffer.
#[derive(Debug)]
pub struct BatchRead {
    buf: AlignedBuf,
    elem_size: usize,
    len: usize,
    closed: bool,
}

impl BatchRead {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// The channel was closed when the snapshot was taken, so nothing
    /// further will ever arrive.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn element(&self, index: usize) -> Option<&[u8]> {
        if index >= self.len {
            return None;
        }
        let start = index * self.elem_size;
        Some(&self.buf.as_slice()[start..start + self.elem_size])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.len).filter_map(move |i| self.element(i))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn into_buffer(self) -> AlignedBuf {
        self.buf
    }
}

impl Channel {
    /// Reports occupancy and ring cursors without changing anything.
    ///
    /// Never fails; an unbuffered channel is reported as such rather than
    /// having its (nonexistent) ring inspected.
    pub fn debug_peek(&self) -> PeekReport {
        let report = {
            let state = self.state.lock();
            let ring = if state.ring.capacity() == 0 {
                RingView::Unbuffered
            } else {
                RingView::Buffered {
                    send_index: state.ring.send_index(),
                    recv_index: state.ring.recv_index(),
                }
            };
            PeekReport {
                channel: self.id,
                type_tag: self.type_tag.clone(),
                elem_size: self.layout.size(),
                capacity: state.ring.capacity(),
                count: state.ring.len(),
                closed: state.closed,
                waiting_senders: state.send_waiters.live_len(&self.waiters),
                waiting_receivers: state.recv_waiters.live_len(&self.waiters),
                ring,
            }
        };

        for line in report.lines() {
            self.sink.emit(&line);
        }
        report
    }

    /// Copies every queued element if at least `minimum` are queued.
    ///
    /// The channel keeps its elements; see [`batch_drain`](Self::batch_drain)
    /// for the consuming variant. On a closed channel the threshold is
    /// waived and whatever is left is returned, flagged as closed.
    pub fn batch_read(&self, minimum: usize) -> Result<BatchRead, ChannelError> {
        self.batch(minimum, BatchPolicy::Copy)
    }

    /// Like [`batch_read`](Self::batch_read), but consumes what it copied and
    /// lets parked senders move into the freed slots.
    pub fn batch_drain(&self, minimum: usize) -> Result<BatchRead, ChannelError> {
        self.batch(minimum, BatchPolicy::Drain)
    }

    pub fn batch_with(&self, minimum: usize, policy: BatchPolicy) -> Result<BatchRead, ChannelError> {
        self.batch(minimum, policy)
    }

    fn batch(&self, minimum: usize, policy: BatchPolicy) -> Result<BatchRead, ChannelError> {
        let outcome = {
            let mut state = self.state.lock();
            self.snapshot(&mut state, minimum, policy)
        };

        match &outcome {
            Ok(batch) => self.sink.emit(&format!(
                "Batch {}: {} elements of {} bytes (minimum {}){}",
                policy,
                batch.len(),
                batch.elem_size(),
                minimum,
                if batch.is_closed() { ", channel closed" } else { "" }
            )),
            Err(err) => self.sink.emit(&format!("Batch {} refused: {}", policy, err)),
        }
        outcome
    }

    fn snapshot(
        &self,
        state: &mut ChannelState,
        minimum: usize,
        policy: BatchPolicy,
    ) -> Result<BatchRead, ChannelError> {
        let count = state.ring.len();
        let capacity = state.ring.capacity();

        if count == 0 && minimum == 0 {
            return self.collect(state, 0, policy);
        }
        if capacity == 0 {
            return Err(ChannelError::NoBackingStore);
        }
        if state.closed {
            return self.collect(state, count, policy);
        }
        if minimum > capacity {
            return Err(ChannelError::ThresholdExceedsCapacity { minimum, capacity });
        }
        if count < minimum {
            return Err(ChannelError::InsufficientData {
                available: count,
                minimum,
            });
        }

        self.collect(state, count, policy)
    }

    fn collect(
        &self,
        state: &mut ChannelState,
        count: usize,
        policy: BatchPolicy,
    ) -> Result<BatchRead, ChannelError> {
        let bytes = self
            .layout
            .span(count)
            .ok_or(ChannelError::AllocationFailed { bytes: usize::MAX })?;
        let mut buf = self.allocator.allocate_zeroed(bytes, self.layout.align())?;
        state.ring.copy_window(count, buf.as_mut_slice(), &*self.copier);

        if policy == BatchPolicy::Drain && count > 0 {
            state.ring.discard(count);
            self.refill_from_senders(state);
        }
        debug_assert!(state.ring.invariants_hold());

        Ok(BatchRead {
            buf,
            elem_size: self.layout.size(),
            len: count,
            closed: state.closed,
        })
    }
}
