use std::any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::buffer::{BufferAllocator, SystemAllocator};
use crate::copy::{ByteCopy, ElementCopy};
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::error::ChannelError;
use crate::layout::ElementLayout;
use crate::ring::RingBuffer;
use crate::waiter::{Completion, WaitQueue, Waiter, WaiterKind, WaiterRegistry, WaiterToken};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identity, printed where a report wants an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Given straight to a parked receiver.
    HandedOff,
    /// Copied into the ring.
    Buffered,
    /// Queued behind a full ring (or no ring at all).
    Parked(WaiterToken),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    Received,
    Parked(WaiterToken),
}

/// Everything the guard protects.
#[derive(Debug)]
pub(crate) struct ChannelState {
    pub(crate) ring: RingBuffer,
    pub(crate) closed: bool,
    pub(crate) send_waiters: WaitQueue,
    pub(crate) recv_waiters: WaitQueue,
}

/// A bounded channel of fixed-size elements behind a single lock.
///
/// All state (ring indices, count, closed flag and both waiter queues) sits
/// behind one [`Mutex`], which is what lets [`debug_peek`](Channel::debug_peek)
/// and [`batch_read`](Channel::batch_read) see a consistent snapshot.
pub struct Channel {
    pub(crate) id: ChannelId,
    pub(crate) type_tag: String,
    pub(crate) layout: ElementLayout,
    pub(crate) copier: Arc<dyn ElementCopy>,
    pub(crate) allocator: Arc<dyn BufferAllocator>,
    pub(crate) waiters: Arc<WaiterRegistry>,
    pub(crate) sink: Arc<dyn DiagnosticSink>,
    pub(crate) state: Mutex<ChannelState>,
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn layout(&self) -> ElementLayout {
        self.layout
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Closed, empty and nobody waiting: nothing can ever happen on it again.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.closed
            && state.ring.is_empty()
            && state.send_waiters.live_len(&self.waiters) == 0
            && state.recv_waiters.live_len(&self.waiters) == 0
    }

    /// Registry the channel parks callers into.
    pub fn waiters(&self) -> &Arc<WaiterRegistry> {
        &self.waiters
    }

    /// Sends without parking; a full or unbuffered channel with nobody
    /// waiting to receive reports [`ChannelError::Full`].
    pub fn try_send(&self, element: &[u8]) -> Result<SendStatus, ChannelError> {
        self.send(element, false)
    }

    /// Sends, parking the element in the send queue if it cannot be placed.
    pub fn send_or_park(&self, element: &[u8]) -> Result<SendStatus, ChannelError> {
        self.send(element, true)
    }

    /// Receives into `dest` without parking.
    ///
    /// Buffered elements are still delivered after close; only a closed and
    /// empty channel reports [`ChannelError::Closed`].
    pub fn try_recv(&self, dest: &mut [u8]) -> Result<RecvStatus, ChannelError> {
        self.recv(dest, false)
    }

    /// Receives into `dest`, or parks and returns a token whose completion
    /// will carry the element.
    pub fn recv_or_park(&self, dest: &mut [u8]) -> Result<RecvStatus, ChannelError> {
        self.recv(dest, true)
    }

    /// Closes the channel and completes every parked waiter.
    ///
    /// Receivers see [`Completion::Closed`]; senders get their element back
    /// in [`Completion::SendRejected`].
    pub fn close(&self) -> Result<(), ChannelError> {
        let (receivers, senders) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ChannelError::AlreadyClosed);
            }
            state.closed = true;
            (state.recv_waiters.drain(), state.send_waiters.drain())
        };

        // Nothing parks on a closed channel, so the queues stay empty from
        // here on and the waiters can be completed outside the guard.
        debug!(
            channel = %self.id,
            receivers = receivers.len(),
            senders = senders.len(),
            "channel closed"
        );

        for receiver in receivers {
            if self.waiters.complete(receiver.token, Completion::Closed).is_err() {
                trace!(channel = %self.id, "withdrawn receiver not notified of close");
            }
        }
        for sender in senders {
            let element = sender.element.unwrap_or_default();
            if let Err(rejected) = self.waiters.complete(sender.token, Completion::SendRejected(element)) {
                trace!(channel = %self.id, ?rejected, "discarding element of withdrawn sender");
            }
        }

        Ok(())
    }

    fn send(&self, element: &[u8], park: bool) -> Result<SendStatus, ChannelError> {
        self.check_element(element.len())?;
        let mut state = self.state.lock();

        if state.closed {
            return Err(ChannelError::Closed);
        }

        if self.hand_off(&mut state.recv_waiters, element) {
            return Ok(SendStatus::HandedOff);
        }

        if state.ring.push(element, &*self.copier) {
            return Ok(SendStatus::Buffered);
        }

        if !park {
            return Err(ChannelError::Full);
        }

        let pruned = state.send_waiters.prune(&self.waiters);
        if pruned > 0 {
            trace!(channel = %self.id, pruned, "dropped withdrawn senders");
        }
        let token = self.waiters.park(WaiterKind::Send);
        state.send_waiters.push_back(Waiter {
            token,
            element: Some(element.into()),
        });
        trace!(channel = %self.id, waiting = state.send_waiters.len(), "sender parked");
        Ok(SendStatus::Parked(token))
    }

    fn recv(&self, dest: &mut [u8], park: bool) -> Result<RecvStatus, ChannelError> {
        self.check_element(dest.len())?;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.ring.pop(dest, &*self.copier) {
            // The freed slot goes to the longest-waiting sender.
            self.refill_from_senders(state);
            return Ok(RecvStatus::Received);
        }

        if let Some(element) = self.take_from_sender(&mut state.send_waiters) {
            self.copier.copy(self.layout.size(), dest, &element);
            return Ok(RecvStatus::Received);
        }

        if state.closed {
            return Err(ChannelError::Closed);
        }

        if !park {
            return Err(ChannelError::Empty);
        }

        let pruned = state.recv_waiters.prune(&self.waiters);
        if pruned > 0 {
            trace!(channel = %self.id, pruned, "dropped withdrawn receivers");
        }
        let token = self.waiters.park(WaiterKind::Recv);
        state.recv_waiters.push_back(Waiter {
            token,
            element: None,
        });
        trace!(channel = %self.id, waiting = state.recv_waiters.len(), "receiver parked");
        Ok(RecvStatus::Parked(token))
    }

    /// Moves parked senders into the ring, oldest first, while there is room.
    pub(crate) fn refill_from_senders(&self, state: &mut ChannelState) -> usize {
        let mut moved = 0;
        while !state.ring.is_full() {
            let Some(element) = self.take_from_sender(&mut state.send_waiters) else {
                break;
            };
            state.ring.push(&element, &*self.copier);
            moved += 1;
        }
        moved
    }

    /// Pops the first live send waiter, completes it, and returns its element.
    fn take_from_sender(&self, queue: &mut WaitQueue) -> Option<Box<[u8]>> {
        while let Some(waiter) = queue.pop_front() {
            if self.waiters.complete(waiter.token, Completion::Sent).is_ok() {
                return waiter.element;
            }
            trace!(channel = %self.id, "skipping withdrawn sender");
        }
        None
    }

    /// Gives `element` to the first live receive waiter, if there is one.
    fn hand_off(&self, queue: &mut WaitQueue, element: &[u8]) -> bool {
        let size = self.layout.size();
        while let Some(waiter) = queue.pop_front() {
            let mut slot = vec![0u8; size].into_boxed_slice();
            self.copier.copy(size, &mut slot, element);
            if self.waiters.complete(waiter.token, Completion::Received(slot)).is_ok() {
                trace!(channel = %self.id, "handed off to parked receiver");
                return true;
            }
            trace!(channel = %self.id, "skipping withdrawn receiver");
        }
        false
    }

    fn check_element(&self, got: usize) -> Result<(), ChannelError> {
        let expected = self.layout.size();
        if got != expected {
            return Err(ChannelError::ElementSize { expected, got });
        }
        Ok(())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("type_tag", &self.type_tag)
            .field("layout", &self.layout)
            .field("state", &*self.state.lock())
            .finish()
    }
}

/// Assembles a [`Channel`] and its collaborators.
pub struct ChannelBuilder {
    layout: ElementLayout,
    capacity: usize,
    type_tag: String,
    copier: Arc<dyn ElementCopy>,
    allocator: Arc<dyn BufferAllocator>,
    waiters: Option<Arc<WaiterRegistry>>,
    sink: Arc<dyn DiagnosticSink>,
}

impl ChannelBuilder {
    /// An unbuffered channel of raw elements with the default collaborators.
    pub fn new(layout: ElementLayout) -> Self {
        Self {
            layout,
            capacity: 0,
            type_tag: "bytes".to_string(),
            copier: Arc::new(ByteCopy),
            allocator: Arc::new(SystemAllocator),
            waiters: None,
            sink: Arc::new(TracingSink),
        }
    }

    /// Layout and type tag taken from `T`.
    pub fn for_type<T: Copy + 'static>() -> Self {
        Self::new(ElementLayout::of::<T>()).type_tag(any::type_name::<T>())
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn type_tag(mut self, tag: impl Into<String>) -> Self {
        self.type_tag = tag.into();
        self
    }

    pub fn element_copy(mut self, copier: Arc<dyn ElementCopy>) -> Self {
        self.copier = copier;
        self
    }

    pub fn allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Shares a caller-owned registry instead of giving the channel its own.
    pub fn waiters(mut self, waiters: Arc<WaiterRegistry>) -> Self {
        self.waiters = Some(waiters);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Result<Channel, ChannelError> {
        let ring = RingBuffer::new(self.layout, self.capacity, &*self.allocator)?;
        let id = ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed));
        debug!(channel = %id, capacity = self.capacity, elem_size = self.layout.size(), "channel created");

        Ok(Channel {
            id,
            type_tag: self.type_tag,
            layout: self.layout,
            copier: self.copier,
            allocator: self.allocator,
            waiters: self.waiters.unwrap_or_default(),
            sink: self.sink,
            state: Mutex::new(ChannelState {
                ring,
                closed: false,
                send_waiters: WaitQueue::default(),
                recv_waiters: WaitQueue::default(),
            }),
        })
    }
}
