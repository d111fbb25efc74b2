use std::collections::VecDeque;

use generational_arena::{Arena, Index};
use parking_lot::Mutex;

use crate::error::ChannelError;

/// Weak reference to a parked caller.
///
/// The token is a generational index into a [`WaiterRegistry`]; once the
/// entry is taken or cancelled the generation moves on and the token stops
/// resolving, so a channel can never complete a caller that already left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterToken(Index);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterKind {
    Send,
    Recv,
}

/// How a parked transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A parked receive got an element.
    Received(Box<[u8]>),
    /// A parked send was accepted, either into the ring or by a receiver.
    Sent,
    /// A parked receive observed the channel closing.
    Closed,
    /// The channel closed before a parked send was accepted; the element
    /// is handed back to its owner.
    SendRejected(Box<[u8]>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaiterStatus {
    Parked(WaiterKind),
    Done,
}

#[derive(Debug)]
enum WaiterState {
    Parked(WaiterKind),
    Done(Completion),
}

/// Caller-owned table of parked transfers.
///
/// Channels park into it and complete entries; the caller polls, takes or
/// cancels them. Several channels may share one registry. Channels always
/// lock their own guard before this one, never the other way round.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    arena: Mutex<Arena<WaiterState>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self {
            arena: Mutex::new(Arena::new()),
        }
    }

    pub(crate) fn park(&self, kind: WaiterKind) -> WaiterToken {
        WaiterToken(self.arena.lock().insert(WaiterState::Parked(kind)))
    }

    /// Records `completion` for a still-parked waiter, exactly once.
    ///
    /// Hands the completion back when the token is stale or already done so
    /// the channel can offer it to the next waiter in line.
    pub(crate) fn complete(&self, token: WaiterToken, completion: Completion) -> Result<(), Completion> {
        let mut arena = self.arena.lock();
        match arena.get_mut(token.0) {
            Some(state) if matches!(state, WaiterState::Parked(_)) => {
                *state = WaiterState::Done(completion);
                Ok(())
            }
            _ => Err(completion),
        }
    }

    /// Withdraws a parked waiter, e.g. after a caller-side timeout.
    ///
    /// Returns `false` if the waiter was already completed (its completion
    /// stays available through [`take`](Self::take)) or the token is stale.
    pub fn cancel(&self, token: WaiterToken) -> bool {
        let mut arena = self.arena.lock();
        if !matches!(arena.get(token.0), Some(WaiterState::Parked(_))) {
            return false;
        }
        arena.remove(token.0);
        true
    }

    pub(crate) fn is_parked(&self, token: WaiterToken) -> bool {
        matches!(self.arena.lock().get(token.0), Some(WaiterState::Parked(_)))
    }

    pub fn status(&self, token: WaiterToken) -> Result<WaiterStatus, ChannelError> {
        match self.arena.lock().get(token.0) {
            Some(WaiterState::Parked(kind)) => Ok(WaiterStatus::Parked(*kind)),
            Some(WaiterState::Done(_)) => Ok(WaiterStatus::Done),
            None => Err(ChannelError::UnknownWaiter),
        }
    }

    /// Removes and returns the completion, or `None` while still parked.
    pub fn take(&self, token: WaiterToken) -> Result<Option<Completion>, ChannelError> {
        let mut arena = self.arena.lock();
        match arena.get(token.0) {
            None => return Err(ChannelError::UnknownWaiter),
            Some(WaiterState::Parked(_)) => return Ok(None),
            Some(WaiterState::Done(_)) => {}
        }
        match arena.remove(token.0) {
            Some(WaiterState::Done(completion)) => Ok(Some(completion)),
            _ => Err(ChannelError::UnknownWaiter),
        }
    }

    /// Number of entries not yet taken or cancelled.
    pub fn len(&self) -> usize {
        self.arena.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One queued transfer. Send waiters carry the element they are delivering.
#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) token: WaiterToken,
    pub(crate) element: Option<Box<[u8]>>,
}

/// FIFO of waiters on one side of a channel.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    entries: VecDeque<Waiter>,
}

impl WaitQueue {
    pub(crate) fn push_back(&mut self, waiter: Waiter) {
        self.entries.push_back(waiter);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Waiter> {
        self.entries.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Waiters whose callers have not withdrawn.
    pub(crate) fn live_len(&self, registry: &WaiterRegistry) -> usize {
        self.entries
            .iter()
            .filter(|waiter| registry.is_parked(waiter.token))
            .count()
    }

    /// Drops withdrawn waiters, keeping the rest in order. Returns how many
    /// were dropped.
    pub(crate) fn prune(&mut self, registry: &WaiterRegistry) -> usize {
        let before = self.entries.len();
        self.entries.retain(|waiter| registry.is_parked(waiter.token));
        before - self.entries.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<Waiter> {
        self.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_then_take() {
        let registry = WaiterRegistry::new();
        let token = registry.park(WaiterKind::Recv);
        assert_eq!(registry.status(token), Ok(WaiterStatus::Parked(WaiterKind::Recv)));
        assert_eq!(registry.take(token), Ok(None));

        registry.complete(token, Completion::Closed).unwrap();
        assert_eq!(registry.status(token), Ok(WaiterStatus::Done));
        assert_eq!(registry.take(token), Ok(Some(Completion::Closed)));
        assert_eq!(registry.take(token), Err(ChannelError::UnknownWaiter));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_completion_is_exactly_once() {
        let registry = WaiterRegistry::new();
        let token = registry.park(WaiterKind::Send);
        assert!(registry.complete(token, Completion::Sent).is_ok());
        assert_eq!(
            registry.complete(token, Completion::Sent),
            Err(Completion::Sent)
        );
    }

    #[test]
    fn test_cancelled_token_goes_stale() {
        let registry = WaiterRegistry::new();
        let token = registry.park(WaiterKind::Recv);
        assert!(registry.cancel(token));
        assert!(!registry.cancel(token));

        // The freed slot is reused under a new generation.
        let fresh = registry.park(WaiterKind::Recv);
        assert_ne!(fresh, token);
        let handed_back = registry.complete(token, Completion::Received(vec![1u8].into_boxed_slice()));
        assert_eq!(handed_back, Err(Completion::Received(vec![1u8].into_boxed_slice())));
        assert_eq!(registry.status(fresh), Ok(WaiterStatus::Parked(WaiterKind::Recv)));
    }

    #[test]
    fn test_cancel_after_completion_keeps_result() {
        let registry = WaiterRegistry::new();
        let token = registry.park(WaiterKind::Send);
        registry.complete(token, Completion::Sent).unwrap();
        assert!(!registry.cancel(token));
        assert_eq!(registry.take(token), Ok(Some(Completion::Sent)));
    }

    #[test]
    fn test_queue_is_fifo() {
        let registry = WaiterRegistry::new();
        let mut queue = WaitQueue::default();
        let tokens: Vec<_> = (0..3).map(|_| registry.park(WaiterKind::Send)).collect();
        for token in &tokens {
            queue.push_back(Waiter { token: *token, element: None });
        }
        assert_eq!(queue.len(), 3);
        let order: Vec<_> = std::iter::from_fn(|| queue.pop_front().map(|w| w.token)).collect();
        assert_eq!(order, tokens);
    }

    #[test]
    fn test_prune_drops_only_withdrawn() {
        let registry = WaiterRegistry::new();
        let mut queue = WaitQueue::default();
        let tokens: Vec<_> = (0..4).map(|_| registry.park(WaiterKind::Recv)).collect();
        for token in &tokens {
            queue.push_back(Waiter { token: *token, element: None });
        }
        registry.cancel(tokens[0]);
        registry.cancel(tokens[2]);

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.live_len(&registry), 2);
        assert_eq!(queue.prune(&registry), 2);
        assert_eq!(queue.len(), 2);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_front().map(|w| w.token)).collect();
        assert_eq!(order, vec![tokens[1], tokens[3]]);
    }
}
