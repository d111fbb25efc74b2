use crate::buffer::{AlignedBuf, BufferAllocator};
use crate::copy::ElementCopy;
use crate::error::ChannelError;
use crate::layout::ElementLayout;

/// Fixed-capacity circular store of fixed-size elements.
///
/// Not synchronised on its own; the owning channel only touches it while
/// holding its guard. A capacity of zero means there is no storage at all and
/// every push/pop is refused.
#[derive(Debug)]
pub(crate) struct RingBuffer {
    storage: AlignedBuf,
    layout: ElementLayout,
    capacity: usize,
    count: usize,
    send_index: usize,
    recv_index: usize,
}

impl RingBuffer {
    pub(crate) fn new(
        layout: ElementLayout,
        capacity: usize,
        allocator: &dyn BufferAllocator,
    ) -> Result<Self, ChannelError> {
        let bytes = layout
            .span(capacity)
            .ok_or(ChannelError::AllocationFailed { bytes: usize::MAX })?;
        let storage = allocator.allocate_zeroed(bytes, layout.align())?;

        Ok(Self {
            storage,
            layout,
            capacity,
            count: 0,
            send_index: 0,
            recv_index: 0,
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Also true for unbuffered rings, which can never take an element.
    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    #[inline]
    pub(crate) fn send_index(&self) -> usize {
        self.send_index
    }

    #[inline]
    pub(crate) fn recv_index(&self) -> usize {
        self.recv_index
    }

    /// Ring slot holding the `i`-th oldest queued element.
    #[inline]
    pub(crate) fn position(&self, i: usize) -> usize {
        self.advance(self.recv_index, i)
    }

    /// `(index + by) mod capacity` for `index < capacity` and
    /// `by <= capacity`, without overflowing near `usize::MAX`.
    #[inline]
    fn advance(&self, index: usize, by: usize) -> usize {
        let room = self.capacity - index;
        if by >= room {
            by - room
        } else {
            index + by
        }
    }

    fn slot(&self, index: usize) -> &[u8] {
        let start = self.layout.offset_of(index);
        &self.storage.as_slice()[start..start + self.layout.size()]
    }

    fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        let start = self.layout.offset_of(index);
        let size = self.layout.size();
        &mut self.storage.as_mut_slice()[start..start + size]
    }

    /// Copies `src` into the slot at `send_index`. Returns `false` when full.
    pub(crate) fn push(&mut self, src: &[u8], copier: &dyn ElementCopy) -> bool {
        if self.is_full() {
            return false;
        }
        let size = self.layout.size();
        let index = self.send_index;
        copier.copy(size, self.slot_mut(index), src);
        self.send_index = self.advance(index, 1);
        self.count += 1;
        true
    }

    /// Copies the oldest element into `dest`. Returns `false` when empty.
    pub(crate) fn pop(&mut self, dest: &mut [u8], copier: &dyn ElementCopy) -> bool {
        if self.is_empty() {
            return false;
        }
        let index = self.recv_index;
        copier.copy(self.layout.size(), dest, self.slot(index));
        self.recv_index = self.advance(index, 1);
        self.count -= 1;
        true
    }

    /// Copies the `k` oldest elements into `dest` back to back, oldest first,
    /// without consuming them.
    pub(crate) fn copy_window(&self, k: usize, dest: &mut [u8], copier: &dyn ElementCopy) {
        debug_assert!(k <= self.count);
        let size = self.layout.size();
        for i in 0..k {
            let offset = self.layout.offset_of(i);
            copier.copy(size, &mut dest[offset..offset + size], self.slot(self.position(i)));
        }
    }

    /// Drops the `k` oldest elements by moving the read index past them.
    pub(crate) fn discard(&mut self, k: usize) {
        debug_assert!(k <= self.count);
        if k == 0 {
            return;
        }
        self.recv_index = self.advance(self.recv_index, k);
        self.count -= k;
    }

    /// `0 <= count <= capacity` and `(send - recv) mod capacity == count`.
    pub(crate) fn invariants_hold(&self) -> bool {
        if self.capacity == 0 {
            return self.count == 0 && self.send_index == 0 && self.recv_index == 0;
        }
        if self.count > self.capacity
            || self.send_index >= self.capacity
            || self.recv_index >= self.capacity
        {
            return false;
        }
        let span = if self.send_index >= self.recv_index {
            self.send_index - self.recv_index
        } else {
            self.send_index + (self.capacity - self.recv_index)
        };
        span == self.count % self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;
    use crate::buffer::SystemAllocator;
    use crate::copy::ByteCopy;

    fn ring(capacity: usize) -> RingBuffer {
        RingBuffer::new(ElementLayout::of::<u64>(), capacity, &SystemAllocator).unwrap()
    }

    fn pop_u64(ring: &mut RingBuffer) -> Option<u64> {
        let mut out = [0u8; 8];
        ring.pop(&mut out, &ByteCopy).then(|| u64::from_le_bytes(out))
    }

    #[test]
    fn test_wraps_around() {
        let mut ring = ring(3);
        for v in [1u64, 2, 3] {
            assert!(ring.push(&v.to_le_bytes(), &ByteCopy));
        }
        assert!(!ring.push(&4u64.to_le_bytes(), &ByteCopy));
        assert_eq!(ring.send_index(), ring.recv_index());

        assert_eq!(pop_u64(&mut ring), Some(1));
        assert!(ring.push(&4u64.to_le_bytes(), &ByteCopy));
        assert_eq!(ring.send_index(), 1);
        assert_eq!(ring.recv_index(), 1);
        assert!(ring.invariants_hold());

        assert_eq!(pop_u64(&mut ring), Some(2));
        assert_eq!(pop_u64(&mut ring), Some(3));
        assert_eq!(pop_u64(&mut ring), Some(4));
        assert_eq!(pop_u64(&mut ring), None);
    }

    #[test]
    fn test_copy_window_follows_fifo_across_wrap() {
        let mut ring = ring(4);
        for v in 0u64..4 {
            ring.push(&v.to_le_bytes(), &ByteCopy);
        }
        pop_u64(&mut ring);
        pop_u64(&mut ring);
        ring.push(&4u64.to_le_bytes(), &ByteCopy);
        ring.push(&5u64.to_le_bytes(), &ByteCopy);

        let mut out = vec![0u8; 32];
        ring.copy_window(4, &mut out, &ByteCopy);
        let values: Vec<u64> = out
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![2, 3, 4, 5]);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_discard_advances_read_side() {
        let mut ring = ring(4);
        for v in 0u64..3 {
            ring.push(&v.to_le_bytes(), &ByteCopy);
        }
        ring.discard(2);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.recv_index(), 2);
        assert_eq!(pop_u64(&mut ring), Some(2));
        assert!(ring.invariants_hold());
    }

    #[test]
    fn test_unbuffered_ring_refuses_everything() {
        let mut ring = ring(0);
        assert!(ring.is_full());
        assert!(ring.is_empty());
        assert!(!ring.push(&1u64.to_le_bytes(), &ByteCopy));
        assert_eq!(pop_u64(&mut ring), None);
        assert!(ring.invariants_hold());
    }

    #[test]
    fn test_indices_wrap_at_usize_max() {
        let mut ring = RingBuffer::new(ElementLayout::of::<()>(), usize::MAX, &SystemAllocator).unwrap();
        ring.send_index = usize::MAX - 1;
        ring.recv_index = usize::MAX - 1;

        assert!(ring.push(&[], &ByteCopy));
        assert_eq!(ring.send_index(), 0);
        assert!(ring.push(&[], &ByteCopy));
        assert_eq!(ring.send_index(), 1);
        assert_eq!(ring.position(1), 0);
        assert!(ring.invariants_hold());

        ring.discard(2);
        assert_eq!(ring.recv_index(), 1);
        assert!(ring.is_empty());
        assert!(ring.invariants_hold());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(u64),
        Pop,
        Discard(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => any::<u64>().prop_map(Op::Push),
            2 => Just(Op::Pop),
            1 => (0usize..4).prop_map(Op::Discard),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_queue_model(capacity in 1usize..9, ops in prop::collection::vec(op(), 0..200)) {
            let mut ring = ring(capacity);
            let mut model: VecDeque<u64> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Push(v) => {
                        let accepted = ring.push(&v.to_le_bytes(), &ByteCopy);
                        prop_assert_eq!(accepted, model.len() < capacity);
                        if accepted {
                            model.push_back(v);
                        }
                    }
                    Op::Pop => {
                        prop_assert_eq!(pop_u64(&mut ring), model.pop_front());
                    }
                    Op::Discard(k) => {
                        let k = k.min(model.len());
                        ring.discard(k);
                        model.drain(..k);
                    }
                }
                prop_assert!(ring.invariants_hold());
                prop_assert_eq!(ring.len(), model.len());
                prop_assert!(ring.len() <= ring.capacity());
            }
        }
    }
}
