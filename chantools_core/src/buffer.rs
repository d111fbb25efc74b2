use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::slice;

use crate::error::ChannelError;

/// An exclusively owned, zero-initialised byte buffer with a guaranteed alignment.
///
/// Both the ring storage and every batch read result live in one of these.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer is plain bytes with a single owner.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    pub fn zeroed(bytes: usize, align: usize) -> Result<Self, ChannelError> {
        let layout = Layout::from_size_align(bytes, align)
            .map_err(|_| ChannelError::AllocationFailed { bytes })?;

        if bytes == 0 {
            // Zero-length buffers never reach the global allocator; any
            // non-null, aligned address is a valid empty slice.
            let ptr = NonNull::new(align as *mut u8).ok_or(ChannelError::AllocationFailed { bytes })?;
            return Ok(Self { ptr, layout });
        }

        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(ChannelError::AllocationFailed { bytes })?;
        Ok(Self { ptr, layout })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("len", &self.len())
            .field("align", &self.align())
            .finish()
    }
}

/// Source of zeroed memory for ring storage and batch results.
///
/// Batch reads call the allocator while the channel guard is held, so an
/// implementation must never call back into the channel it is serving.
pub trait BufferAllocator: Send + Sync {
    fn allocate_zeroed(&self, bytes: usize, align: usize) -> Result<AlignedBuf, ChannelError>;
}

/// Allocator backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl BufferAllocator for SystemAllocator {
    fn allocate_zeroed(&self, bytes: usize, align: usize) -> Result<AlignedBuf, ChannelError> {
        AlignedBuf::zeroed(bytes, align)
    }
}
