use std::mem;

use crate::error::ChannelError;

/// Size and alignment of one channel element, fixed for the channel's lifetime.
///
/// Slots are laid out back to back with a stride of `size`, so `size` must be
/// a multiple of `align` for every slot to stay aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementLayout {
    size: usize,
    align: usize,
}

impl ElementLayout {
    pub fn new(size: usize, align: usize) -> Result<Self, ChannelError> {
        if align == 0 || !align.is_power_of_two() || size % align != 0 {
            return Err(ChannelError::InvalidLayout { size, align });
        }
        Ok(Self { size, align })
    }

    pub fn of<T>() -> Self {
        Self {
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Byte offset of slot `index` in a contiguous run of elements.
    #[inline]
    pub fn offset_of(&self, index: usize) -> usize {
        index * self.size
    }

    /// Bytes needed for `count` elements, `None` on overflow.
    #[inline]
    pub fn span(&self, count: usize) -> Option<usize> {
        self.size.checked_mul(count)
    }
}
