/// Copies one element between two byte slots.
///
/// The channel never interprets element bytes; it only moves them through
/// this capability, so a caller can plug in a copier that knows its type.
pub trait ElementCopy: Send + Sync {
    fn copy(&self, size: usize, dest: &mut [u8], src: &[u8]);
}

/// Plain byte-for-byte copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteCopy;

impl ElementCopy for ByteCopy {
    #[inline]
    fn copy(&self, size: usize, dest: &mut [u8], src: &[u8]) {
        dest[..size].copy_from_slice(&src[..size]);
    }
}
