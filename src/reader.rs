//! A small forward-only cursor over a byte slice.
//!
//! Every read returns `None` instead of panicking when the slice is too short so that callers can
//! map a short read onto their own error type.

use crate::format::ByteOrder;

#[derive(Clone, Debug)]
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    #[inline]
    pub fn new(bytes: &'a [u8], order: ByteOrder) -> Self {
        Self { bytes, order }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Takes the next `len` bytes.
    #[inline]
    pub fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.bytes.len() {
            return None;
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Some(head)
    }

    #[inline]
    pub fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }

    #[inline]
    pub fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }

    #[inline]
    pub fn u8(&mut self) -> Option<u8> {
        self.array::<1>().map(|[b]| b)
    }

    #[inline]
    pub fn u16(&mut self) -> Option<u16> {
        let order = self.order;
        self.array().map(|b| order.u16_from(b))
    }

    #[inline]
    pub fn u32(&mut self) -> Option<u32> {
        let order = self.order;
        self.array().map(|b| order.u32_from(b))
    }

    #[inline]
    pub fn u64(&mut self) -> Option<u64> {
        let order = self.order;
        self.array().map(|b| order.u64_from(b))
    }
}
