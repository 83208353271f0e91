//! Fixed-capacity output buffer.
//!
//! One buffer per connection holds the encoded bytes of the next write.
//! It is allocated once at `open` and never grows: a packet is appended
//! only if it fits entirely, otherwise the caller queues it.

use crate::error::{Result, SocketError};

/// Byte buffer representing one outbound write unit.
#[derive(Debug)]
pub struct OutBuffer {
    buf: Vec<u8>,
    capacity: usize,
    allocated: bool,
}

impl OutBuffer {
    /// Create an unallocated buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
            allocated: false,
        }
    }

    /// Allocate the backing storage.
    ///
    /// # Errors
    ///
    /// [`SocketError::ResourceExhausted`] if the allocation fails.
    pub fn allocate(&mut self) -> Result<()> {
        self.buf.try_reserve_exact(self.capacity).map_err(|e| {
            SocketError::ResourceExhausted(format!(
                "output buffer of {} bytes: {}",
                self.capacity, e
            ))
        })?;
        self.allocated = true;
        Ok(())
    }

    /// Whether the backing storage has been reserved.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Fixed capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes waiting to be written.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when no bytes are waiting to be written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Remaining free space. Zero until allocated.
    #[inline]
    pub fn space(&self) -> usize {
        if !self.allocated {
            return 0;
        }
        self.capacity - self.buf.len()
    }

    /// Append `header` followed by `payload` if both fit.
    ///
    /// Returns `false` and leaves the buffer untouched otherwise.
    pub fn try_append(&mut self, header: &[u8], payload: &[u8]) -> bool {
        if header.len() + payload.len() > self.space() {
            return false;
        }
        self.buf.extend_from_slice(header);
        self.buf.extend_from_slice(payload);
        true
    }

    /// Bytes waiting to be written.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drop the first `n` written bytes, moving the unsent tail to the front.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_if_fits() {
        let mut buffer = OutBuffer::new(10);
        buffer.allocate().unwrap();

        assert!(buffer.try_append(&[1, 2], &[3, 4, 5, 6]));
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.space(), 4);

        // 2 + 3 = 5 > 4
        assert!(!buffer.try_append(&[7, 8], &[9, 9, 9]));
        assert_eq!(buffer.len(), 6);

        assert!(buffer.try_append(&[7, 8], &[9, 9]));
        assert_eq!(buffer.space(), 0);
    }

    #[test]
    fn test_consume_shifts_tail_to_front() {
        let mut buffer = OutBuffer::new(8);
        buffer.allocate().unwrap();
        buffer.try_append(&[1, 2, 3], &[4, 5, 6]);

        buffer.consume(4);
        assert_eq!(buffer.as_slice(), &[5, 6]);
        assert_eq!(buffer.space(), 6);

        buffer.consume(100);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_capacity_never_grows() {
        let mut buffer = OutBuffer::new(4);
        buffer.allocate().unwrap();
        assert!(!buffer.try_append(&[0; 4], &[0]));
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    fn test_unallocated_buffer_accepts_nothing() {
        let mut buffer = OutBuffer::new(16);
        assert!(!buffer.is_allocated());
        assert_eq!(buffer.space(), 0);
        assert!(!buffer.try_append(&[1], &[]));
    }

    #[test]
    fn test_allocation_failure_is_resource_exhausted() {
        let mut buffer = OutBuffer::new(usize::MAX);
        assert!(matches!(
            buffer.allocate(),
            Err(SocketError::ResourceExhausted(_))
        ));
    }
}
