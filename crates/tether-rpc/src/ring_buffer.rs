//! Growable byte FIFO backing the endpoint's reader and writer sides.
//!
//! The callback read/write variants hand the transport a contiguous
//! region so partial I/O needs no intermediate copy. The buffer has no
//! internal locking: the facade mutex plus the state machine's
//! single-threaded discipline provide exclusion.

use std::io::{Read, Write};

const MIN_CAPACITY: usize = 64;

/// An unbounded FIFO of bytes.
pub struct RingBuffer {
    /// Backing storage; always fully initialized, `buf.len()` is the
    /// capacity.
    buf: Vec<u8>,
    /// Index of the oldest byte.
    head: usize,
    /// Number of readable bytes.
    len: usize,
}

impl RingBuffer {
    pub fn new() -> Self {
        RingBuffer {
            buf: Vec::new(),
            head: 0,
            len: 0,
        }
    }

    /// Number of bytes ready to read.
    pub fn bytes_available(&self) -> usize {
        self.len
    }

    /// Grow capacity so at least `n` more bytes can be written without
    /// further allocation.
    pub fn reserve(&mut self, n: usize) {
        let needed = self.len + n;
        if needed <= self.buf.len() {
            return;
        }
        let new_cap = needed.next_power_of_two().max(MIN_CAPACITY);
        let mut new_buf = vec![0u8; new_cap];
        self.copy_out(&mut new_buf[..self.len]);
        self.buf = new_buf;
        self.head = 0;
    }

    fn copy_out(&self, dst: &mut [u8]) {
        let n = dst.len();
        let cap = self.buf.len();
        let first = (cap - self.head).min(n);
        dst[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        if first < n {
            dst[first..].copy_from_slice(&self.buf[..n - first]);
        }
    }

    /// Append `src` in full.
    pub fn write(&mut self, src: &[u8]) {
        self.reserve(src.len());
        let cap = self.buf.len();
        let tail = (self.head + self.len) % cap;
        let first = (cap - tail).min(src.len());
        self.buf[tail..tail + first].copy_from_slice(&src[..first]);
        if first < src.len() {
            self.buf[..src.len() - first].copy_from_slice(&src[first..]);
        }
        self.len += src.len();
    }

    /// Remove exactly `dst.len()` bytes into `dst`.
    ///
    /// The caller must have checked [`bytes_available`]; asking for
    /// more than is buffered is a logic error.
    ///
    /// [`bytes_available`]: RingBuffer::bytes_available
    pub fn read(&mut self, dst: &mut [u8]) {
        assert!(
            dst.len() <= self.len,
            "ring buffer underflow: want {} bytes, have {}",
            dst.len(),
            self.len
        );
        self.copy_out(dst);
        self.consume(dst.len());
    }

    fn consume(&mut self, n: usize) {
        self.head = (self.head + n) % self.buf.len().max(1);
        self.len -= n;
        if self.len == 0 {
            self.head = 0;
        }
    }

    /// Hand up to `n` contiguous readable bytes to `f` and consume what
    /// it reports as accepted. Returns the accepted count.
    pub fn read_with_callback<F>(&mut self, n: usize, mut f: F) -> std::io::Result<usize>
    where
        F: FnMut(&[u8]) -> std::io::Result<usize>,
    {
        let want = n.min(self.len);
        if want == 0 {
            return Ok(0);
        }
        let run = (self.buf.len() - self.head).min(want);
        let accepted = f(&self.buf[self.head..self.head + run])?;
        debug_assert!(accepted <= run);
        self.consume(accepted.min(run));
        Ok(accepted)
    }

    /// Hand a contiguous writable region of up to `n` bytes to `f` and
    /// keep what it reports as filled. Returns the filled count.
    pub fn write_with_callback<F>(&mut self, n: usize, mut f: F) -> std::io::Result<usize>
    where
        F: FnMut(&mut [u8]) -> std::io::Result<usize>,
    {
        if n == 0 {
            return Ok(0);
        }
        self.reserve(n);
        let cap = self.buf.len();
        let tail = (self.head + self.len) % cap;
        let run = (cap - tail).min(cap - self.len).min(n);
        let filled = f(&mut self.buf[tail..tail + run])?;
        debug_assert!(filled <= run);
        self.len += filled.min(run);
        Ok(filled)
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for RingBuffer {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let n = out.len().min(self.len);
        self.copy_out(&mut out[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl Write for RingBuffer {
    fn write(&mut self, src: &[u8]) -> std::io::Result<usize> {
        RingBuffer::write(self, src);
        Ok(src.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_across_wraparound() {
        let mut rb = RingBuffer::new();
        // Capacity settles at 64; leave a few bytes buffered so the
        // next write has to wrap past the end of storage.
        rb.write(&(0..48).collect::<Vec<u8>>());
        let mut sink = [0u8; 40];
        rb.read(&mut sink);
        assert_eq!(sink[39], 39);
        assert_eq!(rb.bytes_available(), 8);

        rb.write(&(48..98).collect::<Vec<u8>>());
        assert_eq!(rb.bytes_available(), 58);

        let mut out = vec![0u8; 58];
        rb.read(&mut out);
        assert_eq!(out, (40..98).collect::<Vec<u8>>());
        assert_eq!(rb.bytes_available(), 0);
    }

    #[test]
    fn reserve_grows_without_losing_data() {
        let mut rb = RingBuffer::new();
        rb.write(b"hello");
        rb.reserve(10_000);
        rb.write(&vec![7u8; 10_000]);
        let mut out = vec![0u8; 5];
        rb.read(&mut out);
        assert_eq!(&out, b"hello");
        assert_eq!(rb.bytes_available(), 10_000);
    }

    #[test]
    fn read_callback_partial_accept() {
        let mut rb = RingBuffer::new();
        rb.write(&[1, 2, 3, 4, 5]);

        let n = rb
            .read_with_callback(5, |bytes| {
                assert_eq!(bytes, &[1, 2, 3, 4, 5]);
                Ok(2)
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(rb.bytes_available(), 3);

        let mut rest = [0u8; 3];
        rb.read(&mut rest);
        assert_eq!(rest, [3, 4, 5]);
    }

    #[test]
    fn write_callback_partial_fill() {
        let mut rb = RingBuffer::new();
        let n = rb
            .write_with_callback(8, |space| {
                assert!(space.len() >= 8);
                space[..3].copy_from_slice(&[9, 8, 7]);
                Ok(3)
            })
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(rb.bytes_available(), 3);

        let mut out = [0u8; 3];
        rb.read(&mut out);
        assert_eq!(out, [9, 8, 7]);
    }

    #[test]
    fn io_traits_roundtrip() {
        let mut rb = RingBuffer::new();
        Write::write_all(&mut rb, &42u64.to_le_bytes()).unwrap();
        let mut buf = [0u8; 8];
        Read::read_exact(&mut rb, &mut buf).unwrap();
        assert_eq!(u64::from_le_bytes(buf), 42);

        // Draining an empty buffer reports EOF through read_exact.
        assert!(Read::read_exact(&mut rb, &mut buf).is_err());
    }

    #[test]
    #[should_panic(expected = "ring buffer underflow")]
    fn overread_is_a_logic_error() {
        let mut rb = RingBuffer::new();
        rb.write(&[1]);
        let mut out = [0u8; 2];
        rb.read(&mut out);
    }
}
