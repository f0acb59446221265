//! FIFO byte queue backing the [`BufferedSocket`](crate::socket::BufferedSocket).
//!
//! Grounded on `original_source/utils/mcollections/buffer.py::FifoBuffer`:
//! a growable array with bottom/top cursors, compacting toward index 0
//! before growing, and growing to the next power of two that fits.

use memchr::memchr;

/// A FIFO byte buffer over a resizable array.
///
/// `push` amortizes to O(1) per byte; line search (`pop_line`/`pop_until`)
/// is a linear scan over the buffered region.
#[derive(Debug)]
pub struct ByteBuffer {
    array: Vec<u8>,
    bottom: usize,
    top: usize,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            array: vec![0; capacity.max(1)],
            bottom: 0,
            top: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.top - self.bottom
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends bytes to the buffer, compacting or growing as needed.
    pub fn push(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let needed = self.len() + data.len();
        if needed > self.array.len() {
            self.resize(needed.next_power_of_two());
        } else if self.top + data.len() > self.array.len() {
            self.reposition();
        }
        let new_top = self.top + data.len();
        self.array[self.top..new_top].copy_from_slice(data);
        self.top = new_top;
    }

    /// Non-destructively returns up to `n` buffered bytes from the bottom.
    pub fn peek(&self, n: usize) -> &[u8] {
        let end = (self.bottom + n).min(self.top);
        &self.array[self.bottom..end]
    }

    /// Removes and returns up to `n` bytes from the bottom.
    pub fn pop(&mut self, n: usize) -> Vec<u8> {
        let end = (self.bottom + n).min(self.top);
        let out = self.array[self.bottom..end].to_vec();
        self.bottom = end;
        if self.bottom == self.top {
            self.bottom = 0;
            self.top = 0;
        }
        out
    }

    /// Removes and returns bytes up to and including the first `\n`. If no
    /// `\n` is buffered, returns (and removes) everything buffered.
    pub fn pop_line(&mut self) -> Vec<u8> {
        self.pop_until(b"\n")
    }

    /// Removes and returns bytes up to and including the first occurrence
    /// of `needle`. If `needle` isn't found, returns (and removes)
    /// everything buffered.
    pub fn pop_until(&mut self, needle: &[u8]) -> Vec<u8> {
        let region = &self.array[self.bottom..self.top];
        let found = if needle.len() == 1 {
            memchr(needle[0], region)
        } else {
            region
                .windows(needle.len())
                .position(|w| w == needle)
        };
        match found {
            Some(pos) => {
                let end = self.bottom + pos + needle.len();
                let out = self.array[self.bottom..end].to_vec();
                self.bottom = end;
                if self.bottom == self.top {
                    self.bottom = 0;
                    self.top = 0;
                }
                out
            }
            None => self.pop(self.len()),
        }
    }

    fn reposition(&mut self) {
        let length = self.len();
        self.array.copy_within(self.bottom..self.top, 0);
        self.bottom = 0;
        self.top = length;
    }

    fn resize(&mut self, size: usize) {
        let length = self.len();
        let mut new_arr = vec![0; size];
        new_arr[0..length].copy_from_slice(&self.array[self.bottom..self.top]);
        self.array = new_arr;
        self.bottom = 0;
        self.top = length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_then_pop_are_identical() {
        let mut buf = ByteBuffer::new();
        buf.push(b"hello world");
        let peeked = buf.peek(5).to_vec();
        let popped = buf.pop(5);
        assert_eq!(peeked, popped);
    }

    #[test]
    fn cursors_reset_to_zero_after_full_drain() {
        let mut buf = ByteBuffer::new();
        buf.push(b"abc");
        buf.pop(3);
        assert_eq!(buf.len(), 0);
        buf.push(b"more");
        assert_eq!(buf.pop(4), b"more");
    }

    #[test]
    fn pop_line_returns_up_to_and_including_newline() {
        let mut buf = ByteBuffer::new();
        buf.push(b"first\nsecond\n");
        assert_eq!(buf.pop_line(), b"first\n");
        assert_eq!(buf.pop_line(), b"second\n");
    }

    #[test]
    fn pop_line_without_newline_returns_everything() {
        let mut buf = ByteBuffer::new();
        buf.push(b"no newline here");
        assert_eq!(buf.pop_line(), b"no newline here");
        assert!(buf.is_empty());
    }

    #[test]
    fn push_grows_past_initial_capacity() {
        let mut buf = ByteBuffer::with_capacity(4);
        let data = vec![7u8; 100];
        buf.push(&data);
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.pop(100), data);
    }

    #[test]
    fn push_compacts_before_growing_when_space_is_available() {
        let mut buf = ByteBuffer::with_capacity(8);
        buf.push(b"1234");
        buf.pop(4);
        buf.push(b"5678");
        assert_eq!(buf.pop(4), b"5678");
    }
}
