//! Bounded capture buffer for child process output.
//!
//! Keeps the most recent `capacity` bytes. Test runners print their summary
//! last, so the tail is the part worth keeping.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RingBuffer {
    buffer: VecDeque<u8>,
    capacity: usize,
    total_written: usize,
}

impl RingBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(8192)),
            capacity,
            total_written: 0,
        }
    }

    /// Append bytes, evicting from the front once full.
    pub fn push(&mut self, data: &[u8]) {
        self.total_written += data.len();
        if self.capacity == 0 {
            return;
        }
        let data = if data.len() > self.capacity {
            self.buffer.clear();
            &data[data.len() - self.capacity..]
        } else {
            data
        };
        let overflow = (self.buffer.len() + data.len()).saturating_sub(self.capacity);
        self.buffer.drain(..overflow);
        self.buffer.extend(data);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub const fn total_written(&self) -> usize {
        self.total_written
    }

    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.total_written > self.capacity
    }

    /// Retained bytes as UTF-8 (lossy), prefixed with a marker when the
    /// head was dropped.
    ///
    /// After truncation the retained text starts at the first complete line.
    /// The partial line the eviction cut through is dropped with the head, so
    /// a value split by the cut never shows up as a fragment that masking
    /// cannot recognize.
    #[must_use]
    pub fn contents_lossy(&self) -> String {
        let bytes: Vec<u8> = self.buffer.iter().copied().collect();
        if !self.truncated() {
            return String::from_utf8_lossy(&bytes).into_owned();
        }
        let start = bytes
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |newline| newline + 1);
        let kept = &bytes[start..];
        format!(
            "[... {} bytes truncated ...]\n{}",
            self.total_written - kept.len(),
            String::from_utf8_lossy(kept)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_keeps_tail() {
        let mut buffer = RingBuffer::new(12);
        buffer.push(b"hello\n");
        buffer.push(b"big\nworld\n");
        assert_eq!(buffer.len(), 12);
        assert!(buffer.truncated());
        assert_eq!(buffer.total_written(), 16);
        assert_eq!(
            buffer.contents_lossy(),
            "[... 6 bytes truncated ...]\nbig\nworld\n"
        );
    }

    #[test]
    fn test_cut_line_is_dropped_whole() {
        let mut buffer = RingBuffer::new(16);
        buffer.push(b"xxS3CRETVALUE0123456789");
        let text = buffer.contents_lossy();
        assert_eq!(text, "[... 23 bytes truncated ...]\n");
        assert!(!text.contains("VALUE"));
    }

    #[test]
    fn test_oversized_single_write() {
        let mut buffer = RingBuffer::new(8);
        buffer.push(b"abc\ndefgh\nij\n");
        assert!(buffer.contents_lossy().ends_with("\nij\n"));
        assert!(!buffer.contents_lossy().contains("fgh"));
    }

    #[test]
    fn test_under_capacity_has_no_marker() {
        let mut buffer = RingBuffer::new(64);
        buffer.push(b"test result: ok");
        assert!(!buffer.truncated());
        assert_eq!(buffer.contents_lossy(), "test result: ok");
    }

    #[test]
    fn test_zero_capacity_counts_only() {
        let mut buffer = RingBuffer::new(0);
        buffer.push(b"abc");
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_written(), 3);
    }
}
