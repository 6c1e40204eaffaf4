use core::cmp;

use managed::Managed;

use crate::storage::{Assembler, ByteStream};

/// Reassembles out-of-order fragments of a byte stream.
///
/// Fragments arrive indexed by the absolute stream position of their
/// first byte. Bytes that extend the contiguous prefix are written to
/// the output stream immediately; bytes beyond a gap wait in a ring
/// sized like the output buffer, with an [`Assembler`] recording which
/// ranges are present. The output buffer and the ring share one
/// capacity: at any time, buffered output plus waiting bytes never
/// exceed it, and fragments are truncated to fit.
#[derive(Debug)]
pub struct StreamReassembler<'a> {
    ranges: Assembler,
    buffer: Managed<'a, [u8]>,
    output: ByteStream<'a>,
    eof_index: Option<u64>,
    capacity: usize,
}

impl<'a> StreamReassembler<'a> {
    /// Create a reassembler storing out-of-order bytes in `storage` and
    /// delivering to `output`.
    ///
    /// `storage` must be as large as the output stream's capacity.
    pub fn new<S>(storage: S, output: ByteStream<'a>) -> StreamReassembler<'a>
    where
        S: Into<Managed<'a, [u8]>>,
    {
        let buffer = storage.into();
        let capacity = buffer.len();
        debug_assert!(capacity == output.capacity());
        StreamReassembler {
            ranges: Assembler::new(),
            buffer,
            output,
            eof_index: None,
            capacity,
        }
    }

    /// Shared capacity of the assembled and unassembled halves.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Accept a fragment whose first byte sits at absolute stream
    /// position `index`. `eof` marks the last byte of `data` as the
    /// last byte of the entire stream.
    ///
    /// Bytes already delivered are dropped; bytes past the capacity
    /// window are dropped, and drop the `eof` mark with them.
    pub fn push_substring(&mut self, data: &[u8], index: u64, eof: bool) {
        let first_unassembled = self.output.bytes_written();

        // Nothing in this fragment is new.
        if index + (data.len() as u64) < first_unassembled {
            net_trace!(
                "reassembler: dropping stale fragment at {} len {}",
                index,
                data.len()
            );
            return;
        }

        let (data, index) = if index < first_unassembled {
            (&data[(first_unassembled - index) as usize..], first_unassembled)
        } else {
            (data, index)
        };

        // Admit bytes only while assembled + unassembled fit the
        // shared capacity.
        let window = (self.capacity - self.output.buffer_size()) as u64;
        let first_unacceptable = first_unassembled + window;
        let keep = cmp::min(data.len() as u64, first_unacceptable.saturating_sub(index)) as usize;
        let truncated = keep < data.len();
        if truncated {
            net_trace!(
                "reassembler: truncating fragment at {} from {} to {} octets",
                index,
                data.len(),
                keep
            );
        }
        let data = &data[..keep];

        // The end of the stream is only known once the byte before it
        // was admitted; a fragment whose tail was cut off does not
        // carry it.
        if eof && !truncated && self.eof_index.is_none() {
            self.eof_index = Some(index + data.len() as u64);
        }

        if !data.is_empty() {
            self.store(index, data);
            self.ranges.add(index, index + data.len() as u64);
            while let Some(end) = self.ranges.pop_front(self.output.bytes_written()) {
                self.deliver(end);
            }
        }

        if self.eof_index == Some(self.output.bytes_written()) {
            self.output.end_input();
        }
    }

    /// Number of bytes stored but not yet delivered to the output.
    /// A byte received more than once counts once.
    pub fn unassembled_bytes(&self) -> usize {
        self.ranges.total_bytes() as usize
    }

    /// Return whether no bytes are waiting on a gap.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Access the reassembled output stream.
    pub fn stream_out(&self) -> &ByteStream<'a> {
        &self.output
    }

    /// Access the reassembled output stream mutably.
    pub fn stream_out_mut(&mut self) -> &mut ByteStream<'a> {
        &mut self.output
    }

    /// Copy a fragment into the ring. Position `i` of the stream lives
    /// at `i % capacity`; the admission window is narrower than the
    /// ring, so distinct pending positions never collide.
    fn store(&mut self, index: u64, data: &[u8]) {
        let at = (index % self.capacity as u64) as usize;
        let until_end = self.capacity - at;
        if data.len() <= until_end {
            self.buffer[at..at + data.len()].copy_from_slice(data);
        } else {
            self.buffer[at..].copy_from_slice(&data[..until_end]);
            self.buffer[..data.len() - until_end].copy_from_slice(&data[until_end..]);
        }
    }

    /// Move ring bytes from the current contiguous prefix up to `end`
    /// into the output stream.
    fn deliver(&mut self, end: u64) {
        let start = self.output.bytes_written();
        let len = (end - start) as usize;
        let at = (start % self.capacity as u64) as usize;
        let until_end = self.capacity - at;
        if len <= until_end {
            self.output.write(&self.buffer[at..at + len]);
        } else {
            self.output.write(&self.buffer[at..]);
            self.output.write(&self.buffer[..len - until_end]);
        }
        net_trace!("reassembler: delivered {} octets (now {})", len, end);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn reassembler(capacity: usize) -> StreamReassembler<'static> {
        StreamReassembler::new(vec![0; capacity], ByteStream::new(vec![0; capacity]))
    }

    #[test]
    fn test_in_order() {
        let mut reasm = reassembler(8);
        reasm.push_substring(b"abcd", 0, false);
        assert_eq!(reasm.stream_out().bytes_written(), 4);
        assert_eq!(reasm.unassembled_bytes(), 0);
        reasm.push_substring(b"efgh", 4, false);
        assert_eq!(reasm.stream_out_mut().read(8), b"abcdefgh");
    }

    #[test]
    fn test_gap_then_fill() {
        let mut reasm = reassembler(8);
        reasm.push_substring(b"ef", 4, false);
        assert_eq!(reasm.stream_out().bytes_written(), 0);
        assert_eq!(reasm.unassembled_bytes(), 2);
        reasm.push_substring(b"abcd", 0, false);
        assert_eq!(reasm.stream_out().bytes_written(), 6);
        assert_eq!(reasm.unassembled_bytes(), 0);
        assert_eq!(reasm.stream_out_mut().read(8), b"abcdef");
    }

    #[test]
    fn test_all_permutations_of_three() {
        let fragments: [(&[u8], u64); 3] = [(b"abc", 0), (b"def", 3), (b"gh", 6)];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut reasm = reassembler(8);
            for i in order {
                let (data, index) = fragments[i];
                reasm.push_substring(data, index, index + data.len() as u64 == 8);
            }
            assert_eq!(reasm.stream_out_mut().read(8), b"abcdefgh");
            assert!(reasm.stream_out().input_ended());
            assert!(reasm.is_empty());
        }
    }

    #[test]
    fn test_overlap_counted_once() {
        let mut reasm = reassembler(16);
        reasm.push_substring(b"cdef", 2, false);
        reasm.push_substring(b"defg", 3, false);
        assert_eq!(reasm.unassembled_bytes(), 5);
        reasm.push_substring(b"ab", 0, false);
        assert_eq!(reasm.stream_out_mut().read(16), b"abcdefg");
        assert_eq!(reasm.unassembled_bytes(), 0);
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let mut reasm = reassembler(8);
        reasm.push_substring(b"abcd", 0, false);
        reasm.push_substring(b"abcd", 0, false);
        assert_eq!(reasm.stream_out().bytes_written(), 4);
        assert_eq!(reasm.unassembled_bytes(), 0);
    }

    #[test]
    fn test_stale_prefix_trimmed() {
        let mut reasm = reassembler(8);
        reasm.push_substring(b"abcd", 0, false);
        // First two bytes were already delivered.
        reasm.push_substring(b"cdef", 2, false);
        assert_eq!(reasm.stream_out_mut().read(8), b"abcdef");
    }

    #[test]
    fn test_wholly_stale_dropped() {
        let mut reasm = reassembler(8);
        reasm.push_substring(b"abcd", 0, false);
        reasm.push_substring(b"ab", 0, false);
        assert_eq!(reasm.stream_out().bytes_written(), 4);
        assert_eq!(reasm.unassembled_bytes(), 0);
    }

    #[test]
    fn test_capacity_truncates() {
        let mut reasm = reassembler(4);
        reasm.push_substring(b"abcdef", 0, true);
        // Only four bytes fit; the eof mark was cut off with the tail.
        assert_eq!(reasm.stream_out().bytes_written(), 4);
        assert!(!reasm.stream_out().input_ended());
        assert_eq!(reasm.stream_out_mut().read(4), b"abcd");
        // With room again, the tail is accepted and finishes the
        // stream.
        reasm.push_substring(b"ef", 4, true);
        assert_eq!(reasm.stream_out_mut().read(4), b"ef");
        assert!(reasm.stream_out().input_ended());
    }

    #[test]
    fn test_out_of_window_dropped() {
        let mut reasm = reassembler(4);
        reasm.push_substring(b"xy", 6, false);
        assert_eq!(reasm.unassembled_bytes(), 0);
        assert!(reasm.is_empty());
    }

    #[test]
    fn test_unread_output_narrows_window() {
        let mut reasm = reassembler(4);
        reasm.push_substring(b"abcd", 0, false);
        // Output still holds 4 unread bytes, so nothing more fits.
        reasm.push_substring(b"ef", 4, false);
        assert_eq!(reasm.unassembled_bytes(), 0);
        // Reading frees the window.
        assert_eq!(reasm.stream_out_mut().read(2), b"ab");
        reasm.push_substring(b"ef", 4, false);
        assert_eq!(reasm.unassembled_bytes(), 0);
        assert_eq!(reasm.stream_out().bytes_written(), 6);
    }

    #[test]
    fn test_eof_waits_for_gap() {
        let mut reasm = reassembler(8);
        reasm.push_substring(b"cd", 2, true);
        assert!(!reasm.stream_out().input_ended());
        reasm.push_substring(b"ab", 0, false);
        assert!(reasm.stream_out().input_ended());
        assert_eq!(reasm.stream_out_mut().read(8), b"abcd");
        assert!(reasm.stream_out_mut().eof());
    }

    #[test]
    fn test_empty_fragment_with_eof() {
        let mut reasm = reassembler(8);
        reasm.push_substring(b"ab", 0, false);
        reasm.push_substring(b"", 2, true);
        assert!(reasm.stream_out().input_ended());
    }

    #[test]
    fn test_eof_on_empty_stream() {
        let mut reasm = reassembler(8);
        reasm.push_substring(b"", 0, true);
        assert!(reasm.stream_out().input_ended());
        assert!(reasm.stream_out().eof());
    }

    #[test]
    fn test_capacity_invariant() {
        let mut reasm = reassembler(8);
        reasm.push_substring(b"abc", 0, false);
        reasm.push_substring(b"fgh", 5, false);
        reasm.push_substring(b"ij", 8, false);
        assert!(
            reasm.stream_out().buffer_size() + reasm.unassembled_bytes()
                <= reasm.capacity()
        );
    }
}
