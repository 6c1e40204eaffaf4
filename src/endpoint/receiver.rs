use core::fmt;

use crate::endpoint::StreamReassembler;
use crate::storage::ByteStream;
use crate::wire::{unwrap, wrap, Segment, SeqNumber};

/// The state of the receiving half, derived from its fields.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    /// No SYN seen yet.
    Listen,
    /// Stream in progress.
    SynRecv,
    /// The peer's FIN has been assembled; the inbound stream is ended.
    FinRecv,
    /// The inbound stream was put into the error state.
    Error,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Listen => write!(f, "LISTEN"),
            State::SynRecv => write!(f, "SYN-RECEIVED"),
            State::FinRecv => write!(f, "FIN-RECEIVED"),
            State::Error => write!(f, "ERROR"),
        }
    }
}

/// The receiving half of a connection.
///
/// Ingests segments as they arrive, feeds their payloads to the
/// [`StreamReassembler`], and answers the two questions the peer's
/// sender keeps asking: the acknowledgement number (the next sequence
/// number needed) and the window (how much room remains).
#[derive(Debug)]
pub struct TcpReceiver<'a> {
    reassembler: StreamReassembler<'a>,
    isn: Option<SeqNumber>,
}

impl<'a> TcpReceiver<'a> {
    /// Create a receiver delivering into the given reassembler.
    pub fn new(reassembler: StreamReassembler<'a>) -> TcpReceiver<'a> {
        TcpReceiver {
            reassembler,
            isn: None,
        }
    }

    /// Process one inbound segment.
    ///
    /// Before a SYN arrives, everything else is dropped. The first SYN
    /// fixes the mapping from wire sequence numbers to stream indices;
    /// from then on payload bytes and the FIN flag flow into the
    /// reassembler, which decides what is in window.
    pub fn segment_received(&mut self, segment: &Segment) {
        let isn = match self.isn {
            Some(isn) => isn,
            None => {
                if !segment.syn {
                    net_trace!("rx: dropping segment before SYN: {}", segment);
                    return;
                }
                net_trace!("rx: SYN with isn={}", segment.seq_number);
                self.isn = Some(segment.seq_number);
                segment.seq_number
            }
        };

        // The stream index of the last delivered byte is the best
        // guess of where the peer is; FIN occupies one more position.
        let stream_out = self.reassembler.stream_out();
        let checkpoint =
            stream_out.bytes_written() + if stream_out.input_ended() { 2 } else { 1 };
        // The SYN occupies the first sequence position, so payload of a
        // SYN-carrying segment starts one past its seqno.
        let seqno = if segment.syn {
            segment.seq_number + 1
        } else {
            segment.seq_number
        };
        let abs_seq_no = unwrap(seqno, isn, checkpoint);

        // Position 0 is the SYN itself: a segment unwrapping there is a
        // bare SYN retransmission and carries nothing for the stream.
        if abs_seq_no > 0 {
            self.reassembler
                .push_substring(&segment.payload, abs_seq_no - 1, segment.fin);
        }
    }

    /// The acknowledgement number to send to the peer: one past the
    /// highest contiguous position received, or `None` before the SYN
    /// or after an error.
    pub fn ackno(&self) -> Option<SeqNumber> {
        match self.state() {
            State::Listen | State::Error => None,
            state => {
                let stream_out = self.reassembler.stream_out();
                let abs_ack_no = stream_out.bytes_written()
                    + 1
                    + if state == State::FinRecv { 1 } else { 0 };
                self.isn.map(|isn| wrap(abs_ack_no, isn))
            }
        }
    }

    /// The window to advertise: the capacity not occupied by assembled,
    /// unread bytes.
    pub fn window_size(&self) -> usize {
        self.reassembler.capacity() - self.reassembler.stream_out().buffer_size()
    }

    /// Number of bytes received but not yet assembled.
    pub fn unassembled_bytes(&self) -> usize {
        self.reassembler.unassembled_bytes()
    }

    /// Return the receiver state. Always derived, never stored.
    pub fn state(&self) -> State {
        if self.reassembler.stream_out().error() {
            State::Error
        } else if self.isn.is_none() {
            State::Listen
        } else if self.reassembler.stream_out().input_ended() {
            State::FinRecv
        } else {
            State::SynRecv
        }
    }

    /// Access the assembled inbound stream.
    pub fn stream_out(&self) -> &ByteStream<'a> {
        self.reassembler.stream_out()
    }

    /// Access the assembled inbound stream mutably.
    pub fn stream_out_mut(&mut self) -> &mut ByteStream<'a> {
        self.reassembler.stream_out_mut()
    }
}
