use core::cmp;
use core::fmt;
use std::collections::VecDeque;

use crate::config::TcpConfig;
use crate::rand::Rand;
use crate::storage::ByteStream;
use crate::time::Duration;
use crate::wire::{unwrap, wrap, Segment, SeqNumber};

/// The retransmission timer.
///
/// Counts caller-supplied time while running; expires once the
/// accumulated time reaches the timeout.
#[derive(Debug)]
struct Timer {
    timeout: Duration,
    elapsed: Duration,
    running: bool,
}

impl Timer {
    fn new(timeout: Duration) -> Timer {
        Timer {
            timeout,
            elapsed: Duration::default(),
            running: false,
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_running(&self) -> bool {
        self.running
    }

    /// Start counting from zero.
    fn restart(&mut self) {
        self.elapsed = Duration::default();
        self.running = true;
    }

    /// Stop, and arm with a new timeout for the next restart.
    fn reset(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.elapsed = Duration::default();
        self.running = false;
    }

    fn tick(&mut self, elapsed: Duration) {
        if self.running {
            self.elapsed += elapsed;
        }
    }

    fn expired(&self) -> bool {
        self.running && self.elapsed >= self.timeout
    }
}

/// The state of the sending half, derived from its counters.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    /// Nothing sent yet.
    Closed,
    /// SYN sent, not yet acknowledged.
    SynSent,
    /// Stream in progress.
    SynAcked,
    /// FIN sent, not yet acknowledged.
    FinSent,
    /// FIN acknowledged; the outbound stream is fully delivered.
    FinAcked,
    /// The outbound stream was put into the error state.
    Error,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Closed => write!(f, "CLOSED"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::SynAcked => write!(f, "SYN-ACKED"),
            State::FinSent => write!(f, "FIN-SENT"),
            State::FinAcked => write!(f, "FIN-ACKED"),
            State::Error => write!(f, "ERROR"),
        }
    }
}

/// The sending half of a connection.
///
/// Reads the outbound [`ByteStream`], cuts it into segments no larger
/// than the peer's window allows, and keeps every unacknowledged
/// segment queued for retransmission. A single timer covers the oldest
/// segment in flight; its timeout doubles on every expiry while the
/// peer advertises a nonzero window.
///
/// The segments it produces carry no acknowledgment state; the
/// connection stamps ackno and window onto them at dequeue time.
#[derive(Debug)]
pub struct TcpSender<'a> {
    isn: SeqNumber,
    segments_out: VecDeque<Segment>,
    in_flight: VecDeque<Segment>,
    stream: ByteStream<'a>,
    timer: Timer,
    rto_initial: Duration,
    retx_count: u32,
    next_seq_no: u64,
    last_ack_no: u64,
    bytes_in_flight: u64,
    window_size: u64,
    max_payload_size: usize,
}

impl<'a> TcpSender<'a> {
    /// Create a sender reading from the given outbound stream.
    ///
    /// The initial sequence number comes from `config.fixed_isn`, or is
    /// drawn randomly, once, right here.
    pub fn new(stream: ByteStream<'a>, config: &TcpConfig) -> TcpSender<'a> {
        let isn = config.fixed_isn.unwrap_or_else(|| {
            let seed = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|t| t.as_nanos() as u64)
                .unwrap_or(0);
            SeqNumber(Rand::new(seed).rand_u32())
        });
        TcpSender {
            isn,
            segments_out: VecDeque::new(),
            in_flight: VecDeque::new(),
            stream,
            timer: Timer::new(config.rt_timeout),
            rto_initial: config.rt_timeout,
            retx_count: 0,
            next_seq_no: 0,
            last_ack_no: 0,
            bytes_in_flight: 0,
            // Assume one free sequence position until the peer says
            // otherwise, so that the SYN can go out.
            window_size: 1,
            max_payload_size: config.max_payload_size,
        }
    }

    /// Access the outbound stream.
    pub fn stream_in(&self) -> &ByteStream<'a> {
        &self.stream
    }

    /// Access the outbound stream mutably.
    pub fn stream_in_mut(&mut self) -> &mut ByteStream<'a> {
        &mut self.stream
    }

    /// Segments waiting to be transmitted by the connection.
    pub fn segments_out(&mut self) -> &mut VecDeque<Segment> {
        &mut self.segments_out
    }

    /// Sequence-space octets sent but not yet acknowledged. SYN and FIN
    /// count one each.
    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    /// Number of retransmissions since the last acknowledgment of new
    /// data.
    pub fn consecutive_retransmissions(&self) -> u32 {
        self.retx_count
    }

    /// The absolute sequence number of the next octet to be sent.
    pub fn next_seqno_absolute(&self) -> u64 {
        self.next_seq_no
    }

    /// The wire sequence number of the next octet to be sent.
    pub fn next_seqno(&self) -> SeqNumber {
        wrap(self.next_seq_no, self.isn)
    }

    /// Return the sender state. Always derived, never stored.
    pub fn state(&self) -> State {
        if self.stream.error() {
            State::Error
        } else if self.next_seq_no == 0 {
            State::Closed
        } else if self.next_seq_no == self.bytes_in_flight {
            State::SynSent
        } else if !self.stream.eof() || self.next_seq_no < self.stream.bytes_written() + 2 {
            State::SynAcked
        } else if self.bytes_in_flight > 0 {
            State::FinSent
        } else {
            State::FinAcked
        }
    }

    /// Record a segment as sent: advance the sequence counter, add it
    /// to the in-flight queue and hand a copy to the transmit queue.
    fn send_segment(&mut self, segment: Segment) {
        net_trace!("tx: sending {}", segment);
        let len = segment.segment_len() as u64;
        self.next_seq_no += len;
        self.bytes_in_flight += len;
        self.segments_out.push_back(segment.clone());
        self.in_flight.push_back(segment);
        if !self.timer.is_running() {
            self.timer.restart();
        }
    }

    /// Free space in the peer's window.
    ///
    /// A zero window with nothing in flight counts as one octet, so
    /// that a probe keeps the conversation going.
    fn free_window(&self) -> u64 {
        if self.window_size == 0 && self.next_seq_no == self.last_ack_no {
            return 1;
        }
        if self.window_size <= self.next_seq_no - self.last_ack_no {
            return 0;
        }
        self.window_size - (self.next_seq_no - self.last_ack_no)
    }

    /// Produce as many segments as the window and the outbound stream
    /// allow.
    ///
    /// From the closed state this emits the SYN. Afterwards it cuts
    /// payload segments of up to the configured maximum size, and adds
    /// the FIN once the stream has ended, it has been read dry, and a
    /// sequence position is free to carry it.
    pub fn fill_window(&mut self) {
        if self.state() == State::Closed {
            let segment = Segment {
                syn: true,
                seq_number: self.isn,
                ..Segment::default()
            };
            self.send_segment(segment);
            return;
        }
        loop {
            let free_window = self.free_window();
            if free_window == 0 {
                return;
            }
            let stream_size = self.stream.buffer_size() as u64;
            let need_fin = self.stream.input_ended() && self.state() == State::SynAcked;
            if stream_size == 0 && !need_fin {
                return;
            }
            let send_size =
                cmp::min(cmp::min(stream_size, free_window), self.max_payload_size as u64);
            let mut segment = Segment {
                seq_number: wrap(self.next_seq_no, self.isn),
                payload: self.stream.read(send_size as usize),
                ..Segment::default()
            };
            // The FIN needs a sequence position of its own.
            if self.stream.eof() && free_window > send_size && need_fin {
                segment.fin = true;
            }
            self.send_segment(segment);
        }
    }

    /// Process an acknowledgment from the peer.
    ///
    /// New acknowledgments reset the retransmission timeout and release
    /// fully covered segments from the in-flight queue. Acknowledgments
    /// of nothing new still refresh the window; anything older, or
    /// beyond what was sent, is ignored.
    pub fn ack_received(&mut self, ackno: SeqNumber, window_size: u16) {
        let abs_ack_no = unwrap(ackno, self.isn, self.last_ack_no);
        if abs_ack_no <= self.last_ack_no || abs_ack_no > self.next_seq_no {
            if abs_ack_no == self.last_ack_no {
                self.window_size = window_size as u64;
            }
            return;
        }
        net_trace!("tx: ack of {} octets, window {}", abs_ack_no - self.last_ack_no, window_size);
        self.timer.reset(self.rto_initial);
        self.retx_count = 0;
        while let Some(segment) = self.in_flight.front() {
            let len = segment.segment_len() as u64;
            let abs_seq_no = unwrap(segment.seq_number, self.isn, self.last_ack_no);
            if abs_seq_no + len > abs_ack_no {
                // Still partially in flight; keep timing it.
                self.timer.restart();
                break;
            }
            self.bytes_in_flight -= len;
            self.in_flight.pop_front();
        }
        self.window_size = window_size as u64;
        self.last_ack_no = abs_ack_no;
    }

    /// Notify the sender of the passage of time. On expiry, the oldest
    /// in-flight segment is queued again; the timeout doubles unless
    /// the peer's window is zero (probes do not back off).
    pub fn tick(&mut self, elapsed: Duration) {
        self.timer.tick(elapsed);
        if !self.timer.expired() {
            return;
        }
        // The timer only runs while something is in flight.
        debug_assert!(!self.in_flight.is_empty());
        if let Some(segment) = self.in_flight.front() {
            net_trace!("tx: retransmitting {}", segment);
            self.segments_out.push_back(segment.clone());
        }
        if self.window_size > 0 {
            self.retx_count += 1;
            let rto = self.timer.timeout() * 2;
            self.timer.reset(rto);
        }
        self.timer.restart();
    }

    /// Ensure one outbound segment exists, to carry an acknowledgment
    /// or reset. The segment occupies no sequence space and is not
    /// retransmitted.
    pub fn send_empty_segment(&mut self) {
        if self.segments_out.is_empty() {
            self.segments_out.push_back(Segment {
                seq_number: wrap(self.next_seq_no, self.isn),
                ..Segment::default()
            });
        }
    }
}
