use core::cmp;
use std::collections::VecDeque;

use crate::config::{TcpConfig, LINGER_FACTOR};
use crate::endpoint::receiver::{self, TcpReceiver};
use crate::endpoint::sender::{self, TcpSender};
use crate::endpoint::StreamReassembler;
use crate::storage::ByteStream;
use crate::time::Duration;
use crate::wire::Segment;

/// One full-duplex TCP connection.
///
/// Owns a [`TcpSender`] and a [`TcpReceiver`] and wires them together:
/// inbound segments are split between the two, outbound segments from
/// the sender are stamped with the receiver's acknowledgment number and
/// window before they reach the transmit queue. The connection also
/// runs the lifecycle rules the halves cannot see on their own: when
/// to reply, when the close is clean, when to give up and reset.
///
/// `active()` reports whether the connection still needs its host: to
/// deliver segments, to call `tick`, or to wait out the linger period.
#[derive(Debug)]
pub struct TcpConnection<'a> {
    sender: TcpSender<'a>,
    receiver: TcpReceiver<'a>,
    config: TcpConfig,
    segments_out: VecDeque<Segment>,
    since_last_recv: Duration,
    linger_after_finish: bool,
    active: bool,
    need_rst: bool,
}

impl<'a> TcpConnection<'a> {
    /// Create a connection with buffers sized per `config`.
    pub fn new(config: TcpConfig) -> TcpConnection<'a> {
        let receiver = TcpReceiver::new(StreamReassembler::new(
            vec![0; config.capacity],
            ByteStream::new(vec![0; config.capacity]),
        ));
        let sender = TcpSender::new(ByteStream::new(vec![0; config.capacity]), &config);
        TcpConnection {
            sender,
            receiver,
            config,
            segments_out: VecDeque::new(),
            since_last_recv: Duration::default(),
            linger_after_finish: true,
            active: true,
            need_rst: false,
        }
    }

    /// Initiate the handshake by sending a SYN.
    pub fn connect(&mut self) {
        self.sender.fill_window();
        self.enqueue_segments();
    }

    /// Write data to the outbound stream, and return how much was
    /// accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let written = self.sender.stream_in_mut().write(data);
        self.sender.fill_window();
        self.enqueue_segments();
        written
    }

    /// Close the outbound stream; the FIN follows once everything
    /// written has been sent.
    pub fn end_input_stream(&mut self) {
        self.sender.stream_in_mut().end_input();
        self.sender.fill_window();
        self.enqueue_segments();
    }

    /// Process one inbound segment.
    pub fn segment_received(&mut self, segment: &Segment) {
        // Before anything was sent or received, only a lone SYN gets
        // the connection going.
        if self.receiver.state() == receiver::State::Listen
            && self.sender.state() == sender::State::Closed
            && (!segment.syn || segment.ack() || segment.rst)
        {
            net_trace!("rx: not a connection request, dropping {}", segment);
            return;
        }
        self.since_last_recv = Duration::default();
        if segment.rst {
            net_trace!("rx: RST received");
            self.unclean_shutdown();
            return;
        }
        self.receiver.segment_received(segment);
        if let Some(ackno) = segment.ack_number {
            self.sender.ack_received(ackno, segment.window_len);
        }
        // The peer finished first: this side is the passive closer and
        // need not linger once its own stream is through.
        if self.receiver.state() == receiver::State::FinRecv
            && self.sender.state() == sender::State::SynAcked
        {
            self.linger_after_finish = false;
            self.try_clean_shutdown();
        }
        self.sender.fill_window();
        // Anything that occupied sequence space deserves a reply, as do
        // the keep-alive probes some peers send one position below the
        // acknowledgment number.
        if segment.segment_len() > 0
            || (self.receiver.state() == receiver::State::SynRecv
                && self
                    .receiver
                    .ackno()
                    .map_or(false, |ackno| segment.seq_number == ackno - 1))
        {
            self.sender.send_empty_segment();
        }
        self.try_clean_shutdown();
        self.enqueue_segments();
    }

    /// Notify the connection of the passage of time.
    pub fn tick(&mut self, elapsed: Duration) {
        self.since_last_recv += elapsed;
        self.sender.tick(elapsed);
        if self.sender.consecutive_retransmissions() > self.config.max_retx_attempts {
            net_debug!("giving up after {} retransmissions, resetting",
                       self.sender.consecutive_retransmissions());
            self.unclean_shutdown();
            self.need_rst = true;
            self.sender.send_empty_segment();
        } else {
            self.try_clean_shutdown();
        }
        self.enqueue_segments();
    }

    /// Return whether the connection still needs segments and ticks.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Segments ready for the datagram layer to transmit.
    pub fn segments_out(&mut self) -> &mut VecDeque<Segment> {
        &mut self.segments_out
    }

    /// Room left in the outbound stream.
    pub fn remaining_outbound_capacity(&self) -> usize {
        self.sender.stream_in().remaining_capacity()
    }

    /// Sequence-space octets sent but not yet acknowledged.
    pub fn bytes_in_flight(&self) -> u64 {
        self.sender.bytes_in_flight()
    }

    /// Inbound bytes received but not yet assembled.
    pub fn unassembled_bytes(&self) -> usize {
        self.receiver.unassembled_bytes()
    }

    /// Time since the last segment arrived.
    pub fn time_since_last_segment_received(&self) -> Duration {
        self.since_last_recv
    }

    /// Access the assembled inbound stream, for the application to
    /// read.
    pub fn inbound_stream(&self) -> &ByteStream<'a> {
        self.receiver.stream_out()
    }

    /// Access the assembled inbound stream mutably.
    pub fn inbound_stream_mut(&mut self) -> &mut ByteStream<'a> {
        self.receiver.stream_out_mut()
    }

    /// Access the sending half.
    pub fn sender(&self) -> &TcpSender<'a> {
        &self.sender
    }

    /// Access the receiving half.
    pub fn receiver(&self) -> &TcpReceiver<'a> {
        &self.receiver
    }

    /// Move segments from the sender to the transmit queue, stamping
    /// each with the receiver's acknowledgment number and window. After
    /// a reset is requested, exactly one RST-flagged segment goes out
    /// and the rest is dropped.
    fn enqueue_segments(&mut self) {
        while let Some(mut segment) = self.sender.segments_out().pop_front() {
            if self.need_rst {
                segment.rst = true;
                self.segments_out.push_back(segment);
                self.sender.segments_out().clear();
                return;
            }
            if let Some(ackno) = self.receiver.ackno() {
                segment.ack_number = Some(ackno);
                segment.window_len =
                    cmp::min(self.receiver.window_size(), u16::MAX as usize) as u16;
            }
            self.segments_out.push_back(segment);
        }
    }

    /// Declare the connection over if the close conditions hold: the
    /// passive closer once its FIN is acknowledged, the active closer
    /// once the peer has been silent for the linger period after both
    /// streams finished.
    fn try_clean_shutdown(&mut self) {
        if (self.linger_after_finish
            && self.receiver.state() == receiver::State::FinRecv
            && self.since_last_recv >= self.config.rt_timeout * LINGER_FACTOR)
            || (!self.linger_after_finish && self.sender.state() == sender::State::FinAcked)
        {
            if self.active {
                net_trace!("connection finished cleanly");
            }
            self.active = false;
        }
    }

    /// Kill the connection: both streams go into the error state and
    /// no further segments will be produced.
    fn unclean_shutdown(&mut self) {
        self.receiver.stream_out_mut().set_error();
        self.sender.stream_in_mut().set_error();
        self.linger_after_finish = false;
        self.active = false;
    }
}

impl<'a> Drop for TcpConnection<'a> {
    /// A connection dropped while still active tells the peer with a
    /// best-effort RST.
    fn drop(&mut self) {
        if self.active {
            net_debug!("dropping active connection, queueing RST");
            self.need_rst = true;
            self.sender.send_empty_segment();
            self.enqueue_segments();
        }
    }
}
