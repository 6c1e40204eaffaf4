use core::{fmt, ops};

use byteorder::{ByteOrder, NetworkEndian};

use crate::wire::checksum;
use crate::{Error, Result};

/// A TCP sequence number, as it appears on the wire.
///
/// A sequence number is an integer modulo 2<sup>32</sup>. It carries no
/// ordering of its own; converting to and from 64-bit absolute stream
/// positions is the job of [`wrap`] and [`unwrap`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub u32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ops::Add<u64> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u64) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs as u32))
    }
}

impl ops::Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs))
    }
}

impl ops::Sub<SeqNumber> for SeqNumber {
    type Output = u32;

    fn sub(self, rhs: SeqNumber) -> u32 {
        self.0.wrapping_sub(rhs.0)
    }
}

/// Wrap an absolute 64-bit stream position into a wire sequence number.
///
/// Position 0 maps to `isn` (the position of the SYN itself).
pub fn wrap(n: u64, isn: SeqNumber) -> SeqNumber {
    isn + n
}

/// Unwrap a wire sequence number into the absolute 64-bit stream
/// position closest to `checkpoint`.
///
/// Of the positions that wrap to `n`, the one minimizing the distance
/// to `checkpoint` is returned; ties resolve toward the larger one.
pub fn unwrap(n: SeqNumber, isn: SeqNumber, checkpoint: u64) -> u64 {
    let offset = (n - isn) as u64;
    if checkpoint <= offset {
        return offset;
    }
    let steps = (checkpoint - offset) >> 32;
    let below = offset + (steps << 32);
    let distance = checkpoint - below;
    if distance >= 1 << 31 {
        // The candidate one wrap above is at least as close.
        match below.checked_add(1 << 32) {
            Some(above) => above,
            None => below,
        }
    } else {
        below
    }
}

/// A read/write wrapper around a TCP segment buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

mod field {
    use core::ops::Range;

    pub const SRC_PORT: Range<usize> = 0..2;
    pub const DST_PORT: Range<usize> = 2..4;
    pub const SEQ_NUM: Range<usize> = 4..8;
    pub const ACK_NUM: Range<usize> = 8..12;
    pub const FLAGS: Range<usize> = 12..14;
    pub const WIN_SIZE: Range<usize> = 14..16;
    pub const CHECKSUM: Range<usize> = 16..18;
    pub const URGENT: Range<usize> = 18..20;

    pub const FLG_FIN: u16 = 0x001;
    pub const FLG_SYN: u16 = 0x002;
    pub const FLG_RST: u16 = 0x004;
    pub const FLG_ACK: u16 = 0x010;
}

/// Length of a TCP header without options.
pub const HEADER_LEN: usize = field::URGENT.end;

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with TCP packet structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic.
    ///
    /// Returns `Err(Error::Truncated)` if the buffer is shorter than
    /// the header length, and `Err(Error::Malformed)` if the data
    /// offset field points before the end of the fixed header.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error::Truncated);
        }
        let header_len = self.header_len() as usize;
        if header_len < HEADER_LEN {
            return Err(Error::Malformed);
        }
        if len < header_len {
            return Err(Error::Truncated);
        }
        Ok(())
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the source port field.
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    /// Return the destination port field.
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    /// Return the sequence number field.
    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_u32(&self.buffer.as_ref()[field::SEQ_NUM]))
    }

    /// Return the acknowledgement number field.
    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_u32(&self.buffer.as_ref()[field::ACK_NUM]))
    }

    /// Return the FIN flag.
    pub fn fin(&self) -> bool {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]);
        raw & field::FLG_FIN != 0
    }

    /// Return the SYN flag.
    pub fn syn(&self) -> bool {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]);
        raw & field::FLG_SYN != 0
    }

    /// Return the RST flag.
    pub fn rst(&self) -> bool {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]);
        raw & field::FLG_RST != 0
    }

    /// Return the ACK flag.
    pub fn ack(&self) -> bool {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]);
        raw & field::FLG_ACK != 0
    }

    /// Return the header length, in octets.
    pub fn header_len(&self) -> u8 {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]);
        ((raw >> 12) * 4) as u8
    }

    /// Return the window size field.
    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::WIN_SIZE])
    }

    /// Return the checksum field.
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    /// Validate the packet checksum, folding in the pseudo-header sum
    /// supplied by the datagram layer.
    pub fn verify_checksum(&self, pseudo_sum: u32) -> bool {
        let data = self.buffer.as_ref();
        checksum::combine(&[checksum::fold(pseudo_sum), checksum::data(data)]) == !0
    }

    /// Return the payload as a slice, skipping the header and options.
    pub fn payload(&self) -> &[u8] {
        let header_len = self.header_len() as usize;
        &self.buffer.as_ref()[header_len..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Set the source port field.
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], value)
    }

    /// Set the destination port field.
    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], value)
    }

    /// Set the sequence number field.
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::SEQ_NUM], value.0)
    }

    /// Set the acknowledgement number field.
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::ACK_NUM], value.0)
    }

    /// Clear the entire flags field.
    pub fn clear_flags(&mut self) {
        let data = self.buffer.as_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw & !0x0fff)
    }

    /// Set the FIN flag.
    pub fn set_fin(&mut self, value: bool) {
        self.set_flag(field::FLG_FIN, value)
    }

    /// Set the SYN flag.
    pub fn set_syn(&mut self, value: bool) {
        self.set_flag(field::FLG_SYN, value)
    }

    /// Set the RST flag.
    pub fn set_rst(&mut self, value: bool) {
        self.set_flag(field::FLG_RST, value)
    }

    /// Set the ACK flag.
    pub fn set_ack(&mut self, value: bool) {
        self.set_flag(field::FLG_ACK, value)
    }

    fn set_flag(&mut self, flag: u16, value: bool) {
        let data = self.buffer.as_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        let raw = if value { raw | flag } else { raw & !flag };
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw)
    }

    /// Set the header length, in octets.
    pub fn set_header_len(&mut self, value: u8) {
        let data = self.buffer.as_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        let raw = (raw & !0xf000) | ((value as u16) / 4) << 12;
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw)
    }

    /// Set the window size field.
    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::WIN_SIZE], value)
    }

    /// Set the checksum field.
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value)
    }

    /// Set the urgent pointer field.
    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::URGENT], value)
    }

    /// Compute and fill in the checksum, folding in the pseudo-header
    /// sum supplied by the datagram layer.
    pub fn fill_checksum(&mut self, pseudo_sum: u32) {
        self.set_checksum(0);
        let value = {
            let data = self.buffer.as_ref();
            checksum::combine(&[checksum::fold(pseudo_sum), checksum::data(data)])
        };
        self.set_checksum(!value)
    }

    /// Return the payload as a mutable slice.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        &mut self.buffer.as_mut()[header_len..]
    }
}

/// An owned, parsed TCP segment.
///
/// This is the value type the engine routes, queues for transmission
/// and keeps in flight. Ports are not part of it: a single connection
/// has no demultiplexing to do, and the datagram adapter stamps them at
/// serialization time. The ACK flag is represented by `ack_number`
/// being present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    pub seq_number: SeqNumber,
    pub ack_number: Option<SeqNumber>,
    pub window_len: u16,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Parse a packet into an owned segment, verifying the checksum
    /// against the pseudo-header sum supplied by the datagram layer.
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>, pseudo_sum: u32) -> Result<Segment> {
        packet.check_len()?;
        if !packet.verify_checksum(pseudo_sum) {
            return Err(Error::Checksum);
        }
        Ok(Segment {
            seq_number: packet.seq_number(),
            ack_number: if packet.ack() {
                Some(packet.ack_number())
            } else {
                None
            },
            window_len: packet.window_len(),
            syn: packet.syn(),
            fin: packet.fin(),
            rst: packet.rst(),
            payload: packet.payload().to_vec(),
        })
    }

    /// Return the length of a packet that will be emitted from this
    /// segment, in octets.
    pub fn buffer_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Emit the segment into a packet, computing the checksum last.
    ///
    /// Ports are left untouched; the caller sets them on the packet
    /// before emitting, so that the checksum covers their final values.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>, pseudo_sum: u32) {
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or(SeqNumber(0)));
        packet.set_window_len(self.window_len);
        packet.set_header_len(HEADER_LEN as u8);
        packet.clear_flags();
        packet.set_syn(self.syn);
        packet.set_fin(self.fin);
        packet.set_rst(self.rst);
        packet.set_ack(self.ack_number.is_some());
        packet.set_urgent_at(0);
        packet.payload_mut()[..self.payload.len()].copy_from_slice(&self.payload);
        packet.fill_checksum(pseudo_sum)
    }

    /// Return whether the ACK flag is set.
    pub fn ack(&self) -> bool {
        self.ack_number.is_some()
    }

    /// Return the length of the segment in sequence space: the payload
    /// plus one position each for SYN and FIN.
    pub fn segment_len(&self) -> usize {
        self.payload.len() + self.syn as usize + self.fin as usize
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP seq={}", self.seq_number)?;
        if let Some(ack_number) = self.ack_number {
            write!(f, " ack={}", ack_number)?;
        }
        write!(f, " win={}", self.window_len)?;
        if self.syn {
            write!(f, " syn")?;
        }
        if self.fin {
            write!(f, " fin")?;
        }
        if self.rst {
            write!(f, " rst")?;
        }
        write!(f, " len={}", self.payload.len())
    }
}
