/*! Wire format access.

The `wire` module provides the segment-level boundary of the endpoint:
[`SeqNumber`] arithmetic, the zero-copy [`Packet`] view over a buffer of
bytes, and the owned [`Segment`] value type the engine queues and
routes. The datagram layer below is expected to hand over the
pseudo-header checksum contribution; everything else about the TCP
header lives here.
*/

mod tcp;

pub use self::tcp::{unwrap, wrap, Packet, SeqNumber, Segment};

pub mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    /// Fold a 32-bit accumulator into an RFC 1071 16-bit sum.
    pub const fn fold(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final
    /// complement).
    pub fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        // For each 32-byte chunk...
        const CHUNK_SIZE: usize = 32;
        while data.len() >= CHUNK_SIZE {
            let mut d = &data[..CHUNK_SIZE];
            // ... take by 2 bytes and sum them.
            while d.len() >= 2 {
                accum += NetworkEndian::read_u16(d) as u32;
                d = &d[2..];
            }

            data = &data[CHUNK_SIZE..];
        }

        // Sum the rest that does not fit the last 32-byte chunk,
        // taking by 2 bytes.
        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        // Add the last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        fold(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        fold(accum)
    }
}
