/*! The connection engine.

The `endpoint` module contains the four components a connection is made
of, leaves first:

  - [`StreamReassembler`] accepts possibly out-of-order, possibly
    overlapping fragments of the inbound stream and writes the longest
    contiguous prefix into its output [`ByteStream`](crate::storage::ByteStream).
  - [`TcpReceiver`] ingests segments, splitting them into SYN, payload
    and FIN, and derives the acknowledgement number and window to
    advertise.
  - [`TcpSender`] cuts the outbound stream into segments, tracks what is
    in flight, and runs the retransmission timer.
  - [`TcpConnection`] owns one of each, routes segments between them,
    stamps outbound segments with the receiver's acknowledgment state,
    and drives the connection lifecycle through clean and unclean
    teardown.

Sender and receiver do not know about each other; everything they must
exchange travels through the connection at segment granularity.
*/

mod connection;
mod reassembler;
pub mod receiver;
pub mod sender;

pub use self::connection::TcpConnection;
pub use self::reassembler::StreamReassembler;
pub use self::receiver::TcpReceiver;
pub use self::sender::TcpSender;
