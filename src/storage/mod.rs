/*! Specialized containers.

The `storage` module provides the containers the endpoint is built on:
[`ByteStream`], the bounded FIFO that applications read from and write
to, and [`Assembler`], the interval bookkeeping behind out-of-order
reassembly. Both work over caller-supplied storage.
*/

mod assembler;
mod byte_stream;

pub use self::assembler::Assembler;
pub use self::byte_stream::ByteStream;
