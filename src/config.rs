use crate::time::Duration;
use crate::wire::SeqNumber;

/// How many retransmission timeouts of inbound silence the active closer
/// waits after the peer's FIN before declaring the connection done.
pub const LINGER_FACTOR: u32 = 10;

/// Tunable parameters for one connection.
///
/// `capacity` bounds the outbound stream and the inbound reassembly
/// window independently; the same value is used for both.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Size of the outbound and inbound stream buffers, in bytes.
    pub capacity: usize,
    /// Initial value of the retransmission timeout.
    pub rt_timeout: Duration,
    /// Retransmission count beyond which the connection aborts with RST.
    pub max_retx_attempts: u32,
    /// Largest payload carried by a single segment.
    pub max_payload_size: usize,
    /// Initial sequence number to use instead of a random one.
    ///
    /// Letting the sender pick a random ISN is correct for real traffic;
    /// tests set this for determinism.
    pub fixed_isn: Option<SeqNumber>,
}

impl Default for TcpConfig {
    fn default() -> TcpConfig {
        TcpConfig {
            capacity: 64000,
            rt_timeout: Duration::from_millis(1000),
            max_retx_attempts: 8,
            max_payload_size: 1000,
            fixed_isn: None,
        }
    }
}
