use thiserror::Error;

/// Conditions that terminate a transport's dispatch loop (or prevent it from starting).
///
/// Recoverable protocol conditions (duplicate SYN, stale sequence number, impossible ACK, ...)
///  are not represented here: they are resolved by a defined reply on the wire.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("encoded packet has {len} bytes, exceeding the limit of {max_len} bytes")]
    PacketTooLarge { len: usize, max_len: usize },

    #[error("transport is unusable: {0:#}")]
    UnusableTransport(anyhow::Error),

    #[error("max packet size {max_packet_size} is below the minimum of {min_packet_size}")]
    PacketSizeTooSmall { max_packet_size: usize, min_packet_size: usize },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
