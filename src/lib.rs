//! The session layer of a dnscat2 style tunnel: reliable, ordered, bidirectional byte streams
//!  carried inside a request/response-only transport (e.g. DNS queries and their answers).
//!
//! ## Design
//!
//! * The transport never pushes data. Every inbound frame (request) is answered by at most one
//!   outbound frame (response), and both are limited to the transport's `max_packet_size`
//! * The transport may duplicate, drop or reorder requests. The protocol is stop-and-wait ARQ
//!   with one MSG payload in flight per session, and every inconsistency (stale sequence number,
//!   impossible ACK) is resolved by re-sending the previous response verbatim rather than by
//!   signalling an error
//! * Sessions are multiplexed over the transport by a 16 bit session id. Several transports can
//!   feed the same sessions: each transport runs its own [dispatcher::Dispatcher], and all
//!   dispatchers share a [registry::SessionRegistry]
//! * Encryption / authentication is not part of this layer
//!
//! ## Packets
//!
//! All numbers in network byte order (BE). Sequence numbers count bytes and wrap modulo 65536.
//!
//! ```ascii
//! 0: message type (u8): 0 SYN, 1 MSG, 2 FIN
//! 1: session id (u16)
//! ```
//!
//! *SYN*: opens a session, announcing the sender's initial sequence number. The server responds
//!  with a SYN carrying its own initial sequence number.
//! ```ascii
//! 3: seq (u16)
//! 5: options (opaque, until the end of the frame) - see [packet::SynOptions]
//! ```
//!
//! *MSG*: carries data. `seq` is the sequence number of the first data byte, `ack` is the
//!  sequence number of the next byte the sender expects from its peer.
//! ```ascii
//! 3: seq (u16)
//! 5: ack (u16)
//! 7: data (until the end of the frame)
//! ```
//!
//! *FIN*: closes a session. Also sent in response to a MSG for a session that is not established.
//! ```ascii
//! 3: reason (opaque, until the end of the frame)
//! ```

pub mod seq_num;
pub mod error;
pub mod packet;
pub mod session;
pub mod registry;
pub mod session_listener;
pub mod pipe;
pub mod config;
pub mod dispatcher;
pub mod test_util;


#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
