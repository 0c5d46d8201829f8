use bytes::{Buf, Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::seq_num::SeqNum;


#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    /// created for an unknown session id, waiting for a SYN
    New,
    Established,
    /// terminal - the registry evicts killed sessions
    Killed,
}

/// The per-session reliability state of a stop-and-wait ARQ: at most one MSG payload is in flight
///  at any time, and it stays at the front of the outgoing buffer until the peer acknowledges it.
///
/// All operations are pure state mutations, no I/O happens here.
#[derive(Debug)]
pub struct Session {
    id: u16,
    name: Option<String>,
    state: SessionState,

    /// The sequence number of the first byte in `outgoing_buffer`, i.e. the number of bytes
    ///  acknowledged by the peer (mod 65536) offset by the initial sequence number
    my_seq: SeqNum,
    /// The sequence number expected for the peer's next MSG
    their_seq: SeqNum,

    /// Application data that was not yet acknowledged by the peer. The payload in flight is a
    ///  prefix of this buffer.
    outgoing_buffer: BytesMut,
    /// Data received from the peer that was not yet picked up by the application
    incoming_buffer: BytesMut,
    /// The exact payload of the most recently sent MSG - re-sent verbatim if the peer
    ///  retransmits
    last_sent_data: Bytes,

    last_activity: Instant,
}

impl Session {
    pub fn new(id: u16) -> Session {
        Self::new_with_initial_seq(id, SeqNum::from_raw(rand::random::<u16>()))
    }

    pub fn new_with_initial_seq(id: u16, my_seq: SeqNum) -> Session {
        Session {
            id,
            name: None,
            state: SessionState::New,
            my_seq,
            their_seq: SeqNum::ZERO,
            outgoing_buffer: BytesMut::new(),
            incoming_buffer: BytesMut::new(),
            last_sent_data: Bytes::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn my_seq(&self) -> SeqNum {
        self.my_seq
    }

    pub fn their_seq(&self) -> SeqNum {
        self.their_seq
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn syn_valid(&self) -> bool {
        self.state == SessionState::New
    }

    pub fn msg_valid(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn fin_valid(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn set_their_seq(&mut self, seq: SeqNum) {
        self.their_seq = seq;
    }

    pub fn set_established(&mut self) {
        info!(session_id = self.id, name = ?self.name, "session established");
        self.state = SessionState::Established;
    }

    /// An ACK is valid if it acknowledges some prefix (possibly empty) of the payload in flight:
    ///  it must neither move back behind `my_seq` nor forward past the end of the last send.
    pub fn valid_ack(&self, ack: SeqNum) -> bool {
        ack.bytes_since(self.my_seq) as usize <= self.last_sent_data.len()
    }

    /// Releases acknowledged bytes from the outgoing buffer and moves `my_seq` forward to `ack`.
    ///
    /// NB: `ack` must be checked with [Session::valid_ack] first
    pub fn ack_outgoing(&mut self, ack: SeqNum) {
        debug_assert!(self.valid_ack(ack));

        let num_acked = ack.bytes_since(self.my_seq) as usize;
        if num_acked == 0 {
            return;
        }

        self.outgoing_buffer.advance(num_acked);
        self.last_sent_data = self.last_sent_data.slice(num_acked..);
        self.my_seq = ack;
        debug!(session_id = self.id, "peer acknowledged {} bytes, my_seq is now {}", num_acked, self.my_seq);
    }

    pub fn queue_incoming(&mut self, data: &[u8]) {
        self.incoming_buffer.extend_from_slice(data);
    }

    pub fn increment_their_seq(&mut self, n: usize) {
        self.their_seq = self.their_seq + n;
    }

    /// Returns (a copy of) up to `max_len` bytes from the front of the outgoing buffer. The data
    ///  is not removed - that only happens when the peer acknowledges it.
    pub fn read_outgoing(&self, max_len: usize) -> Bytes {
        let len = max_len.min(self.outgoing_buffer.len());
        Bytes::copy_from_slice(&self.outgoing_buffer[..len])
    }

    /// Records the payload of a MSG that is about to be sent, for re-sending
    pub fn record_sent(&mut self, data: Bytes) {
        debug_assert!(self.outgoing_buffer.starts_with(&data));
        self.last_sent_data = data;
    }

    pub fn last_sent_data(&self) -> &Bytes {
        &self.last_sent_data
    }

    /// Application side: append data to be sent to the peer
    pub fn queue_outgoing(&mut self, data: &[u8]) {
        self.outgoing_buffer.extend_from_slice(data);
    }

    /// Application side: remove and return everything received so far
    pub fn take_incoming(&mut self) -> Bytes {
        self.incoming_buffer.split().freeze()
    }

    pub fn incoming_len(&self) -> usize {
        self.incoming_buffer.len()
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing_buffer.len()
    }

    /// Returns the state the session was in before, so callers can tell whether an established
    ///  session just went away
    pub fn destroy(&mut self) -> SessionState {
        if self.state != SessionState::Killed {
            info!(session_id = self.id, name = ?self.name, "session killed");
        }
        let previous = std::mem::replace(&mut self.state, SessionState::Killed);
        self.outgoing_buffer.clear();
        self.incoming_buffer.clear();
        self.last_sent_data = Bytes::new();
        previous
    }
}
