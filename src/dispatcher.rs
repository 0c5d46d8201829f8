use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::config::Dnscat2Config;
use crate::error::{ProtocolError, ProtocolResult};
use crate::packet::{Packet, SynOptions};
use crate::pipe::Pipe;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::seq_num::SeqNum;
use crate::session::{Session, SessionState};


/// Drives the request/response loop of a single transport. Several dispatchers (one per
///  transport) can share a [SessionRegistry].
pub struct Dispatcher {
    pipe: Arc<dyn Pipe>,
    registry: Arc<SessionRegistry>,
    config: Arc<Dnscat2Config>,
    max_packet_size: usize,
}

impl Dispatcher {
    /// Smallest transport packet size this protocol is operated with. Each packet kind's header
    ///  fits comfortably, leaving room for a useful MSG payload.
    pub const MIN_PACKET_SIZE: usize = 16;

    pub fn new(
        pipe: Arc<dyn Pipe>,
        registry: Arc<SessionRegistry>,
        config: Arc<Dnscat2Config>,
    ) -> ProtocolResult<Dispatcher> {
        let max_packet_size = pipe.max_packet_size();
        if max_packet_size < Self::MIN_PACKET_SIZE {
            error!("max packet size {} is too small - refusing to start", max_packet_size);
            return Err(ProtocolError::PacketSizeTooSmall {
                max_packet_size,
                min_packet_size: Self::MIN_PACKET_SIZE,
            });
        }

        Ok(Dispatcher {
            pipe,
            registry,
            config,
            max_packet_size,
        })
    }

    fn max_payload_len(&self) -> usize {
        Packet::max_msg_payload_len(self.max_packet_size)
    }

    /// Runs until the transport is closed (`Ok`) or a fatal condition occurs (`Err`). The pipe is
    ///  closed in either case.
    ///
    /// A fatal condition terminates only this loop: if it occurred while handling a session's
    ///  packet, that session is destroyed, all other sessions are unaffected.
    pub async fn run(&self) -> ProtocolResult<()> {
        info!("starting dispatch loop with max packet size {}", self.max_packet_size);

        loop {
            let mut in_flight = None;

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "exchange", ?correlation_id);

            match self.exchange(&mut in_flight).instrument(span).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("transport closed - terminating dispatch loop");
                    self.pipe.close().await;
                    return Ok(());
                }
                Err(e) => {
                    if let Some(session) = in_flight {
                        self.registry.evict(&session).await;
                    }
                    error!("terminating dispatch loop: {}", e);
                    self.pipe.close().await;
                    return Err(e);
                }
            }
        }
    }

    /// One request / response exchange. Returns `false` if the transport was closed.
    async fn exchange(&self, in_flight: &mut Option<SessionHandle>) -> ProtocolResult<bool> {
        let frame = match self.pipe.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(false),
            Err(e) => return Err(ProtocolError::UnusableTransport(e)),
        };
        trace!("received frame of {} bytes", frame.len());

        let packet = Packet::decode(&frame)?;
        let session_id = packet.session_id();

        // a session found in the registry may be killed by another dispatcher or the idle sweeper
        //  before we get its lock. Packets for it belong to its successor.
        let (handle, mut session) = loop {
            let handle = self.registry.find(session_id).await;
            let session = handle.clone().lock_owned().await;
            if session.state() != SessionState::Killed {
                break (handle, session);
            }
            drop(session);
            debug!(session_id, "session was closed concurrently - looking it up again");
            self.registry.evict(&handle).await;
        };
        *in_flight = Some(handle.clone());
        session.touch();

        let response = match packet {
            Packet::Syn { seq, options, .. } => self.handle_syn(&mut session, seq, &options),
            Packet::Msg { seq, ack, data, .. } => self.handle_msg(&mut session, seq, ack, &data),
            Packet::Fin { reason, .. } => self.handle_fin(&mut session, &reason),
        };

        let killed = session.state() == SessionState::Killed;
        drop(session);
        if killed {
            self.registry.evict(&handle).await;
        }

        if let Some(response) = response {
            let buf = response.encode(self.max_packet_size)?;
            self.pipe.send(&buf).await
                .map_err(ProtocolError::UnusableTransport)?;
        }
        Ok(true)
    }

    fn handle_syn(&self, session: &mut Session, seq: SeqNum, options: &[u8]) -> Option<Packet> {
        // errant SYNs are, at worst, retransmissions that we don't care about
        if !session.syn_valid() {
            debug!(session_id = session.id(), "SYN invalid in state {:?} - ignoring", session.state());
            return None;
        }

        if let Some(name) = SynOptions::parse(options).and_then(|o| o.name) {
            session.set_name(name);
        }

        debug!(session_id = session.id(), "received SYN with seq {} - responding with SYN", seq);
        session.set_their_seq(seq);
        session.set_established();
        self.registry.listener().on_established(session.id(), session.name().map(|n| n.to_string()));

        Some(Packet::syn(session.id(), session.my_seq(), Bytes::new()))
    }

    fn handle_msg(&self, session: &mut Session, seq: SeqNum, ack: SeqNum, data: &Bytes) -> Option<Packet> {
        if !session.msg_valid() {
            debug!(session_id = session.id(), "MSG invalid in state {:?} - responding with FIN", session.state());
            return Some(Packet::fin(session.id()));
        }

        if seq != session.their_seq() {
            debug!(session_id = session.id(), "bad sequence number: expected {}, got {} - re-sending", session.their_seq(), seq);
            return Some(self.resend(session));
        }

        if !session.valid_ack(ack) {
            warn!(session_id = session.id(), "impossible ACK {} received, current seq is {} - re-sending", ack, session.my_seq());
            return Some(self.resend(session));
        }

        session.ack_outgoing(ack);
        session.queue_incoming(data);
        session.increment_their_seq(data.len());
        if !data.is_empty() {
            self.registry.listener().on_incoming(session.id(), data.len());
        }

        let new_data = session.read_outgoing(self.max_payload_len());
        session.record_sent(new_data.clone());

        debug!(session_id = session.id(), "received MSG with {} bytes - responding with {} bytes", data.len(), new_data.len());
        if self.config.trace_payloads {
            trace!(session_id = session.id(), ">> {:?}", data);
            trace!(session_id = session.id(), "<< {:?}", new_data);
        }

        Some(Packet::msg(session.id(), session.my_seq(), session.their_seq(), new_data))
    }

    /// Repeats the previous MSG without touching session state. If this transport's packets are
    ///  smaller than those of the transport that carried the first send, the payload is shortened -
    ///  the peer then acknowledges the shorter prefix.
    fn resend(&self, session: &Session) -> Packet {
        let last_sent = session.last_sent_data();
        let data = last_sent.slice(..last_sent.len().min(self.max_payload_len()));
        Packet::msg(session.id(), session.my_seq(), session.their_seq(), data)
    }

    fn handle_fin(&self, session: &mut Session, reason: &[u8]) -> Option<Packet> {
        if !session.fin_valid() {
            debug!(session_id = session.id(), "FIN invalid in state {:?} - responding with FIN", session.state());
            return Some(Packet::fin(session.id()));
        }

        debug!(session_id = session.id(), "received FIN ({:?}) - closing session", String::from_utf8_lossy(reason));
        self.registry.kill(session);
        Some(Packet::fin(session.id()))
    }
}
