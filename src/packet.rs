use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{ProtocolError, ProtocolResult};
use crate::seq_num::SeqNum;


#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum MessageType {
    Syn = 0,
    Msg = 1,
    Fin = 2,
}

impl MessageType {
    /// The length of the fixed part of a packet of this type, i.e. everything before the
    ///  variable-length tail (SYN options, MSG data, FIN reason)
    pub const fn header_len(self) -> usize {
        match self {
            MessageType::Syn => 1 + 2 + 2,
            MessageType::Msg => 1 + 2 + 2 + 2,
            MessageType::Fin => 1 + 2,
        }
    }
}

/// A decoded packet. The variable-length tail of each packet kind is kept as opaque bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Packet {
    Syn {
        session_id: u16,
        seq: SeqNum,
        options: Bytes,
    },
    Msg {
        session_id: u16,
        seq: SeqNum,
        ack: SeqNum,
        data: Bytes,
    },
    Fin {
        session_id: u16,
        reason: Bytes,
    },
}

impl Packet {
    /// The smallest frame that can be a legal packet
    pub const MIN_HEADER_LEN: usize = MessageType::Fin.header_len();

    pub fn syn(session_id: u16, seq: SeqNum, options: Bytes) -> Packet {
        Packet::Syn { session_id, seq, options }
    }

    /// NB: The caller is responsible for limiting `data` so that the encoded packet fits into the
    ///      transport's packet size, see [Packet::max_msg_payload_len]
    pub fn msg(session_id: u16, seq: SeqNum, ack: SeqNum, data: Bytes) -> Packet {
        Packet::Msg { session_id, seq, ack, data }
    }

    pub fn fin(session_id: u16) -> Packet {
        Packet::Fin { session_id, reason: Bytes::new() }
    }

    pub fn max_msg_payload_len(max_packet_size: usize) -> usize {
        max_packet_size.saturating_sub(MessageType::Msg.header_len())
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Packet::Syn { .. } => MessageType::Syn,
            Packet::Msg { .. } => MessageType::Msg,
            Packet::Fin { .. } => MessageType::Fin,
        }
    }

    pub fn session_id(&self) -> u16 {
        match self {
            Packet::Syn { session_id, .. } |
            Packet::Msg { session_id, .. } |
            Packet::Fin { session_id, .. } => *session_id,
        }
    }

    pub fn encoded_len(&self) -> usize {
        let tail_len = match self {
            Packet::Syn { options, .. } => options.len(),
            Packet::Msg { data, .. } => data.len(),
            Packet::Fin { reason, .. } => reason.len(),
        };
        self.message_type().header_len() + tail_len
    }

    pub fn encode(&self, max_len: usize) -> ProtocolResult<Bytes> {
        let len = self.encoded_len();
        if len > max_len {
            return Err(ProtocolError::PacketTooLarge { len, max_len });
        }

        let mut buf = BytesMut::with_capacity(len);
        buf.put_u8(self.message_type().into());
        buf.put_u16(self.session_id());

        match self {
            Packet::Syn { seq, options, .. } => {
                buf.put_u16(seq.to_raw());
                buf.put_slice(options);
            }
            Packet::Msg { seq, ack, data, .. } => {
                buf.put_u16(seq.to_raw());
                buf.put_u16(ack.to_raw());
                buf.put_slice(data);
            }
            Packet::Fin { reason, .. } => {
                buf.put_slice(reason);
            }
        }

        debug_assert_eq!(buf.len(), len);
        Ok(buf.freeze())
    }

    pub fn decode(frame: &[u8]) -> ProtocolResult<Packet> {
        let Some(&raw_type) = frame.first() else {
            return Err(ProtocolError::MalformedPacket("empty frame".to_string()));
        };

        let message_type = MessageType::try_from_primitive(raw_type)
            .map_err(|_| ProtocolError::MalformedPacket(format!("unknown message type {}", raw_type)))?;

        if frame.len() < message_type.header_len() {
            return Err(ProtocolError::MalformedPacket(format!(
                "{:?} frame has {} bytes, header requires {}", message_type, frame.len(), message_type.header_len()
            )));
        }

        let mut buf = &frame[1..];
        let session_id = buf.get_u16();

        let packet = match message_type {
            MessageType::Syn => {
                let seq = SeqNum::from_raw(buf.get_u16());
                Packet::Syn { session_id, seq, options: Bytes::copy_from_slice(buf) }
            }
            MessageType::Msg => {
                let seq = SeqNum::from_raw(buf.get_u16());
                let ack = SeqNum::from_raw(buf.get_u16());
                Packet::Msg { session_id, seq, ack, data: Bytes::copy_from_slice(buf) }
            }
            MessageType::Fin => {
                Packet::Fin { session_id, reason: Bytes::copy_from_slice(buf) }
            }
        };
        Ok(packet)
    }
}


/// Best-effort interpretation of a SYN packet's opaque options: a big-endian flag word,
///  optionally followed by fields that are present depending on the flags.
///
/// ```ascii
/// 0: flags (u16)
///    * 0x0001 OPT_NAME: a NUL-terminated UTF-8 session name follows
/// *: name (if OPT_NAME)
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct SynOptions {
    pub flags: u16,
    pub name: Option<String>,
}

impl SynOptions {
    pub const OPT_NAME: u16 = 0x0001;

    /// Returns `None` if the options are absent or do not follow the expected layout - options
    ///  are pass-through data, so that is not an error
    pub fn parse(mut options: &[u8]) -> Option<SynOptions> {
        if options.len() < 2 {
            return None;
        }
        let flags = options.get_u16();

        let name = if flags & Self::OPT_NAME != 0 {
            let end = options.iter().position(|&b| b == 0)?;
            Some(String::from_utf8(options[..end].to_vec()).ok()?)
        }
        else {
            None
        };

        Some(SynOptions { flags, name })
    }

    pub fn ser(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match &self.name {
            Some(name) => {
                buf.put_u16(self.flags | Self::OPT_NAME);
                buf.put_slice(name.as_bytes());
                buf.put_u8(0);
            }
            None => buf.put_u16(self.flags & !Self::OPT_NAME),
        }
        buf.freeze()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn seq(n: u16) -> SeqNum {
        SeqNum::from_raw(n)
    }

    #[rstest]
    #[case::syn_no_options(Packet::syn(0x0102, seq(0x0304), Bytes::new()), vec![0, 1,2, 3,4])]
    #[case::syn_options(Packet::syn(1, seq(2), Bytes::from_static(b"\x00\x01ab\x00")), vec![0, 0,1, 0,2, 0,1,b'a',b'b',0])]
    #[case::msg_empty(Packet::msg(0x0001, seq(0x1000), seq(0x2002), Bytes::new()), vec![1, 0,1, 0x10,0, 0x20,2])]
    #[case::msg_data(Packet::msg(0xffff, seq(0xfffe), seq(1), Bytes::from_static(b"hi")), vec![1, 0xff,0xff, 0xff,0xfe, 0,1, b'h',b'i'])]
    #[case::fin(Packet::fin(0x0a0b), vec![2, 0x0a,0x0b])]
    #[case::fin_reason(Packet::Fin { session_id: 3, reason: Bytes::from_static(b"bye") }, vec![2, 0,3, b'b',b'y',b'e'])]
    fn test_encode_decode(#[case] packet: Packet, #[case] expected: Vec<u8>) {
        let encoded = packet.encode(1000).unwrap();
        assert_eq!(encoded.as_ref(), expected.as_slice());
        assert_eq!(packet.encoded_len(), expected.len());

        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::unknown_type(vec![3, 0,1, 0,0, 0,0])]
    #[case::unknown_type_ff(vec![0xff])]
    #[case::syn_short(vec![0, 0,1, 0])]
    #[case::msg_short(vec![1, 0,1, 0,0, 0])]
    #[case::msg_header_only_type(vec![1])]
    #[case::fin_short(vec![2, 0])]
    fn test_decode_malformed(#[case] frame: Vec<u8>) {
        match Packet::decode(&frame) {
            Err(ProtocolError::MalformedPacket(_)) => {}
            other => panic!("expected MalformedPacket, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_too_large() {
        let packet = Packet::msg(1, seq(0), seq(0), Bytes::from(vec![0u8; 14]));
        assert_eq!(packet.encode(21).unwrap().len(), 21);

        match packet.encode(20) {
            Err(ProtocolError::PacketTooLarge { len, max_len }) => {
                assert_eq!(len, 21);
                assert_eq!(max_len, 20);
            }
            other => panic!("expected PacketTooLarge, got {:?}", other),
        }
    }

    #[rstest]
    #[case(20, 13)]
    #[case(7, 0)]
    #[case(3, 0)]
    fn test_max_msg_payload_len(#[case] max_packet_size: usize, #[case] expected: usize) {
        assert_eq!(Packet::max_msg_payload_len(max_packet_size), expected);
    }

    #[test]
    fn test_accessors() {
        let packet = Packet::msg(7, seq(1), seq(2), Bytes::new());
        assert_eq!(packet.session_id(), 7);
        assert_eq!(packet.message_type(), MessageType::Msg);
        assert_eq!(Packet::fin(9).message_type(), MessageType::Fin);
        assert_eq!(Packet::MIN_HEADER_LEN, 3);
    }

    #[rstest]
    #[case::absent(b"".to_vec(), None)]
    #[case::too_short(b"\x00".to_vec(), None)]
    #[case::no_name(b"\x00\x00".to_vec(), Some(SynOptions { flags: 0, name: None }))]
    #[case::name(b"\x00\x01shell\x00".to_vec(), Some(SynOptions { flags: 1, name: Some("shell".to_string()) }))]
    #[case::name_with_trailing(b"\x00\x03cmd\x00\x99".to_vec(), Some(SynOptions { flags: 3, name: Some("cmd".to_string()) }))]
    #[case::unterminated_name(b"\x00\x01shell".to_vec(), None)]
    #[case::invalid_utf8(b"\x00\x01\xff\xfe\x00".to_vec(), None)]
    fn test_syn_options_parse(#[case] raw: Vec<u8>, #[case] expected: Option<SynOptions>) {
        assert_eq!(SynOptions::parse(&raw), expected);
    }

    #[test]
    fn test_syn_options_ser() {
        let options = SynOptions { flags: 0, name: Some("exec".to_string()) };
        assert_eq!(options.ser().as_ref(), b"\x00\x01exec\x00");
        assert_eq!(SynOptions::parse(&options.ser()), Some(SynOptions { flags: 1, name: Some("exec".to_string()) }));
    }
}
