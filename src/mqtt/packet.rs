//! MQTT 3.1.1 control packet codec.
//!
//! Every control packet starts with a fixed header: one byte carrying the
//! packet type (high nibble) and flags (low nibble), followed by the remaining
//! length as a variable-length integer of one to four bytes. The encoders here
//! write complete frames into a fixed-capacity [`Frame`]; [`decode`] parses one
//! frame from the front of a receive buffer, reporting `Ok(None)` until the
//! whole frame is present.

use super::error::{Error, ProtocolError};
use super::options::Options;
use super::{MAX_PACKET_SIZE, MAX_PAYLOAD_LEN, MAX_SUBSCRIPTIONS, MAX_TOPIC_LEN};
use heapless::{String, Vec};
use serde::Deserialize;

// MQTT Control Packet types - these are the fixed header first-byte values
/// MQTT CONNECT packet type identifier.
pub const CONNECT: u8 = 0x10;
/// MQTT CONNACK packet type identifier.
pub const CONNACK: u8 = 0x20;
/// MQTT PUBLISH packet type identifier (flags cleared).
pub const PUBLISH: u8 = 0x30;
/// MQTT PUBACK packet type identifier.
pub const PUBACK: u8 = 0x40;
/// MQTT PUBREC packet type identifier.
pub const PUBREC: u8 = 0x50;
/// MQTT PUBREL packet type identifier, including its mandatory flags.
pub const PUBREL: u8 = 0x62;
/// MQTT PUBCOMP packet type identifier.
pub const PUBCOMP: u8 = 0x70;
/// MQTT SUBSCRIBE packet type identifier, including its mandatory flags.
pub const SUBSCRIBE: u8 = 0x82;
/// MQTT SUBACK packet type identifier.
pub const SUBACK: u8 = 0x90;
/// MQTT UNSUBSCRIBE packet type identifier, including its mandatory flags.
pub const UNSUBSCRIBE: u8 = 0xA2;
/// MQTT UNSUBACK packet type identifier.
pub const UNSUBACK: u8 = 0xB0;
/// MQTT PINGREQ packet type identifier.
pub const PINGREQ: u8 = 0xC0;
/// MQTT PINGRESP packet type identifier.
pub const PINGRESP: u8 = 0xD0;
/// MQTT DISCONNECT packet type identifier.
pub const DISCONNECT: u8 = 0xE0;

/// A complete PINGREQ frame.
pub const PINGREQ_FRAME: [u8; 2] = [PINGREQ, 0x00];
/// A complete DISCONNECT frame.
pub const DISCONNECT_FRAME: [u8; 2] = [DISCONNECT, 0x00];

/// SUBACK return code for a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

// Protocol constants of MQTT 3.1.1
/// Protocol name sent in CONNECT.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// Largest value the remaining-length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Buffer holding one encoded control packet.
pub type Frame = Vec<u8, MAX_PACKET_SIZE>;

/// SUBACK return codes, one per filter of the acknowledged SUBSCRIBE.
pub type ReturnCodes = Vec<u8, MAX_SUBSCRIPTIONS>;

/// Quality of Service levels for MQTT messages.
///
/// QoS defines the guarantee of delivery for a specific message. The levels
/// are ordered, so the strongest of several grants is simply the maximum.
///
/// # Examples
///
/// ```rust
/// use libmqtt::mqtt::QoS;
///
/// assert_eq!(QoS::AtMostOnce as u8, 0);
/// assert_eq!(QoS::AtLeastOnce.max(QoS::ExactlyOnce), QoS::ExactlyOnce);
/// assert_eq!(QoS::try_from(1u8), Ok(QoS::AtLeastOnce));
/// ```
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Deserialize)]
#[serde(try_from = "u8")]
pub enum QoS {
    /// **QoS 0**: At most once delivery.
    ///
    /// Messages are delivered according to the best effort of the underlying network.
    AtMostOnce = 0,

    /// **QoS 1**: At least once delivery.
    ///
    /// Messages are acknowledged with PUBACK; duplicates can occur.
    AtLeastOnce = 1,

    /// **QoS 2**: Exactly once delivery.
    ///
    /// A four-step PUBLISH/PUBREC/PUBREL/PUBCOMP exchange.
    ExactlyOnce = 2,
}

impl QoS {
    /// Map the two-bit wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        QoS::from_u8(value).ok_or(Error::Protocol(ProtocolError::MalformedPacket))
    }
}

impl core::fmt::Display for QoS {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QoS {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=u8}", *self as u8)
    }
}

/// A decoded PUBLISH packet.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Publish {
    /// The topic on which the message was published.
    pub topic: String<MAX_TOPIC_LEN>,
    /// The message payload data.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
    /// Level the broker sent this message at.
    pub qos: QoS,
    /// Packet identifier, present for QoS 1 and 2.
    pub packet_id: Option<u16>,
    /// The broker delivered a retained message.
    pub retain: bool,
    /// The broker is redelivering this message.
    pub dup: bool,
}

/// Control packets a broker sends to a client.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Packet {
    /// Connection acknowledgement.
    ConnAck {
        /// The broker resumed a stored session.
        session_present: bool,
        /// 0 on success, 1-5 on refusal.
        return_code: u8,
    },
    /// An application message.
    Publish(Publish),
    /// QoS 1 publish acknowledgement.
    PubAck(u16),
    /// QoS 2 publish received.
    PubRec(u16),
    /// QoS 2 publish release.
    PubRel(u16),
    /// QoS 2 publish complete.
    PubComp(u16),
    /// Subscription acknowledgement.
    SubAck {
        /// Identifier of the acknowledged SUBSCRIBE.
        packet_id: u16,
        /// Granted QoS (0-2) or [`SUBACK_FAILURE`], one per filter in
        /// SUBSCRIBE order.
        return_codes: ReturnCodes,
    },
    /// Unsubscription acknowledgement.
    UnsubAck(u16),
    /// Keep-alive response.
    PingResp,
    /// A PUBLISH whose topic or payload does not fit the receive buffers.
    ///
    /// Only what is needed to acknowledge it is kept.
    OversizedPublish {
        /// Level the broker sent the message at.
        qos: QoS,
        /// Packet identifier, present for QoS 1 and 2.
        packet_id: Option<u16>,
    },
}

impl Packet {
    /// Short name for log output.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::ConnAck { .. } => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck(_) => "PUBACK",
            Packet::PubRec(_) => "PUBREC",
            Packet::PubRel(_) => "PUBREL",
            Packet::PubComp(_) => "PUBCOMP",
            Packet::SubAck { .. } => "SUBACK",
            Packet::UnsubAck(_) => "UNSUBACK",
            Packet::PingResp => "PINGRESP",
            Packet::OversizedPublish { .. } => "PUBLISH",
        }
    }
}

/// Encode the remaining length field for an MQTT packet.
///
/// The encoding uses up to 4 bytes where each byte encodes 7 bits of the length
/// value. The most significant bit indicates if another byte follows.
pub fn encode_remaining_length(out: &mut Frame, mut len: usize) -> Result<(), Error> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::BufferOverflow);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        put_u8(out, byte)?;
        if len == 0 {
            break;
        }
    }
    Ok(())
}

/// Decode a remaining-length field from the start of `buf`.
///
/// Returns the value and the number of bytes it occupied, or `Ok(None)` when
/// `buf` ends inside the field.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in buf.iter().take(4).enumerate() {
        value += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        Err(ProtocolError::MalformedPacket)
    } else {
        Ok(None)
    }
}

fn put_u8(out: &mut Frame, byte: u8) -> Result<(), Error> {
    out.push(byte).map_err(|_| Error::BufferOverflow)
}

fn put_u16(out: &mut Frame, value: u16) -> Result<(), Error> {
    put_bytes(out, &value.to_be_bytes())
}

fn put_bytes(out: &mut Frame, bytes: &[u8]) -> Result<(), Error> {
    out.extend_from_slice(bytes).map_err(|_| Error::BufferOverflow)
}

/// Length-prefixed field: two-byte big-endian length, then the bytes.
fn put_field(out: &mut Frame, bytes: &[u8]) -> Result<(), Error> {
    let len = u16::try_from(bytes.len()).map_err(|_| Error::BufferOverflow)?;
    put_u16(out, len)?;
    put_bytes(out, bytes)
}

/// Encode a CONNECT packet for `options`.
pub fn encode_connect(options: &Options<'_>, out: &mut Frame) -> Result<(), Error> {
    out.clear();

    let client_id = options.client_id.as_bytes();
    let username = options.username;
    // A password without a user name is not allowed in 3.1.1.
    let password = username.and(options.password);

    let mut connect_flags = 0u8;
    if options.clean_session {
        connect_flags |= 0x02;
    }

    // --- Variable header is always 10 bytes ---
    let mut remaining_len = 10 + 2 + client_id.len();
    if let Some(will) = &options.will {
        connect_flags |= 0x04 | ((will.qos as u8) << 3);
        if will.retain {
            connect_flags |= 0x20;
        }
        remaining_len += 2 + will.topic.len() + 2 + will.message.len();
    }
    if let Some(password) = password {
        connect_flags |= 0x40;
        remaining_len += 2 + password.len();
    }
    if let Some(username) = username {
        connect_flags |= 0x80;
        remaining_len += 2 + username.len();
    }

    // --- Fixed Header ---
    put_u8(out, CONNECT)?;
    encode_remaining_length(out, remaining_len)?;

    // --- Variable Header ---
    put_field(out, PROTOCOL_NAME)?;
    put_u8(out, PROTOCOL_LEVEL)?;
    put_u8(out, connect_flags)?;
    put_u16(out, options.keep_alive_seconds)?;

    // --- Payload ---
    put_field(out, client_id)?;
    if let Some(will) = &options.will {
        put_field(out, will.topic.as_bytes())?;
        put_field(out, will.message.as_bytes())?;
    }
    if let Some(username) = username {
        put_field(out, username.as_bytes())?;
    }
    if let Some(password) = password {
        put_field(out, password.as_bytes())?;
    }
    Ok(())
}

/// Encode a SUBSCRIBE packet carrying a single filter.
pub fn encode_subscribe(
    packet_id: u16,
    filter: &str,
    qos: QoS,
    out: &mut Frame,
) -> Result<(), Error> {
    encode_subscribe_many(packet_id, &[(filter, qos)], out)
}

/// Encode a SUBSCRIBE packet carrying every `(filter, qos)` pair in order.
///
/// The broker answers with one SUBACK holding a return code per filter.
pub fn encode_subscribe_many(
    packet_id: u16,
    filters: &[(&str, QoS)],
    out: &mut Frame,
) -> Result<(), Error> {
    out.clear();
    if filters.is_empty() {
        return Err(Error::Protocol(ProtocolError::MalformedPacket));
    }
    let remaining_len = subscribe_remaining_len(filters);

    put_u8(out, SUBSCRIBE)?;
    encode_remaining_length(out, remaining_len)?;
    put_u16(out, packet_id)?;
    for (filter, qos) in filters {
        put_field(out, filter.as_bytes())?;
        put_u8(out, *qos as u8)?;
    }
    Ok(())
}

fn subscribe_remaining_len(filters: &[(&str, QoS)]) -> usize {
    2 + filters
        .iter()
        .map(|(filter, _)| 2 + filter.len() + 1)
        .sum::<usize>()
}

/// Size in bytes of the SUBSCRIBE frame [`encode_subscribe_many`] writes for
/// `filters`, fixed header included.
pub fn subscribe_frame_len(filters: &[(&str, QoS)]) -> usize {
    let remaining_len = subscribe_remaining_len(filters);
    let mut header_len = 2;
    let mut rest = remaining_len / 128;
    while rest > 0 {
        header_len += 1;
        rest /= 128;
    }
    header_len + remaining_len
}

/// Encode an UNSUBSCRIBE packet carrying a single filter.
pub fn encode_unsubscribe(packet_id: u16, filter: &str, out: &mut Frame) -> Result<(), Error> {
    out.clear();
    put_u8(out, UNSUBSCRIBE)?;
    encode_remaining_length(out, 2 + 2 + filter.len())?;
    put_u16(out, packet_id)?;
    put_field(out, filter.as_bytes())
}

/// Encode a PUBLISH packet. `packet_id` is required for QoS 1 and 2 and
/// ignored for QoS 0.
pub fn encode_publish(
    topic: &str,
    payload: &[u8],
    qos: QoS,
    packet_id: Option<u16>,
    retain: bool,
    out: &mut Frame,
) -> Result<(), Error> {
    out.clear();

    let mut header = PUBLISH | ((qos as u8) << 1);
    if retain {
        header |= 0x01;
    }
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        _ => Some(packet_id.ok_or(Error::Protocol(ProtocolError::MalformedPacket))?),
    };

    let mut remaining_len = 2 + topic.len() + payload.len();
    if packet_id.is_some() {
        remaining_len += 2;
    }

    put_u8(out, header)?;
    encode_remaining_length(out, remaining_len)?;
    put_field(out, topic.as_bytes())?;
    if let Some(id) = packet_id {
        put_u16(out, id)?;
    }
    put_bytes(out, payload)
}

/// Encode a two-byte acknowledgement (`PUBACK`, `PUBREC`, `PUBREL` or `PUBCOMP`).
pub fn encode_ack(kind: u8, packet_id: u16, out: &mut Frame) -> Result<(), Error> {
    out.clear();
    put_u8(out, kind)?;
    put_u8(out, 2)?;
    put_u16(out, packet_id)
}

/// Encode a PINGREQ packet.
pub fn encode_pingreq(out: &mut Frame) -> Result<(), Error> {
    out.clear();
    put_bytes(out, &PINGREQ_FRAME)
}

/// Encode a DISCONNECT packet.
pub fn encode_disconnect(out: &mut Frame) -> Result<(), Error> {
    out.clear();
    put_bytes(out, &DISCONNECT_FRAME)
}

struct Cursor<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl<'b> Cursor<'b> {
    fn new(buf: &'b [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'b [u8], ProtocolError> {
        let end = self.pos.checked_add(n).ok_or(ProtocolError::MalformedPacket)?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(ProtocolError::MalformedPacket)?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn rest(&mut self) -> &'b [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn finish(&self) -> Result<(), ProtocolError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(ProtocolError::MalformedPacket)
        }
    }
}

/// Decode one control packet from the front of `buf`.
///
/// Returns the packet and the number of bytes it occupied, or `Ok(None)` when
/// more bytes are needed.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, ProtocolError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let Some((remaining_len, len_bytes)) = decode_remaining_length(&buf[1..])? else {
        return Ok(None);
    };
    let total = 1 + len_bytes + remaining_len;
    if total > MAX_PACKET_SIZE {
        return Err(ProtocolError::PacketTooLarge);
    }
    if buf.len() < total {
        return Ok(None);
    }

    let body = &buf[1 + len_bytes..total];
    let packet = match first & 0xF0 {
        PUBLISH => decode_publish(first & 0x0F, body)?,
        CONNACK => {
            expect_flags(first, CONNACK)?;
            let mut cursor = Cursor::new(body);
            let ack_flags = cursor.u8()?;
            let return_code = cursor.u8()?;
            cursor.finish()?;
            if ack_flags & 0xFE != 0 {
                return Err(ProtocolError::MalformedPacket);
            }
            Packet::ConnAck {
                session_present: ack_flags & 0x01 != 0,
                return_code,
            }
        }
        PUBACK => Packet::PubAck(decode_packet_id(first, PUBACK, body)?),
        PUBREC => Packet::PubRec(decode_packet_id(first, PUBREC, body)?),
        0x60 => Packet::PubRel(decode_packet_id(first, PUBREL, body)?),
        PUBCOMP => Packet::PubComp(decode_packet_id(first, PUBCOMP, body)?),
        SUBACK => {
            expect_flags(first, SUBACK)?;
            let mut cursor = Cursor::new(body);
            let packet_id = cursor.u16()?;
            let codes = cursor.rest();
            if codes.is_empty() {
                return Err(ProtocolError::MalformedPacket);
            }
            if codes
                .iter()
                .any(|&code| code != SUBACK_FAILURE && QoS::from_u8(code).is_none())
            {
                return Err(ProtocolError::InvalidReturnCode);
            }
            let return_codes =
                ReturnCodes::from_slice(codes).map_err(|_| ProtocolError::PacketTooLarge)?;
            Packet::SubAck {
                packet_id,
                return_codes,
            }
        }
        UNSUBACK => Packet::UnsubAck(decode_packet_id(first, UNSUBACK, body)?),
        PINGRESP => {
            expect_flags(first, PINGRESP)?;
            if !body.is_empty() {
                return Err(ProtocolError::MalformedPacket);
            }
            Packet::PingResp
        }
        _ => return Err(ProtocolError::UnexpectedPacket),
    };
    Ok(Some((packet, total)))
}

fn expect_flags(first: u8, expected: u8) -> Result<(), ProtocolError> {
    if first == expected {
        Ok(())
    } else {
        Err(ProtocolError::MalformedPacket)
    }
}

fn decode_packet_id(first: u8, expected: u8, body: &[u8]) -> Result<u16, ProtocolError> {
    expect_flags(first, expected)?;
    let mut cursor = Cursor::new(body);
    let packet_id = cursor.u16()?;
    cursor.finish()?;
    Ok(packet_id)
}

fn decode_publish(flags: u8, body: &[u8]) -> Result<Packet, ProtocolError> {
    let qos = QoS::from_u8((flags >> 1) & 0x03).ok_or(ProtocolError::MalformedPacket)?;
    let dup = flags & 0x08 != 0;
    let retain = flags & 0x01 != 0;

    let mut cursor = Cursor::new(body);
    let topic_len = usize::from(cursor.u16()?);
    let topic_bytes = cursor.take(topic_len)?;
    let topic = core::str::from_utf8(topic_bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(ProtocolError::MalformedPacket);
    }

    let packet_id = match qos {
        QoS::AtMostOnce => None,
        _ => match cursor.u16()? {
            0 => return Err(ProtocolError::MalformedPacket),
            id => Some(id),
        },
    };

    let payload = cursor.rest();
    let (Ok(topic), Ok(payload)) = (
        String::<MAX_TOPIC_LEN>::try_from(topic),
        Vec::<u8, MAX_PAYLOAD_LEN>::from_slice(payload),
    ) else {
        return Ok(Packet::OversizedPublish { qos, packet_id });
    };

    Ok(Packet::Publish(Publish {
        topic,
        payload,
        qos,
        packet_id,
        retain,
        dup,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_connect_minimal() {
        let options = Options::new("abc");
        let mut frame = Frame::new();
        encode_connect(&options, &mut frame).unwrap();
        assert_eq!(
            &frame[..],
            &[
                0x10, 0x0F, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00,
                0x03, b'a', b'b', b'c'
            ]
        );
    }

    #[test]
    fn test_encode_connect_with_credentials_and_will() {
        let mut options = Options::new("id");
        options.keep_alive_seconds = 10;
        options.clean_session = false;
        options.username = Some("u");
        options.password = Some("pw");
        options.will = Some(crate::mqtt::Will {
            topic: "w",
            message: "bye",
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let mut frame = Frame::new();
        encode_connect(&options, &mut frame).unwrap();

        // will(0x04) | will qos 1 (0x08) | will retain (0x20) | password (0x40) | username (0x80)
        assert_eq!(frame[9], 0xEC);
        assert_eq!(&frame[10..12], &[0x00, 0x0A]);
        assert_eq!(
            &frame[12..],
            &[
                0x00, 0x02, b'i', b'd', 0x00, 0x01, b'w', 0x00, 0x03, b'b', b'y', b'e', 0x00,
                0x01, b'u', 0x00, 0x02, b'p', b'w'
            ]
        );
        assert_eq!(usize::from(frame[1]), frame.len() - 2);
    }

    #[test]
    fn test_password_requires_username() {
        let mut options = Options::new("id");
        options.password = Some("secret");
        let mut frame = Frame::new();
        encode_connect(&options, &mut frame).unwrap();
        assert_eq!(frame[9] & 0xC0, 0);
    }

    #[test]
    fn test_encode_subscribe_and_unsubscribe() {
        let mut frame = Frame::new();
        encode_subscribe(7, "a/#", QoS::ExactlyOnce, &mut frame).unwrap();
        assert_eq!(
            &frame[..],
            &[0x82, 0x08, 0x00, 0x07, 0x00, 0x03, b'a', b'/', b'#', 0x02]
        );

        encode_subscribe_many(9, &[("a", QoS::AtMostOnce), ("b/+", QoS::AtLeastOnce)], &mut frame)
            .unwrap();
        assert_eq!(
            &frame[..],
            &[
                0x82, 0x0C, 0x00, 0x09, 0x00, 0x01, b'a', 0x00, 0x00, 0x03, b'b', b'/', b'+',
                0x01
            ]
        );
        assert_eq!(
            subscribe_frame_len(&[("a", QoS::AtMostOnce), ("b/+", QoS::AtLeastOnce)]),
            frame.len()
        );
        assert!(encode_subscribe_many(10, &[], &mut frame).is_err());

        let long = [b'x'; MAX_TOPIC_LEN];
        let long = core::str::from_utf8(&long).unwrap();
        let filters = [(long, QoS::AtMostOnce); 7];
        encode_subscribe_many(11, &filters, &mut frame).unwrap();
        assert_eq!(subscribe_frame_len(&filters), frame.len());
        assert_eq!(frame.len(), 1 + 2 + 2 + 7 * (2 + MAX_TOPIC_LEN + 1));

        encode_unsubscribe(8, "a/#", &mut frame).unwrap();
        assert_eq!(
            &frame[..],
            &[0xA2, 0x07, 0x00, 0x08, 0x00, 0x03, b'a', b'/', b'#']
        );
    }

    #[test]
    fn test_encode_publish() {
        let mut frame = Frame::new();
        encode_publish("t", b"hi", QoS::AtLeastOnce, Some(5), true, &mut frame).unwrap();
        assert_eq!(
            &frame[..],
            &[0x33, 0x07, 0x00, 0x01, b't', 0x00, 0x05, b'h', b'i']
        );

        encode_publish("t", b"hi", QoS::AtMostOnce, Some(5), false, &mut frame).unwrap();
        assert_eq!(&frame[..], &[0x30, 0x05, 0x00, 0x01, b't', b'h', b'i']);

        assert!(encode_publish("t", b"", QoS::ExactlyOnce, None, false, &mut frame).is_err());
    }

    #[test]
    fn test_remaining_length_boundaries() {
        let cases: [(usize, &[u8]); 4] = [
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (2_097_152, &[0x80, 0x80, 0x80, 0x01]),
        ];
        for (value, encoded) in cases {
            let mut frame = Frame::new();
            encode_remaining_length(&mut frame, value).unwrap();
            assert_eq!(&frame[..], encoded);
            assert_eq!(
                decode_remaining_length(encoded),
                Ok(Some((value, encoded.len())))
            );
        }

        assert_eq!(decode_remaining_length(&[0x80, 0x80]), Ok(None));
        assert_eq!(
            decode_remaining_length(&[0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(ProtocolError::MalformedPacket)
        );
    }

    #[test]
    fn test_decode_partial_frames() {
        let connack = [0x20, 0x02, 0x01, 0x00];
        for end in 0..connack.len() {
            assert_eq!(decode(&connack[..end]), Ok(None));
        }
        assert_eq!(
            decode(&connack),
            Ok(Some((
                Packet::ConnAck {
                    session_present: true,
                    return_code: 0
                },
                4
            )))
        );
    }

    #[test]
    fn test_decode_publish_with_trailing_frame() {
        let mut buf = std::vec::Vec::new();
        buf.extend_from_slice(&[0x3B, 0x08, 0x00, 0x03, b'a', b'/', b'b', 0x12, 0x34, b'x']);
        buf.extend_from_slice(&[0xD0, 0x00]);

        let (packet, used) = decode(&buf).unwrap().unwrap();
        assert_eq!(used, 10);
        let publish = match packet {
            Packet::Publish(publish) => publish,
            other => panic!("expected publish, got {other:?}"),
        };
        assert_eq!(publish.topic.as_str(), "a/b");
        assert_eq!(&publish.payload[..], b"x");
        assert_eq!(publish.qos, QoS::AtLeastOnce);
        assert_eq!(publish.packet_id, Some(0x1234));
        assert!(publish.dup);
        assert!(publish.retain);

        assert_eq!(decode(&buf[used..]), Ok(Some((Packet::PingResp, 2))));
    }

    #[test]
    fn test_decode_acknowledgements() {
        assert_eq!(
            decode(&[0x90, 0x03, 0x00, 0x01, 0x01]),
            Ok(Some((
                Packet::SubAck {
                    packet_id: 1,
                    return_codes: ReturnCodes::from_slice(&[1]).unwrap()
                },
                5
            )))
        );
        assert_eq!(
            decode(&[0x90, 0x03, 0x00, 0x01, 0x80]),
            Ok(Some((
                Packet::SubAck {
                    packet_id: 1,
                    return_codes: ReturnCodes::from_slice(&[SUBACK_FAILURE]).unwrap()
                },
                5
            )))
        );
        assert_eq!(
            decode(&[0x90, 0x05, 0x00, 0x02, 0x00, 0x80, 0x02]),
            Ok(Some((
                Packet::SubAck {
                    packet_id: 2,
                    return_codes: ReturnCodes::from_slice(&[0, SUBACK_FAILURE, 2]).unwrap()
                },
                7
            )))
        );
        assert_eq!(
            decode(&[0x62, 0x02, 0x00, 0x09]),
            Ok(Some((Packet::PubRel(9), 4)))
        );
        assert_eq!(
            decode(&[0xB0, 0x02, 0x00, 0x02]),
            Ok(Some((Packet::UnsubAck(2), 4)))
        );
    }

    #[test]
    fn test_decode_rejects_malformed_packets() {
        // PUBREL with the wrong reserved flags
        assert_eq!(
            decode(&[0x60, 0x02, 0x00, 0x09]),
            Err(ProtocolError::MalformedPacket)
        );
        // QoS 3 publish
        assert_eq!(
            decode(&[0x36, 0x03, 0x00, 0x01, b'a']),
            Err(ProtocolError::MalformedPacket)
        );
        // wildcard in a published topic
        assert_eq!(
            decode(&[0x30, 0x03, 0x00, 0x01, b'#']),
            Err(ProtocolError::MalformedPacket)
        );
        // invalid SUBACK return code
        assert_eq!(
            decode(&[0x90, 0x03, 0x00, 0x01, 0x05]),
            Err(ProtocolError::InvalidReturnCode)
        );
        // SUBACK without return codes
        assert_eq!(
            decode(&[0x90, 0x02, 0x00, 0x01]),
            Err(ProtocolError::MalformedPacket)
        );
        // brokers never send SUBSCRIBE
        assert_eq!(
            decode(&[0x82, 0x02, 0x00, 0x01]),
            Err(ProtocolError::UnexpectedPacket)
        );
        // topic length past the end of the frame
        assert_eq!(
            decode(&[0x30, 0x03, 0x00, 0x09, b'a']),
            Err(ProtocolError::MalformedPacket)
        );
        // invalid UTF-8 topic
        assert_eq!(
            decode(&[0x30, 0x03, 0x00, 0x01, 0xFF]),
            Err(ProtocolError::InvalidUtf8)
        );
    }

    #[test]
    fn test_decode_oversized_frame() {
        let mut header = Frame::new();
        put_u8(&mut header, PUBLISH).unwrap();
        encode_remaining_length(&mut header, MAX_PACKET_SIZE).unwrap();
        assert_eq!(decode(&header), Err(ProtocolError::PacketTooLarge));
    }

    #[test]
    fn test_decode_publish_larger_than_buffers() {
        let payload = [0x42u8; MAX_PAYLOAD_LEN + 1];
        let mut buf = std::vec::Vec::new();
        buf.push(0x32);
        let mut length = Frame::new();
        encode_remaining_length(&mut length, 2 + 1 + 2 + payload.len()).unwrap();
        buf.extend_from_slice(&length);
        buf.extend_from_slice(&[0x00, 0x01, b't', 0x00, 0x0C]);
        buf.extend_from_slice(&payload);

        assert_eq!(
            decode(&buf),
            Ok(Some((
                Packet::OversizedPublish {
                    qos: QoS::AtLeastOnce,
                    packet_id: Some(12)
                },
                buf.len()
            )))
        );
    }
}
