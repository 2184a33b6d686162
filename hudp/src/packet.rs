//! Wire codec: fixed 8-byte header plus opaque payload.
//!
//! Binary layout (seq and ts_ms big-endian):
//!
//! ```text
//! +---------+---------+-----------+-------------+--- variable ---+
//! | channel |  flags  |    seq    |    ts_ms    |    payload     |
//! |  (1B)   |  (1B)   |   (2B)    |    (4B)     |                |
//! +---------+---------+-----------+-------------+----------------+
//! ```
//!
//! ACK packets carry no payload: they are exactly [`HEADER_LEN`] bytes on the
//! wire and always travel on the reliable channel.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{HudpError, Result};

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 8;

/// The two delivery services multiplexed over one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Best-effort: no ordering, no acknowledgements, no retransmission.
    Unreliable = 0,
    /// In-order at-most-once delivery via Selective Repeat ARQ.
    Reliable = 1,
}

impl TryFrom<u8> for Channel {
    type Error = HudpError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Channel::Unreliable),
            1 => Ok(Channel::Reliable),
            other => Err(HudpError::UnknownChannel(other)),
        }
    }
}

/// Flag bits carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(pub u8);

impl Flags {
    pub const NONE: Self = Self(0x00);
    /// Acknowledgement of a reliable data packet.
    pub const ACK: Self = Self(0x01);
    /// Reserved for negative acknowledgements. Accepted on decode, never set.
    pub const NACK: Self = Self(0x02);
    /// Set on every retransmission of a reliable data packet.
    pub const RETX: Self = Self(0x04);

    pub fn contains(self, flag: Flags) -> bool {
        (self.0 & flag.0) == flag.0
    }

    pub fn with(self, flag: Flags) -> Flags {
        Flags(self.0 | flag.0)
    }
}

/// A decoded H-UDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub channel: Channel,
    pub flags: Flags,
    pub seq: u16,
    /// Sender's monotonic clock at transmission time, truncated to 32 bits.
    pub ts_ms: u32,
    pub payload: Bytes,
}

impl Packet {
    /// A data packet on the given channel.
    pub fn data(channel: Channel, seq: u16, ts_ms: u32, payload: Bytes) -> Self {
        Self {
            channel,
            flags: Flags::NONE,
            seq,
            ts_ms,
            payload,
        }
    }

    /// An acknowledgement for `seq`. ACKs have no payload and always use the
    /// reliable channel.
    pub fn ack(seq: u16, ts_ms: u32) -> Self {
        Self {
            channel: Channel::Reliable,
            flags: Flags::ACK,
            seq,
            ts_ms,
            payload: Bytes::new(),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(Flags::ACK)
    }

    /// The total number of bytes this packet occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode this packet into a fresh byte buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.channel as u8);
        buf.put_u8(self.flags.0);
        buf.put_u16(self.seq);
        buf.put_u32(self.ts_ms);
        buf.put_slice(&self.payload);
    }

    /// Decode a packet from a received datagram.
    ///
    /// Datagrams shorter than the header or with an unknown channel value
    /// fail to decode; the caller discards them. Unknown flag bits (including
    /// the reserved NACK bit) are accepted and carried through untouched.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(HudpError::PacketTooShort {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }

        let channel = Channel::try_from(data[0])?;
        let flags = Flags(data[1]);
        let seq = (&data[2..4]).get_u16();
        let ts_ms = (&data[4..8]).get_u32();
        let payload = Bytes::copy_from_slice(&data[HEADER_LEN..]);

        Ok(Self {
            channel,
            flags,
            seq,
            ts_ms,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_round_trip() {
        let pkt = Packet::data(
            Channel::Reliable,
            0xBEEF,
            0xDEAD_CAFE,
            Bytes::from_static(b"payload"),
        );
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn ack_round_trip_is_header_only() {
        let ack = Packet::ack(42, 1000);
        let encoded = ack.encode();
        assert_eq!(encoded.len(), HEADER_LEN);

        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded.channel, Channel::Reliable);
        assert!(decoded.is_ack());
        assert_eq!(decoded.seq, 42);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn wire_layout_is_big_endian() {
        let pkt = Packet::data(Channel::Unreliable, 0x0102, 0x0304_0506, Bytes::new());
        let encoded = pkt.encode();
        assert_eq!(&encoded[..], &[0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn short_datagram_rejected() {
        for len in 0..HEADER_LEN {
            let err = Packet::decode(&vec![0u8; len]).unwrap_err();
            assert!(matches!(err, HudpError::PacketTooShort { .. }), "len={len}");
        }
    }

    #[test]
    fn unknown_channel_rejected() {
        let mut bytes = Packet::data(Channel::Reliable, 0, 0, Bytes::new())
            .encode()
            .to_vec();
        bytes[0] = 2;
        assert!(matches!(
            Packet::decode(&bytes),
            Err(HudpError::UnknownChannel(2))
        ));
    }

    #[test]
    fn reserved_nack_bit_accepted() {
        let mut bytes = Packet::data(Channel::Reliable, 7, 0, Bytes::from_static(b"x"))
            .encode()
            .to_vec();
        bytes[1] |= Flags::NACK.0;
        let decoded = Packet::decode(&bytes).unwrap();
        assert!(decoded.flags.contains(Flags::NACK));
        assert!(!decoded.is_ack());
    }

    #[test]
    fn empty_payload_allowed() {
        let pkt = Packet::data(Channel::Reliable, 1, 2, Bytes::new());
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert!(decoded.payload.is_empty());
        assert!(!decoded.is_ack());
    }
}
