//! Pingu wire format: the two datagrams of the liveness handshake.
//!
//! Every datagram is `[kind:1][payload_len:1][payload:payload_len]`. The
//! payload is a JSON object describing the packet's fields. It has no fields
//! today, so every packet on the wire is exactly `[kind, 2, b'{', b'}']`.
//! The length-prefixed envelope stays in place so fields can be added later
//! without changing the prefix.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::addr::PeerAddr;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Largest datagram the receive loop accepts while the payload is `{}`.
pub const MAX_PACKET_SIZE: usize = 4;

/// Size of the fixed prefix preceding the payload.
pub const PREFIX_SIZE: usize = std::mem::size_of::<PacketPrefix>();

/// Upper bound for any configured packet size: prefix plus a full u8 payload.
pub const MAX_CONFIGURABLE_PACKET_SIZE: usize = PREFIX_SIZE + u8::MAX as usize;

// ── Packet kind ───────────────────────────────────────────────────────────────

/// The two messages of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// "Are you there?" Always answered with a Pong.
    Ping = 0x00,
    /// Answer to a Ping.
    Pong = 0x01,
}

impl TryFrom<u8> for PacketKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketKind::Ping),
            0x01 => Ok(PacketKind::Pong),
            other => Err(WireError::InvalidPacketKind(other)),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(k: PacketKind) -> u8 {
        k as u8
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketKind::Ping => f.write_str("ping"),
            PacketKind::Pong => f.write_str("pong"),
        }
    }
}

// ── Prefix ────────────────────────────────────────────────────────────────────

/// Fixed two-byte prefix of every datagram.
///
/// Wire size: 2 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PacketPrefix {
    /// Raw kind tag. Validated through `PacketKind::try_from`.
    pub kind: u8,
    /// Number of payload bytes that follow the prefix.
    pub payload_len: u8,
}

assert_eq_size!(PacketPrefix, [u8; 2]);

// ── Payload ───────────────────────────────────────────────────────────────────

/// Self-describing payload section. Serialized as a JSON object.
///
/// Unknown fields are ignored on decode so newer peers can extend it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {}

// ── Packet ────────────────────────────────────────────────────────────────────

/// A decoded datagram, annotated with the address it was observed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: PacketKind,
    sender: Option<PeerAddr>,
}

impl Packet {
    pub fn ping() -> Self {
        Self { kind: PacketKind::Ping, sender: None }
    }

    pub fn pong() -> Self {
        Self { kind: PacketKind::Pong, sender: None }
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Source address observed by the receiver. `None` for outbound packets.
    pub fn sender(&self) -> Option<PeerAddr> {
        self.sender
    }

    /// Return a copy annotated with the observed source address.
    pub fn with_sender(self, sender: PeerAddr) -> Self {
        Self { sender: Some(sender), ..self }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        encode(self.kind)
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Encode a packet of the given kind.
pub fn encode(kind: PacketKind) -> Result<Bytes, WireError> {
    let payload = serde_json::to_vec(&Payload::default())
        .map_err(|e| WireError::MalformedPayload(e.to_string()))?;
    let payload_len =
        u8::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;

    let prefix = PacketPrefix { kind: kind.into(), payload_len };
    let mut buf = BytesMut::with_capacity(PREFIX_SIZE + payload.len());
    buf.put_slice(prefix.as_bytes());
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a datagram no larger than `MAX_PACKET_SIZE`.
pub fn decode(buf: &[u8]) -> Result<Packet, WireError> {
    decode_with_limit(buf, MAX_PACKET_SIZE)
}

/// Decode a datagram, rejecting anything larger than `max_size` bytes.
///
/// The kind tag is checked first so an unknown tag is always reported as
/// such, even when the rest of the buffer is also broken.
pub fn decode_with_limit(buf: &[u8], max_size: usize) -> Result<Packet, WireError> {
    let tag = *buf
        .first()
        .ok_or_else(|| WireError::MalformedPayload("empty datagram".into()))?;
    let kind = PacketKind::try_from(tag)?;

    if buf.len() > max_size {
        return Err(WireError::MalformedPayload(format!(
            "datagram of {} bytes exceeds maximum {}",
            buf.len(),
            max_size
        )));
    }

    let prefix = PacketPrefix::read_from_prefix(buf).ok_or_else(|| {
        WireError::MalformedPayload(format!("truncated prefix ({} bytes)", buf.len()))
    })?;

    let declared = prefix.payload_len as usize;
    let available = buf.len() - PREFIX_SIZE;
    if declared > available {
        return Err(WireError::MalformedPayload(format!(
            "declared payload length {declared} exceeds {available} available bytes"
        )));
    }
    if declared < available {
        return Err(WireError::MalformedPayload(format!(
            "{} trailing bytes after payload",
            available - declared
        )));
    }

    let _payload: Payload = serde_json::from_slice(&buf[PREFIX_SIZE..])
        .map_err(|e| WireError::MalformedPayload(e.to_string()))?;

    Ok(Packet { kind, sender: None })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("invalid packet kind: {0}")]
    InvalidPacketKind(u8),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("payload length {0} exceeds maximum {}", u8::MAX)]
    PayloadTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
