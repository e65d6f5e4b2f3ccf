//! Overlay packet format.
//!
//! Every routed packet starts with a fixed 48-byte header followed by an
//! opaque payload. Multi-byte integers are big-endian on the wire.
//! The header is #[repr(C, packed)] and uses zerocopy derives, so there is
//! no unsafe code in this module.

use bytes::{Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::address::{Address, AddressError, RingAddress, ADDRESS_LEN};

/// Current header version. Anything else is rejected on decode.
pub const WIRE_VERSION: u8 = 0x01;

/// Default hop budget for routed packets.
pub const DEFAULT_TTL: u16 = 64;

// ── Header ────────────────────────────────────────────────────────────────────

/// Wire size: 48 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PacketHeader {
    pub version: u8,

    /// `DeliveryMode` discriminant.
    pub delivery: u8,

    /// Application payload type. The router does not inspect this.
    pub payload_type: u8,

    /// Must be zero.
    pub reserved: u8,

    /// Hops travelled so far (big-endian).
    pub hops: u16,

    /// Maximum hops (big-endian).
    pub ttl: u16,

    pub source: [u8; ADDRESS_LEN],
    pub destination: [u8; ADDRESS_LEN],
}

assert_eq_size!(PacketHeader, [u8; 48]);

pub const HEADER_LEN: usize = std::mem::size_of::<PacketHeader>();

// ── Delivery mode ─────────────────────────────────────────────────────────────

/// What a node does when it cannot move a packet any closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeliveryMode {
    /// Only the exact destination may accept the packet.
    #[default]
    Exact = 0,
    /// Accept on the last hop (hops == ttl, or no next hop).
    Last = 1,
    /// Accept at whichever node is nearest to the destination.
    Nearest = 2,
}

impl DeliveryMode {
    pub fn is_last_hop(&self) -> bool {
        matches!(self, DeliveryMode::Last)
    }
}

impl TryFrom<u8> for DeliveryMode {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(DeliveryMode::Exact),
            1 => Ok(DeliveryMode::Last),
            2 => Ok(DeliveryMode::Nearest),
            other => Err(WireError::UnknownDelivery(other)),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("packet truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unsupported wire version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("unknown delivery mode {0}")]
    UnknownDelivery(u8),
    #[error(transparent)]
    Address(#[from] AddressError),
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// A routed overlay packet. Immutable; hop changes produce a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub hops: u16,
    pub ttl: u16,
    pub source: RingAddress,
    pub destination: Address,
    pub delivery: DeliveryMode,
    pub payload_type: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(source: RingAddress, destination: Address, ttl: u16, payload: Bytes) -> Self {
        Self {
            hops: 0,
            ttl,
            source,
            destination,
            delivery: DeliveryMode::default(),
            payload_type: 0,
            payload,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Copy of this packet one hop further along.
    pub fn increment_hops(&self) -> Self {
        let mut next = self.clone();
        next.hops = next.hops.saturating_add(1);
        next
    }

    /// Copy of this packet with a rewritten destination.
    pub fn with_destination(&self, destination: Address) -> Self {
        let mut next = self.clone();
        next.destination = destination;
        next
    }

    pub fn has_ttl_left(&self) -> bool {
        self.hops < self.ttl
    }

    pub fn encode(&self) -> Bytes {
        let header = PacketHeader {
            version: WIRE_VERSION,
            delivery: self.delivery as u8,
            payload_type: self.payload_type,
            reserved: 0,
            hops: self.hops.to_be(),
            ttl: self.ttl.to_be(),
            source: self.source.to_bytes(),
            destination: self.destination.to_bytes(),
        };
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(data: &Bytes) -> Result<Self, WireError> {
        let header = PacketHeader::read_from_prefix(data.as_ref()).ok_or(WireError::Truncated {
            needed: HEADER_LEN,
            got: data.len(),
        })?;
        if header.version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion(header.version));
        }
        // copy packed fields out before use
        let hops = header.hops;
        let ttl = header.ttl;
        let source = header.source;
        let destination = header.destination;
        Ok(Self {
            hops: u16::from_be(hops),
            ttl: u16::from_be(ttl),
            source: RingAddress::from_bytes(&source)?,
            destination: Address::from_bytes(&destination)?,
            delivery: DeliveryMode::try_from(header.delivery)?,
            payload_type: header.payload_type,
            payload: data.slice(HEADER_LEN..),
        })
    }
}
