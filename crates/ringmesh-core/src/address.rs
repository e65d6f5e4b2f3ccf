//! Ring address space.
//!
//! Every address is a 160-bit big-endian value. The low-order bits carry a
//! class tag: a run of trailing 1-bits terminated by a 0-bit (or all 1-bits
//! for class 160). The class decides which concrete address type the bytes
//! decode to and which router handles packets sent to it.
//!
//! Ring positions (class 0) support a signed circular distance in
//! `[-HALF, HALF)`. "Left" is the direction of increasing addresses.

use std::fmt;
use std::str::FromStr;

pub use alloy_primitives::{I160, U160};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Address width in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Address width in bits.
pub const MEMBER_BITS: u32 = 160;

pub const RING_CLASS: u32 = 0;
pub const DIRECTIONAL_CLASS: u32 = 124;
pub const FLOOD_CLASS: u32 = 126;
pub const RANDOM_WALK_CLASS: u32 = 159;

/// Prefix of the textual address form, e.g. `ringmesh:node:0a1b...`.
pub const TEXT_PREFIX: &str = "ringmesh:node:";

/// 2^159, half the ring.
pub const HALF: U160 = U160::from_limbs([0, 0, 1 << 31]);

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid address class: expected {expected}, found {found}")]
    InvalidAddressClass { expected: u32, found: u32 },
    #[error("no address type for class {0}")]
    UnknownClass(u32),
    #[error("address must be {ADDRESS_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid directional bearing {0}")]
    InvalidBearing(u32),
    #[error("cannot parse address: {0}")]
    Parse(String),
}

// ── Class tags ────────────────────────────────────────────────────────────────

/// Number of trailing 1-bits, counted from the least significant bit.
pub fn class_of(bytes: &[u8; ADDRESS_LEN]) -> u32 {
    let mut class = 0;
    for byte in bytes.iter().rev() {
        let ones = byte.trailing_ones();
        class += ones;
        if ones < 8 {
            break;
        }
    }
    class
}

/// Write the class tag into `bytes`: bits `0..class` set, bit `class` cleared.
pub fn set_class(bytes: &mut [u8; ADDRESS_LEN], class: u32) {
    for bit in 0..class.min(MEMBER_BITS) {
        bytes[byte_of(bit)] |= 1 << (bit % 8);
    }
    if class < MEMBER_BITS {
        bytes[byte_of(class)] &= !(1 << (class % 8));
    }
}

fn byte_of(bit: u32) -> usize {
    ADDRESS_LEN - 1 - (bit / 8) as usize
}

fn check_class(bytes: &[u8; ADDRESS_LEN], expected: u32) -> Result<(), AddressError> {
    let found = class_of(bytes);
    if found != expected {
        return Err(AddressError::InvalidAddressClass { expected, found });
    }
    Ok(())
}

fn to_array(bytes: &[u8]) -> Result<[u8; ADDRESS_LEN], AddressError> {
    bytes
        .try_into()
        .map_err(|_| AddressError::InvalidLength(bytes.len()))
}

// ── RingAddress ───────────────────────────────────────────────────────────────

/// A unicast position on the ring (class 0, lowest bit clear).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RingAddress(U160);

impl RingAddress {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let bytes = to_array(bytes)?;
        check_class(&bytes, RING_CLASS)?;
        Ok(Self(U160::from_be_bytes(bytes)))
    }

    pub fn from_u160(value: U160) -> Result<Self, AddressError> {
        Self::from_bytes(&value.to_be_bytes::<ADDRESS_LEN>())
    }

    /// Random ring position.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut bytes: [u8; ADDRESS_LEN] = rng.gen();
        set_class(&mut bytes, RING_CLASS);
        Self(U160::from_be_bytes(bytes))
    }

    /// Stable position derived from arbitrary seed material.
    pub fn from_seed(seed: &[u8]) -> Self {
        let hash = blake3::hash(seed);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&hash.as_bytes()[..ADDRESS_LEN]);
        set_class(&mut bytes, RING_CLASS);
        Self(U160::from_be_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_LEN] {
        self.0.to_be_bytes::<ADDRESS_LEN>()
    }

    pub fn as_u160(&self) -> U160 {
        self.0
    }

    /// Signed distance from `self` to `other`, in `[-HALF, HALF)`.
    ///
    /// A raw difference of exactly `HALF` renormalizes to `-HALF`.
    pub fn distance_to(&self, other: &RingAddress) -> I160 {
        I160::from_raw(other.0.wrapping_sub(self.0))
    }

    /// Unsigned distance travelling left (increasing) from `self` to `other`.
    pub fn left_distance_to(&self, other: &RingAddress) -> U160 {
        other.0.wrapping_sub(self.0)
    }

    /// Unsigned distance travelling right (decreasing) from `self` to `other`.
    pub fn right_distance_to(&self, other: &RingAddress) -> U160 {
        self.0.wrapping_sub(other.0)
    }

    /// True if `self` lies left of (clockwise from) `other`.
    pub fn is_left_of(&self, other: &RingAddress) -> bool {
        other.distance_to(self).is_positive()
    }

    /// True if `self` lies right of (counter-clockwise from) `other`.
    pub fn is_right_of(&self, other: &RingAddress) -> bool {
        other.distance_to(self).is_negative()
    }

    /// True if `self` is strictly inside the arc walked left from `start` to `end`.
    pub fn is_between_from_left(&self, start: &RingAddress, end: &RingAddress) -> bool {
        let to_self = start.left_distance_to(self);
        !to_self.is_zero() && to_self < start.left_distance_to(end)
    }

    /// True if `self` is strictly inside the arc walked right from `start` to `end`.
    pub fn is_between_from_right(&self, start: &RingAddress, end: &RingAddress) -> bool {
        let to_self = start.right_distance_to(self);
        !to_self.is_zero() && to_self < start.right_distance_to(end)
    }

    /// True if `a` is strictly closer to `self` than `b`, by ring distance magnitude.
    pub fn is_closer(&self, a: &RingAddress, b: &RingAddress) -> bool {
        self.distance_to(a).unsigned_abs() < self.distance_to(b).unsigned_abs()
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.to_bytes()[..4])
    }
}

impl fmt::Display for RingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TEXT_PREFIX}{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for RingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RingAddress({})", hex::encode(self.to_bytes()))
    }
}

impl FromStr for RingAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<Address>()? {
            Address::Ring(a) => Ok(a),
            other => Err(AddressError::InvalidAddressClass {
                expected: RING_CLASS,
                found: other.class(),
            }),
        }
    }
}

impl TryFrom<String> for RingAddress {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RingAddress> for String {
    fn from(a: RingAddress) -> Self {
        a.to_string()
    }
}

// ── DirectionalAddress ────────────────────────────────────────────────────────

/// Which ring neighbor a directional packet is heading for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bearing {
    /// Towards larger addresses.
    Left,
    /// Towards smaller addresses.
    Right,
}

/// "My nearest neighbor in direction X" (class 124). Bearing lives in bytes 0..4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectionalAddress {
    pub bearing: Bearing,
}

impl DirectionalAddress {
    pub fn new(bearing: Bearing) -> Self {
        Self { bearing }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let bytes = to_array(bytes)?;
        check_class(&bytes, DIRECTIONAL_CLASS)?;
        let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let bearing = match raw {
            0 => Bearing::Left,
            1 => Bearing::Right,
            other => return Err(AddressError::InvalidBearing(other)),
        };
        Ok(Self { bearing })
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_LEN] {
        let mut bytes = [0u8; ADDRESS_LEN];
        let raw: u32 = match self.bearing {
            Bearing::Left => 0,
            Bearing::Right => 1,
        };
        bytes[..4].copy_from_slice(&raw.to_be_bytes());
        set_class(&mut bytes, DIRECTIONAL_CLASS);
        bytes
    }
}

// ── FloodAddress ──────────────────────────────────────────────────────────────

/// Probabilistic epidemic destination (class 126).
///
/// Bytes 0..4 hold the forwarding probability as big-endian f32 bits; the top
/// bit of byte 4 is the first-hop flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloodAddress {
    pub first_hop: bool,
    pub probability: f32,
}

impl FloodAddress {
    pub fn new(first_hop: bool, probability: f32) -> Self {
        Self {
            first_hop,
            probability: probability.clamp(0.0, 1.0),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let bytes = to_array(bytes)?;
        check_class(&bytes, FLOOD_CLASS)?;
        let probability = f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if !(0.0..=1.0).contains(&probability) {
            return Err(AddressError::Parse(format!("flood probability {probability} out of range")));
        }
        Ok(Self {
            first_hop: bytes[4] & 0x80 != 0,
            probability,
        })
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_LEN] {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[..4].copy_from_slice(&self.probability.to_be_bytes());
        set_class(&mut bytes, FLOOD_CLASS);
        if self.first_hop {
            bytes[4] |= 0x80;
        }
        bytes
    }

    pub fn is_unicast(&self) -> bool {
        self.probability == 0.0
    }

    /// Same probability, first-hop flag cleared.
    pub fn without_first_hop(&self) -> Self {
        Self {
            first_hop: false,
            probability: self.probability,
        }
    }
}

// ── RandomWalkAddress ─────────────────────────────────────────────────────────

/// Random-walk destination (class 159). Carries nothing but the tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RandomWalkAddress;

impl RandomWalkAddress {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let bytes = to_array(bytes)?;
        check_class(&bytes, RANDOM_WALK_CLASS)?;
        Ok(Self)
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_LEN] {
        let mut bytes = [0u8; ADDRESS_LEN];
        set_class(&mut bytes, RANDOM_WALK_CLASS);
        bytes
    }
}

// ── Address ───────────────────────────────────────────────────────────────────

/// Any routable address, dispatched by class tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    Ring(RingAddress),
    Directional(DirectionalAddress),
    Flood(FloodAddress),
    RandomWalk(RandomWalkAddress),
}

impl Address {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let array = to_array(bytes)?;
        match class_of(&array) {
            RING_CLASS => RingAddress::from_bytes(bytes).map(Address::Ring),
            DIRECTIONAL_CLASS => DirectionalAddress::from_bytes(bytes).map(Address::Directional),
            FLOOD_CLASS => FloodAddress::from_bytes(bytes).map(Address::Flood),
            RANDOM_WALK_CLASS => RandomWalkAddress::from_bytes(bytes).map(Address::RandomWalk),
            other => Err(AddressError::UnknownClass(other)),
        }
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_LEN] {
        match self {
            Address::Ring(a) => a.to_bytes(),
            Address::Directional(a) => a.to_bytes(),
            Address::Flood(a) => a.to_bytes(),
            Address::RandomWalk(a) => a.to_bytes(),
        }
    }

    pub fn class(&self) -> u32 {
        match self {
            Address::Ring(_) => RING_CLASS,
            Address::Directional(_) => DIRECTIONAL_CLASS,
            Address::Flood(_) => FLOOD_CLASS,
            Address::RandomWalk(_) => RANDOM_WALK_CLASS,
        }
    }

    pub fn is_unicast(&self) -> bool {
        match self {
            Address::Flood(a) => a.is_unicast(),
            _ => true,
        }
    }

    pub fn as_ring(&self) -> Option<&RingAddress> {
        match self {
            Address::Ring(a) => Some(a),
            _ => None,
        }
    }
}

impl From<RingAddress> for Address {
    fn from(a: RingAddress) -> Self {
        Address::Ring(a)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TEXT_PREFIX}{}", hex::encode(self.to_bytes()))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix(TEXT_PREFIX)
            .ok_or_else(|| AddressError::Parse(format!("missing {TEXT_PREFIX} prefix")))?;
        let bytes = hex::decode(hex_part).map_err(|e| AddressError::Parse(e.to_string()))?;
        Address::from_bytes(&bytes)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.to_string()
    }
}
