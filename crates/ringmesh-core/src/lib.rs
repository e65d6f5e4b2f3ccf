//! ringmesh-core: ring address space, wire format, and configuration.
//! All other ringmesh crates depend on this one.

pub mod address;
pub mod config;
pub mod message;
pub mod wire;

pub use address::{Address, AddressError, Bearing, DirectionalAddress, FloodAddress, RandomWalkAddress, RingAddress};
pub use message::{ConnectRequest, NodeInfo, TransportAddress};
pub use wire::{DeliveryMode, Packet};
