//! ringmesh-overlay: topology formation for the ring overlay.
//!
//! Routers move packets by address class. The handshake layer negotiates
//! links and keeps concurrent attempts to the same peer from duplicating.
//! Overlords decide when and to whom each connection type should link.

pub mod context;
pub mod discovery;
pub mod handshake;
pub mod node;
pub mod overlord;
pub mod routing;

pub use context::NodeContext;
pub use node::Node;
pub use routing::{RouteOutcome, Router};
