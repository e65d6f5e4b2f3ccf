//! Handshake layer: outbound connectors, the inbound connect handler, and
//! per-peer deduplication of link attempts.

pub mod connector;
pub mod ctm;
pub mod setup;

pub use connector::{Connector, ConnectorReport, ConnectorState, HandshakeError};
pub use ctm::CtmRequestHandler;
pub use setup::{AttemptKey, ConnectionSetupManager, SetupOutcome};
