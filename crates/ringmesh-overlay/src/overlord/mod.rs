//! Connection overlords: one demand policy per connection type.
//!
//! An overlord decides when its type needs another link and to whom, starts
//! the handshake, and updates its own bookkeeping from handshake reports and
//! connection-table events. Overlords never retry inside a handshake; every
//! retry decision is made here.

use std::sync::Arc;

use ringmesh_core::ConnectRequest;
use ringmesh_services::{Connection, ConnectionType};

use crate::context::NodeContext;
use crate::handshake::ConnectorReport;

pub mod leaf;
pub mod local;
pub mod managed;
pub mod unstructured;

pub use leaf::LeafOverlord;
pub use local::LocalDiscoveryOverlord;
pub use managed::{ManagedOverlord, ManagedState, MANAGED_TYPE};
pub use unstructured::UnstructuredOverlord;

pub trait ConnectionOverlord: Send + Sync {
    /// Connection type this policy owns.
    fn connection_type(&self) -> ConnectionType;

    fn context(&self) -> &Arc<NodeContext>;

    /// When off, lost connections are not replaced.
    fn is_active(&self) -> bool;

    fn set_active(&self, active: bool);

    fn need_connection(&self) -> bool;

    /// Begin seeking a connection if the policy calls for one.
    fn activate(&self);

    fn on_connection(&self, _connection: &Arc<Connection>) {}

    fn on_disconnection(&self, _connection: &Arc<Connection>) {}

    /// Rebuild connection bookkeeping from the table after events were missed.
    fn resync(&self) {}

    fn on_heartbeat(&self) {
        if self.is_active() && self.need_connection() {
            self.activate();
        }
    }

    /// A connector received a reply. Returns true to stop listening for more.
    fn handle_ctm_response(&self, response: &ConnectRequest) -> bool {
        self.context().link_to(response);
        true
    }

    /// A connector this overlord started has reached a terminal state.
    fn connector_finished(&self, _report: ConnectorReport) {}
}
