//! ringmesh-services: shared overlay state and the contracts of the
//! collaborators the overlay drives: edges, the connection table, the RPC
//! transport, and the link layer.

pub mod connection;
pub mod link;
pub mod rpc;
pub mod table;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{Connection, ConnectionStatus, ConnectionType, Edge, EdgeError, EdgeId, EdgeRef};
pub use link::{GracefulCloser, LinkError, LinkRequest, Linker};
pub use rpc::{CloseReason, RpcCaller, RpcError, RpcEvent, RpcHandler, RpcRegistry, RpcTarget, RpcTransport};
pub use table::{ConnectionTable, RingView, TableError, TableEvent};
