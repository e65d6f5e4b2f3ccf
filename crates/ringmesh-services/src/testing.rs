//! Test doubles for the collaborator contracts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use ringmesh_core::wire::Packet;
use ringmesh_core::{RingAddress, TransportAddress};

use crate::connection::{Edge, EdgeError, EdgeId, EdgeRef};
use crate::link::{GracefulCloser, LinkError, LinkRequest, Linker};
use crate::rpc::{CloseReason, RpcEvent, RpcTarget, RpcTransport};

static NEXT_EDGE_ID: AtomicU64 = AtomicU64::new(1);

/// Ring address with `pos << 1` in its last two bytes.
pub fn ring_at(pos: u16) -> RingAddress {
    let mut bytes = [0u8; 20];
    bytes[18..].copy_from_slice(&(pos << 1).to_be_bytes());
    match RingAddress::from_bytes(&bytes) {
        Ok(a) => a,
        Err(e) => panic!("ring_at({pos}): {e}"),
    }
}

// ── Edge ──────────────────────────────────────────────────────────────────────

/// Edge that records what was sent on it.
#[derive(Debug)]
pub struct MockEdge {
    id: EdgeId,
    remote: TransportAddress,
    sent: Mutex<Vec<Packet>>,
    closed: AtomicBool,
}

impl MockEdge {
    pub fn new() -> Arc<Self> {
        let id = EdgeId(NEXT_EDGE_ID.fetch_add(1, Ordering::Relaxed));
        Arc::new(Self {
            id,
            remote: TransportAddress::new(format!("mock://{}", id.0)),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.sent.lock().clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl Edge for MockEdge {
    fn id(&self) -> EdgeId {
        self.id
    }

    fn remote_transport(&self) -> TransportAddress {
        self.remote.clone()
    }

    fn send(&self, packet: &Packet) -> Result<(), EdgeError> {
        if self.is_closed() {
            return Err(EdgeError::Closed);
        }
        self.sent.lock().push(packet.clone());
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

// ── Linker ────────────────────────────────────────────────────────────────────

/// Linker whose attempts finish only when the test says so, in call order.
#[derive(Default)]
pub struct ManualLinker {
    calls: Mutex<Vec<LinkRequest>>,
    pending: Mutex<VecDeque<oneshot::Sender<Result<(), LinkError>>>>,
}

impl ManualLinker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<LinkRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Finish the oldest open attempt. False if none is open.
    pub fn complete_next(&self, result: Result<(), LinkError>) -> bool {
        match self.pending.lock().pop_front() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

impl Linker for ManualLinker {
    fn link(&self, request: LinkRequest) -> BoxFuture<'static, Result<(), LinkError>> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().push(request);
        self.pending.lock().push_back(tx);
        async move { rx.await.unwrap_or(Err(LinkError::EdgeClosed)) }.boxed()
    }
}

// ── Closer ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingCloser {
    closed: Mutex<Vec<(EdgeId, String)>>,
}

impl RecordingCloser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn closed(&self) -> Vec<(EdgeId, String)> {
        self.closed.lock().clone()
    }
}

impl GracefulCloser for RecordingCloser {
    fn close(&self, edge: &EdgeRef, reason: &str) {
        self.closed.lock().push((edge.id(), reason.to_string()));
    }
}

// ── RPC ───────────────────────────────────────────────────────────────────────

/// One recorded `invoke` call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub target: RpcTarget,
    pub method: String,
    pub args: Value,
}

/// RPC transport that records requests and lets the test script replies.
#[derive(Default)]
pub struct ScriptedRpc {
    calls: Mutex<Vec<Invocation>>,
    streams: Mutex<Vec<mpsc::UnboundedSender<RpcEvent>>>,
}

impl ScriptedRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Push a result onto the reply stream of call `index`.
    pub fn reply(&self, index: usize, value: Value) -> bool {
        self.send(index, RpcEvent::Result(value))
    }

    /// End the reply stream of call `index`.
    pub fn close(&self, index: usize, reason: CloseReason) -> bool {
        self.send(index, RpcEvent::Closed(reason))
    }

    fn send(&self, index: usize, event: RpcEvent) -> bool {
        self.streams
            .lock()
            .get(index)
            .map_or(false, |tx| tx.send(event).is_ok())
    }
}

impl RpcTransport for ScriptedRpc {
    fn invoke(&self, target: RpcTarget, method: &str, args: Value) -> mpsc::UnboundedReceiver<RpcEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.calls.lock().push(Invocation {
            target,
            method: method.to_string(),
            args,
        });
        self.streams.lock().push(tx);
        rx
    }
}
