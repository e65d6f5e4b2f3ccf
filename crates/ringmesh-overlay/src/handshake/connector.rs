//! Outbound connect handshake.
//!
//! A `Connector` sends one `ConnectRequest` and feeds every reply to the
//! overlord that created it, until the overlord is satisfied or the reply
//! stream closes. The overlord hears about the outcome exactly once through
//! `connector_finished`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use ringmesh_core::message::CONNECT_METHOD;
use ringmesh_core::{ConnectRequest, RingAddress};
use ringmesh_services::{CloseReason, RpcEvent, RpcTarget, RpcTransport};

use crate::context::NodeContext;
use crate::overlord::ConnectionOverlord;

/// Checked once, at start. `true` means the attempt is no longer needed.
pub type AbortCheck = Box<dyn FnOnce() -> bool + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Created,
    AwaitingReply,
    Succeeded,
    Failed,
    Aborted,
}

impl ConnectorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectorState::Succeeded | ConnectorState::Failed | ConnectorState::Aborted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake timed out")]
    Timeout,
    #[error("peer has no connect handler")]
    NoHandler,
    #[error("peer handler failed: {0}")]
    HandlerFailure(String),
    #[error("reply stream closed without a usable reply")]
    NoReply,
}

impl HandshakeError {
    fn from_close(reason: &CloseReason) -> Self {
        match reason {
            CloseReason::Complete => HandshakeError::NoReply,
            CloseReason::NoHandler => HandshakeError::NoHandler,
            CloseReason::HandlerFailure(msg) => HandshakeError::HandlerFailure(msg.clone()),
            CloseReason::Timeout => HandshakeError::Timeout,
        }
    }
}

/// Final word on one handshake, delivered to the owning overlord.
#[derive(Debug, Clone)]
pub struct ConnectorReport {
    pub target: RpcTarget,
    pub request: ConnectRequest,
    pub state: ConnectorState,
    pub error: Option<HandshakeError>,
    /// Every usable reply, including ones drained after the stream was closed.
    pub responses: Vec<ConnectRequest>,
}

impl ConnectorReport {
    pub fn succeeded(&self) -> bool {
        self.state == ConnectorState::Succeeded
    }
}

pub struct Connector {
    local: RingAddress,
    rpc: Arc<dyn RpcTransport>,
    owner: Arc<dyn ConnectionOverlord>,
    target: RpcTarget,
    request: ConnectRequest,
    abort: Option<AbortCheck>,
    reply_timeout: Duration,
    state: ConnectorState,
    responses: Vec<ConnectRequest>,
}

impl Connector {
    pub fn new(
        ctx: &NodeContext,
        owner: Arc<dyn ConnectionOverlord>,
        target: RpcTarget,
        request: ConnectRequest,
    ) -> Self {
        Self {
            local: ctx.address,
            rpc: ctx.rpc.clone(),
            owner,
            target,
            request,
            abort: None,
            reply_timeout: ctx.config.timing.reply_timeout(),
            state: ConnectorState::Created,
            responses: Vec::new(),
        }
    }

    pub fn with_abort_check(mut self, check: impl FnOnce() -> bool + Send + 'static) -> Self {
        self.abort = Some(Box::new(check));
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Run the handshake on its own task.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let error = self.drive().await;
        let report = ConnectorReport {
            target: self.target.clone(),
            request: self.request.clone(),
            state: self.state,
            error,
            responses: std::mem::take(&mut self.responses),
        };
        tracing::debug!(
            connection_type = %report.request.connection_type,
            state = ?report.state,
            responses = report.responses.len(),
            "connector finished"
        );
        self.owner.connector_finished(report);
    }

    async fn drive(&mut self) -> Option<HandshakeError> {
        if let Some(check) = self.abort.take() {
            if check() {
                tracing::debug!(
                    connection_type = %self.request.connection_type,
                    "connector aborted before sending"
                );
                self.state = ConnectorState::Aborted;
                return None;
            }
        }

        let mut replies = self
            .rpc
            .invoke(self.target.clone(), CONNECT_METHOD, self.request.to_value());
        self.state = ConnectorState::AwaitingReply;

        let deadline = tokio::time::Instant::now() + self.reply_timeout;
        let close_error = loop {
            let event = match tokio::time::timeout_at(deadline, replies.recv()).await {
                Err(_) => break Some(HandshakeError::Timeout),
                Ok(None) => break Some(HandshakeError::NoReply),
                Ok(Some(event)) => event,
            };
            match event {
                RpcEvent::Result(value) => {
                    if let Some(response) = self.accept(value) {
                        if self.owner.handle_ctm_response(&response) {
                            self.drain(&mut replies);
                            break None;
                        }
                    }
                }
                RpcEvent::Closed(reason) => break Some(HandshakeError::from_close(&reason)),
            }
        };

        if self.responses.is_empty() {
            self.state = ConnectorState::Failed;
            close_error.or(Some(HandshakeError::NoReply))
        } else {
            self.state = ConnectorState::Succeeded;
            None
        }
    }

    /// Decode and vet a reply, recording it if usable.
    fn accept(&mut self, value: serde_json::Value) -> Option<ConnectRequest> {
        let response = match ConnectRequest::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed connect reply");
                return None;
            }
        };
        if response.target.address == self.local {
            tracing::debug!("ignoring connect reply from self");
            return None;
        }
        self.responses.push(response.clone());
        Some(response)
    }

    /// Close the stream and keep whatever replies were already buffered.
    fn drain(&mut self, replies: &mut UnboundedReceiver<RpcEvent>) {
        replies.close();
        loop {
            match replies.try_recv() {
                Ok(RpcEvent::Result(value)) => {
                    self.accept(value);
                }
                Ok(RpcEvent::Closed(_)) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}
