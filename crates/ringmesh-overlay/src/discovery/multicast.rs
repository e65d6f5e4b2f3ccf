//! Discovery over IPv6 link-local multicast.
//!
//! Queries go to ff02::1 on the configured port with hop limit 1, so they
//! never leave the link. Every node running `respond_loop` answers with a
//! unicast datagram back to the querying socket.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use ringmesh_core::config::DiscoveryConfig;
use ringmesh_core::message::{DiscoveryQuery, DiscoveryReply};
use ringmesh_services::{RpcCaller, RpcRegistry};

use super::DiscoveryChannel;

pub const MULTICAST_ADDR: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

const MAX_DATAGRAM: usize = 4096;
const REPLY_QUEUE: usize = 64;

pub struct MulticastDiscovery {
    interface_index: u32,
    port: u16,
    reply_window: Duration,
}

impl MulticastDiscovery {
    pub fn new(interface_index: u32, port: u16, reply_window: Duration) -> Self {
        Self {
            interface_index,
            port,
            reply_window,
        }
    }

    /// Resolve the configured interface. An empty name means the default
    /// (index 0, chosen by the OS).
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        let interface_index = if config.interface.is_empty() {
            0
        } else {
            if_index(&config.interface)?
        };
        Ok(Self::new(interface_index, config.port, config.reply_window()))
    }

    fn group(&self) -> SocketAddrV6 {
        SocketAddrV6::new(MULTICAST_ADDR, self.port, 0, self.interface_index)
    }

    /// Answer discovery queries from the local segment until shutdown.
    pub async fn respond_loop(
        &self,
        registry: Arc<RpcRegistry>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let socket = make_listener_socket(self.port, self.interface_index)
            .context("failed to create discovery listener socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        tracing::info!(port = self.port, interface = self.interface_index, "discovery responder starting");

        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("discovery responder stopping");
                    return Ok(());
                }
                r = socket.recv_from(&mut buf) => match r {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                },
            };

            let query: DiscoveryQuery = match serde_json::from_slice(&buf[..len]) {
                Ok(q) => q,
                Err(e) => {
                    tracing::trace!(error = %e, from = %peer, "ignoring malformed discovery datagram");
                    continue;
                }
            };

            let reply = match registry.dispatch(&RpcCaller::default(), &query.method, serde_json::Value::Null) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(error = %e, method = %query.method, "discovery query not answered");
                    continue;
                }
            };
            let bytes = match serde_json::to_vec(&reply) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode discovery reply");
                    continue;
                }
            };
            match socket.send_to(&bytes, peer).await {
                Ok(n) => tracing::trace!(bytes = n, to = %peer, "discovery reply sent"),
                Err(e) => tracing::debug!(error = %e, to = %peer, "discovery reply failed"),
            }
        }
    }
}

impl DiscoveryChannel for MulticastDiscovery {
    fn query(&self, query: DiscoveryQuery) -> mpsc::Receiver<DiscoveryReply> {
        let (tx, rx) = mpsc::channel(REPLY_QUEUE);
        let group = self.group();
        let window = self.reply_window;
        let interface_index = self.interface_index;

        tokio::spawn(async move {
            if let Err(e) = run_query(query, group, interface_index, window, tx).await {
                tracing::warn!(error = %e, "discovery query failed");
            }
        });
        rx
    }
}

async fn run_query(
    query: DiscoveryQuery,
    group: SocketAddrV6,
    interface_index: u32,
    window: Duration,
    tx: mpsc::Sender<DiscoveryReply>,
) -> Result<()> {
    let socket = make_query_socket(interface_index).context("failed to create discovery query socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

    let bytes = serde_json::to_vec(&query).context("encode discovery query")?;
    socket
        .send_to(&bytes, SocketAddr::V6(group))
        .await
        .context("send discovery query")?;
    tracing::debug!(group = %group, "discovery query sent");

    let deadline = tokio::time::Instant::now() + window;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
            Ok(Ok(r)) => r,
        };
        match serde_json::from_slice::<DiscoveryReply>(&buf[..len]) {
            Ok(reply) => {
                if tx.send(reply).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => tracing::trace!(error = %e, from = %peer, "ignoring malformed discovery reply"),
        }
    }
}

/// Ephemeral socket for one query: multicast out, unicast replies back in.
fn make_query_socket(interface_index: u32) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.set_multicast_if_v6(interface_index).context("IPV6_MULTICAST_IF")?;
    // link-local only
    socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
    socket.set_multicast_loop_v6(true).context("IPV6_MULTICAST_LOOP")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;
    Ok(socket.into())
}

/// Socket joined to ff02::1 on the discovery port.
fn make_listener_socket(port: u16, interface_index: u32) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;
    socket
        .join_multicast_v6(&MULTICAST_ADDR, interface_index)
        .context("IPV6_JOIN_GROUP")?;
    Ok(socket.into())
}

/// OS interface index for a named network interface.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}
