//! Link attempt deduplication.
//!
//! At most one link worker runs per (peer, main type). Requests arriving
//! while one is running are queued and served one after another as workers
//! finish; the key is forgotten once its queue drains.
//!
//! The "already connected" decision and the admission of a request happen
//! under one attempts lock. A worker's connection is in the table before its
//! key is released, so a request admitted after that sees it. Lock order:
//! attempts, then the connection table.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use ringmesh_core::RingAddress;
use ringmesh_services::{ConnectionTable, ConnectionType, LinkError, LinkRequest, Linker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub target: RingAddress,
    pub connection_type: ConnectionType,
}

impl AttemptKey {
    pub fn new(target: RingAddress, connection_type: ConnectionType) -> Self {
        Self {
            target,
            connection_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// A worker was started for this request.
    Started,
    /// A worker for the same key is running; this request waits behind it.
    Queued { pending: usize },
    /// A connection of this type to the target already exists.
    AlreadyConnected,
    Rejected(LinkError),
}

/// Presence in the map means a worker is running for the key.
#[derive(Default)]
struct AttemptState {
    pending: VecDeque<LinkRequest>,
}

pub struct ConnectionSetupManager {
    local: RingAddress,
    table: Arc<ConnectionTable>,
    linker: Arc<dyn Linker>,
    attempts: Mutex<HashMap<AttemptKey, AttemptState>>,
}

impl ConnectionSetupManager {
    pub fn new(local: RingAddress, table: Arc<ConnectionTable>, linker: Arc<dyn Linker>) -> Arc<Self> {
        Arc::new(Self {
            local,
            table,
            linker,
            attempts: Mutex::new(HashMap::new()),
        })
    }

    /// Start a link worker for `request`, or queue it behind the running one.
    ///
    /// Requests without a target address cannot collide and always start.
    pub fn start_linking(self: &Arc<Self>, request: LinkRequest) -> SetupOutcome {
        let Some(target) = request.target else {
            self.spawn_worker(None, request);
            return SetupOutcome::Started;
        };
        if target == self.local {
            return SetupOutcome::Rejected(LinkError::ConnectToSelf);
        }

        let key = AttemptKey::new(target, request.main_type());
        {
            let mut attempts = self.attempts.lock();
            if self.table.contains(key.connection_type, &target) {
                tracing::trace!(
                    peer = %target.short(),
                    connection_type = %key.connection_type,
                    "already connected, not linking"
                );
                return SetupOutcome::AlreadyConnected;
            }
            match attempts.entry(key) {
                Entry::Occupied(mut e) => {
                    let state = e.get_mut();
                    state.pending.push_back(request);
                    let pending = state.pending.len();
                    tracing::debug!(
                        peer = %target.short(),
                        connection_type = %key.connection_type,
                        pending,
                        "link attempt in progress, queued"
                    );
                    return SetupOutcome::Queued { pending };
                }
                Entry::Vacant(e) => {
                    e.insert(AttemptState::default());
                }
            }
        }

        self.spawn_worker(Some(key), request);
        SetupOutcome::Started
    }

    pub fn is_active(&self, key: &AttemptKey) -> bool {
        self.attempts.lock().contains_key(key)
    }

    /// Requests waiting behind the running worker for `key`.
    pub fn pending(&self, key: &AttemptKey) -> usize {
        self.attempts
            .lock()
            .get(key)
            .map_or(0, |s| s.pending.len())
    }

    pub fn active_count(&self) -> usize {
        self.attempts.lock().len()
    }

    fn spawn_worker(self: &Arc<Self>, key: Option<AttemptKey>, request: LinkRequest) {
        tracing::debug!(
            target_addr = ?request.target.map(|t| t.short()),
            connection_type = %request.connection_type,
            transports = request.transports.len(),
            "link worker starting"
        );
        let work = self.linker.link(request);
        let manager = self.clone();
        tokio::spawn(async move {
            let result = work.await;
            match &result {
                Ok(()) => tracing::debug!("link worker finished"),
                Err(e) => tracing::debug!(error = %e, "link worker failed"),
            }
            if let Some(key) = key {
                manager.worker_finished(key);
            }
        });
    }

    fn worker_finished(self: &Arc<Self>, key: AttemptKey) {
        let next = {
            let mut attempts = self.attempts.lock();
            match attempts.get_mut(&key) {
                Some(state) => {
                    let next = if self.table.contains(key.connection_type, &key.target) {
                        // queued requests could only fail now
                        state.pending.clear();
                        None
                    } else {
                        state.pending.pop_front()
                    };
                    if next.is_none() {
                        attempts.remove(&key);
                    }
                    next
                }
                None => None,
            }
        };

        if let Some(request) = next {
            self.spawn_worker(Some(key), request);
        }
    }
}
