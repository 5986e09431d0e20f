//! Shared limit on outstanding fetch requests, per peer and in aggregate.

use crate::fetch::protocol::FetchError;
use crate::topology::PeerId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds outstanding requests so a mass restart cannot flood the fleet.
///
/// One limiter is shared by every bootstrap unit. A request holds one
/// per-peer permit and one global permit until it completes.
#[derive(Debug)]
pub struct FetchLimiter {
    global: Arc<Semaphore>,
    per_peer_limit: usize,
    per_peer: Mutex<HashMap<PeerId, Arc<Semaphore>>>,
}

/// Permission to have one request outstanding. Released on drop.
#[derive(Debug)]
pub struct FetchPermit {
    _peer: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl FetchLimiter {
    /// Creates a limiter. Zero limits are raised to one.
    pub fn new(per_peer_limit: usize, global_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
            per_peer_limit: per_peer_limit.max(1),
            per_peer: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for a slot to send one request to `peer`.
    ///
    /// The per-peer permit is taken before the global one, so a slow peer
    /// queues on its own semaphore without holding global capacity.
    pub async fn acquire(&self, peer: &PeerId) -> Result<FetchPermit, FetchError> {
        let peer_permit = self
            .peer_semaphore(peer)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Rejected("fetch limiter closed".into()))?;
        let global_permit = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Rejected("fetch limiter closed".into()))?;
        Ok(FetchPermit {
            _peer: peer_permit,
            _global: global_permit,
        })
    }

    /// Returns the free global slots.
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    /// Returns the free slots for `peer`.
    pub fn available_for(&self, peer: &PeerId) -> usize {
        self.peer_semaphore(peer).available_permits()
    }

    fn peer_semaphore(&self, peer: &PeerId) -> Arc<Semaphore> {
        let mut per_peer = self.per_peer.lock().unwrap_or_else(|err| err.into_inner());
        Arc::clone(
            per_peer
                .entry(peer.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_peer_limit))),
        )
    }
}
