//! Per peer endpoint, relay flag and traffic timestamps.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Where a peer stands from this client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// never heard of
    Unknown,
    /// connect requested, no endpoint announced yet
    Pending,
    /// endpoint known, payloads go over udp
    Direct,
    /// payloads go through the coordinator. sticky.
    Relayed,
}

/// Snapshot of one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerRecord {
    pub endpoint: Option<SocketAddr>,
    pub relayed: bool,
    pub requested: bool,
    pub last_tx: Option<Instant>,
    pub last_rx: Option<Instant>,
}

impl PeerRecord {
    pub fn state(&self) -> PeerState {
        if self.relayed {
            PeerState::Relayed
        } else if self.endpoint.is_some() {
            PeerState::Direct
        } else if self.requested {
            PeerState::Pending
        } else {
            PeerState::Unknown
        }
    }

    /// Direct sends went unanswered: the last send leads the last receive by
    /// more than `grace`, and nothing was sent for longer than `silence`.
    /// Both comparisons are strict, a receive landing exactly `grace` before
    /// the send still counts as an answer.
    pub fn is_unanswered(&self, now: Instant, grace: Duration, silence: Duration) -> bool {
        let tx = match self.last_tx {
            Some(tx) if !self.relayed => tx,
            _ => return false,
        };

        let answered = match self.last_rx {
            Some(rx) => tx <= rx + grace,
            None => false,
        };

        !answered && now.saturating_duration_since(tx) > silence
    }
}

fn advance(slot: &mut Option<Instant>, t: Instant) {
    if slot.map_or(true, |old| t > old) {
        *slot = Some(t);
    }
}

/// Thread safe peer table. Every operation runs under one lock, no callback
/// ever runs while it is held.
///
/// Records are created on first announcement, first observed traffic or
/// first connect request, and never removed.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: Mutex<HashMap<String, PeerRecord>>,
}

impl PeerDirectory {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PeerRecord>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with<R>(&self, id: &str, f: impl FnOnce(&mut PeerRecord) -> R) -> R {
        f(self.lock().entry(id.to_string()).or_default())
    }

    pub fn get(&self, id: &str) -> Option<PeerRecord> {
        self.lock().get(id).copied()
    }

    pub fn state(&self, id: &str) -> PeerState {
        self.get(id).map_or(PeerState::Unknown, |r| r.state())
    }

    /// Record the endpoint announced for `id`, superseding any earlier one.
    /// Returns the previous endpoint.
    pub fn upsert_endpoint(&self, id: &str, endpoint: SocketAddr) -> Option<SocketAddr> {
        self.with(id, |rec| rec.endpoint.replace(endpoint))
    }

    /// Note that a connect to `id` was asked for. Returns true if this
    /// client already asked before.
    pub fn mark_requested(&self, id: &str) -> bool {
        self.with(id, |rec| std::mem::replace(&mut rec.requested, true))
    }

    /// Set the relay flag. Returns true only for the call that set it.
    pub fn mark_relayed(&self, id: &str) -> bool {
        self.with(id, |rec| !std::mem::replace(&mut rec.relayed, true))
    }

    pub fn record_tx(&self, id: &str, t: Instant) {
        self.with(id, |rec| advance(&mut rec.last_tx, t))
    }

    pub fn record_rx(&self, id: &str, t: Instant) {
        self.with(id, |rec| advance(&mut rec.last_rx, t))
    }

    /// Linear scan. Peer counts are small, a reverse index is not worth it.
    pub fn find_id_by_endpoint(&self, endpoint: SocketAddr) -> Option<String> {
        self.lock()
            .iter()
            .find(|(_, rec)| rec.endpoint == Some(endpoint))
            .map(|(id, _)| id.clone())
    }

    /// Resolve `endpoint` and record a receive for it in one step.
    pub fn record_rx_from(&self, endpoint: SocketAddr, t: Instant) -> Option<String> {
        let mut peers = self.lock();
        let (id, rec) = peers
            .iter_mut()
            .find(|(_, rec)| rec.endpoint == Some(endpoint))?;
        advance(&mut rec.last_rx, t);
        Some(id.clone())
    }

    /// Ids of peers whose direct sends went unanswered, see [`PeerRecord::is_unanswered`].
    pub fn unanswered(&self, now: Instant, grace: Duration, silence: Duration) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, rec)| rec.is_unanswered(now, grace, silence))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
