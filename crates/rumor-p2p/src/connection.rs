//! Peer connection lifecycle.
//!
//! Every horizontal connection moves through three handshake states:
//! - [`ConnectionState::ToBeProved`]: accepted or dialed, admission pending
//! - [`ConnectionState::InProgress`]: we are solving the peer's challenge
//! - [`ConnectionState::Valid`]: admitted, eligible for gossip
//!
//! [`ConnectionManager`] keeps one bin per state behind a single lock so a
//! connection is in exactly one bin at any instant, and moving it between
//! bins is atomic with respect to lookups.

use crate::error::{P2pError, P2pResult};
use crate::message::PeerMessage;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::seq::index;
use rumor_admission::ConnectionId;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Handle for queueing messages to one peer.
#[derive(Debug, Clone)]
pub struct PeerSender {
    id: ConnectionId,
    tx: mpsc::Sender<PeerMessage>,
    closer: CancellationToken,
}

impl PeerSender {
    /// Wraps the outbound queue of a connection task.
    ///
    /// Cancelling `closer` asks the task to shut the link down.
    #[must_use]
    pub const fn new(
        id: ConnectionId,
        tx: mpsc::Sender<PeerMessage>,
        closer: CancellationToken,
    ) -> Self {
        Self { id, tx, closer }
    }

    /// Creates a sender together with the receiving end of its queue.
    #[must_use]
    pub fn channel(
        id: impl Into<ConnectionId>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<PeerMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(id.into(), tx, CancellationToken::new()), rx)
    }

    /// Returns the connection identity.
    #[must_use]
    pub const fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queues a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::ChannelFull`] when the queue is full and
    /// [`P2pError::ChannelClosed`] when the link is gone.
    pub fn try_send(&self, message: PeerMessage) -> P2pResult<()> {
        if self.closer.is_cancelled() {
            return Err(P2pError::ChannelClosed(self.id.clone()));
        }
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => P2pError::ChannelFull(self.id.clone()),
            TrySendError::Closed(_) => P2pError::ChannelClosed(self.id.clone()),
        })
    }

    /// Asks the connection task to close the link.
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Returns true once the link was closed from either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled() || self.tx.is_closed()
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The remote peer dialed us.
    Inbound,
    /// We dialed the remote peer.
    Outbound,
}

/// Handshake state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Waiting for admission.
    ToBeProved,
    /// Solving the remote peer's challenge.
    InProgress,
    /// Admitted.
    Valid,
}

impl ConnectionState {
    /// Returns true if gossip may flow over the connection.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// A horizontal peer link.
#[derive(Debug, Clone)]
pub struct GossipConnection {
    direction: Direction,
    sender: PeerSender,
    created_at: DateTime<Utc>,
    validated_at: Option<DateTime<Utc>>,
}

impl GossipConnection {
    /// Creates a connection record for a freshly opened link.
    #[must_use]
    pub fn new(sender: PeerSender, direction: Direction) -> Self {
        Self {
            direction,
            sender,
            created_at: Utc::now(),
            validated_at: None,
        }
    }

    /// Overrides the creation time.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Returns the connection identity.
    #[must_use]
    pub const fn id(&self) -> &ConnectionId {
        self.sender.id()
    }

    /// Returns which side opened the connection.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the outbound handle.
    #[must_use]
    pub const fn sender(&self) -> &PeerSender {
        &self.sender
    }

    /// Returns when the link was opened.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the peer last proved itself.
    #[must_use]
    pub const fn validated_at(&self) -> Option<DateTime<Utc>> {
        self.validated_at
    }

    /// Time since the last successful proof, or since creation if never validated.
    #[must_use]
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.validated_at.unwrap_or(self.created_at)
    }

    /// Queues a message for the peer.
    ///
    /// # Errors
    ///
    /// See [`PeerSender::try_send`].
    pub fn send(&self, message: PeerMessage) -> P2pResult<()> {
        self.sender.try_send(message)
    }

    /// Closes the link.
    pub fn close(&self) {
        self.sender.close();
    }
}

/// Sizes of the three bins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    /// Connections awaiting admission.
    pub to_be_proved: usize,
    /// Connections solving a challenge.
    pub in_progress: usize,
    /// Admitted connections.
    pub valid: usize,
}

impl ConnectionCounts {
    /// Total tracked connections.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.to_be_proved + self.in_progress + self.valid
    }
}

/// Insertion-ordered set of connections.
#[derive(Debug, Default)]
struct Bin {
    order: Vec<ConnectionId>,
    entries: HashMap<ConnectionId, GossipConnection>,
}

impl Bin {
    fn insert(&mut self, connection: GossipConnection) {
        let id = connection.id().clone();
        if self.entries.insert(id.clone(), connection).is_none() {
            self.order.push(id);
        }
    }

    fn remove(&mut self, id: &ConnectionId) -> Option<GossipConnection> {
        let removed = self.entries.remove(id)?;
        if let Some(pos) = self.order.iter().position(|o| o == id) {
            self.order.remove(pos);
        }
        Some(removed)
    }

    fn get(&self, id: &ConnectionId) -> Option<&GossipConnection> {
        self.entries.get(id)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn ordered(&self, max: usize) -> Vec<GossipConnection> {
        self.order
            .iter()
            .take(max)
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }

    fn sampled(&self, max: usize) -> Vec<GossipConnection> {
        let amount = max.min(self.order.len());
        index::sample(&mut rand::thread_rng(), self.order.len(), amount)
            .into_iter()
            .filter_map(|i| self.entries.get(&self.order[i]).cloned())
            .collect()
    }

    fn drain_matching<F>(&mut self, predicate: F) -> Vec<GossipConnection>
    where
        F: Fn(&GossipConnection) -> bool,
    {
        let doomed: Vec<ConnectionId> = self
            .order
            .iter()
            .filter(|id| self.entries.get(*id).is_some_and(&predicate))
            .cloned()
            .collect();
        doomed.iter().filter_map(|id| self.remove(id)).collect()
    }
}

#[derive(Debug, Default)]
struct Bins {
    to_be_proved: Bin,
    in_progress: Bin,
    valid: Bin,
}

impl Bins {
    fn bin(&self, state: ConnectionState) -> &Bin {
        match state {
            ConnectionState::ToBeProved => &self.to_be_proved,
            ConnectionState::InProgress => &self.in_progress,
            ConnectionState::Valid => &self.valid,
        }
    }

    fn bin_mut(&mut self, state: ConnectionState) -> &mut Bin {
        match state {
            ConnectionState::ToBeProved => &mut self.to_be_proved,
            ConnectionState::InProgress => &mut self.in_progress,
            ConnectionState::Valid => &mut self.valid,
        }
    }

    fn state_of(&self, id: &ConnectionId) -> Option<ConnectionState> {
        [
            ConnectionState::ToBeProved,
            ConnectionState::InProgress,
            ConnectionState::Valid,
        ]
        .into_iter()
        .find(|state| self.bin(*state).get(id).is_some())
    }

    fn take(&mut self, id: &ConnectionId) -> Option<GossipConnection> {
        let state = self.state_of(id)?;
        self.bin_mut(state).remove(id)
    }

    fn place(&mut self, state: ConnectionState, connection: GossipConnection) {
        self.take(connection.id());
        self.bin_mut(state).insert(connection);
    }
}

/// Registry of horizontal connections by handshake state.
///
/// Callbacks passed to the `action_on_*` methods run on snapshots taken under
/// the lock, so they may call back into the manager.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    bins: RwLock<Bins>,
}

impl ConnectionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a connection in ToBeProved, removing it from any other bin.
    pub fn add_to_be_proved(&self, connection: GossipConnection) {
        self.bins
            .write()
            .place(ConnectionState::ToBeProved, connection);
    }

    /// Places a connection in InProgress, removing it from any other bin.
    pub fn add_in_progress(&self, connection: GossipConnection) {
        self.bins
            .write()
            .place(ConnectionState::InProgress, connection);
    }

    /// Moves a tracked connection into InProgress.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::ConnectionNotFound`] for unknown identities.
    pub fn mark_in_progress(&self, id: &ConnectionId) -> P2pResult<()> {
        let mut bins = self.bins.write();
        let connection = bins
            .take(id)
            .ok_or_else(|| P2pError::ConnectionNotFound(id.clone()))?;
        bins.in_progress.insert(connection);
        Ok(())
    }

    /// Moves a connection into Valid, stamping it with `timestamp`.
    ///
    /// An already valid connection keeps its place and gets the new timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::ConnectionNotFound`] for unknown identities.
    pub fn make_valid(&self, id: &ConnectionId, timestamp: DateTime<Utc>) -> P2pResult<()> {
        let mut bins = self.bins.write();
        if let Some(connection) = bins.valid.entries.get_mut(id) {
            connection.validated_at = Some(timestamp);
            return Ok(());
        }
        let mut connection = bins
            .take(id)
            .ok_or_else(|| P2pError::ConnectionNotFound(id.clone()))?;
        connection.validated_at = Some(timestamp);
        bins.valid.insert(connection);
        Ok(())
    }

    /// Forgets a connection.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::ConnectionNotFound`] for unknown identities.
    pub fn remove(&self, id: &ConnectionId) -> P2pResult<GossipConnection> {
        self.bins
            .write()
            .take(id)
            .ok_or_else(|| P2pError::ConnectionNotFound(id.clone()))
    }

    /// Looks up a connection awaiting admission.
    #[must_use]
    pub fn find_to_be_proved(&self, id: &ConnectionId) -> Option<GossipConnection> {
        self.bins.read().to_be_proved.get(id).cloned()
    }

    /// Looks up a connection solving a challenge.
    #[must_use]
    pub fn find_in_progress(&self, id: &ConnectionId) -> Option<GossipConnection> {
        self.bins.read().in_progress.get(id).cloned()
    }

    /// Looks up an admitted connection.
    #[must_use]
    pub fn find_valid(&self, id: &ConnectionId) -> Option<GossipConnection> {
        self.bins.read().valid.get(id).cloned()
    }

    /// Looks up a connection in any bin.
    #[must_use]
    pub fn find(&self, id: &ConnectionId) -> Option<(ConnectionState, GossipConnection)> {
        let bins = self.bins.read();
        let state = bins.state_of(id)?;
        bins.bin(state).get(id).cloned().map(|c| (state, c))
    }

    /// Returns the bin holding `id`.
    #[must_use]
    pub fn state_of(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.bins.read().state_of(id)
    }

    /// Runs `f` on up to `max` ToBeProved connections in insertion order.
    ///
    /// Returns the number of connections visited.
    pub fn action_on_to_be_proved<F>(&self, f: F, max: usize) -> usize
    where
        F: FnMut(&GossipConnection),
    {
        let snapshot = self.bins.read().to_be_proved.ordered(max);
        snapshot.iter().for_each(f);
        snapshot.len()
    }

    /// Runs `f` on up to `max` Valid connections in insertion order.
    pub fn action_on_valid<F>(&self, f: F, max: usize) -> usize
    where
        F: FnMut(&GossipConnection),
    {
        let snapshot = self.bins.read().valid.ordered(max);
        snapshot.iter().for_each(f);
        snapshot.len()
    }

    /// Runs `f` on a uniformly random subset of `min(max, valid)` Valid
    /// connections, each visited at most once.
    pub fn action_on_permuted_valid<F>(&self, f: F, max: usize) -> usize
    where
        F: FnMut(&GossipConnection),
    {
        let snapshot = self.bins.read().valid.sampled(max);
        snapshot.iter().for_each(f);
        snapshot.len()
    }

    /// Removes every Valid connection matching `predicate`.
    ///
    /// The removed connections are returned so their links can be closed.
    pub fn cull_connections<F>(&self, predicate: F) -> Vec<GossipConnection>
    where
        F: Fn(&GossipConnection) -> bool,
    {
        self.bins.write().valid.drain_matching(predicate)
    }

    /// Removes every ToBeProved or InProgress connection matching `predicate`.
    pub fn cull_unproven<F>(&self, predicate: F) -> Vec<GossipConnection>
    where
        F: Fn(&GossipConnection) -> bool,
    {
        let mut bins = self.bins.write();
        let mut removed = bins.to_be_proved.drain_matching(&predicate);
        removed.extend(bins.in_progress.drain_matching(&predicate));
        removed
    }

    /// Identities of the admitted connections in insertion order.
    #[must_use]
    pub fn valid_ids(&self) -> Vec<ConnectionId> {
        self.bins.read().valid.order.clone()
    }

    /// Returns the size of each bin.
    #[must_use]
    pub fn counts(&self) -> ConnectionCounts {
        let bins = self.bins.read();
        ConnectionCounts {
            to_be_proved: bins.to_be_proved.len(),
            in_progress: bins.in_progress.len(),
            valid: bins.valid.len(),
        }
    }

    /// Returns the number of tracked connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts().total()
    }

    /// Returns true if no connection is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
