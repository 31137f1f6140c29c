//! Gossip dissemination strategy.
//!
//! A single task owns all dissemination state and multiplexes:
//! - transport events (new links, peer messages, disconnects)
//! - commands from the router ([`ToStrategy`])
//! - the round ticker, which pushes pending messages to sampled peers
//! - the maintenance ticker, which culls idle peers, expires stalled
//!   handshakes and re-challenges the peers this node admitted
//! - completions of proof-of-work searches running on the blocking pool
//!
//! Rounds therefore never overlap and the pending set has one owner.

use crate::cache::{NotificationTable, PendingCache, PendingMessage, SeenCache};
use crate::config::StrategyConfig;
use crate::connection::{ConnectionManager, ConnectionState, Direction, GossipConnection};
use crate::error::P2pError;
use crate::handshake::{Admission, CookieProof, check_cookie_len};
use crate::message::{GossipPush, PeerMessage};
use crate::transport::{Transport, TransportEvent};
use chrono::Utc;
use rumor_admission::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Router to strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToStrategy {
    /// Disseminate a locally produced message.
    Announce {
        /// Hop budget.
        ttl: u8,
        /// Gossip type.
        data_type: u16,
        /// Application payload.
        payload: Vec<u8>,
    },
    /// Verdict on a received message.
    Validation {
        /// Local id from the matching notification.
        message_id: u16,
        /// Whether the message may be relayed.
        valid: bool,
    },
}

/// Strategy to router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromStrategy {
    /// A new message arrived from a peer and awaits validation.
    Notification {
        /// Local id to quote in the validation.
        message_id: u16,
        /// Gossip type.
        data_type: u16,
        /// Application payload.
        payload: Vec<u8>,
    },
}

/// Outcome of one dissemination round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    /// Pushes queued to peers.
    pub pushes: usize,
    /// Messages dropped from the pending set after this round.
    pub retired: usize,
}

/// Pushes every pending message to the sampled `peers` it has not reached yet.
///
/// A message stops being offered once it has reached `degree` peers or has
/// been offered in `relay_rounds` rounds.
pub fn disseminate(
    pending: &mut PendingCache,
    peers: &[GossipConnection],
    degree: usize,
    relay_rounds: u32,
) -> RoundSummary {
    let mut summary = RoundSummary::default();

    for message in pending.iter_mut() {
        message.rounds += 1;
        for peer in peers {
            if message.sent_to.len() >= degree {
                break;
            }
            if !message.should_send_to(peer.id()) {
                continue;
            }
            match peer.send(PeerMessage::Push(message.to_push())) {
                Ok(()) => {
                    message.sent_to.insert(peer.id().clone());
                    summary.pushes += 1;
                }
                Err(e) => debug!(peer = %peer.id(), error = %e, "Push not queued"),
            }
        }
    }

    let before = pending.len();
    pending.retain(|m| m.sent_to.len() < degree && m.rounds < relay_rounds);
    summary.retired = before - pending.len();
    summary
}

/// Handle to a running strategy task.
pub struct GossipStrategy {
    connections: Arc<ConnectionManager>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl GossipStrategy {
    /// Starts the strategy loop.
    ///
    /// `events` must be the receiver paired with `transport`. Links the
    /// transport opened before this call are picked up from the channel.
    #[must_use]
    pub fn spawn(
        config: StrategyConfig,
        transport: Box<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        commands: mpsc::Receiver<ToStrategy>,
        notifications: mpsc::Sender<FromStrategy>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new());
        let cancel = CancellationToken::new();

        let state = StrategyLoop {
            admission: Admission::from_config(&config),
            pending: PendingCache::new(config.cache_size),
            seen: SeenCache::new(config.seen_cache_size),
            awaiting: NotificationTable::new(config.seen_cache_size),
            connections: Arc::clone(&connections),
            notifications,
            solving: JoinSet::new(),
            solves: HashMap::new(),
            next_solve: 0,
            cancel: cancel.clone(),
            config,
        };
        let handle = tokio::spawn(state.run(transport, events, commands));

        Self {
            connections,
            cancel,
            handle,
        }
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn connections(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.connections)
    }

    /// Stops the loop, cancels in-flight proofs, closes the transport and
    /// waits for all of it to finish.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Strategy task ended abnormally");
        }
    }
}

/// Timers never tick faster than this.
const MIN_PERIOD: Duration = Duration::from_millis(1);

type SolveOutcome = (ConnectionId, u64, Option<CookieProof>);

struct StrategyLoop {
    config: StrategyConfig,
    admission: Admission,
    connections: Arc<ConnectionManager>,
    pending: PendingCache,
    seen: SeenCache,
    awaiting: NotificationTable,
    notifications: mpsc::Sender<FromStrategy>,
    solving: JoinSet<SolveOutcome>,
    solves: HashMap<ConnectionId, (u64, CancellationToken)>,
    next_solve: u64,
    cancel: CancellationToken,
}

impl StrategyLoop {
    async fn run(
        mut self,
        transport: Box<dyn Transport>,
        mut events: mpsc::Receiver<TransportEvent>,
        mut commands: mpsc::Receiver<ToStrategy>,
    ) {
        let start = Instant::now();
        let round_period = self.config.gossip_interval.max(MIN_PERIOD);
        let mut gossip_tick = interval_at(start + round_period, round_period);
        gossip_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let maintenance_period = self.config.challenge_interval.max(MIN_PERIOD);
        let mut maintenance_tick = interval_at(start + maintenance_period, maintenance_period);
        maintenance_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let cancel = self.cancel.clone();
        let mut commands_open = true;

        info!(
            addr = %transport.local_addr(),
            degree = self.config.degree,
            difficulty = self.config.difficulty,
            "Gossip strategy started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = gossip_tick.tick() => self.gossip_round(),
                _ = maintenance_tick.tick() => self.maintain(),
                event = events.recv() => match event {
                    Some(event) => self.on_transport_event(event),
                    None => {
                        warn!("Transport event channel closed");
                        break;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("Router channel closed");
                        commands_open = false;
                    }
                },
                Some(done) = self.solving.join_next(), if !self.solving.is_empty() => {
                    self.on_solved(done);
                }
            }
        }

        // Child tokens of `cancel` stop every search.
        self.cancel.cancel();
        while self.solving.join_next().await.is_some() {}
        transport.close().await;
        info!("Gossip strategy stopped");
    }

    // ========== Transport Events ==========

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected {
                id,
                direction,
                sender,
            } => {
                let connection = GossipConnection::new(sender, direction);
                self.connections.add_to_be_proved(connection.clone());
                if direction == Direction::Inbound {
                    debug!(peer = %id, "Challenging new peer");
                    self.challenge(&connection);
                } else {
                    debug!(peer = %id, "Awaiting challenge from dialed peer");
                }
            }
            TransportEvent::Message { from, message } => match message {
                PeerMessage::Challenge { cookie } => self.on_challenge(from, cookie),
                PeerMessage::Proof { cookie, nonce } => {
                    self.on_proof(&from, &CookieProof::new(cookie, nonce));
                }
                PeerMessage::Push(push) => self.on_push(from, push),
            },
            TransportEvent::Disconnected { id } => {
                self.cancel_solve(&id);
                if self.connections.remove(&id).is_ok() {
                    info!(peer = %id, "Peer disconnected");
                }
            }
        }
    }

    fn challenge(&self, connection: &GossipConnection) {
        let sent = self
            .admission
            .issue(connection.id())
            .and_then(|cookie| connection.send(PeerMessage::Challenge { cookie }));
        if let Err(e) = sent {
            warn!(peer = %connection.id(), error = %e, "Failed to send challenge");
        }
    }

    fn on_challenge(&mut self, from: ConnectionId, cookie: Vec<u8>) {
        let Some((state, connection)) = self.connections.find(&from) else {
            debug!(peer = %from, "Challenge from unknown link");
            return;
        };
        // Only the dialing side proves work; the acceptor is the verifier.
        if connection.direction() == Direction::Inbound {
            warn!(peer = %from, ?state, "Challenge on accepted link, dropping peer");
            self.drop_connection(&from);
            return;
        }
        if let Err(e) = check_cookie_len(&cookie) {
            warn!(peer = %from, error = %e, "Rejecting challenge");
            self.drop_connection(&from);
            return;
        }
        if state == ConnectionState::ToBeProved {
            if let Err(e) = self.connections.mark_in_progress(&from) {
                debug!(peer = %from, error = %e, "Link vanished before solving");
                return;
            }
        }
        debug!(peer = %from, ?state, "Solving challenge");
        self.start_solve(from, cookie);
    }

    fn start_solve(&mut self, id: ConnectionId, cookie: Vec<u8>) {
        self.cancel_solve(&id);

        let generation = self.next_solve;
        self.next_solve = self.next_solve.wrapping_add(1);
        let token = self.cancel.child_token();
        self.solves.insert(id.clone(), (generation, token.clone()));

        let solver = self.admission.solver();
        self.solving.spawn(async move {
            let proof = solver.solve(cookie, token).await;
            (id, generation, proof)
        });
    }

    fn cancel_solve(&mut self, id: &ConnectionId) {
        if let Some((_, token)) = self.solves.remove(id) {
            token.cancel();
        }
    }

    fn on_solved(&mut self, done: Result<SolveOutcome, JoinError>) {
        let (id, generation, proof) = match done {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Proof-of-work task failed");
                return;
            }
        };

        // A newer challenge on the same link supersedes this search.
        if self.solves.get(&id).map(|(current, _)| *current) != Some(generation) {
            return;
        }
        self.solves.remove(&id);

        let Some(proof) = proof else {
            debug!(peer = %id, "Proof-of-work search gave up");
            return;
        };
        let Some((state, connection)) = self.connections.find(&id) else {
            return;
        };

        let (cookie, nonce) = proof.into_parts();
        if let Err(e) = connection.send(PeerMessage::Proof { cookie, nonce }) {
            warn!(peer = %id, error = %e, "Failed to send proof");
            self.drop_connection(&id);
            return;
        }
        if self.connections.make_valid(&id, Utc::now()).is_ok() && !state.is_valid() {
            info!(peer = %id, "Admitted by peer");
        }
    }

    fn on_proof(&mut self, from: &ConnectionId, proof: &CookieProof) {
        let Some(state) = self.connections.state_of(from) else {
            debug!(peer = %from, "Proof from unknown link");
            return;
        };

        match self.admission.verify(from, proof) {
            Ok(()) => {
                if self.connections.make_valid(from, Utc::now()).is_ok() && !state.is_valid() {
                    info!(peer = %from, "Peer admitted");
                }
            }
            Err(P2pError::InsufficientWork) => {
                warn!(peer = %from, ?state, "Proof with insufficient work");
            }
            Err(e) => {
                warn!(peer = %from, error = %e, "Rejecting peer");
                self.drop_connection(from);
            }
        }
    }

    fn on_push(&mut self, from: ConnectionId, push: GossipPush) {
        if self.connections.state_of(&from) != Some(ConnectionState::Valid) {
            debug!(peer = %from, "Ignoring push from unadmitted peer");
            return;
        }
        if !self.seen.insert(push.message_id) {
            return;
        }

        let data_type = push.data_type;
        let payload = push.payload.clone();
        let message_id = push.message_id;
        let local_id = self.awaiting.insert(PendingMessage::relayed(push, from));

        let notification = FromStrategy::Notification {
            message_id: local_id,
            data_type,
            payload,
        };
        if let Err(e) = self.notifications.try_send(notification) {
            warn!(message_id = %message_id, error = %e, "Dropping notification");
            self.awaiting.take(local_id);
        }
    }

    fn drop_connection(&mut self, id: &ConnectionId) {
        self.cancel_solve(id);
        if let Ok(connection) = self.connections.remove(id) {
            connection.close();
        }
    }

    // ========== Router Commands ==========

    fn on_command(&mut self, command: ToStrategy) {
        match command {
            ToStrategy::Announce {
                ttl,
                data_type,
                payload,
            } => {
                if ttl == 0 {
                    debug!(data_type, "Announce with zero ttl is not disseminated");
                    return;
                }
                let message = PendingMessage::local(ttl, data_type, payload);
                self.seen.insert(message.message_id);
                debug!(message_id = %message.message_id, ttl, data_type, "Queued announce");
                self.enqueue(message);
            }
            ToStrategy::Validation { message_id, valid } => {
                let Some(message) = self.awaiting.take(message_id) else {
                    debug!(message_id, "Validation for unknown notification");
                    return;
                };
                if valid {
                    self.enqueue(message);
                } else {
                    self.pending.remove(&message.message_id);
                    debug!(message_id = %message.message_id, "Message rejected locally");
                }
            }
        }
    }

    fn enqueue(&mut self, message: PendingMessage) {
        if let Some(evicted) = self.pending.insert(message) {
            debug!(message_id = %evicted.message_id, "Pending cache full, evicted oldest");
        }
    }

    // ========== Timers ==========

    fn gossip_round(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut peers = Vec::new();
        self.connections
            .action_on_permuted_valid(|c| peers.push(c.clone()), self.config.degree);

        let summary = disseminate(
            &mut self.pending,
            &peers,
            self.config.degree,
            self.config.relay_rounds,
        );
        debug!(
            peers = peers.len(),
            pushes = summary.pushes,
            retired = summary.retired,
            "Gossip round"
        );
    }

    fn maintain(&mut self) {
        let now = Utc::now();
        let validity = to_chrono(self.config.validity_timeout);
        let handshake = to_chrono(self.config.handshake_timeout);

        for connection in self.connections.cull_connections(|c| c.idle_for(now) > validity) {
            info!(peer = %connection.id(), "Culling idle peer");
            self.cancel_solve(connection.id());
            connection.close();
        }
        for connection in self
            .connections
            .cull_unproven(|c| now - c.created_at() > handshake)
        {
            info!(peer = %connection.id(), "Handshake timed out");
            self.cancel_solve(connection.id());
            connection.close();
        }

        self.connections.action_on_valid(
            |c| {
                if c.direction() == Direction::Inbound {
                    self.challenge(c);
                }
            },
            usize::MAX,
        );
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PeerSender;
    use crate::handshake::ProofSolver;
    use crate::message::MessageId;
    use crate::transport::BoxFuture;
    use rumor_admission::{ProofOfWork, digest_of, leading_zero_bits};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};

    const DIFFICULTY: u32 = 6;
    const WAIT: Duration = Duration::from_secs(5);

    struct FakeTransport {
        closed: Arc<AtomicBool>,
    }

    impl Transport for FakeTransport {
        fn local_addr(&self) -> SocketAddr {
            "127.0.0.1:0".parse().expect("valid addr")
        }

        fn dial<'a>(&'a self, addr: SocketAddr) -> BoxFuture<'a, crate::P2pResult<ConnectionId>> {
            Box::pin(async move { Err(P2pError::Connection(format!("cannot dial {addr}"))) })
        }

        fn close<'a>(&'a self) -> BoxFuture<'a, ()> {
            Box::pin(async move { self.closed.store(true, Ordering::SeqCst) })
        }
    }

    struct Harness {
        strategy: GossipStrategy,
        events: mpsc::Sender<TransportEvent>,
        commands: mpsc::Sender<ToStrategy>,
        notifications: mpsc::Receiver<FromStrategy>,
        closed: Arc<AtomicBool>,
    }

    impl Harness {
        fn start() -> Self {
            Self::with_config(
                StrategyConfig::local_testing()
                    .with_difficulty(DIFFICULTY)
                    .with_gossip_interval(Duration::from_millis(20)),
            )
        }

        fn with_config(config: StrategyConfig) -> Self {
            let closed = Arc::new(AtomicBool::new(false));
            let (events, events_rx) = mpsc::channel(64);
            let (commands, commands_rx) = mpsc::channel(64);
            let (notifications_tx, notifications) = mpsc::channel(64);
            let strategy = GossipStrategy::spawn(
                config,
                Box::new(FakeTransport {
                    closed: Arc::clone(&closed),
                }),
                events_rx,
                commands_rx,
                notifications_tx,
            );
            Self {
                strategy,
                events,
                commands,
                notifications,
                closed,
            }
        }

        async fn connect(&self, id: &str, direction: Direction) -> mpsc::Receiver<PeerMessage> {
            let (sender, rx) = PeerSender::channel(id, 64);
            self.events
                .send(TransportEvent::Connected {
                    id: ConnectionId::from(id),
                    direction,
                    sender,
                })
                .await
                .expect("strategy running");
            rx
        }

        async fn deliver(&self, from: &str, message: PeerMessage) {
            self.events
                .send(TransportEvent::Message {
                    from: ConnectionId::from(from),
                    message,
                })
                .await
                .expect("strategy running");
        }

        fn state_of(&self, id: &str) -> Option<ConnectionState> {
            self.strategy.connections().state_of(&ConnectionId::from(id))
        }

        /// Connects an inbound peer and completes its handshake.
        async fn admit(&self, id: &str) -> mpsc::Receiver<PeerMessage> {
            let mut rx = self.connect(id, Direction::Inbound).await;
            let cookie = expect_challenge(&mut rx).await;
            let proof = ProofSolver::new(ProofOfWork::new(2), DIFFICULTY)
                .solve(cookie, CancellationToken::new())
                .await
                .expect("solvable");
            let (cookie, nonce) = proof.into_parts();
            self.deliver(id, PeerMessage::Proof { cookie, nonce }).await;
            self.wait_for_state(id, Some(ConnectionState::Valid)).await;
            rx
        }

        async fn wait_for_state(&self, id: &str, state: Option<ConnectionState>) {
            let deadline = Instant::now() + WAIT;
            while self.state_of(id) != state {
                assert!(Instant::now() < deadline, "{id} never reached {state:?}");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> T {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("message in time")
            .expect("channel open")
    }

    async fn expect_challenge(rx: &mut mpsc::Receiver<PeerMessage>) -> Vec<u8> {
        match recv(rx).await {
            PeerMessage::Challenge { cookie } => cookie,
            other => panic!("expected Challenge, got {other:?}"),
        }
    }

    async fn expect_push(rx: &mut mpsc::Receiver<PeerMessage>) -> GossipPush {
        match recv(rx).await {
            PeerMessage::Push(push) => push,
            other => panic!("expected Push, got {other:?}"),
        }
    }

    async fn assert_silent(rx: &mut mpsc::Receiver<PeerMessage>) {
        let waited = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(waited.is_err(), "unexpected message: {waited:?}");
    }

    /// Like [`assert_silent`], but also accepts a link the strategy closed.
    async fn assert_nothing_sent(rx: &mut mpsc::Receiver<PeerMessage>) {
        let next = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(!matches!(next, Ok(Some(_))), "unexpected message: {next:?}");
    }

    fn valid_peer(id: &str) -> (GossipConnection, mpsc::Receiver<PeerMessage>) {
        let (sender, rx) = PeerSender::channel(id, 16);
        (GossipConnection::new(sender, Direction::Outbound), rx)
    }

    // ========== Dissemination Round Tests ==========

    #[test]
    fn round_sends_spent_hop_and_skips_origin() {
        let mut pending = PendingCache::new(4);
        let push = GossipPush {
            message_id: MessageId::new(),
            ttl: 3,
            data_type: 1,
            payload: b"x".to_vec(),
        };
        pending.insert(PendingMessage::relayed(push, ConnectionId::from("origin")));

        let (origin, mut origin_rx) = valid_peer("origin");
        let (other, mut other_rx) = valid_peer("other");
        let summary = disseminate(&mut pending, &[origin, other], 30, 3);

        assert_eq!(summary.pushes, 1);
        assert!(origin_rx.try_recv().is_err());
        match other_rx.try_recv() {
            Ok(PeerMessage::Push(push)) => assert_eq!(push.ttl, 2),
            other => panic!("expected push, got {other:?}"),
        }
    }

    #[test]
    fn round_retires_after_degree_peers() {
        let mut pending = PendingCache::new(4);
        pending.insert(PendingMessage::local(2, 1, vec![]));
        let peers: Vec<_> = (0..3).map(|i| valid_peer(&format!("p{i}"))).collect();
        let conns: Vec<_> = peers.iter().map(|(c, _)| c.clone()).collect();

        let summary = disseminate(&mut pending, &conns, 2, 10);

        assert_eq!(summary.pushes, 2);
        assert_eq!(summary.retired, 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn round_retires_after_relay_rounds() {
        let mut pending = PendingCache::new(4);
        pending.insert(PendingMessage::local(2, 1, vec![]));
        let (peer, _rx) = valid_peer("only");

        let first = disseminate(&mut pending, &[peer.clone()], 30, 2);
        assert_eq!((first.pushes, first.retired), (1, 0));

        let second = disseminate(&mut pending, &[peer], 30, 2);
        assert_eq!((second.pushes, second.retired), (0, 1));
    }

    #[test]
    fn round_never_resends_to_same_peer() {
        let mut pending = PendingCache::new(4);
        pending.insert(PendingMessage::local(2, 1, vec![]));
        let (peer, mut rx) = valid_peer("p");

        disseminate(&mut pending, &[peer.clone()], 30, 5);
        disseminate(&mut pending, &[peer], 30, 5);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    // ========== Handshake Tests ==========

    #[tokio::test]
    async fn inbound_peer_is_challenged_and_admitted() {
        let harness = Harness::start();
        let _rx = harness.admit("10.0.0.2:5000").await;
        assert_eq!(harness.strategy.connections().counts().valid, 1);
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn insufficient_work_stays_to_be_proved() {
        let harness = Harness::start();
        let id = "10.0.0.3:5000";
        let mut rx = harness.connect(id, Direction::Inbound).await;
        let cookie = expect_challenge(&mut rx).await;

        let mut proof = CookieProof::new(cookie, 0);
        while leading_zero_bits(&digest_of(&proof)) >= DIFFICULTY {
            rumor_admission::PowCarrier::increment_nonce(&mut proof);
        }
        let (cookie, nonce) = proof.into_parts();
        harness.deliver(id, PeerMessage::Proof { cookie, nonce }).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(harness.state_of(id), Some(ConnectionState::ToBeProved));
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn tampered_cookie_drops_connection() {
        let harness = Harness::start();
        let id = "10.0.0.4:5000";
        let mut rx = harness.connect(id, Direction::Inbound).await;
        let mut cookie = expect_challenge(&mut rx).await;
        cookie[20] ^= 0xff;

        harness
            .deliver(id, PeerMessage::Proof { cookie, nonce: 0 })
            .await;
        harness.wait_for_state(id, None).await;
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn cookie_replayed_on_other_link_is_rejected() {
        let harness = Harness::start();
        let mut rx = harness.connect("10.0.0.5:5000", Direction::Inbound).await;
        let _other = harness.connect("10.0.0.6:5000", Direction::Inbound).await;
        let cookie = expect_challenge(&mut rx).await;

        let proof = ProofSolver::new(ProofOfWork::new(2), DIFFICULTY)
            .solve(cookie, CancellationToken::new())
            .await
            .expect("solvable");
        let (cookie, nonce) = proof.into_parts();
        harness
            .deliver("10.0.0.6:5000", PeerMessage::Proof { cookie, nonce })
            .await;

        harness.wait_for_state("10.0.0.6:5000", None).await;
        assert_eq!(
            harness.state_of("10.0.0.5:5000"),
            Some(ConnectionState::ToBeProved)
        );
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn outbound_peer_answers_challenge() {
        let harness = Harness::start();
        let id = "10.0.0.7:6001";
        let mut rx = harness.connect(id, Direction::Outbound).await;
        assert_silent(&mut rx).await;
        assert_eq!(harness.state_of(id), Some(ConnectionState::ToBeProved));

        let verifier = Admission::from_config(&StrategyConfig::default().with_difficulty(DIFFICULTY));
        let cookie = verifier.issue(&ConnectionId::from(id)).expect("issue");
        harness
            .deliver(id, PeerMessage::Challenge { cookie })
            .await;

        match recv(&mut rx).await {
            PeerMessage::Proof { cookie, nonce } => {
                verifier
                    .verify(&ConnectionId::from(id), &CookieProof::new(cookie, nonce))
                    .expect("proof verifies");
            }
            other => panic!("expected Proof, got {other:?}"),
        }
        harness
            .wait_for_state(id, Some(ConnectionState::Valid))
            .await;
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn challenge_on_accepted_link_drops_peer() {
        let harness = Harness::start();
        let id = "10.0.0.9:5000";
        let mut rx = harness.connect(id, Direction::Inbound).await;
        expect_challenge(&mut rx).await;

        harness
            .deliver(id, PeerMessage::Challenge { cookie: vec![0x41; 40] })
            .await;

        harness.wait_for_state(id, None).await;
        assert_nothing_sent(&mut rx).await;
        assert_eq!(harness.strategy.connections().counts().valid, 0);
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn challenge_on_admitted_accepted_link_drops_peer() {
        let harness = Harness::start();
        let id = "10.0.0.10:5000";
        let _rx = harness.admit(id).await;

        harness
            .deliver(id, PeerMessage::Challenge { cookie: vec![0x41; 40] })
            .await;
        harness.wait_for_state(id, None).await;
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn oversized_challenge_drops_peer() {
        let harness = Harness::start();
        let id = "10.0.0.11:6001";
        let mut rx = harness.connect(id, Direction::Outbound).await;

        harness
            .deliver(
                id,
                PeerMessage::Challenge {
                    cookie: vec![0; crate::handshake::MAX_COOKIE_LEN + 1],
                },
            )
            .await;

        harness.wait_for_state(id, None).await;
        assert_nothing_sent(&mut rx).await;
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn disconnect_forgets_connection() {
        let harness = Harness::start();
        let _rx = harness.admit("10.0.0.8:5000").await;
        harness
            .events
            .send(TransportEvent::Disconnected {
                id: ConnectionId::from("10.0.0.8:5000"),
            })
            .await
            .expect("running");
        harness.wait_for_state("10.0.0.8:5000", None).await;
        harness.strategy.close().await;
    }

    // ========== Message Flow Tests ==========

    #[tokio::test]
    async fn announce_is_pushed_with_one_hop_spent() {
        let harness = Harness::start();
        let mut rx = harness.admit("10.0.1.1:5000").await;

        harness
            .commands
            .send(ToStrategy::Announce {
                ttl: 2,
                data_type: 7,
                payload: b"news".to_vec(),
            })
            .await
            .expect("running");

        let push = expect_push(&mut rx).await;
        assert_eq!(push.ttl, 1);
        assert_eq!(push.data_type, 7);
        assert_eq!(push.payload, b"news");
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn announce_with_zero_ttl_stays_local() {
        let harness = Harness::start();
        let mut rx = harness.admit("10.0.1.2:5000").await;

        harness
            .commands
            .send(ToStrategy::Announce {
                ttl: 0,
                data_type: 7,
                payload: vec![],
            })
            .await
            .expect("running");

        assert_silent(&mut rx).await;
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn validated_push_is_relayed_except_to_origin() {
        let mut harness = Harness::start();
        let mut origin = harness.admit("10.0.2.1:5000").await;
        let mut other = harness.admit("10.0.2.2:5000").await;

        let push = GossipPush {
            message_id: MessageId::new(),
            ttl: 2,
            data_type: 3,
            payload: b"relay me".to_vec(),
        };
        harness
            .deliver("10.0.2.1:5000", PeerMessage::Push(push.clone()))
            .await;

        let FromStrategy::Notification {
            message_id,
            data_type,
            payload,
        } = recv(&mut harness.notifications).await;
        assert_eq!(data_type, 3);
        assert_eq!(payload, b"relay me");

        harness
            .commands
            .send(ToStrategy::Validation {
                message_id,
                valid: true,
            })
            .await
            .expect("running");

        let relayed = expect_push(&mut other).await;
        assert_eq!(relayed.message_id, push.message_id);
        assert_eq!(relayed.ttl, 1);
        assert_silent(&mut origin).await;
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn rejected_or_exhausted_push_is_not_relayed() {
        let mut harness = Harness::start();
        let _origin = harness.admit("10.0.3.1:5000").await;
        let mut other = harness.admit("10.0.3.2:5000").await;

        for (ttl, valid) in [(3, false), (0, true)] {
            harness
                .deliver(
                    "10.0.3.1:5000",
                    PeerMessage::push(MessageId::new(), ttl, 1, vec![]),
                )
                .await;
            let FromStrategy::Notification { message_id, .. } =
                recv(&mut harness.notifications).await;
            harness
                .commands
                .send(ToStrategy::Validation { message_id, valid })
                .await
                .expect("running");
        }

        assert_silent(&mut other).await;
        harness.strategy.close().await;
    }

    #[tokio::test]
    async fn duplicate_and_unadmitted_pushes_are_ignored() {
        let mut harness = Harness::start();
        let _valid = harness.admit("10.0.4.1:5000").await;
        let _pending = harness.connect("10.0.4.2:5000", Direction::Inbound).await;

        let push = PeerMessage::push(MessageId::new(), 2, 1, vec![]);
        harness.deliver("10.0.4.2:5000", push.clone()).await;
        harness.deliver("10.0.4.1:5000", push.clone()).await;
        harness.deliver("10.0.4.1:5000", push).await;

        recv(&mut harness.notifications).await;
        let extra =
            tokio::time::timeout(Duration::from_millis(150), harness.notifications.recv()).await;
        assert!(extra.is_err(), "duplicate notification: {extra:?}");
        harness.strategy.close().await;
    }

    // ========== Shutdown Tests ==========

    #[tokio::test]
    async fn close_cancels_proofs_and_closes_transport() {
        let harness = Harness::with_config(
            StrategyConfig::local_testing()
                .with_difficulty(250)
                .with_pow_workers(2),
        );
        let id = "10.0.5.1:6001";
        let _rx = harness.connect(id, Direction::Outbound).await;
        harness
            .deliver(id, PeerMessage::Challenge { cookie: vec![0; 64] })
            .await;
        harness
            .wait_for_state(id, Some(ConnectionState::InProgress))
            .await;

        let closed = Arc::clone(&harness.closed);
        tokio::time::timeout(WAIT, harness.strategy.close())
            .await
            .expect("close returns promptly");
        assert!(closed.load(Ordering::SeqCst));
    }
}
