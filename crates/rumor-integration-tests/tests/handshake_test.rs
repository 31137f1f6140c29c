//! Admission handshake seen from a hand-driven peer.
//!
//! The test peer speaks the peer wire protocol directly so it can send
//! proofs a well-behaved node never would.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rumor_admission::{
    ConnectionId, ProofOfWork, check_proof_of_work, difficulty, digest_of, leading_zero_bits,
};
use rumor_integration_tests::{ModuleClient, local_config, wait_until};
use rumor_node::GossipNode;
use rumor_p2p::{ConnectionState, CookieProof, MessageId, PeerMessage, ProofSolver, frame_codec};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

const DIFFICULTY: u32 = 12;
const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Helper Functions
// ============================================================================

struct RawPeer {
    id: ConnectionId,
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl RawPeer {
    async fn connect(node: &GossipNode) -> Self {
        let stream = TcpStream::connect(node.p2p_addr()).await.expect("connect");
        let id = ConnectionId::from(stream.local_addr().expect("local addr"));
        Self {
            id,
            framed: Framed::new(stream, frame_codec()),
        }
    }

    async fn send(&mut self, message: &PeerMessage) {
        let bytes = message.to_bytes().expect("encode");
        self.framed.send(Bytes::from(bytes)).await.expect("send");
    }

    /// Next message, or `None` if the node closed the link.
    async fn recv(&mut self) -> Option<PeerMessage> {
        let frame = tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("node answered in time")?
            .ok()?;
        Some(PeerMessage::from_bytes(&frame).expect("decode"))
    }

    async fn challenge(&mut self) -> Vec<u8> {
        match self.recv().await {
            Some(PeerMessage::Challenge { cookie }) => cookie,
            other => panic!("expected Challenge, got {other:?}"),
        }
    }
}

async fn start_node() -> GossipNode {
    let mut config = local_config(vec![]);
    config.gossip.difficulty = DIFFICULTY;
    GossipNode::start(&config).await.expect("start")
}

/// A nonce whose digest misses the difficulty.
fn failing_nonce(cookie: &[u8]) -> u64 {
    (0..)
        .find(|&nonce| {
            let digest = digest_of(&CookieProof::new(cookie.to_vec(), nonce));
            leading_zero_bits(&digest) < DIFFICULTY
        })
        .expect("some nonce fails")
}

async fn solve(cookie: Vec<u8>) -> CookieProof {
    ProofSolver::new(ProofOfWork::new(2), DIFFICULTY)
        .solve(cookie, CancellationToken::new())
        .await
        .expect("solved")
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn solved_challenge_admits_peer() {
    let node = start_node().await;
    let mut peer = RawPeer::connect(&node).await;

    let cookie = peer.challenge().await;
    let proof = solve(cookie).await;
    assert!(check_proof_of_work(&proof, difficulty(DIFFICULTY)));
    let (cookie, nonce) = proof.into_parts();
    peer.send(&PeerMessage::Proof { cookie, nonce }).await;

    let connections = node.connections();
    assert!(
        wait_until(WAIT, || connections.state_of(&peer.id) == Some(ConnectionState::Valid)).await,
        "peer was not admitted"
    );
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn insufficient_work_leaves_peer_unproven() {
    let node = start_node().await;
    let mut peer = RawPeer::connect(&node).await;

    let cookie = peer.challenge().await;
    let nonce = failing_nonce(&cookie);
    peer.send(&PeerMessage::Proof { cookie, nonce }).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        node.connections().state_of(&peer.id),
        Some(ConnectionState::ToBeProved)
    );
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tampered_cookie_drops_connection() {
    let node = start_node().await;
    let mut peer = RawPeer::connect(&node).await;

    let mut cookie = peer.challenge().await;
    let last = cookie.len() - 1;
    cookie[last] ^= 0x01;
    peer.send(&PeerMessage::Proof { cookie, nonce: 0 }).await;

    assert!(peer.recv().await.is_none(), "node should close the link");
    let connections = node.connections();
    assert!(wait_until(WAIT, || connections.state_of(&peer.id).is_none()).await);
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cookie_from_another_link_is_rejected() {
    let node = start_node().await;
    let mut first = RawPeer::connect(&node).await;
    let mut second = RawPeer::connect(&node).await;

    let cookie = first.challenge().await;
    let _ = second.challenge().await;
    let (cookie, nonce) = solve(cookie).await.into_parts();
    second.send(&PeerMessage::Proof { cookie, nonce }).await;

    assert!(second.recv().await.is_none(), "node should close the link");
    assert_eq!(
        node.connections().state_of(&first.id),
        Some(ConnectionState::ToBeProved)
    );
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counter_challenge_is_not_answered() {
    let node = start_node().await;
    let mut peer = RawPeer::connect(&node).await;

    let _ = peer.challenge().await;
    peer.send(&PeerMessage::Challenge {
        cookie: vec![0x41; 40],
    })
    .await;

    assert!(peer.recv().await.is_none(), "node should close the link");
    let connections = node.connections();
    assert!(wait_until(WAIT, || connections.state_of(&peer.id).is_none()).await);
    assert_eq!(connections.counts().valid, 0);
    node.shutdown().await;
}

// ============================================================================
// Unadmitted Traffic
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pushes_before_admission_are_ignored() {
    let node = start_node().await;
    let mut module = ModuleClient::connect(node.api_addr()).await.expect("module");
    module.notify(3).await.expect("notify");
    let registry = node.registry();
    assert!(wait_until(WAIT, || registry.is_registered(3)).await);

    let mut peer = RawPeer::connect(&node).await;
    let _ = peer.challenge().await;
    peer.send(&PeerMessage::push(MessageId::new(), 2, 3, b"early".to_vec()))
        .await;

    assert!(
        module
            .next_notification(Duration::from_millis(500))
            .await
            .is_none()
    );
    node.shutdown().await;
}
