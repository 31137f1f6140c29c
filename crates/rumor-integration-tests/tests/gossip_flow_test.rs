//! End-to-end dissemination over a line of three nodes.
//!
//! Topology: A - B - C. Every node has one module subscribed to the test
//! type that validates everything it receives. TTL bounds how far an
//! announcement travels:
//! - TTL 2 reaches B and C
//! - TTL 1 reaches B only
//! - TTL 0 reaches nobody

use rumor_integration_tests::{ModuleClient, Received, local_config, wait_until};
use rumor_node::GossipNode;
use std::time::Duration;

const DATA_TYPE: u16 = 7;
const SETTLE: Duration = Duration::from_secs(10);
const DELIVERY: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(600);

// ============================================================================
// Helper Functions
// ============================================================================

struct Line {
    nodes: [GossipNode; 3],
    modules: [ModuleClient; 3],
}

impl Line {
    async fn start() -> Self {
        let a = GossipNode::start(&local_config(vec![])).await.expect("start a");
        let b = GossipNode::start(&local_config(vec![a.p2p_addr()]))
            .await
            .expect("start b");
        let c = GossipNode::start(&local_config(vec![b.p2p_addr()]))
            .await
            .expect("start c");

        let admitted = wait_until(SETTLE, || {
            a.connections().counts().valid == 1
                && b.connections().counts().valid == 2
                && c.connections().counts().valid == 1
        })
        .await;
        assert!(admitted, "line did not finish admission");

        let mut modules = Vec::new();
        for node in [&a, &b, &c] {
            let mut module = ModuleClient::connect(node.api_addr()).await.expect("module");
            module.notify(DATA_TYPE).await.expect("notify");
            modules.push(module);
        }
        let subscribed = wait_until(SETTLE, || {
            [&a, &b, &c]
                .iter()
                .all(|n| n.registry().is_registered(DATA_TYPE))
        })
        .await;
        assert!(subscribed, "modules did not subscribe");

        let Ok(modules) = <[ModuleClient; 3]>::try_from(modules) else {
            panic!("three modules");
        };
        Self {
            nodes: [a, b, c],
            modules,
        }
    }

    /// Receives on module `idx` and validates what arrived.
    async fn receive(&mut self, idx: usize, within: Duration) -> Option<Received> {
        let module = &mut self.modules[idx];
        let received = module.next_notification(within).await?;
        module
            .validate(received.message_id, true)
            .await
            .expect("validate");
        Some(received)
    }

    async fn shutdown(self) {
        drop(self.modules);
        for node in self.nodes {
            node.shutdown().await;
        }
    }
}

// ============================================================================
// TTL Reach
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ttl_two_reaches_end_of_line() {
    let mut line = Line::start().await;
    line.modules[0]
        .announce(2, DATA_TYPE, b"far")
        .await
        .expect("announce");

    let at_b = line.receive(1, DELIVERY).await.expect("B receives");
    assert_eq!(at_b.data_type, DATA_TYPE);
    assert_eq!(at_b.payload, b"far");

    let at_c = line.receive(2, DELIVERY).await.expect("C receives");
    assert_eq!(at_c.payload, b"far");

    // Nothing echoes back to the origin.
    assert!(line.receive(0, QUIET).await.is_none());
    line.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ttl_one_stops_at_neighbor() {
    let mut line = Line::start().await;
    line.modules[0]
        .announce(1, DATA_TYPE, b"near")
        .await
        .expect("announce");

    let at_b = line.receive(1, DELIVERY).await.expect("B receives");
    assert_eq!(at_b.payload, b"near");
    assert!(line.receive(2, QUIET).await.is_none(), "C must not receive");
    line.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ttl_zero_is_not_disseminated() {
    let mut line = Line::start().await;
    line.modules[0]
        .announce(0, DATA_TYPE, b"here")
        .await
        .expect("announce");

    assert!(line.receive(1, QUIET).await.is_none(), "B must not receive");
    assert!(line.receive(2, QUIET).await.is_none(), "C must not receive");
    line.shutdown().await;
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejected_message_is_not_relayed() {
    let mut line = Line::start().await;
    line.modules[0]
        .announce(2, DATA_TYPE, b"bad")
        .await
        .expect("announce");

    let at_b = line.modules[1]
        .next_notification(DELIVERY)
        .await
        .expect("B receives");
    line.modules[1]
        .validate(at_b.message_id, false)
        .await
        .expect("reject");

    assert!(line.receive(2, QUIET).await.is_none(), "C must not receive");
    line.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsubscribed_type_is_not_announced() {
    let mut line = Line::start().await;
    line.modules[0]
        .announce(2, DATA_TYPE + 1, b"nobody")
        .await
        .expect("announce");

    assert!(line.receive(1, QUIET).await.is_none());
    line.shutdown().await;
}
