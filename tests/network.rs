use std::sync::Arc;

use peer_ledger::blockchain::Blockchain;
use peer_ledger::config::NodeConfig;
use peer_ledger::network::LocalNetwork;
use peer_ledger::transaction::NewTransaction;
use peer_ledger::{LedgerError, Node};
use serde_json::json;

const TIMEOUT: u32 = 3;

fn spawn(net: &Arc<LocalNetwork>, address: &str) -> Arc<Node> {
    let config = NodeConfig {
        node_address: address.into(),
        difficulty: 1,
        peer_timeout: TIMEOUT,
        ..NodeConfig::default()
    };
    let node = Arc::new(Node::new(&config, net.clone()).unwrap());
    net.attach(&node);
    node
}

fn tx(author: &str, content: &str) -> NewTransaction {
    serde_json::from_value(json!({"author": author, "content": content})).unwrap()
}

async fn mine_n(node: &Node, n: usize, tag: &str) {
    for i in 0..n {
        node.submit_transaction(tx(tag, &format!("{tag}-{i}")))
            .await
            .unwrap();
        node.mine().await.unwrap();
    }
}

#[tokio::test]
async fn registration_syncs_chain_and_peers() {
    let net = LocalNetwork::new();
    let a = spawn(&net, "http://a");
    mine_n(&a, 2, "a").await;

    let b = spawn(&net, "http://b");
    b.register_with("http://a/").await.unwrap();

    assert_eq!(b.chain_snapshot(), a.chain_snapshot());
    assert_eq!(b.peers().get("http://a"), Some(&a.public_key_pem().to_string()));
    assert_eq!(a.peers().get("http://b"), Some(&b.public_key_pem().to_string()));
}

#[tokio::test]
async fn newcomer_announced_to_existing_peers() {
    let net = LocalNetwork::new();
    let a = spawn(&net, "http://a");
    let b = spawn(&net, "http://b");
    let c = spawn(&net, "http://c");

    b.register_with("http://a").await.unwrap();
    c.register_with("http://a").await.unwrap();

    // b heard about c through a's signed peer update
    assert!(b.peers().contains_key("http://c"));
    // c learned b from a's reply
    assert!(c.peers().contains_key("http://b"));
    // nobody lists itself
    assert!(!c.peers().contains_key("http://c"));
}

#[tokio::test]
async fn registering_with_missing_node_fails() {
    let net = LocalNetwork::new();
    let a = spawn(&net, "http://a");
    let err = a.register_with("http://ghost").await.unwrap_err();
    assert!(matches!(err, LedgerError::PeerUnreachable { .. }));
    assert!(a.peers().is_empty());
}

#[tokio::test]
async fn transaction_and_block_gossip() {
    let net = LocalNetwork::new();
    let a = spawn(&net, "http://a");
    let b = spawn(&net, "http://b");
    b.register_with("http://a").await.unwrap();

    a.submit_transaction(tx("alice", "hello")).await.unwrap();
    assert_eq!(b.pending().len(), 1);
    assert_eq!(b.pending()[0].content, "hello");

    let id = a.mine().await.unwrap();

    assert_eq!(id, 1);
    let a_chain = a.chain_snapshot();
    assert_eq!(b.chain_snapshot(), a_chain);
    assert!(b.pending().is_empty());
    assert!(Blockchain::is_valid_chain(&a_chain.chain, 1));
}

#[tokio::test]
async fn unreachable_peer_does_not_block_local_work() {
    let net = LocalNetwork::new();
    let a = spawn(&net, "http://a");
    let b = spawn(&net, "http://b");
    b.register_with("http://a").await.unwrap();

    net.set_online("http://b", false);
    a.submit_transaction(tx("alice", "solo")).await.unwrap();
    assert_eq!(a.mine().await.unwrap(), 1);
    assert_eq!(a.chain_snapshot().length, 2);
    assert_eq!(b.chain_snapshot().length, 1);
}

#[tokio::test]
async fn consensus_adopts_longer_peer_chain() {
    let net = LocalNetwork::new();
    let a = spawn(&net, "http://a");
    let b = spawn(&net, "http://b");
    b.register_with("http://a").await.unwrap();

    // partition: each side mines without hearing from the other
    net.set_online("http://a", false);
    mine_n(&b, 4, "b").await;
    net.set_online("http://a", true);
    net.set_online("http://b", false);
    mine_n(&a, 2, "a").await;
    net.set_online("http://b", true);

    assert_eq!(a.chain_snapshot().length, 3);
    assert_eq!(b.chain_snapshot().length, 5);

    assert!(a.consensus().await);
    assert_eq!(a.chain_snapshot(), b.chain_snapshot());

    // running it again changes nothing
    assert!(!a.consensus().await);
    assert!(!b.consensus().await);
}

#[tokio::test]
async fn fresh_block_is_not_announced_when_superseded() {
    let net = LocalNetwork::new();
    let a = spawn(&net, "http://a");
    let b = spawn(&net, "http://b");
    b.register_with("http://a").await.unwrap();

    net.set_online("http://a", false);
    mine_n(&b, 3, "b").await;
    net.set_online("http://a", true);

    // a seals one block, then consensus swaps in b's longer chain
    a.submit_transaction(tx("alice", "late")).await.unwrap();
    a.mine().await.unwrap();

    assert_eq!(a.chain_snapshot(), b.chain_snapshot());
    assert_eq!(b.chain_snapshot().length, 4);
}

#[tokio::test]
async fn silent_peer_evicted_and_keep_alive_refreshes() {
    let net = LocalNetwork::new();
    let a = spawn(&net, "http://a");
    let b = spawn(&net, "http://b");
    b.register_with("http://a").await.unwrap();

    a.send_keep_alive().await.unwrap();
    a.send_keep_alive().await.unwrap();
    assert_eq!(a.peer_ticks_left("http://b"), Some(1));

    b.send_keep_alive().await.unwrap();
    assert_eq!(a.peer_ticks_left("http://b"), Some(TIMEOUT));

    net.set_online("http://b", false);
    for _ in 0..TIMEOUT - 1 {
        assert!(a.send_keep_alive().await.unwrap().is_empty());
    }
    assert_eq!(a.send_keep_alive().await.unwrap(), vec!["http://b".to_string()]);
    assert!(a.peers().is_empty());
}
