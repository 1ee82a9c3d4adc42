//! End-to-end node scenarios: bootstrap, transfers, conflicting spends,
//! block propagation between two live nodes, and shutdown liveness.

use std::path::Path;
use std::time::{Duration, Instant};

use tempdir::TempDir;
use tokio::time::sleep;

use ember_chain::crypto::KeyPair;
use ember_chain::parameters::NetworkParameters;
use ember_state::config::Backend;
use ember_state::HashOrHeight;
use emberd::{EmberdConfig, Node};

const COIN: u64 = 1_0000_0000;

fn test_config(dir: &Path) -> EmberdConfig {
    let mut config = EmberdConfig::base();
    config.chain = NetworkParameters::test();
    config.state = ember_state::Config {
        data_dir: dir.join("data"),
        backend: Backend::Json,
    };
    config.network.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.network.peers_file = Some(dir.join("peers.txt"));
    config.shutdown_grace_ms = 500;
    config
}

async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(15);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(50)).await;
    }
}

/// Create the default account and return its address string.
fn setup_miner_account(node: &Node) -> String {
    let created = node.create_account("miner", "pw").unwrap();
    created["address"].as_str().unwrap().to_string()
}

fn fresh_address(node: &Node) -> String {
    let network = node.chain().parameters().network;
    KeyPair::generate().address(network).to_string()
}

#[tokio::test]
async fn genesis_bootstrap() {
    ember_test::init();

    let dir = TempDir::new("emberd-genesis").unwrap();
    let node = Node::init(test_config(dir.path())).unwrap();

    let status = node.status();
    assert_eq!(status["height"], 0);
    assert_eq!(status["running"], false);

    let genesis = node
        .chain()
        .block(HashOrHeight::Height(0))
        .unwrap()
        .unwrap();
    assert!(genesis.header.previous_block_hash.is_zero());
    assert_eq!(
        status["best_block_id"].as_str().unwrap(),
        genesis.hash().to_string()
    );

    // The command surface serves the same block by hash.
    let by_hash = node
        .show_block(HashOrHeight::Hash(genesis.hash()))
        .unwrap();
    assert_eq!(by_hash["header"]["height"], 0);
}

#[tokio::test]
async fn single_transfer_through_commands() {
    ember_test::init();

    let dir = TempDir::new("emberd-transfer").unwrap();
    let node = Node::init(test_config(dir.path())).unwrap();

    // The wallet default account collects mined coinbases.
    let alice = setup_miner_account(&node);
    node.mine_block().await.unwrap();
    assert_eq!(node.chain().height(), 1);
    assert_eq!(node.balance(&alice).unwrap()["balance"], 50 * COIN);

    // Alice pays Bob ten coins with a one-coin fee.
    let bob = fresh_address(&node);
    let tx = node
        .create_transfer(&alice, "pw", &bob, 10 * COIN, COIN)
        .unwrap();
    let tx_id = tx.hash();
    node.add_transaction(tx).await.unwrap();
    assert!(node.mempool().contains(&tx_id));
    assert_eq!(node.tx_pool()["size"], 1);

    node.mine_block().await.unwrap();

    // Inclusion evicts the transaction from the pool.
    assert!(!node.mempool().contains(&tx_id));
    assert_eq!(node.balance(&bob).unwrap()["balance"], 10 * COIN);
    // Change plus the second coinbase (subsidy + fee) both pay Alice.
    assert_eq!(
        node.balance(&alice).unwrap()["balance"],
        39 * COIN + 51 * COIN
    );
    // Alice's nonce advanced with her one spend.
    assert_eq!(node.balance(&alice).unwrap()["nonce"], 1);
}

#[tokio::test]
async fn conflicting_spend_is_refused() {
    ember_test::init();

    let dir = TempDir::new("emberd-doublespend").unwrap();
    let node = Node::init(test_config(dir.path())).unwrap();

    let alice = setup_miner_account(&node);
    node.mine_block().await.unwrap();

    let first = node
        .create_transfer(&alice, "pw", &fresh_address(&node), COIN, COIN)
        .unwrap();
    node.add_transaction(first).await.unwrap();

    // A rival spend of the same outpoint never joins the pool.
    let rival = node
        .create_transfer(&alice, "pw", &fresh_address(&node), 2 * COIN, COIN)
        .unwrap();
    assert!(node.add_transaction(rival.clone()).await.is_err());
    assert_eq!(node.mempool().len(), 1);

    // Once the first spend is mined, the rival's input no longer exists.
    node.mine_block().await.unwrap();
    assert!(node.add_transaction(rival).await.is_err());
    assert_eq!(node.mempool().len(), 0);
}

#[tokio::test]
async fn blocks_and_transactions_propagate_between_nodes() {
    ember_test::init();

    let dir_a = TempDir::new("emberd-a").unwrap();
    let dir_b = TempDir::new("emberd-b").unwrap();

    let node_a = Node::init(test_config(dir_a.path())).unwrap();
    let node_b = Node::init(test_config(dir_b.path())).unwrap();
    node_a.start().await.unwrap();
    node_b.start().await.unwrap();

    let a_addr = node_a.local_listen_addr().unwrap();
    node_b.connect_peer(&a_addr.to_string()).unwrap();

    wait_until("the peers to see each other", || {
        node_a.network_info()["connected"].as_u64().unwrap() >= 1
            && node_b.network_info()["connected"].as_u64().unwrap() >= 1
    })
    .await;

    // A block mined on A reaches B through inv/getdata.
    let alice = setup_miner_account(&node_a);
    node_a.mine_block().await.unwrap();
    let b_chain = node_b.clone();
    wait_until("the block to reach node B", move || {
        b_chain.chain().height() == 1
    })
    .await;
    assert_eq!(
        node_a.chain().summary().best_block_id,
        node_b.chain().summary().best_block_id
    );

    // A transaction broadcast on A reaches B's mempool.
    let tx = node_a
        .create_transfer(&alice, "pw", &fresh_address(&node_a), COIN, COIN)
        .unwrap();
    let tx_id = tx.hash();
    node_a.broadcast_transaction(tx).await.unwrap();
    let b_pool = node_b.clone();
    wait_until("the transaction to reach node B", move || {
        b_pool.mempool().contains(&tx_id)
    })
    .await;

    node_a.stop().await.unwrap();
    node_b.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_under_mining_load() {
    ember_test::init();

    let dir = TempDir::new("emberd-shutdown").unwrap();
    let mut config = test_config(dir.path());
    // A hopeless difficulty keeps the producer searching until told to
    // stop.
    config.chain.initial_difficulty = u32::MAX;
    config.mining.enabled = true;

    let node = Node::init(config).unwrap();
    node.start().await.unwrap();
    assert!(node.mining_status().unwrap()["mining"].as_bool().unwrap());

    // Let the nonce search spin up.
    sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    node.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(!node.is_running());
    // Every worker gets a 500 ms grace; even joined serially that bounds
    // shutdown well under five seconds.
    assert!(elapsed < Duration::from_secs(5), "stop took {:?}", elapsed);
}

#[tokio::test]
async fn chain_survives_restart() {
    ember_test::init();

    let dir = TempDir::new("emberd-restart").unwrap();

    {
        let node = Node::init(test_config(dir.path())).unwrap();
        setup_miner_account(&node);
        node.mine_block().await.unwrap();
        node.mine_block().await.unwrap();
        assert_eq!(node.chain().height(), 2);
    }

    // A fresh node over the same data directory replays to the same tip.
    let reopened = Node::init(test_config(dir.path())).unwrap();
    assert_eq!(reopened.chain().height(), 2);
    assert_eq!(reopened.validate_chain().unwrap()["verified_height"], 2);
}

#[tokio::test]
async fn export_import_round_trip() {
    ember_test::init();

    let dir = TempDir::new("emberd-export").unwrap();
    let node = Node::init(test_config(dir.path())).unwrap();
    setup_miner_account(&node);
    node.mine_block().await.unwrap();
    node.mine_block().await.unwrap();

    let export_path = dir.path().join("chain.json");
    let exported = node.export_chain(&export_path).unwrap();
    assert_eq!(exported["exported_blocks"], 3);

    // A fresh node imports the exported chain.
    let dir2 = TempDir::new("emberd-import").unwrap();
    let other = Node::init(test_config(dir2.path())).unwrap();
    let imported = other.import_chain(&export_path).await.unwrap();
    assert_eq!(imported["height"], 2);
    assert_eq!(
        other.chain().summary().best_block_id,
        node.chain().summary().best_block_id
    );
}
