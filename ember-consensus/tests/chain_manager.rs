//! End-to-end chain manager scenarios over the in-memory store backends.

use std::sync::Arc;

use ember_chain::block::{Block, Header};
use ember_chain::crypto::KeyPair;
use ember_chain::parameters::{genesis, Network, NetworkParameters};
use ember_chain::transaction::Transaction;
use ember_chain::transparent::{Address, Input, OutPoint, Output};
use ember_chain::work;
use ember_consensus::{difficulty, BlockOutcome, ChainManager, NullRuntime};
use ember_state::{HashOrHeight, MemoryBlockStore, MemoryStateStore};

const REWARD: u64 = 50_0000_0000;

fn params() -> NetworkParameters {
    NetworkParameters::test()
}

fn new_chain() -> ChainManager {
    ChainManager::init(
        params(),
        Arc::new(MemoryBlockStore::new()),
        Arc::new(MemoryStateStore::new()),
        Arc::new(NullRuntime),
    )
    .expect("chain init on empty stores succeeds")
}

fn address(byte: u8) -> Address {
    Address::new(Network::Testnet, [byte; 20])
}

/// Assemble and solve a block on top of `parent`.
fn build_block(
    parent: &Block,
    txs: Vec<Arc<Transaction>>,
    miner: &Address,
    coinbase_value: u64,
    time: u64,
    difficulty: u32,
) -> Block {
    let height = parent.height() + 1;
    let coinbase = Arc::new(Transaction::coinbase(height, coinbase_value, *miner));
    let mut transactions = vec![coinbase];
    transactions.extend(txs);
    let merkle_root = transactions.iter().map(|tx| tx.hash()).collect();
    let header = Header::new(
        1,
        parent.hash(),
        merkle_root,
        time,
        0,
        difficulty,
        height,
        transactions.len() as u32,
    );
    let mut block = Block::new(header, transactions);
    while !work::hash_meets_target(&block.hash(), difficulty) {
        block.header.nonce += 1;
    }
    block
}

/// A signed transfer spending one outpoint owned by `keys`.
fn transfer(
    keys: &KeyPair,
    outpoint: OutPoint,
    payments: Vec<(u64, Address)>,
) -> Arc<Transaction> {
    let outputs = payments
        .into_iter()
        .enumerate()
        .map(|(index, (value, recipient))| Output::new(value, recipient, index as u32))
        .collect();
    let mut tx = Transaction::new(
        1,
        vec![Input::new(outpoint, keys.public_key_bytes())],
        outputs,
        0,
    );
    tx.sign(keys).unwrap();
    Arc::new(tx)
}

fn genesis_time() -> u64 {
    genesis::genesis_block(&params()).header.time
}

#[test]
fn genesis_bootstrap() {
    ember_test::init();

    let chain = new_chain();
    let summary = chain.summary();
    assert_eq!(summary.height, 0);
    assert_eq!(summary.total_work, 1);

    let stored = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    assert!(stored.header.previous_block_hash.is_zero());
    assert_eq!(stored.hash(), summary.best_block_id);
    assert_eq!(summary.genesis_id, summary.best_block_id);
}

#[test]
fn single_transfer() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    let k1 = KeyPair::generate();
    let k2 = KeyPair::generate();
    let network = params().network;
    let k1_addr = k1.address(network);
    let k2_addr = k2.address(network);
    let miner = address(0xaa);

    // Block 1's coinbase pays K1.
    let b1 = build_block(
        &genesis_block,
        vec![],
        &k1_addr,
        REWARD,
        genesis_time() + 10,
        1,
    );
    assert_eq!(
        chain.commit_block(b1.clone()).unwrap(),
        BlockOutcome::Accepted { height: 1 }
    );
    assert_eq!(chain.balance(&k1_addr).unwrap(), REWARD);

    // K1 sends 10 coins to K2 with a fee of 1 coin and takes change.
    let coinbase_outpoint = OutPoint {
        hash: b1.transactions[0].hash(),
        index: 0,
    };
    let tx = transfer(
        &k1,
        coinbase_outpoint,
        vec![(10_0000_0000, k2_addr), (39_0000_0000, k1_addr)],
    );
    let b2 = build_block(
        &b1,
        vec![tx.clone()],
        &miner,
        REWARD + 1_0000_0000,
        genesis_time() + 20,
        1,
    );

    assert_eq!(
        chain.commit_block(b2).unwrap(),
        BlockOutcome::Accepted { height: 2 }
    );

    assert_eq!(chain.balance(&k2_addr).unwrap(), 10_0000_0000);
    assert_eq!(chain.balance(&k1_addr).unwrap(), 39_0000_0000);
    assert_eq!(chain.balance(&miner).unwrap(), REWARD + 1_0000_0000);
    assert_eq!(chain.nonce(&k1_addr).unwrap(), 1);

    // The spent coinbase output is gone; the new outputs exist.
    assert!(chain.utxo(&coinbase_outpoint).unwrap().is_none());
    assert_eq!(chain.utxos_of(&k2_addr).unwrap().len(), 1);

    // Value conservation: all circulating value is three subsidies.
    let burn = Address::new(network, [0u8; 20]);
    let total: u64 = [burn, k1_addr, k2_addr, miner]
        .iter()
        .map(|addr| chain.balance(addr).unwrap())
        .sum();
    assert_eq!(total, 3 * REWARD);
}

#[test]
fn duplicate_block_is_already_known() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    let b1 = build_block(
        &genesis_block,
        vec![],
        &address(1),
        REWARD,
        genesis_time() + 10,
        1,
    );

    assert_eq!(
        chain.commit_block(b1.clone()).unwrap(),
        BlockOutcome::Accepted { height: 1 }
    );
    let summary = chain.summary();

    assert_eq!(
        chain.commit_block(b1).unwrap(),
        BlockOutcome::AlreadyKnown
    );
    assert_eq!(chain.summary(), summary);
}

#[test]
fn double_spend_across_blocks_rejected() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    let k1 = KeyPair::generate();
    let network = params().network;
    let k1_addr = k1.address(network);

    let b1 = build_block(
        &genesis_block,
        vec![],
        &k1_addr,
        REWARD,
        genesis_time() + 10,
        1,
    );
    chain.commit_block(b1.clone()).unwrap();

    let outpoint = OutPoint {
        hash: b1.transactions[0].hash(),
        index: 0,
    };
    let spend = transfer(&k1, outpoint, vec![(REWARD, address(2))]);
    let b2 = build_block(&b1, vec![spend], &address(3), REWARD, genesis_time() + 20, 1);
    chain.commit_block(b2.clone()).unwrap();

    // A conflicting spend of the same outpoint can no longer be mined.
    let conflicting = transfer(&k1, outpoint, vec![(REWARD, address(4))]);
    let b3 = build_block(&b2, vec![conflicting], &address(3), REWARD, genesis_time() + 30, 1);
    let err = chain.commit_block(b3).unwrap_err();
    assert!(err.is_block_fault(), "double spend is a block fault: {}", err);
    assert_eq!(chain.height(), 2);
}

#[test]
fn orphans_connect_when_parent_arrives() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    let b1 = build_block(
        &genesis_block,
        vec![],
        &address(1),
        REWARD,
        genesis_time() + 10,
        1,
    );
    let b2 = build_block(&b1, vec![], &address(2), REWARD, genesis_time() + 20, 1);

    assert_eq!(chain.commit_block(b2).unwrap(), BlockOutcome::Orphaned);
    assert_eq!(chain.height(), 0);

    // The parent arrives and pulls its parked child in.
    assert_eq!(
        chain.commit_block(b1).unwrap(),
        BlockOutcome::Accepted { height: 1 }
    );
    assert_eq!(chain.height(), 2);
}

#[test]
fn reorg_of_depth_two() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    let k1 = KeyPair::generate();
    let network = params().network;
    let k1_addr = k1.address(network);

    // Branch A: two blocks, with a transfer in A2 spending A1's coinbase.
    let a1 = build_block(
        &genesis_block,
        vec![],
        &k1_addr,
        REWARD,
        genesis_time() + 10,
        1,
    );
    let a1_coinbase = OutPoint {
        hash: a1.transactions[0].hash(),
        index: 0,
    };
    let a_transfer = transfer(&k1, a1_coinbase, vec![(REWARD, address(7))]);
    let a2 = build_block(
        &a1,
        vec![a_transfer.clone()],
        &address(8),
        REWARD,
        genesis_time() + 20,
        1,
    );

    chain.commit_block(a1.clone()).unwrap();
    chain.commit_block(a2.clone()).unwrap();
    assert_eq!(chain.height(), 2);
    let a_tip = chain.summary().best_block_id;

    // Branch B: three blocks from genesis with a different miner.
    let b1 = build_block(
        &genesis_block,
        vec![],
        &address(0x20),
        REWARD,
        genesis_time() + 11,
        1,
    );
    let b2 = build_block(&b1, vec![], &address(0x21), REWARD, genesis_time() + 21, 1);
    let b3 = build_block(&b2, vec![], &address(0x22), REWARD, genesis_time() + 31, 1);

    assert_eq!(
        chain.commit_block(b1.clone()).unwrap(),
        BlockOutcome::SideChain
    );
    // Equal total work keeps the first-seen tip.
    assert_eq!(
        chain.commit_block(b2.clone()).unwrap(),
        BlockOutcome::SideChain
    );
    assert_eq!(chain.summary().best_block_id, a_tip);

    // The third branch block tips the scale.
    assert_eq!(
        chain.commit_block(b3.clone()).unwrap(),
        BlockOutcome::Reorganized { depth: 2 }
    );

    let summary = chain.summary();
    assert_eq!(summary.height, 3);
    assert_eq!(summary.best_block_id, b3.hash());
    assert_eq!(summary.total_work, 4);

    // A's effects are fully rolled back.
    assert_eq!(chain.balance(&k1_addr).unwrap(), 0);
    assert_eq!(chain.balance(&address(7)).unwrap(), 0);
    assert_eq!(chain.balance(&address(0x20)).unwrap(), REWARD);
    assert_eq!(chain.balance(&address(0x21)).unwrap(), REWARD);
    assert_eq!(chain.balance(&address(0x22)).unwrap(), REWARD);

    // The transfer unique to branch A is handed back for mempool
    // re-admission (it is no longer valid, which the mempool decides).
    let reclaimed = chain.drain_reclaimed();
    assert!(reclaimed.iter().any(|tx| tx.hash() == a_transfer.hash()));

    // Height queries now resolve along branch B.
    assert_eq!(
        chain.block(HashOrHeight::Height(1)).unwrap().unwrap().hash(),
        b1.hash()
    );

    // The rolled-back blocks are still known as side blocks.
    assert!(chain.contains(&a2.hash()));
    assert_eq!(
        chain.commit_block(a2).unwrap(),
        BlockOutcome::AlreadyKnown
    );
}

#[test]
fn reorged_state_matches_direct_application() {
    ember_test::init();

    // Feed A then reorg to B on one chain; feed only B on another.
    let reorged = new_chain();
    let direct = new_chain();
    let genesis_block = reorged.block(HashOrHeight::Height(0)).unwrap().unwrap();

    let a1 = build_block(
        &genesis_block,
        vec![],
        &address(1),
        REWARD,
        genesis_time() + 10,
        1,
    );
    let b1 = build_block(
        &genesis_block,
        vec![],
        &address(2),
        REWARD,
        genesis_time() + 12,
        1,
    );
    let b2 = build_block(&b1, vec![], &address(3), REWARD, genesis_time() + 22, 1);

    reorged.commit_block(a1).unwrap();
    reorged.commit_block(b1.clone()).unwrap();
    reorged.commit_block(b2.clone()).unwrap();

    direct.commit_block(b1).unwrap();
    direct.commit_block(b2).unwrap();

    assert_eq!(reorged.summary(), direct.summary());
    for byte in 1..=3 {
        assert_eq!(
            reorged.balance(&address(byte)).unwrap(),
            direct.balance(&address(byte)).unwrap()
        );
        assert_eq!(
            reorged.utxos_of(&address(byte)).unwrap(),
            direct.utxos_of(&address(byte)).unwrap()
        );
    }
}

#[test]
fn wrong_difficulty_rejected() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    let block = build_block(
        &genesis_block,
        vec![],
        &address(1),
        REWARD,
        genesis_time() + 10,
        9,
    );
    let err = chain.commit_block(block).unwrap_err();
    assert!(err.is_block_fault());
    assert!(err.to_string().contains("difficulty"));
}

#[test]
fn stale_timestamp_rejected() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    // Equal to the parent median, not strictly greater.
    let block = build_block(&genesis_block, vec![], &address(1), REWARD, genesis_time(), 1);
    let err = chain.commit_block(block).unwrap_err();
    assert!(err.is_block_fault());
}

#[test]
fn excess_coinbase_rejected() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    let block = build_block(
        &genesis_block,
        vec![],
        &address(1),
        REWARD + 1,
        genesis_time() + 10,
        1,
    );
    let err = chain.commit_block(block).unwrap_err();
    assert!(err.is_block_fault());
    assert!(err.to_string().contains("coinbase"));
}

#[test]
fn tampered_transfer_rejected() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    let k1 = KeyPair::generate();
    let k1_addr = k1.address(params().network);

    let b1 = build_block(
        &genesis_block,
        vec![],
        &k1_addr,
        REWARD,
        genesis_time() + 10,
        1,
    );
    chain.commit_block(b1.clone()).unwrap();

    let outpoint = OutPoint {
        hash: b1.transactions[0].hash(),
        index: 0,
    };
    let tx = transfer(&k1, outpoint, vec![(REWARD, address(2))]);
    let mut tampered = (*tx).clone();
    tampered.outputs[0].recipient = address(9);
    let b2 = build_block(
        &b1,
        vec![Arc::new(tampered)],
        &address(3),
        REWARD,
        genesis_time() + 20,
        1,
    );

    let err = chain.commit_block(b2).unwrap_err();
    assert!(err.is_block_fault());
    assert_eq!(chain.height(), 1);
}

#[test]
fn difficulty_retargets_at_interval_boundary() {
    ember_test::init();

    let chain = new_chain();
    let interval = params().retarget_interval;
    assert_eq!(interval, 8);

    // Seven fast blocks: one second apart instead of the ten-second
    // target.
    let mut parent = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    for height in 1..interval {
        let block = build_block(
            &parent,
            vec![],
            &address(1),
            REWARD,
            genesis_time() + height,
            1,
        );
        assert_eq!(
            chain.commit_block(block.clone()).unwrap(),
            BlockOutcome::Accepted { height }
        );
        parent = block;
    }

    // Chain monotonicity so far: height equals blocks fed, work is the
    // difficulty sum.
    assert_eq!(chain.height(), interval - 1);
    assert_eq!(chain.total_work(), interval as u128);

    // The interval spanned 7 seconds against an 80-second target; the
    // clamp limits the correction to 4x.
    let expected = difficulty::next_difficulty(
        &params(),
        interval,
        1,
        Some((genesis_time(), genesis_time() + interval - 1)),
    );
    assert_eq!(expected, 4);
    assert_eq!(chain.next_difficulty(), 4);

    // The old difficulty is no longer acceptable at the boundary.
    let stale = build_block(
        &parent,
        vec![],
        &address(1),
        REWARD,
        genesis_time() + 100,
        1,
    );
    assert!(chain.commit_block(stale).unwrap_err().is_block_fault());

    let retargeted = build_block(
        &parent,
        vec![],
        &address(1),
        REWARD,
        genesis_time() + 100,
        4,
    );
    assert_eq!(
        chain.commit_block(retargeted).unwrap(),
        BlockOutcome::Accepted { height: interval }
    );
    assert_eq!(chain.total_work(), interval as u128 + 4);
}

#[test]
fn verify_chain_replays_cleanly() {
    ember_test::init();

    let chain = new_chain();
    let genesis_block = chain.block(HashOrHeight::Height(0)).unwrap().unwrap();
    let mut parent = genesis_block;
    for height in 1..=3 {
        let block = build_block(
            &parent,
            vec![],
            &address(height as u8),
            REWARD,
            genesis_time() + height * 10,
            1,
        );
        chain.commit_block(block.clone()).unwrap();
        parent = block;
    }
    assert_eq!(chain.verify_chain().unwrap(), 3);
}
