use proptest::collection::vec;
use proptest::prelude::*;

use super::*;
use crate::parameters::Network;
use crate::transparent::{Address, Input, OutPoint, Output};
use crate::serialization::EmberSerialize;
use crate::EmberDeserializeInto;

fn sample_transfer() -> (KeyPair, Transaction) {
    let keys = KeyPair::generate();
    let recipient = Address::new(Network::Mainnet, [9u8; 20]);
    let outpoint = OutPoint {
        hash: Hash([3u8; 32]),
        index: 0,
    };
    let tx = Transaction::new(
        1,
        vec![Input::new(outpoint, keys.public_key_bytes())],
        vec![Output::new(40_0000_0000, recipient, 0)],
        0,
    );
    (keys, tx)
}

#[test]
fn hash_is_stable_under_signing() {
    ember_test::init();

    let (keys, mut tx) = sample_transfer();
    let digest_before = tx.signing_digest();
    tx.sign(&keys).unwrap();
    assert!(!tx.inputs[0].signature.is_empty());
    // The signing digest clears signatures, so it is unchanged by signing.
    assert_eq!(digest_before, tx.signing_digest());
}

#[test]
fn hash_changes_with_content() {
    ember_test::init();

    let (_, tx) = sample_transfer();
    let mut other = tx.clone();
    other.outputs[0].value += 1;
    assert_ne!(tx.hash(), other.hash());
}

#[test]
fn signature_verifies_against_digest() {
    ember_test::init();

    let (keys, mut tx) = sample_transfer();
    tx.sign(&keys).unwrap();
    let digest = tx.signing_digest();
    assert!(crypto::verify_digest(
        &digest,
        &tx.inputs[0].signature,
        &tx.inputs[0].public_key
    )
    .unwrap());
}

#[test]
fn coinbase_classification() {
    ember_test::init();

    let recipient = Address::new(Network::Mainnet, [1u8; 20]);
    let coinbase = Transaction::coinbase(7, 50_0000_0000, recipient);
    assert!(coinbase.is_coinbase());
    assert_eq!(coinbase.kind(), Kind::Coinbase);
    assert_eq!(coinbase.inputs[0].coinbase_height(), Some(7));

    let (_, transfer) = sample_transfer();
    assert_eq!(transfer.kind(), Kind::Regular);
}

#[test]
fn contract_classification() {
    ember_test::init();

    let (_, mut tx) = sample_transfer();
    tx.outputs[0].script_pubkey = crate::transparent::Script(vec![0xaa, 0xbb]);
    assert_eq!(tx.kind(), Kind::Contract);
}

#[test]
fn serialized_len_matches() {
    ember_test::init();

    let (keys, mut tx) = sample_transfer();
    tx.sign(&keys).unwrap();
    let bytes = tx.ember_serialize_to_vec().unwrap();
    assert_eq!(bytes.len(), tx.len());
}

#[test]
fn total_output_value_overflow() {
    ember_test::init();

    let recipient = Address::new(Network::Mainnet, [1u8; 20]);
    let tx = Transaction::new(
        1,
        vec![],
        vec![
            Output::new(u64::MAX, recipient, 0),
            Output::new(1, recipient, 1),
        ],
        0,
    );
    assert_eq!(tx.total_output_value(), None);
}

prop_compose! {
    fn arbitrary_input()(
        hash in any::<[u8; 32]>(),
        index in any::<u32>(),
        signature in vec(any::<u8>(), 0..80),
        public_key in vec(any::<u8>(), 0..40),
        sequence in any::<u64>(),
    ) -> Input {
        Input {
            previous_output: OutPoint { hash: Hash(hash), index },
            signature,
            public_key,
            sequence,
        }
    }
}

prop_compose! {
    fn arbitrary_transaction()(
        version in any::<u32>(),
        inputs in vec(arbitrary_input(), 0..8),
        outputs in vec(any::<Output>(), 0..8),
        lock_time in any::<u32>(),
    ) -> Transaction {
        Transaction::new(version, inputs, outputs, lock_time)
    }
}

proptest! {
    #[test]
    fn transaction_roundtrip(tx in arbitrary_transaction()) {
        ember_test::init();

        let bytes = tx.ember_serialize_to_vec().expect("tx should serialize");
        let parsed: Transaction = bytes.as_slice().ember_deserialize_into()
            .expect("randomized tx should deserialize");

        prop_assert_eq!(&tx, &parsed);
        prop_assert_eq!(tx.hash(), parsed.hash());
    }
}
