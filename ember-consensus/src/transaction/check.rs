//! Stateless transaction check functions.
//!
//! Stateful rules (unspent inputs, value balance, fees) need the UTXO set
//! and live in the chain manager; everything here is checkable from the
//! transaction alone.

use std::collections::HashSet;

use ember_chain::crypto;
use ember_chain::transaction::Transaction;

use crate::error::TransactionError;

/// Returns `Ok(())` if the transaction has the required inputs and outputs:
/// at least one output always, and at least one input unless it is a
/// coinbase.
pub fn has_inputs_and_outputs(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.outputs.is_empty() {
        return Err(TransactionError::NoOutputs);
    }
    if tx.inputs.is_empty() && !tx.is_coinbase() {
        return Err(TransactionError::NoInputs);
    }
    Ok(())
}

/// Returns `Ok(())` if the version field is non-zero.
pub fn version_is_valid(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.version == 0 {
        return Err(TransactionError::BadVersion);
    }
    Ok(())
}

/// Returns `Ok(())` if every output value is positive.
///
/// Coinbase outputs are policy-exempt: their value is constrained against
/// subsidy plus fees during block application instead.
pub fn output_values_are_positive(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.is_coinbase() {
        return Ok(());
    }
    for output in tx.outputs.iter() {
        if output.value == 0 {
            return Err(TransactionError::ZeroValueOutput {
                index: output.index,
            });
        }
    }
    Ok(())
}

/// Returns `Ok(())` if every output's index field matches its position.
pub fn output_indexes_match_positions(tx: &Transaction) -> Result<(), TransactionError> {
    for (position, output) in tx.outputs.iter().enumerate() {
        if output.index as usize != position {
            return Err(TransactionError::BadOutputIndex {
                expected: position as u32,
                found: output.index,
            });
        }
    }
    Ok(())
}

/// Returns `Ok(())` if the coinbase form is consistent: a coinbase has
/// exactly one zero-hash input, and a non-coinbase has none.
pub fn coinbase_form_is_valid(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.is_coinbase() {
        let input = &tx.inputs[0];
        if input.coinbase_height().is_none() {
            return Err(TransactionError::BadCoinbaseInput);
        }
    } else if tx.contains_coinbase_input() {
        return Err(TransactionError::CoinbaseInputFound);
    }
    Ok(())
}

/// Returns `Ok(())` if no previous output is referenced twice.
pub fn no_duplicate_spends(tx: &Transaction) -> Result<(), TransactionError> {
    let mut seen = HashSet::new();
    for input in tx.inputs.iter() {
        if !seen.insert(input.previous_output) {
            return Err(TransactionError::DuplicateSpend(input.previous_output));
        }
    }
    Ok(())
}

/// Returns `Ok(())` if every non-coinbase input carries a signature that
/// verifies against its declared public key over the shared signing digest.
pub fn signatures_are_valid(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.is_coinbase() {
        return Ok(());
    }
    let digest = tx.signing_digest();
    for (index, input) in tx.inputs.iter().enumerate() {
        if input.signature.is_empty() || input.public_key.is_empty() {
            return Err(TransactionError::MissingSignature { index });
        }
        match crypto::verify_digest(&digest, &input.signature, &input.public_key) {
            Ok(true) => {}
            Ok(false) => return Err(TransactionError::InvalidSignature { index }),
            Err(_) => return Err(TransactionError::InvalidSignature { index }),
        }
    }
    Ok(())
}

/// All stateless transaction checks, in rule order.
pub fn stateless_checks(tx: &Transaction) -> Result<(), TransactionError> {
    version_is_valid(tx)?;
    has_inputs_and_outputs(tx)?;
    output_values_are_positive(tx)?;
    output_indexes_match_positions(tx)?;
    coinbase_form_is_valid(tx)?;
    no_duplicate_spends(tx)?;
    signatures_are_valid(tx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_chain::crypto::KeyPair;
    use ember_chain::parameters::Network;
    use ember_chain::transaction;
    use ember_chain::transparent::{Address, Input, OutPoint, Output};

    fn address(byte: u8) -> Address {
        Address::new(Network::Mainnet, [byte; 20])
    }

    fn signed_transfer() -> Transaction {
        let keys = KeyPair::generate();
        let outpoint = OutPoint {
            hash: transaction::Hash([1u8; 32]),
            index: 0,
        };
        let mut tx = Transaction::new(
            1,
            vec![Input::new(outpoint, keys.public_key_bytes())],
            vec![Output::new(10, address(2), 0)],
            0,
        );
        tx.sign(&keys).unwrap();
        tx
    }

    #[test]
    fn valid_transfer_passes() {
        ember_test::init();
        stateless_checks(&signed_transfer()).unwrap();
    }

    #[test]
    fn empty_outputs_rejected() {
        ember_test::init();

        let mut tx = signed_transfer();
        tx.outputs.clear();
        assert!(matches!(
            stateless_checks(&tx),
            Err(TransactionError::NoOutputs)
        ));
    }

    #[test]
    fn empty_inputs_rejected_for_non_coinbase() {
        ember_test::init();

        let mut tx = signed_transfer();
        tx.inputs.clear();
        assert!(matches!(
            stateless_checks(&tx),
            Err(TransactionError::NoInputs)
        ));
    }

    #[test]
    fn zero_value_output_rejected() {
        ember_test::init();

        let mut tx = signed_transfer();
        tx.outputs[0].value = 0;
        assert!(matches!(
            stateless_checks(&tx),
            Err(TransactionError::ZeroValueOutput { index: 0 })
        ));
    }

    #[test]
    fn coinbase_is_exempt_from_value_rule() {
        ember_test::init();

        let coinbase = Transaction::coinbase(1, 0, address(1));
        stateless_checks(&coinbase).unwrap();
    }

    #[test]
    fn misnumbered_outputs_rejected() {
        ember_test::init();

        let mut tx = signed_transfer();
        tx.outputs[0].index = 3;
        assert!(matches!(
            stateless_checks(&tx),
            Err(TransactionError::BadOutputIndex {
                expected: 0,
                found: 3
            })
        ));
    }

    #[test]
    fn duplicate_spend_rejected() {
        ember_test::init();

        let keys = KeyPair::generate();
        let outpoint = OutPoint {
            hash: transaction::Hash([1u8; 32]),
            index: 0,
        };
        let mut tx = Transaction::new(
            1,
            vec![
                Input::new(outpoint, keys.public_key_bytes()),
                Input::new(outpoint, keys.public_key_bytes()),
            ],
            vec![Output::new(10, address(2), 0)],
            0,
        );
        tx.sign(&keys).unwrap();
        assert!(matches!(
            stateless_checks(&tx),
            Err(TransactionError::DuplicateSpend(_))
        ));
    }

    #[test]
    fn tampered_signature_rejected() {
        ember_test::init();

        let mut tx = signed_transfer();
        // Raise the transferred value after signing.
        tx.outputs[0].value = 1_000_000;
        assert!(matches!(
            stateless_checks(&tx),
            Err(TransactionError::InvalidSignature { index: 0 })
        ));
    }

    #[test]
    fn unsigned_input_rejected() {
        ember_test::init();

        let keys = KeyPair::generate();
        let outpoint = OutPoint {
            hash: transaction::Hash([1u8; 32]),
            index: 0,
        };
        let tx = Transaction::new(
            1,
            vec![Input::new(outpoint, keys.public_key_bytes())],
            vec![Output::new(10, address(2), 0)],
            0,
        );
        assert!(matches!(
            stateless_checks(&tx),
            Err(TransactionError::MissingSignature { index: 0 })
        ));
    }

    #[test]
    fn coinbase_input_in_transfer_rejected() {
        ember_test::init();

        let keys = KeyPair::generate();
        let outpoint = OutPoint {
            hash: transaction::Hash([1u8; 32]),
            index: 0,
        };
        let mut tx = Transaction::new(
            1,
            vec![
                Input::new(outpoint, keys.public_key_bytes()),
                Input::coinbase(5),
            ],
            vec![Output::new(10, address(2), 0)],
            0,
        );
        tx.sign(&keys).unwrap();
        assert!(matches!(
            stateless_checks(&tx),
            Err(TransactionError::CoinbaseInputFound)
        ));
    }
}
