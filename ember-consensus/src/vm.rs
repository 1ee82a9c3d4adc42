//! The contract execution hook.
//!
//! The chain manager delegates contract-kind transactions to a
//! [`ContractRuntime`] inside the block's state transaction: reads observe
//! the in-flight block, and writes commit or roll back with it. The virtual
//! machine itself lives outside this crate; nodes without one run the
//! [`NullRuntime`].

use displaydoc::Display;
use thiserror::Error;

use ember_chain::transparent::Address;
use ember_state::StateStore;

/// A failure inside contract execution.
#[derive(Error, Display, Debug)]
pub enum ContractError {
    /// contract {0} rejected the call: {1}
    Rejected(Address, String),

    /// call to contract {0} ran out of gas (limit {1})
    OutOfGas(Address, u64),

    /// contract state access failed: {0}
    Store(#[from] ember_state::StoreError),
}

/// An event emitted by a contract call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub topic: String,
    pub data: Vec<u8>,
}

/// The result of one contract call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub return_data: Vec<u8>,
    pub gas_used: u64,
    pub events: Vec<Event>,
}

/// The seam between the chain manager and a contract virtual machine.
///
/// `state` is the store handle for the surrounding block transaction; the
/// runtime reads and writes through it and must not commit or roll back.
pub trait ContractRuntime: Send + Sync {
    fn execute(
        &self,
        contract: &Address,
        input: &[u8],
        gas_limit: u64,
        state: &dyn StateStore,
    ) -> Result<ExecutionOutcome, ContractError>;
}

/// A runtime that accepts every call and does nothing.
#[derive(Default)]
pub struct NullRuntime;

impl ContractRuntime for NullRuntime {
    fn execute(
        &self,
        _contract: &Address,
        _input: &[u8],
        _gas_limit: u64,
        _state: &dyn StateStore,
    ) -> Result<ExecutionOutcome, ContractError> {
        Ok(ExecutionOutcome::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_chain::parameters::Network;
    use ember_state::MemoryStateStore;

    #[test]
    fn null_runtime_accepts_calls() {
        ember_test::init();

        let state = MemoryStateStore::new();
        let contract = Address::new(Network::Mainnet, [1; 20]);
        let outcome = NullRuntime
            .execute(&contract, b"payload", 1_000_000, &state)
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::default());
    }
}
