//! The Ember node runtime: wiring for the chain manager, mempool, miner,
//! and peer layer, plus the command surface the CLI maps onto.

pub mod commands;
pub mod components;
pub mod config;
pub mod error;
pub mod node;

pub use config::EmberdConfig;
pub use error::NodeError;
pub use node::Node;
