//! Watcher/handler core of a cross-chain bridge.
//!
//! The watcher observes lock and unlock events on a source chain behind a
//! confirmation-depth window and a durable cursor; the dispatcher drives
//! outbound unlock transactions through batching, a gas-price gate and a
//! multisig signing service.

pub mod api;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod db;
pub mod dispatcher;
pub mod evm;
pub mod metrics;
pub mod multisig;
pub mod policy;
pub mod supervisor;
pub mod types;
pub mod watcher;
