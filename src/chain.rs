//! Source-chain adapter contract.
//!
//! The watcher and dispatcher are written against these traits; the alloy
//! implementation lives in [`crate::evm`] and the tests run against in-memory
//! fakes.

use alloy::primitives::B256;
use async_trait::async_trait;
use eyre::Result;

use crate::db::models::UnlockRecord;
use crate::types::{DecodedEvent, SendOutcome};

/// Block selector for [`ChainAdapter::block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Latest,
    Height(u64),
}

/// Number and hash of a block, as recorded in the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub hash: String,
}

/// A raw log fetched from the bridge contract, before classification.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub block_hash: String,
}

/// An in-flight unlock transaction. Consumed by awaiting finality.
#[async_trait]
pub trait TxHandle: Send {
    fn tx_hash(&self) -> String;

    /// Resolves once the transaction is mined; fails if it reverts or never
    /// lands.
    async fn wait_finality(self) -> Result<()>;
}

/// Everything the watcher and dispatcher need from a source chain.
///
/// Implementations are per chain; only the log fetch/decode contract and the
/// unlock send outcome are fixed here.
#[async_trait]
pub trait ChainAdapter: Send + Sync + 'static {
    type Tx: TxHandle;

    /// Tag identifying this chain in records and metrics.
    fn chain_tag(&self) -> &str;

    async fn current_height(&self) -> Result<u64>;

    async fn block(&self, at: BlockRef) -> Result<BlockInfo>;

    /// Ordered logs emitted by the bridge contract in `[from, to]` inclusive.
    async fn logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>>;

    /// Classify a raw log. Logs the bridge emits but this core does not handle
    /// decode to [`DecodedEvent::Unknown`].
    fn decode(&self, log: &RawLog) -> Result<DecodedEvent>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128>;

    /// Hand a batch of unlock records to the chain at the given gas price.
    ///
    /// `Err` means a transient transport failure (retry the submission);
    /// `Ok(SendOutcome::Failed)` means the chain rejected the batch itself.
    async fn send_unlock_batch(
        &self,
        records: &[UnlockRecord],
        gas_price: u128,
    ) -> Result<SendOutcome<Self::Tx>>;
}
