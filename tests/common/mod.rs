//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use bridge_operator::chain::{BlockInfo, BlockRef, ChainAdapter, RawLog, TxHandle};
use bridge_operator::config::{
    ChainConfig, CollectorConfig, Config, DatabaseConfig, PolicyConfig, TimingConfig,
};
use bridge_operator::db::models::{
    Cursor, LockRecord, MintInstruction, NewLockRecord, UnlockRecord, WithdrawnFeeRecord,
};
use bridge_operator::db::BridgeStore;
use bridge_operator::metrics::MetricsSink;
use bridge_operator::multisig::{MultisigCoordinator, RoundPayload};
use bridge_operator::types::{
    BridgeRole, ConfirmStatus, DecodedEvent, Network, SendOutcome, UnlockStatus,
};

pub fn test_config(role: BridgeRole, network: Network) -> Config {
    Config {
        role,
        network,
        api_port: 9090,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
        },
        chain: ChainConfig {
            rpc_url: "http://localhost:8545".to_string(),
            bridge_address: "0x0000000000000000000000000000000000000001".to_string(),
            chain_tag: "eth".to_string(),
            confirm_number: 5,
            start_block_height: 0,
            max_block_batch: 5000,
            private_key: None,
        },
        collector: CollectorConfig {
            batch_number: 5,
            max_wait_time_ms: 60_000,
            gas_price_gwei_limit: 100,
            bridge_fee: "10".to_string(),
            sig_server_url: Some("http://localhost:8090".to_string()),
        },
        policy: PolicyConfig::default(),
        timing: TimingConfig {
            idle_interval_ms: 1,
            rejected_interval_ms: 1,
            todo_scan_interval_ms: 1,
            gas_wait_interval_ms: 1,
            persist_retry_interval_ms: 1,
            send_retry_interval_ms: 1,
            log_retry_attempts: 2,
            log_retry_interval_ms: 1,
        },
    }
}

pub fn raw_log(tx_hash: &str, block_number: u64, log_index: u64) -> RawLog {
    RawLog {
        topics: vec![],
        data: vec![],
        tx_hash: tx_hash.to_string(),
        log_index,
        block_number,
        block_hash: format!("0xblock{:06}", block_number),
    }
}

pub fn todo_record(burn_tx_hash: &str, amount: &str) -> UnlockRecord {
    UnlockRecord {
        burn_tx_hash: burn_tx_hash.to_string(),
        amount: amount.to_string(),
        asset: "0x2222222222222222222222222222222222222222".to_string(),
        recipient_address: "0x3333333333333333333333333333333333333333".to_string(),
        unlock_tx_hash: None,
        status: UnlockStatus::Todo,
        message: None,
        block_number: None,
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------- store

#[derive(Default)]
struct StoreInner {
    cursors: HashMap<String, Cursor>,
    locks: HashMap<String, LockRecord>,
    mints: HashMap<String, MintInstruction>,
    unlocks: HashMap<String, UnlockRecord>,
    withdrawn_fees: HashMap<String, WithdrawnFeeRecord>,
    bridge_ins: HashMap<String, String>,
    burn_fees: HashMap<String, String>,
}

/// In-memory [`BridgeStore`] with the same per-key upsert semantics as the
/// Postgres implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    /// When non-zero, the next N save_unlocks calls fail.
    pub fail_saves: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor_height(&self, chain: &str) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .cursors
            .get(chain)
            .map(|c| c.height)
    }

    pub fn lock(&self, tx_hash: &str) -> Option<LockRecord> {
        self.inner.lock().unwrap().locks.get(tx_hash).cloned()
    }

    pub fn mint(&self, id: &str) -> Option<MintInstruction> {
        self.inner.lock().unwrap().mints.get(id).cloned()
    }

    pub fn mint_count(&self) -> usize {
        self.inner.lock().unwrap().mints.len()
    }

    pub fn unlock(&self, burn_tx_hash: &str) -> Option<UnlockRecord> {
        self.inner.lock().unwrap().unlocks.get(burn_tx_hash).cloned()
    }

    pub fn withdrawn_fee(&self, tx_hash: &str) -> Option<WithdrawnFeeRecord> {
        self.inner
            .lock()
            .unwrap()
            .withdrawn_fees
            .get(tx_hash)
            .cloned()
    }

    pub fn bridge_in(&self, tx_hash: &str) -> Option<String> {
        self.inner.lock().unwrap().bridge_ins.get(tx_hash).cloned()
    }

    pub fn burn_fee(&self, burn_tx_hash: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .burn_fees
            .get(burn_tx_hash)
            .cloned()
    }

    pub fn insert_lock(&self, record: LockRecord) {
        self.inner
            .lock()
            .unwrap()
            .locks
            .insert(record.tx_hash.clone(), record);
    }

    /// Force a second row for the same tx hash, stored under a shadow key.
    /// Only reachable through `locks_by_tx_hash`, which matches on prefix.
    pub fn insert_duplicate_lock(&self, record: LockRecord) {
        let key = format!("{}#dup", record.tx_hash);
        self.inner.lock().unwrap().locks.insert(key, record);
    }

    pub fn insert_unlock(&self, record: UnlockRecord) {
        self.inner
            .lock()
            .unwrap()
            .unlocks
            .insert(record.burn_tx_hash.clone(), record);
    }
}

#[async_trait]
impl BridgeStore for MemoryStore {
    async fn cursor(&self, chain: &str) -> Result<Option<Cursor>> {
        Ok(self.inner.lock().unwrap().cursors.get(chain).cloned())
    }

    async fn set_cursor(&self, chain: &str, cursor: &Cursor) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .cursors
            .insert(chain.to_string(), cursor.clone());
        Ok(())
    }

    async fn locks_by_tx_hash(&self, tx_hash: &str) -> Result<Vec<LockRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .locks
            .iter()
            .filter(|(key, _)| key.as_str() == tx_hash || key.starts_with(&format!("{}#", tx_hash)))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn create_lock(&self, lock: &NewLockRecord) -> Result<()> {
        let now = Utc::now();
        let record = LockRecord {
            tx_hash: lock.tx_hash.clone(),
            sender: lock.sender.clone(),
            token: lock.token.clone(),
            amount: lock.amount.clone(),
            recipient: lock.recipient.clone(),
            extra_data: lock.extra_data.clone(),
            block_number: lock.block_number,
            block_hash: lock.block_hash.clone(),
            bridge_fee: lock.bridge_fee.clone(),
            confirm_number: lock.confirm_number,
            confirm_status: lock.confirm_status,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .lock()
            .unwrap()
            .locks
            .insert(record.tx_hash.clone(), record);
        Ok(())
    }

    async fn update_lock_confirmation(
        &self,
        tx_hash: &str,
        confirm_number: i64,
        confirmed: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.locks.get_mut(tx_hash) {
            // Confirmation counters never decrease, even if the reported tip
            // regresses between polls.
            record.confirm_number = record.confirm_number.max(confirm_number);
            if confirmed {
                record.confirm_status = ConfirmStatus::Confirmed;
            }
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn create_mint_instruction(&self, mint: &MintInstruction) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .mints
            .entry(mint.id.clone())
            .or_insert_with(|| mint.clone());
        Ok(())
    }

    async fn update_bridge_in_record(
        &self,
        tx_hash: &str,
        amount: &str,
        _token: &str,
        _recipient: &str,
        _extra_data: &str,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .bridge_ins
            .insert(tx_hash.to_string(), amount.to_string());
        Ok(())
    }

    async fn update_burn_bridge_fee(
        &self,
        burn_tx_hash: &str,
        received_amount: &str,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .burn_fees
            .insert(burn_tx_hash.to_string(), received_amount.to_string());
        Ok(())
    }

    async fn unlocks_by_status(&self, status: UnlockStatus) -> Result<Vec<UnlockRecord>> {
        let mut records: Vec<UnlockRecord> = self
            .inner
            .lock()
            .unwrap()
            .unlocks
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.burn_tx_hash.cmp(&b.burn_tx_hash))
        });
        Ok(records)
    }

    async fn save_unlocks(&self, records: &[UnlockRecord]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) > 0 {
            self.fail_saves.fetch_sub(1, Ordering::SeqCst);
            return Err(eyre!("store unavailable"));
        }
        let mut inner = self.inner.lock().unwrap();
        for record in records {
            inner
                .unlocks
                .insert(record.burn_tx_hash.clone(), record.clone());
        }
        Ok(())
    }

    async fn create_unlock(&self, record: &UnlockRecord) -> Result<()> {
        self.save_unlocks(std::slice::from_ref(record)).await
    }

    async fn mark_unlock_success(&self, unlock_tx_hash: &str, block_number: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for record in inner.unlocks.values_mut() {
            if record.unlock_tx_hash.as_deref() == Some(unlock_tx_hash) {
                record.status = UnlockStatus::Success;
                record.block_number = Some(block_number);
            }
        }
        Ok(())
    }

    async fn create_withdrawn_fee(&self, record: &WithdrawnFeeRecord) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .withdrawn_fees
            .entry(record.tx_hash.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn count_unlocks(&self, status: UnlockStatus) -> Result<i64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .unlocks
            .values()
            .filter(|r| r.status == status)
            .count() as i64)
    }
}

// ---------------------------------------------------------------- chain

/// What the next send_unlock_batch call should produce.
pub enum SendScript {
    Completed,
    Failed(String),
    Submit { tx_hash: String, ok: bool },
    /// Transport-level failure: the call errors instead of resolving.
    Transport(String),
}

pub struct MockTx {
    hash: String,
    ok: bool,
}

#[async_trait]
impl TxHandle for MockTx {
    fn tx_hash(&self) -> String {
        self.hash.clone()
    }

    async fn wait_finality(self) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(eyre!("transaction reverted"))
        }
    }
}

/// Scriptable [`ChainAdapter`].
#[derive(Default)]
pub struct MockChain {
    pub tip: Mutex<u64>,
    pub logs: Mutex<Vec<RawLog>>,
    /// Decoded event per transaction hash.
    pub events: Mutex<HashMap<String, DecodedEvent>>,
    /// Gas prices returned in order; the last one repeats.
    pub gas_prices: Mutex<VecDeque<u128>>,
    pub gas_polls: AtomicU32,
    /// Outcomes returned by send_unlock_batch, in order.
    pub send_script: Mutex<VecDeque<SendScript>>,
    /// Burn tx hashes of every batch handed to send_unlock_batch.
    pub sent_batches: Mutex<Vec<Vec<String>>>,
}

impl MockChain {
    pub fn new(tip: u64) -> Self {
        let chain = Self::default();
        *chain.tip.lock().unwrap() = tip;
        chain.gas_prices.lock().unwrap().push_back(1_000_000_000);
        chain
    }

    pub fn set_tip(&self, tip: u64) {
        *self.tip.lock().unwrap() = tip;
    }

    pub fn add_event(&self, log: RawLog, event: DecodedEvent) {
        self.events
            .lock()
            .unwrap()
            .insert(log.tx_hash.clone(), event);
        self.logs.lock().unwrap().push(log);
    }

    pub fn script_send(&self, outcome: SendScript) {
        self.send_script.lock().unwrap().push_back(outcome);
    }

    pub fn script_gas(&self, prices: &[u128]) {
        let mut queue = self.gas_prices.lock().unwrap();
        queue.clear();
        queue.extend(prices.iter().copied());
    }

    pub fn sent_batches(&self) -> Vec<Vec<String>> {
        self.sent_batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    type Tx = MockTx;

    fn chain_tag(&self) -> &str {
        "eth"
    }

    async fn current_height(&self) -> Result<u64> {
        Ok(*self.tip.lock().unwrap())
    }

    async fn block(&self, at: BlockRef) -> Result<BlockInfo> {
        let number = match at {
            BlockRef::Latest => *self.tip.lock().unwrap(),
            BlockRef::Height(n) => n,
        };
        Ok(BlockInfo {
            number,
            hash: format!("0xblock{:06}", number),
        })
    }

    async fn logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.block_number >= from && log.block_number <= to)
            .cloned()
            .collect())
    }

    fn decode(&self, log: &RawLog) -> Result<DecodedEvent> {
        self.events
            .lock()
            .unwrap()
            .get(&log.tx_hash)
            .cloned()
            .ok_or_else(|| eyre!("no scripted event for tx {}", log.tx_hash))
    }

    async fn gas_price(&self) -> Result<u128> {
        self.gas_polls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.gas_prices.lock().unwrap();
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap())
        } else {
            queue.front().copied().ok_or_else(|| eyre!("no gas price"))
        }
    }

    async fn send_unlock_batch(
        &self,
        records: &[UnlockRecord],
        _gas_price: u128,
    ) -> Result<SendOutcome<Self::Tx>> {
        self.sent_batches
            .lock()
            .unwrap()
            .push(records.iter().map(|r| r.burn_tx_hash.clone()).collect());

        match self.send_script.lock().unwrap().pop_front() {
            Some(SendScript::Completed) => Ok(SendOutcome::Completed),
            Some(SendScript::Failed(reason)) => Ok(SendOutcome::Failed(reason)),
            Some(SendScript::Submit { tx_hash, ok }) => {
                Ok(SendOutcome::Submitted(MockTx { hash: tx_hash, ok }))
            }
            Some(SendScript::Transport(reason)) => Err(eyre!(reason)),
            None => Err(eyre!("send_unlock_batch called without a script")),
        }
    }
}

// ---------------------------------------------------------------- multisig

#[derive(Default)]
pub struct MockMultisig {
    pub round: Mutex<Option<RoundPayload>>,
    /// When non-zero, the next N pending_round calls fail.
    pub fail_rounds: AtomicU32,
    pub round_calls: AtomicU32,
}

impl MockMultisig {
    pub fn with_round(round: Option<RoundPayload>) -> Self {
        Self {
            round: Mutex::new(round),
            ..Self::default()
        }
    }

    pub fn round_calls(&self) -> u32 {
        self.round_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MultisigCoordinator for MockMultisig {
    async fn pending_round(&self, _chain: &str) -> Result<Option<RoundPayload>> {
        self.round_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_rounds.load(Ordering::SeqCst) > 0 {
            self.fail_rounds.fetch_sub(1, Ordering::SeqCst);
            return Err(eyre!("signing service unreachable"));
        }
        Ok(self.round.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------- metrics

/// [`MetricsSink`] that records every bridge_tx label pair for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub bridge_txs: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn bridge_txs(&self) -> Vec<(String, String)> {
        self.bridge_txs.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingSink {
    fn bridge_tx(&self, direction: &str, status: &str) {
        self.bridge_txs
            .lock()
            .unwrap()
            .push((direction.to_string(), status.to_string()));
    }

    fn token_amount(&self, _direction: &str, _token: &str, _amount: f64) {}

    fn block_height(&self, _chain: &str, _kind: &str, _height: u64) {}

    fn error(&self, _component: &str) {}
}
