//! Source-chain watcher.
//!
//! Polls the chain for bridge contract logs, maintains the durable cursor,
//! tracks lock confirmations and (in the collector role) emits mint
//! instructions. The fetch window always reaches back `confirm_number` blocks
//! behind the cursor so confirmation counts keep advancing and short reorgs
//! are re-observed; the cursor itself only moves forward after a whole window
//! has been handled.

use eyre::{eyre, Result, WrapErr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use alloy::primitives::U256;

use crate::chain::{BlockRef, ChainAdapter, RawLog};
use crate::config::Config;
use crate::db::models::{Cursor, MintInstruction, NewLockRecord, UnlockRecord, WithdrawnFeeRecord};
use crate::db::BridgeStore;
use crate::metrics::MetricsSink;
use crate::policy::LockPolicy;
use crate::supervisor::{self, LoopOptions};
use crate::types::{
    BridgeRole, ConfirmStatus, DecodedEvent, LockEvent, UnlockEvent, UnlockStatus,
    FEE_WITHDRAWAL_MARKER,
};

pub struct ChainWatcher<A, S, M> {
    chain: Arc<A>,
    store: Arc<S>,
    metrics: Arc<M>,
    policy: LockPolicy,
    role: BridgeRole,
    confirm_number: u64,
    start_block_height: u64,
    max_block_batch: u64,
    bridge_fee: String,
    config: Config,
    cursor: RwLock<Option<Cursor>>,
}

impl<A, S, M> ChainWatcher<A, S, M>
where
    A: ChainAdapter,
    S: BridgeStore,
    M: MetricsSink,
{
    pub fn new(config: Config, chain: Arc<A>, store: Arc<S>, metrics: Arc<M>) -> Result<Self> {
        let policy = LockPolicy::new(&config.policy)?;
        // A watcher only observes; it withholds no fee of its own.
        let bridge_fee = match config.role {
            BridgeRole::Collector => config.collector.bridge_fee.clone(),
            BridgeRole::Watcher => "0".to_string(),
        };
        Ok(Self {
            chain,
            store,
            metrics,
            policy,
            role: config.role,
            confirm_number: config.chain.confirm_number,
            start_block_height: config.chain.start_block_height,
            max_block_batch: config.chain.max_block_batch,
            bridge_fee,
            config,
            cursor: RwLock::new(None),
        })
    }

    /// The height/hash pair of the last fully handled block.
    pub async fn handled_cursor(&self) -> Option<Cursor> {
        self.cursor.read().await.clone()
    }

    /// Load the cursor, seeding it on first run: from the configured start
    /// height if one is set, otherwise from the chain tip.
    pub async fn init(&self) -> Result<()> {
        let tag = self.chain.chain_tag();
        if let Some(cursor) = self.store.cursor(tag).await? {
            info!(chain = tag, height = cursor.height, "Resuming from stored cursor");
            *self.cursor.write().await = Some(cursor);
            return Ok(());
        }

        let seed = if self.start_block_height > 0 {
            self.chain
                .block(BlockRef::Height(self.start_block_height))
                .await
                .wrap_err("Failed to fetch configured start block")?
        } else {
            self.chain
                .block(BlockRef::Latest)
                .await
                .wrap_err("Failed to fetch chain tip for cursor seed")?
        };

        let cursor = Cursor {
            height: seed.number as i64,
            hash: seed.hash,
        };
        self.store.set_cursor(tag, &cursor).await?;
        info!(chain = tag, height = cursor.height, "Seeded cursor");
        *self.cursor.write().await = Some(cursor);
        Ok(())
    }

    /// Run the watcher until the surrounding task is aborted.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.init().await?;

        let this = self.clone();
        let metrics = self.metrics.clone();
        supervisor::forever(
            LoopOptions {
                name: "watcher",
                on_resolved: self.config.timing.idle_interval(),
                on_rejected: self.config.timing.rejected_interval(),
            },
            move || {
                let this = this.clone();
                async move { this.catch_up().await }
            },
            move |_err| metrics.error("watcher"),
        )
        .await;
        Ok(())
    }

    /// Handle windows until the cursor reaches the chain tip.
    pub async fn catch_up(&self) -> Result<()> {
        loop {
            if !self.poll_once().await? {
                return Ok(());
            }
        }
    }

    /// Handle one fetch window. Returns `false` when there is nothing new.
    ///
    /// The cursor is persisted only after every log in the window has been
    /// handled, so a failure reruns the whole window on the next attempt.
    pub async fn poll_once(&self) -> Result<bool> {
        let cursor = self
            .cursor
            .read()
            .await
            .clone()
            .ok_or_else(|| eyre!("Watcher not initialized"))?;

        let tag = self.chain.chain_tag();
        let tip = self.chain.current_height().await?;
        self.metrics.block_height(tag, "tip", tip);

        let handled = cursor.height as u64;
        if tip <= handled {
            return Ok(false);
        }

        let watermark = handled.saturating_sub(self.confirm_number);
        let from = watermark + 1;
        let to = tip.min(handled + self.max_block_batch);

        debug!(chain = tag, from, to, tip, "Fetching log window");

        let mut logs = self.chain.logs(from, to).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        for log in &logs {
            self.handle_log(log, tip).await?;
        }

        let end_block = self.chain.block(BlockRef::Height(to)).await?;
        let new_cursor = Cursor {
            height: end_block.number as i64,
            hash: end_block.hash,
        };
        self.store.set_cursor(tag, &new_cursor).await?;
        self.metrics.block_height(tag, "handled", to);
        *self.cursor.write().await = Some(new_cursor);

        Ok(to < tip)
    }

    async fn handle_log(&self, log: &RawLog, tip: u64) -> Result<()> {
        match self.chain.decode(log)? {
            DecodedEvent::Locked(event) => self.on_lock(&event, tip).await,
            DecodedEvent::Unlocked(event) => self.on_unlock_with_retry(&event).await,
            DecodedEvent::Unknown(signature) => {
                debug!(tx_hash = %log.tx_hash, signature = %signature, "Ignoring unhandled log");
                Ok(())
            }
        }
    }

    async fn on_lock(&self, event: &LockEvent, tip: u64) -> Result<()> {
        let confirmations = tip.saturating_sub(event.block_number) as i64;
        let confirmed = confirmations >= self.confirm_number as i64;

        let existing = self.store.locks_by_tx_hash(&event.tx_hash).await?;
        if existing.len() > 1 {
            return Err(eyre!(
                "Data integrity violation: {} lock records for tx {}",
                existing.len(),
                event.tx_hash
            ));
        }

        if existing.is_empty() {
            if let Some(reason) = self.policy.check(event) {
                warn!(tx_hash = %event.tx_hash, reason = %reason, "Skipping inadmissible lock");
                return Ok(());
            }

            let record = NewLockRecord {
                tx_hash: event.tx_hash.clone(),
                sender: event.sender.clone(),
                token: event.token.clone(),
                amount: event.amount.clone(),
                recipient: event.recipient.clone(),
                extra_data: event.extra_data.clone(),
                block_number: event.block_number as i64,
                block_hash: event.block_hash.clone(),
                bridge_fee: self.bridge_fee.clone(),
                confirm_number: confirmations,
                confirm_status: if confirmed {
                    ConfirmStatus::Confirmed
                } else {
                    ConfirmStatus::Unconfirmed
                },
            };
            self.store.create_lock(&record).await?;
            info!(
                tx_hash = %event.tx_hash,
                amount = %event.amount,
                confirmations,
                "Created lock record"
            );
            self.metrics.bridge_tx("chain_lock", "success");
            self.metrics.token_amount(
                "chain_lock",
                &event.token,
                event.amount.parse::<f64>().unwrap_or(0.0),
            );

            if self.role == BridgeRole::Watcher {
                self.store
                    .update_bridge_in_record(
                        &event.tx_hash,
                        &event.amount,
                        &event.token,
                        &event.recipient,
                        &event.extra_data,
                    )
                    .await?;
            }
        } else {
            self.store
                .update_lock_confirmation(&event.tx_hash, confirmations, confirmed)
                .await?;
        }

        if confirmed && self.role == BridgeRole::Collector {
            self.create_mint(event).await?;
        }

        Ok(())
    }

    /// Create the mint instruction for a confirmed lock. Idempotent on the
    /// lock tx hash, so re-observing a confirmed lock is harmless.
    async fn create_mint(&self, event: &LockEvent) -> Result<()> {
        let amount = U256::from_str(&event.amount)
            .map_err(|e| eyre!("Unparseable lock amount {}: {}", event.amount, e))?;
        let fee = U256::from_str(&self.bridge_fee)
            .map_err(|e| eyre!("Unparseable bridge fee {}: {}", self.bridge_fee, e))?;

        // A lock the fee would consume entirely can never be minted. This is
        // a configuration or contract fault; halt rather than mint zero.
        if amount <= fee {
            return Err(eyre!(
                "Lock amount {} of tx {} does not exceed bridge fee {}",
                event.amount,
                event.tx_hash,
                self.bridge_fee
            ));
        }

        let mint = MintInstruction {
            id: event.tx_hash.clone(),
            chain: self.chain.chain_tag().to_string(),
            lock_block_height: event.block_number as i64,
            amount: (amount - fee).to_string(),
            asset: event.token.clone(),
            recipient_lockscript: event.recipient.clone(),
            extra_data: event.extra_data.clone(),
        };
        self.store.create_mint_instruction(&mint).await?;
        debug!(id = %mint.id, amount = %mint.amount, "Mint instruction ensured");
        Ok(())
    }

    /// Unlock logs are retried a few times before the window is failed;
    /// they race against the dispatcher updating the same records.
    async fn on_unlock_with_retry(&self, event: &UnlockEvent) -> Result<()> {
        let attempts = self.config.timing.log_retry_attempts;
        let mut last_err = None;
        for attempt in 0..attempts {
            match self.on_unlock(event).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        tx_hash = %event.tx_hash,
                        attempt = attempt + 1,
                        error = %err,
                        "Failed to handle unlock log"
                    );
                    last_err = Some(err);
                    tokio::time::sleep(self.config.timing.log_retry_interval()).await;
                }
            }
        }
        self.metrics.error("watcher");
        Err(last_err.unwrap_or_else(|| eyre!("unlock handling failed")))
    }

    async fn on_unlock(&self, event: &UnlockEvent) -> Result<()> {
        if event.burn_tx_hash == FEE_WITHDRAWAL_MARKER {
            let record = WithdrawnFeeRecord {
                tx_hash: event.tx_hash.clone(),
                block_number: event.block_number as i64,
                recipient: event.recipient.clone(),
                chain: self.chain.chain_tag().to_string(),
                asset: event.token.clone(),
                amount: event.amount.clone(),
            };
            self.store.create_withdrawn_fee(&record).await?;
            info!(tx_hash = %event.tx_hash, amount = %event.amount, "Recorded fee withdrawal");
            return Ok(());
        }

        match self.role {
            BridgeRole::Collector => {
                // The dispatcher already holds a pending record with this
                // outbound hash; observing the log finalizes it.
                self.store
                    .mark_unlock_success(&event.tx_hash, event.block_number as i64)
                    .await?;
            }
            BridgeRole::Watcher => {
                let record = UnlockRecord {
                    burn_tx_hash: event.burn_tx_hash.clone(),
                    amount: event.amount.clone(),
                    asset: event.token.clone(),
                    recipient_address: event.recipient.clone(),
                    unlock_tx_hash: Some(event.tx_hash.clone()),
                    status: UnlockStatus::Success,
                    message: None,
                    block_number: Some(event.block_number as i64),
                    created_at: chrono::Utc::now(),
                };
                self.store.create_unlock(&record).await?;
                self.store
                    .update_burn_bridge_fee(&event.burn_tx_hash, &event.amount)
                    .await?;
            }
        }

        self.metrics.bridge_tx("chain_unlock", "success");
        self.metrics.token_amount(
            "chain_unlock",
            &event.token,
            event.amount.parse::<f64>().unwrap_or(0.0),
        );
        Ok(())
    }
}
