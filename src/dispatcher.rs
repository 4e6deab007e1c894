//! Outbound unlock dispatcher (collector role).
//!
//! Drains `todo` unlock records into on-chain unlock transactions: first a
//! one-shot reconciliation against the multisig signing service to recover
//! from a crash mid-round, then a scheduling loop that batches records and
//! pushes them through the gas-gated submission procedure.

use chrono::{DateTime, Utc};
use eyre::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainAdapter, TxHandle};
use crate::config::Config;
use crate::db::models::UnlockRecord;
use crate::db::BridgeStore;
use crate::metrics::MetricsSink;
use crate::multisig::MultisigCoordinator;
use crate::supervisor::{self, LoopOptions};
use crate::types::{Network, SendOutcome, UnlockStatus};

/// Decide whether a batch should keep waiting for more records.
///
/// On a test network nothing waits. Otherwise dispatch once the batch is
/// large enough or its oldest record has waited long enough.
pub fn wait_for_batch(
    records: &[UnlockRecord],
    network: Network,
    batch_number: usize,
    max_wait_time: Duration,
    now: DateTime<Utc>,
) -> bool {
    if network == Network::Testnet {
        return false;
    }
    let max_wait = chrono::Duration::from_std(max_wait_time).unwrap_or(chrono::Duration::zero());
    if records
        .iter()
        .any(|r| now.signed_duration_since(r.created_at) >= max_wait)
    {
        return false;
    }
    records.len() < batch_number
}

pub struct UnlockDispatcher<A, S, M, C> {
    chain: Arc<A>,
    store: Arc<S>,
    metrics: Arc<M>,
    multisig: Arc<C>,
    config: Config,
}

impl<A, S, M, C> UnlockDispatcher<A, S, M, C>
where
    A: ChainAdapter,
    S: BridgeStore,
    M: MetricsSink,
    C: MultisigCoordinator,
{
    pub fn new(
        config: Config,
        chain: Arc<A>,
        store: Arc<S>,
        metrics: Arc<M>,
        multisig: Arc<C>,
    ) -> Self {
        Self {
            chain,
            store,
            metrics,
            multisig,
            config,
        }
    }

    /// Reconcile once against the signing service, then schedule forever.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        // A transient coordinator or store failure at startup must not take
        // the process down; keep trying until reconciliation lands.
        loop {
            match self.reconcile_pending_round().await {
                Ok(()) => break,
                Err(err) => {
                    warn!(error = %err, "Pending-round reconciliation failed, retrying");
                    self.metrics.error("dispatcher");
                    sleep(self.config.timing.persist_retry_interval()).await;
                }
            }
        }

        let this = self.clone();
        let metrics = self.metrics.clone();
        supervisor::forever(
            LoopOptions {
                name: "unlock-dispatcher",
                on_resolved: self.config.timing.todo_scan_interval(),
                on_rejected: self.config.timing.rejected_interval(),
            },
            move || {
                let this = this.clone();
                async move { this.dispatch_ready().await }
            },
            move |_err| metrics.error("dispatcher"),
        )
        .await;
        Ok(())
    }

    /// Recover from a crash that may have left a signing round in flight.
    ///
    /// When records are outstanding but the signing service reports no round,
    /// the round is assumed to have completed before state was lost and the
    /// records are finalized as `success`. This is an assumption, not a
    /// verified on-chain outcome; it is logged loudly for that reason.
    pub async fn reconcile_pending_round(&self) -> Result<()> {
        let records = self.store.unlocks_by_status(UnlockStatus::Todo).await?;
        let round = self.multisig.pending_round(self.chain.chain_tag()).await?;

        match (round, records.is_empty()) {
            (None, true) => Ok(()),
            (None, false) => {
                error!(
                    count = records.len(),
                    "Unlock records outstanding but no signing round in flight; \
                     assuming the round completed and marking them success"
                );
                let finalized: Vec<UnlockRecord> = records
                    .into_iter()
                    .map(|mut r| {
                        r.status = UnlockStatus::Success;
                        r.message = Some("finalized by round reconciliation".to_string());
                        r
                    })
                    .collect();
                self.store.save_unlocks(&finalized).await?;
                Ok(())
            }
            (Some(_), false) => {
                info!(
                    count = records.len(),
                    "Resuming outstanding unlock records into in-flight round"
                );
                self.submit(records).await
            }
            (Some(round), true) => {
                info!(
                    count = round.entries.len(),
                    "Rehydrating unlock records from in-flight signing round"
                );
                let records: Vec<UnlockRecord> = round
                    .entries
                    .into_iter()
                    .map(|entry| UnlockRecord {
                        burn_tx_hash: entry.burn_tx_hash,
                        amount: entry.amount,
                        asset: entry.asset,
                        recipient_address: entry.recipient,
                        unlock_tx_hash: None,
                        status: UnlockStatus::Pending,
                        message: None,
                        block_number: None,
                        created_at: Utc::now(),
                    })
                    .collect();
                self.store.save_unlocks(&records).await?;
                self.submit(records).await
            }
        }
    }

    /// One scheduling pass: load `todo` records and dispatch if the batching
    /// policy says so.
    pub async fn dispatch_ready(&self) -> Result<()> {
        let records = self.store.unlocks_by_status(UnlockStatus::Todo).await?;
        if records.is_empty() {
            return Ok(());
        }

        if wait_for_batch(
            &records,
            self.config.network,
            self.config.collector.batch_number,
            self.config.collector.max_wait_time(),
            Utc::now(),
        ) {
            debug!(count = records.len(), "Waiting for a fuller unlock batch");
            return Ok(());
        }

        self.submit(records).await
    }

    /// Block until the gas price falls to the configured ceiling. Admission
    /// control only; nothing is persisted while waiting.
    async fn gas_gate(&self) -> Result<u128> {
        let limit = self.config.collector.gas_price_limit_wei();
        loop {
            let gas_price = self.chain.gas_price().await?;
            if gas_price <= limit {
                return Ok(gas_price);
            }
            info!(gas_price, limit, "Gas price above ceiling, waiting");
            sleep(self.config.timing.gas_wait_interval()).await;
        }
    }

    /// Submit a batch of unlock records. Recursive: a failed multi-record
    /// batch is split into single-record submissions.
    pub fn submit<'a>(
        &'a self,
        records: Vec<UnlockRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.submit_inner(records).await })
    }

    async fn submit_inner(&self, mut records: Vec<UnlockRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        // A transport failure restarts the whole admission sequence: the gas
        // quote taken before an outage is stale by the time the chain is
        // reachable again.
        let outcome = loop {
            let gas_price = self.gas_gate().await?;

            // Persist pending before sending: a crash past this point must
            // not lose the fact that a send was attempted.
            for record in &mut records {
                record.status = UnlockStatus::Pending;
            }
            self.store.save_unlocks(&records).await?;

            match self.chain.send_unlock_batch(&records, gas_price).await {
                Ok(outcome) => break outcome,
                Err(err) => {
                    warn!(error = %err, "Unlock send failed in transport, retrying");
                    sleep(self.config.timing.send_retry_interval()).await;
                }
            }
        };

        match outcome {
            SendOutcome::Completed => {
                info!(
                    count = records.len(),
                    "Unlock batch already settled elsewhere"
                );
                for record in &mut records {
                    record.status = UnlockStatus::Success;
                }
                self.metrics.bridge_tx("chain_unlock", "success");
            }
            SendOutcome::Failed(reason) if records.len() > 1 => {
                warn!(
                    count = records.len(),
                    reason = %reason,
                    "Unlock batch rejected, splitting into single submissions"
                );
                for record in records {
                    let burn_tx_hash = record.burn_tx_hash.clone();
                    if let Err(err) = self.submit(vec![record]).await {
                        warn!(
                            burn_tx_hash = %burn_tx_hash,
                            error = %err,
                            "Split unlock submission failed"
                        );
                    }
                }
                // Each split submission persists its own final state.
                return Ok(());
            }
            SendOutcome::Failed(reason) => {
                warn!(
                    burn_tx_hash = %records[0].burn_tx_hash,
                    reason = %reason,
                    "Unlock submission rejected"
                );
                records[0].status = UnlockStatus::Error;
                records[0].message = Some(reason);
                self.metrics.bridge_tx("chain_unlock", "failed");
                self.metrics.error("dispatcher");
            }
            SendOutcome::Submitted(handle) => {
                let tx_hash = handle.tx_hash();
                for record in &mut records {
                    record.unlock_tx_hash = Some(tx_hash.clone());
                }
                self.store.save_unlocks(&records).await?;

                match handle.wait_finality().await {
                    Ok(()) => {
                        info!(tx_hash = %tx_hash, count = records.len(), "Unlock transaction finalized");
                        for record in &mut records {
                            record.status = UnlockStatus::Success;
                        }
                        self.metrics.bridge_tx("chain_unlock", "success");
                    }
                    Err(err) => {
                        warn!(tx_hash = %tx_hash, error = %err, "Unlock transaction failed");
                        for record in &mut records {
                            record.status = UnlockStatus::Error;
                            record.message = Some(err.to_string());
                        }
                        self.metrics.bridge_tx("chain_unlock", "failed");
                        self.metrics.error("dispatcher");
                    }
                }
            }
        }

        // Final state must land. Retry until the store accepts it.
        loop {
            match self.store.save_unlocks(&records).await {
                Ok(()) => break,
                Err(err) => {
                    error!(error = %err, "Failed to persist unlock outcome, retrying");
                    sleep(self.config.timing.persist_retry_interval()).await;
                }
            }
        }

        Ok(())
    }
}
