//! Alloy-backed [`ChainAdapter`] for EVM chains.

use alloy::eips::BlockNumberOrTag;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, LogData, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::chain::{BlockInfo, BlockRef, ChainAdapter, RawLog, TxHandle};
use crate::config::ChainConfig;
use crate::contracts::evm_bridge::{locked_event_signature, unlocked_event_signature, BridgeVault};
use crate::db::models::UnlockRecord;
use crate::types::{DecodedEvent, LockEvent, SendOutcome, UnlockEvent};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const RECEIPT_POLL_ATTEMPTS: u32 = 100;

/// An unlock transaction in flight on an EVM chain.
pub struct EvmTxHandle {
    provider: RootProvider<Http<Client>>,
    tx_hash: B256,
}

#[async_trait]
impl TxHandle for EvmTxHandle {
    fn tx_hash(&self) -> String {
        format!("0x{:x}", self.tx_hash)
    }

    async fn wait_finality(self) -> Result<()> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt = self
                .provider
                .get_transaction_receipt(self.tx_hash)
                .await
                .wrap_err("Failed to get transaction receipt")?;
            if let Some(receipt) = receipt {
                if receipt.status() {
                    return Ok(());
                }
                return Err(eyre!("Transaction 0x{:x} reverted", self.tx_hash));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
        Err(eyre!(
            "Transaction 0x{:x} not mined after {} attempts",
            self.tx_hash,
            RECEIPT_POLL_ATTEMPTS
        ))
    }
}

/// EVM source chain backed by an alloy HTTP provider.
pub struct EvmChain {
    provider: RootProvider<Http<Client>>,
    rpc_url: String,
    bridge_address: Address,
    chain_tag: String,
    signer: Option<PrivateKeySigner>,
}

impl EvmChain {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let url = config.rpc_url.parse().wrap_err("Failed to parse RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);

        let bridge_address =
            Address::from_str(&config.bridge_address).wrap_err("Invalid bridge address")?;

        let signer = match &config.private_key {
            Some(key) => {
                let signer: PrivateKeySigner = key.parse().wrap_err("Invalid private key")?;
                info!(operator_address = %signer.address(), "EVM signer initialized");
                Some(signer)
            }
            None => None,
        };

        Ok(Self {
            provider,
            rpc_url: config.rpc_url.clone(),
            bridge_address,
            chain_tag: config.chain_tag.clone(),
            signer,
        })
    }

    fn decode_locked(&self, raw: &RawLog) -> Result<LockEvent> {
        let data = LogData::new(raw.topics.clone(), raw.data.clone().into())
            .ok_or_else(|| eyre!("Malformed log topics for tx {}", raw.tx_hash))?;
        let log = alloy::primitives::Log {
            address: self.bridge_address,
            data,
        };
        let decoded = BridgeVault::Locked::decode_log(&log, true)
            .map_err(|e| eyre!("Failed to decode Locked log in tx {}: {}", raw.tx_hash, e))?;

        Ok(LockEvent {
            tx_hash: raw.tx_hash.clone(),
            sender: format!("0x{:x}", decoded.data.sender),
            token: format!("0x{:x}", decoded.data.token),
            amount: decoded.data.lockedAmount.to_string(),
            recipient: format!("0x{}", hex::encode(&decoded.data.recipient)),
            extra_data: format!("0x{}", hex::encode(&decoded.data.extraData)),
            block_number: raw.block_number,
            block_hash: raw.block_hash.clone(),
        })
    }

    fn decode_unlocked(&self, raw: &RawLog) -> Result<UnlockEvent> {
        let data = LogData::new(raw.topics.clone(), raw.data.clone().into())
            .ok_or_else(|| eyre!("Malformed log topics for tx {}", raw.tx_hash))?;
        let log = alloy::primitives::Log {
            address: self.bridge_address,
            data,
        };
        let decoded = BridgeVault::Unlocked::decode_log(&log, true)
            .map_err(|e| eyre!("Failed to decode Unlocked log in tx {}: {}", raw.tx_hash, e))?;

        Ok(UnlockEvent {
            burn_tx_hash: format!("0x{:x}", decoded.data.burnTxHash),
            token: format!("0x{:x}", decoded.data.token),
            recipient: format!("0x{:x}", decoded.data.recipient),
            amount: decoded.data.receivedAmount.to_string(),
            tx_hash: raw.tx_hash.clone(),
            block_number: raw.block_number,
        })
    }

    /// Parse a batch of unlock records into call arguments. Any bad field
    /// fails the whole parse; the caller treats that as a batch rejection.
    fn parse_batch(
        records: &[UnlockRecord],
    ) -> Result<(Vec<B256>, Vec<Address>, Vec<Address>, Vec<U256>), String> {
        let mut burn_hashes = Vec::with_capacity(records.len());
        let mut tokens = Vec::with_capacity(records.len());
        let mut recipients = Vec::with_capacity(records.len());
        let mut amounts = Vec::with_capacity(records.len());

        for record in records {
            let burn_hash = B256::from_str(&record.burn_tx_hash)
                .map_err(|e| format!("invalid burn tx hash {}: {}", record.burn_tx_hash, e))?;
            let token = Address::from_str(&record.asset)
                .map_err(|e| format!("invalid asset address {}: {}", record.asset, e))?;
            let recipient = Address::from_str(&record.recipient_address).map_err(|e| {
                format!(
                    "invalid recipient address {}: {}",
                    record.recipient_address, e
                )
            })?;
            let amount = U256::from_str(&record.amount)
                .map_err(|e| format!("invalid amount {}: {}", record.amount, e))?;

            burn_hashes.push(burn_hash);
            tokens.push(token);
            recipients.push(recipient);
            amounts.push(amount);
        }

        Ok((burn_hashes, tokens, recipients, amounts))
    }
}

#[async_trait]
impl ChainAdapter for EvmChain {
    type Tx = EvmTxHandle;

    fn chain_tag(&self) -> &str {
        &self.chain_tag
    }

    async fn current_height(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")
    }

    async fn block(&self, at: BlockRef) -> Result<BlockInfo> {
        let tag = match at {
            BlockRef::Latest => BlockNumberOrTag::Latest,
            BlockRef::Height(n) => BlockNumberOrTag::Number(n),
        };
        let block = self
            .provider
            .get_block_by_number(tag, BlockTransactionsKind::Hashes)
            .await
            .wrap_err("Failed to get block")?
            .ok_or_else(|| eyre!("Block {:?} not found", at))?;

        Ok(BlockInfo {
            number: block.header.number,
            hash: format!("0x{:x}", block.header.hash),
        })
    }

    async fn logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(self.bridge_address)
            .from_block(from)
            .to_block(to);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err("Failed to get logs")?;

        let mut raw = Vec::with_capacity(logs.len());
        for log in logs {
            let tx_hash = log
                .transaction_hash
                .ok_or_else(|| eyre!("Log without transaction hash"))?;
            let block_number = log
                .block_number
                .ok_or_else(|| eyre!("Log without block number"))?;
            let block_hash = log
                .block_hash
                .ok_or_else(|| eyre!("Log without block hash"))?;

            raw.push(RawLog {
                topics: log.topics().to_vec(),
                data: log.inner.data.data.to_vec(),
                tx_hash: format!("0x{:x}", tx_hash),
                log_index: log.log_index.unwrap_or(0),
                block_number,
                block_hash: format!("0x{:x}", block_hash),
            });
        }

        Ok(raw)
    }

    fn decode(&self, log: &RawLog) -> Result<DecodedEvent> {
        let Some(topic0) = log.topics.first() else {
            return Ok(DecodedEvent::Unknown("anonymous log".to_string()));
        };

        if *topic0 == locked_event_signature() {
            Ok(DecodedEvent::Locked(self.decode_locked(log)?))
        } else if *topic0 == unlocked_event_signature() {
            Ok(DecodedEvent::Unlocked(self.decode_unlocked(log)?))
        } else {
            Ok(DecodedEvent::Unknown(format!("0x{:x}", topic0)))
        }
    }

    async fn gas_price(&self) -> Result<u128> {
        self.provider
            .get_gas_price()
            .await
            .wrap_err("Failed to get gas price")
    }

    async fn send_unlock_batch(
        &self,
        records: &[UnlockRecord],
        gas_price: u128,
    ) -> Result<SendOutcome<Self::Tx>> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| eyre!("No private key configured, cannot submit unlocks"))?;

        let (burn_hashes, tokens, recipients, amounts) = match Self::parse_batch(records) {
            Ok(parsed) => parsed,
            Err(reason) => return Ok(SendOutcome::Failed(reason)),
        };

        // Drop entries that already settled on-chain (another node may have
        // landed the multisig round).
        let read_contract = BridgeVault::new(self.bridge_address, &self.provider);
        let mut pending: Vec<usize> = Vec::with_capacity(records.len());
        for (i, burn_hash) in burn_hashes.iter().enumerate() {
            let settled = read_contract
                .unlocked(*burn_hash)
                .call()
                .await
                .wrap_err_with(|| format!("Failed to query unlocked(0x{:x})", burn_hash))?;
            if settled._0 {
                debug!(burn_tx_hash = %records[i].burn_tx_hash, "Unlock already settled on-chain");
            } else {
                pending.push(i);
            }
        }

        if pending.is_empty() {
            return Ok(SendOutcome::Completed);
        }

        let burn_hashes: Vec<B256> = pending.iter().map(|&i| burn_hashes[i]).collect();
        let tokens: Vec<Address> = pending.iter().map(|&i| tokens[i]).collect();
        let recipients: Vec<Address> = pending.iter().map(|&i| recipients[i]).collect();
        let amounts: Vec<U256> = pending.iter().map(|&i| amounts[i]).collect();

        let wallet = EthereumWallet::from(signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .on_http(self.rpc_url.parse().wrap_err("Invalid RPC URL")?);
        let contract = BridgeVault::new(self.bridge_address, &provider);

        debug!(
            batch_size = burn_hashes.len(),
            gas_price, "Submitting unlockBatch"
        );

        let call = contract
            .unlockBatch(burn_hashes, tokens, recipients, amounts)
            .gas_price(gas_price);

        match call.send().await {
            Ok(pending_tx) => {
                let tx_hash = *pending_tx.tx_hash();
                info!(tx_hash = %format!("0x{:x}", tx_hash), "Unlock transaction sent");
                Ok(SendOutcome::Submitted(EvmTxHandle {
                    provider: self.provider.clone(),
                    tx_hash,
                }))
            }
            Err(e) => Ok(SendOutcome::Failed(e.to_string())),
        }
    }
}
