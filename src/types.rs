//! Common types shared across the watcher and dispatcher.

use std::fmt;
use std::str::FromStr;

use eyre::eyre;
use serde::{Deserialize, Serialize};

/// Correlation value carried by an unlock event when the transaction withdrew
/// accumulated bridge fees rather than settling a burn. Real burn transaction
/// hashes are keccak outputs; the all-ones value cannot collide with one in
/// practice.
pub const FEE_WITHDRAWAL_MARKER: &str =
    "0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

/// Which side effects this process is allowed to run.
///
/// Only the collector creates mint instructions and submits unlock
/// transactions; a watcher records observations and side records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeRole {
    Watcher,
    Collector,
}

impl BridgeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeRole::Watcher => "watcher",
            BridgeRole::Collector => "collector",
        }
    }
}

impl FromStr for BridgeRole {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watcher" => Ok(BridgeRole::Watcher),
            "collector" => Ok(BridgeRole::Collector),
            other => Err(eyre!("unknown bridge role: {}", other)),
        }
    }
}

impl fmt::Display for BridgeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Network the bridge runs against. On a test network unlock batching is
/// disabled and records are dispatched as soon as they appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl FromStr for Network {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(eyre!("unknown network: {}", other)),
        }
    }
}

/// Confirmation state of a lock record. Flips to `confirmed` once the
/// confirmation count reaches the configured threshold and never flips back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum ConfirmStatus {
    Unconfirmed,
    Confirmed,
}

impl ConfirmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmStatus::Unconfirmed => "unconfirmed",
            ConfirmStatus::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for ConfirmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing status of an unlock record.
///
/// Transitions are monotone along `todo -> pending -> {success, error}`,
/// except that a failed batch is resubmitted as single-record sub-batches
/// still starting from `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum UnlockStatus {
    Todo,
    Pending,
    Success,
    Error,
}

impl UnlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlockStatus::Todo => "todo",
            UnlockStatus::Pending => "pending",
            UnlockStatus::Success => "success",
            UnlockStatus::Error => "error",
        }
    }
}

impl fmt::Display for UnlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lock (deposit) event decoded from a source-chain log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    pub tx_hash: String,
    pub sender: String,
    pub token: String,
    /// Locked amount in base units, decimal string.
    pub amount: String,
    /// Recipient on the mint side, hex encoded.
    pub recipient: String,
    pub extra_data: String,
    pub block_number: u64,
    pub block_hash: String,
}

/// An unlock (release) event decoded from a source-chain log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockEvent {
    /// Hash of the burn transaction this unlock settles, or
    /// [`FEE_WITHDRAWAL_MARKER`] for a bridge-fee withdrawal.
    pub burn_tx_hash: String,
    pub token: String,
    pub recipient: String,
    /// Received amount in base units, decimal string.
    pub amount: String,
    /// Hash of the unlock transaction itself.
    pub tx_hash: String,
    pub block_number: u64,
}

/// Classification of a decoded source-chain log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Locked(LockEvent),
    Unlocked(UnlockEvent),
    /// Emitted by the bridge contract but not handled here.
    Unknown(String),
}

/// Result of handing an unlock batch to the chain.
#[derive(Debug)]
pub enum SendOutcome<H> {
    /// The batch needs no transaction; every entry was already settled
    /// elsewhere (e.g. the multisig round completed on another node).
    Completed,
    /// The send was rejected outright. Carries the reason; the caller decides
    /// whether to split the batch or mark the record failed.
    Failed(String),
    /// A transaction is in flight; await finality through the handle.
    Submitted(H),
}
