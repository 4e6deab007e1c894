use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{ConfirmStatus, UnlockStatus};

// Note: amounts are carried as String to avoid BigDecimal/sqlx version
// conflicts. The database stores them as NUMERIC(78,0); inserts cast the text
// value (e.g. $1::NUMERIC) and selects cast back (amount::TEXT as amount).

/// Watermark below which no further log fetch happens, per source chain.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Cursor {
    pub height: i64,
    pub hash: String,
}

/// A lock (deposit) observed on the source chain. At most one row exists per
/// transaction hash; re-observations only advance the confirmation fields.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LockRecord {
    pub tx_hash: String,
    pub sender: String,
    pub token: String,
    pub amount: String,
    pub recipient: String,
    pub extra_data: String,
    pub block_number: i64,
    pub block_hash: String,
    /// Withheld fee, fixed at first observation and never recomputed.
    pub bridge_fee: String,
    pub confirm_number: i64,
    pub confirm_status: ConfirmStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// For inserting new lock records
#[derive(Debug, Clone)]
pub struct NewLockRecord {
    pub tx_hash: String,
    pub sender: String,
    pub token: String,
    pub amount: String,
    pub recipient: String,
    pub extra_data: String,
    pub block_number: i64,
    pub block_hash: String,
    pub bridge_fee: String,
    pub confirm_number: i64,
    pub confirm_status: ConfirmStatus,
}

/// Instruction for the downstream minter, created exactly once when a lock
/// record becomes confirmed (collector role only). `id` is the lock tx hash
/// and is the uniqueness key.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct MintInstruction {
    pub id: String,
    pub chain: String,
    pub lock_block_height: i64,
    /// Lock amount net of the bridge fee.
    pub amount: String,
    pub asset: String,
    pub recipient_lockscript: String,
    pub extra_data: String,
}

/// An unlock request flowing from a burn on the mint side back to the source
/// chain. Keyed by the burn transaction hash.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub burn_tx_hash: String,
    pub amount: String,
    pub asset: String,
    pub recipient_address: String,
    /// Hash of the outbound unlock transaction once one is in flight.
    pub unlock_tx_hash: Option<String>,
    pub status: UnlockStatus,
    pub message: Option<String>,
    pub block_number: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of a bridge-fee withdrawal observed on-chain.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WithdrawnFeeRecord {
    pub tx_hash: String,
    pub block_number: i64,
    pub recipient: String,
    pub chain: String,
    pub asset: String,
    pub amount: String,
}
