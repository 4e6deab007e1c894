//! Durable state: the per-chain cursor and the lock / mint / unlock /
//! withdrawn-fee collections.
//!
//! Components talk to [`BridgeStore`] so the reconciliation logic can run
//! against in-memory fakes in tests; [`PgStore`] is the production
//! implementation. Every mutation is a per-key atomic statement — the
//! concurrency-safety boundary is a single active instance per role per
//! chain, not row locking.

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::types::UnlockStatus;

pub mod models;

pub use models::*;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Store operations needed by the watcher and the unlock dispatcher.
#[async_trait]
pub trait BridgeStore: Send + Sync + 'static {
    // -------- cursor --------

    async fn cursor(&self, chain: &str) -> Result<Option<Cursor>>;

    async fn set_cursor(&self, chain: &str, cursor: &Cursor) -> Result<()>;

    // -------- lock records --------

    /// All lock records for a transaction hash. More than one row is a
    /// data-integrity violation the caller must treat as fatal.
    async fn locks_by_tx_hash(&self, tx_hash: &str) -> Result<Vec<LockRecord>>;

    async fn create_lock(&self, lock: &NewLockRecord) -> Result<()>;

    /// Advance the confirmation count, flipping the status when the threshold
    /// is reached. Never moves a confirmed record back.
    async fn update_lock_confirmation(
        &self,
        tx_hash: &str,
        confirm_number: i64,
        confirmed: bool,
    ) -> Result<()>;

    /// Idempotent on `id`: re-running reconciliation on an already-confirmed
    /// lock must not create a second instruction.
    async fn create_mint_instruction(&self, mint: &MintInstruction) -> Result<()>;

    // -------- watcher-role side records --------

    async fn update_bridge_in_record(
        &self,
        tx_hash: &str,
        amount: &str,
        token: &str,
        recipient: &str,
        extra_data: &str,
    ) -> Result<()>;

    /// Record the received amount against the matching burn for fee
    /// bookkeeping. No-op when the burn is unknown locally.
    async fn update_burn_bridge_fee(&self, burn_tx_hash: &str, received_amount: &str)
        -> Result<()>;

    // -------- unlock records --------

    async fn unlocks_by_status(&self, status: UnlockStatus) -> Result<Vec<UnlockRecord>>;

    /// Upsert by burn tx hash: status, message, outbound hash and block.
    async fn save_unlocks(&self, records: &[UnlockRecord]) -> Result<()>;

    async fn create_unlock(&self, record: &UnlockRecord) -> Result<()>;

    /// Finalize every unlock record carried by the given outbound transaction.
    async fn mark_unlock_success(&self, unlock_tx_hash: &str, block_number: i64) -> Result<()>;

    // -------- fee records --------

    async fn create_withdrawn_fee(&self, record: &WithdrawnFeeRecord) -> Result<()>;

    // -------- observability --------

    async fn count_unlocks(&self, status: UnlockStatus) -> Result<i64>;
}

/// SQL SELECT columns for lock_records (casting NUMERIC to TEXT)
const LOCK_SELECT: &str = r#"tx_hash, sender, token, amount::TEXT as amount, recipient,
    extra_data, block_number, block_hash, bridge_fee::TEXT as bridge_fee, confirm_number,
    confirm_status, created_at, updated_at"#;

/// SQL SELECT columns for unlock_records (casting NUMERIC to TEXT)
const UNLOCK_SELECT: &str = r#"burn_tx_hash, amount::TEXT as amount, asset,
    recipient_address, unlock_tx_hash, status, message, block_number, created_at"#;

/// PostgreSQL-backed [`BridgeStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BridgeStore for PgStore {
    async fn cursor(&self, chain: &str) -> Result<Option<Cursor>> {
        let row = sqlx::query_as::<_, Cursor>(
            r#"SELECT height, hash FROM cursors WHERE chain = $1"#,
        )
        .bind(chain)
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to get cursor")?;

        Ok(row)
    }

    async fn set_cursor(&self, chain: &str, cursor: &Cursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cursors (chain, height, hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (chain) DO UPDATE SET height = $2, hash = $3, updated_at = NOW()
            "#,
        )
        .bind(chain)
        .bind(cursor.height)
        .bind(&cursor.hash)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to set cursor for chain {}", chain))?;

        Ok(())
    }

    async fn locks_by_tx_hash(&self, tx_hash: &str) -> Result<Vec<LockRecord>> {
        let query = format!(
            "SELECT {} FROM lock_records WHERE tx_hash = $1",
            LOCK_SELECT
        );
        let rows = sqlx::query_as::<_, LockRecord>(&query)
            .bind(tx_hash)
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to get lock records by tx hash")?;

        Ok(rows)
    }

    async fn create_lock(&self, lock: &NewLockRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lock_records (tx_hash, sender, token, amount, recipient, extra_data,
                block_number, block_hash, bridge_fee, confirm_number, confirm_status)
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6, $7, $8, $9::NUMERIC, $10, $11)
            "#,
        )
        .bind(&lock.tx_hash)
        .bind(&lock.sender)
        .bind(&lock.token)
        .bind(&lock.amount)
        .bind(&lock.recipient)
        .bind(&lock.extra_data)
        .bind(lock.block_number)
        .bind(&lock.block_hash)
        .bind(&lock.bridge_fee)
        .bind(lock.confirm_number)
        .bind(lock.confirm_status)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to create lock record {}", lock.tx_hash))?;

        Ok(())
    }

    async fn update_lock_confirmation(
        &self,
        tx_hash: &str,
        confirm_number: i64,
        confirmed: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE lock_records
            SET confirm_number = GREATEST(confirm_number, $2),
                confirm_status = CASE WHEN $3 THEN 'confirmed' ELSE confirm_status END,
                updated_at = NOW()
            WHERE tx_hash = $1
            "#,
        )
        .bind(tx_hash)
        .bind(confirm_number)
        .bind(confirmed)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update lock confirmation for {}", tx_hash))?;

        Ok(())
    }

    async fn create_mint_instruction(&self, mint: &MintInstruction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mint_instructions (id, chain, lock_block_height, amount, asset,
                recipient_lockscript, extra_data)
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&mint.id)
        .bind(&mint.chain)
        .bind(mint.lock_block_height)
        .bind(&mint.amount)
        .bind(&mint.asset)
        .bind(&mint.recipient_lockscript)
        .bind(&mint.extra_data)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to create mint instruction {}", mint.id))?;

        Ok(())
    }

    async fn update_bridge_in_record(
        &self,
        tx_hash: &str,
        amount: &str,
        token: &str,
        recipient: &str,
        extra_data: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_in_records (tx_hash, amount, token, recipient, extra_data)
            VALUES ($1, $2::NUMERIC, $3, $4, $5)
            ON CONFLICT (tx_hash) DO UPDATE SET
                amount = EXCLUDED.amount,
                token = EXCLUDED.token,
                recipient = EXCLUDED.recipient,
                extra_data = EXCLUDED.extra_data,
                updated_at = NOW()
            "#,
        )
        .bind(tx_hash)
        .bind(amount)
        .bind(token)
        .bind(recipient)
        .bind(extra_data)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update bridge-in record {}", tx_hash))?;

        Ok(())
    }

    async fn update_burn_bridge_fee(
        &self,
        burn_tx_hash: &str,
        received_amount: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE burn_records SET received_amount = $2::NUMERIC, updated_at = NOW()
            WHERE burn_tx_hash = $1
            "#,
        )
        .bind(burn_tx_hash)
        .bind(received_amount)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update burn bridge fee for {}", burn_tx_hash))?;

        Ok(())
    }

    async fn unlocks_by_status(&self, status: UnlockStatus) -> Result<Vec<UnlockRecord>> {
        let query = format!(
            "SELECT {} FROM unlock_records WHERE status = $1 ORDER BY created_at ASC",
            UNLOCK_SELECT
        );
        let rows = sqlx::query_as::<_, UnlockRecord>(&query)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to get unlock records by status")?;

        Ok(rows)
    }

    async fn save_unlocks(&self, records: &[UnlockRecord]) -> Result<()> {
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO unlock_records (burn_tx_hash, amount, asset, recipient_address,
                    unlock_tx_hash, status, message, block_number)
                VALUES ($1, $2::NUMERIC, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (burn_tx_hash) DO UPDATE SET
                    unlock_tx_hash = EXCLUDED.unlock_tx_hash,
                    status = EXCLUDED.status,
                    message = EXCLUDED.message,
                    block_number = EXCLUDED.block_number,
                    updated_at = NOW()
                "#,
            )
            .bind(&record.burn_tx_hash)
            .bind(&record.amount)
            .bind(&record.asset)
            .bind(&record.recipient_address)
            .bind(&record.unlock_tx_hash)
            .bind(record.status)
            .bind(&record.message)
            .bind(record.block_number)
            .execute(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to save unlock record {}", record.burn_tx_hash))?;
        }

        Ok(())
    }

    async fn create_unlock(&self, record: &UnlockRecord) -> Result<()> {
        self.save_unlocks(std::slice::from_ref(record)).await
    }

    async fn mark_unlock_success(&self, unlock_tx_hash: &str, block_number: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE unlock_records
            SET status = 'success', block_number = $2, updated_at = NOW()
            WHERE unlock_tx_hash = $1
            "#,
        )
        .bind(unlock_tx_hash)
        .bind(block_number)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to mark unlocks success for tx {}", unlock_tx_hash))?;

        Ok(())
    }

    async fn create_withdrawn_fee(&self, record: &WithdrawnFeeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawn_fee_records (tx_hash, block_number, recipient, chain, asset, amount)
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(&record.tx_hash)
        .bind(record.block_number)
        .bind(&record.recipient)
        .bind(&record.chain)
        .bind(&record.asset)
        .bind(&record.amount)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to create withdrawn fee record {}", record.tx_hash))?;

        Ok(())
    }

    async fn count_unlocks(&self, status: UnlockStatus) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM unlock_records WHERE status = $1"#)
                .bind(status)
                .fetch_one(&self.pool)
                .await
                .wrap_err("Failed to count unlock records")?;

        Ok(row.0)
    }
}
