//! Operational index (§9): a Postgres-backed query cache over the signed
//! graph store. The store (C3) is always the source of truth; this
//! database only makes "list my withdrawals" / "find a deal by CID"
//! queries fast without walking `mapOnce` on every request. Rows here
//! are upserts keyed by the same identifiers the store uses, so a
//! restart simply replays them.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;

pub async fn create_pool(database_url: &str) -> eyre::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| eyre::eyre!("failed to connect to database: {e}"))
}

pub async fn run_migrations(pool: &PgPool) -> eyre::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| eyre::eyre!("failed to run database migrations: {e}"))
}

#[derive(Debug, Clone, FromRow)]
pub struct WithdrawalRow {
    pub receipt_hash: String,
    pub user_address: String,
    pub amount: String,
    pub nonce: i64,
    pub status: String,
    pub batch_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

pub struct NewWithdrawalRow {
    pub receipt_hash: String,
    pub user_address: String,
    pub amount: String,
    pub nonce: i64,
}

/// Records a freshly-queued withdrawal. Re-running this for the same
/// `receipt_hash` (startup replay, retried write) is a no-op on the
/// immutable fields and refreshes `updated_at`.
pub async fn upsert_pending_withdrawal(pool: &PgPool, row: &NewWithdrawalRow) -> eyre::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO withdrawals_index (receipt_hash, user_address, amount, nonce, status)
        VALUES ($1, $2, $3::NUMERIC, $4, 'pending')
        ON CONFLICT (receipt_hash) DO UPDATE SET
            user_address = EXCLUDED.user_address,
            amount = EXCLUDED.amount,
            nonce = EXCLUDED.nonce,
            updated_at = NOW()
        "#,
    )
    .bind(&row.receipt_hash)
    .bind(&row.user_address)
    .bind(&row.amount)
    .bind(row.nonce)
    .execute(pool)
    .await
    .map_err(|e| eyre::eyre!("failed to upsert pending withdrawal: {e}"))?;
    Ok(())
}

/// Marks every withdrawal in `receipt_hashes` as batched under `batch_id`.
pub async fn mark_withdrawals_batched(pool: &PgPool, receipt_hashes: &[String], batch_id: i64) -> eyre::Result<()> {
    sqlx::query(
        r#"
        UPDATE withdrawals_index
        SET status = 'batched', batch_id = $2, updated_at = NOW()
        WHERE receipt_hash = ANY($1)
        "#,
    )
    .bind(receipt_hashes)
    .bind(batch_id)
    .execute(pool)
    .await
    .map_err(|e| eyre::eyre!("failed to mark withdrawals batched: {e}"))?;
    Ok(())
}

pub async fn upsert_batch(pool: &PgPool, batch_id: i64, root: &str, withdrawal_count: i32, finalized: bool) -> eyre::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO batches_index (batch_id, root, withdrawal_count, finalized)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (batch_id) DO UPDATE SET
            root = EXCLUDED.root,
            withdrawal_count = EXCLUDED.withdrawal_count,
            finalized = EXCLUDED.finalized
        "#,
    )
    .bind(batch_id)
    .bind(root)
    .bind(withdrawal_count)
    .bind(finalized)
    .execute(pool)
    .await
    .map_err(|e| eyre::eyre!("failed to upsert batch: {e}"))?;
    Ok(())
}

pub struct NewDealRow {
    pub deal_id: String,
    pub cid: String,
    pub client: String,
    pub tier: String,
    pub status: String,
    pub price_usdc: String,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn upsert_deal(pool: &PgPool, row: &NewDealRow) -> eyre::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO deals_index (deal_id, cid, client, tier, status, price_usdc, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7)
        ON CONFLICT (deal_id) DO UPDATE SET
            status = EXCLUDED.status,
            price_usdc = EXCLUDED.price_usdc,
            expires_at = EXCLUDED.expires_at,
            updated_at = NOW()
        "#,
    )
    .bind(&row.deal_id)
    .bind(&row.cid)
    .bind(&row.client)
    .bind(&row.tier)
    .bind(&row.status)
    .bind(&row.price_usdc)
    .bind(row.expires_at)
    .execute(pool)
    .await
    .map_err(|e| eyre::eyre!("failed to upsert deal: {e}"))?;
    Ok(())
}

pub async fn upsert_shared_link(pool: &PgPool, token: &str, file_name: &str, download_count: i64, status: &str) -> eyre::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO shared_links_index (token, file_name, download_count, status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (token) DO UPDATE SET
            download_count = EXCLUDED.download_count,
            status = EXCLUDED.status,
            updated_at = NOW()
        "#,
    )
    .bind(token)
    .bind(file_name)
    .bind(download_count)
    .bind(status)
    .execute(pool)
    .await
    .map_err(|e| eyre::eyre!("failed to upsert shared link: {e}"))?;
    Ok(())
}

#[derive(Debug, Clone, FromRow)]
pub struct DealRow {
    pub deal_id: String,
    pub cid: String,
    pub client: String,
    pub status: String,
}

pub async fn deals_by_client(pool: &PgPool, client: &str) -> eyre::Result<Vec<DealRow>> {
    let rows = sqlx::query_as::<_, DealRow>(
        "SELECT deal_id, cid, client, status FROM deals_index WHERE client = $1 ORDER BY created_at DESC",
    )
    .bind(client)
    .fetch_all(pool)
    .await
    .map_err(|e| eyre::eyre!("failed to query deals by client: {e}"))?;
    Ok(rows)
}
