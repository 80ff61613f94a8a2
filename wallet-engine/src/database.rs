use crate::config::DatabaseConfig;
use crate::errors::Result;
use crate::ledger::{LedgerStore, LedgerTx};
use crate::models::{
    AuditLogEntry, Client, ClientDashboard, ClientListing, NewAuditEntry, NewTransaction, Partner,
    ReferredClient, Transaction, ACTION_BALANCE_ADJUST,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Postgres;
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username VARCHAR(100) NOT NULL UNIQUE,
        password_hash VARCHAR(255) NOT NULL,
        role VARCHAR(20) NOT NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'active',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS partners (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id),
        referral_code VARCHAR(32) NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS clients (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL UNIQUE REFERENCES users(id),
        partner_id BIGINT NULL REFERENCES partners(id),
        balance NUMERIC(15, 2) NOT NULL DEFAULT 0.00,
        status VARCHAR(20) NOT NULL DEFAULT 'active'
            CHECK (status IN ('active', 'suspended')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS referrals (
        id BIGSERIAL PRIMARY KEY,
        partner_id BIGINT NOT NULL REFERENCES partners(id),
        client_id BIGINT NOT NULL REFERENCES clients(id),
        commission_earned NUMERIC(15, 2) NOT NULL DEFAULT 0.00,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id BIGSERIAL PRIMARY KEY,
        client_id BIGINT NOT NULL REFERENCES clients(id),
        type VARCHAR(20) NOT NULL CHECK (type IN ('deposit', 'withdrawal', 'trade')),
        amount NUMERIC(15, 2) NOT NULL CHECK (amount >= 0),
        pnl NUMERIC(15, 2) NOT NULL DEFAULT 0.00,
        balance_after NUMERIC(15, 2) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL,
        action VARCHAR(50) NOT NULL,
        details JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_client ON transactions(client_id, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs(action, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_clients_partner ON clients(partner_id)",
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.url)
        .await?;

    info!("Database connection pool created successfully");

    Ok(pool)
}

/// Ledger store backed by Postgres row locks.
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they are missing
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("Ledger schema ready");
        Ok(())
    }
}

pub struct PgLedgerTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_client_balance(&mut self, client_id: i64) -> Result<Option<Decimal>> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM clients WHERE id = $1 FOR UPDATE",
        )
        .bind(client_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(balance)
    }

    async fn update_balance(&mut self, client_id: i64, balance: Decimal) -> Result<()> {
        sqlx::query("UPDATE clients SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(client_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO audit_logs (user_id, action, details)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(Json(&entry.details))
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn append_transaction(&mut self, entry: NewTransaction) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO transactions (client_id, type, amount, pnl, balance_after)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(entry.client_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(entry.pnl)
        .bind(entry.balance_after)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await?;

        // Scoped to this transaction only
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn open_client(&self, user_id: i64, partner_id: Option<i64>) -> Result<Client> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (user_id, partner_id, balance, status)
            VALUES ($1, $2, 0.00, 'active')
            RETURNING id, user_id, partner_id, balance, status, created_at
            "#,
        )
        .bind(user_id)
        .bind(partner_id)
        .fetch_one(&self.pool)
        .await?;

        info!(client_id = client.id, user_id, "Opened client account");

        Ok(client)
    }

    async fn open_partner(&self, user_id: i64, referral_code: &str) -> Result<Partner> {
        let partner = sqlx::query_as::<_, Partner>(
            r#"
            INSERT INTO partners (user_id, referral_code)
            VALUES ($1, $2)
            RETURNING id, user_id, referral_code, created_at
            "#,
        )
        .bind(user_id)
        .bind(referral_code)
        .fetch_one(&self.pool)
        .await?;

        info!(partner_id = partner.id, user_id, "Opened partner profile");

        Ok(partner)
    }

    async fn get_client(&self, client_id: i64) -> Result<Option<Client>> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            SELECT id, user_id, partner_id, balance, status, created_at
            FROM clients
            WHERE id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }

    async fn find_client_by_user(&self, user_id: i64) -> Result<Option<ClientDashboard>> {
        let dashboard = sqlx::query_as::<_, ClientDashboard>(
            r#"
            SELECT c.id AS client_id, u.username, c.status, c.balance
            FROM clients c
            JOIN users u ON u.id = c.user_id
            WHERE c.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(dashboard)
    }

    async fn list_clients(&self, limit: i64) -> Result<Vec<ClientListing>> {
        let clients = sqlx::query_as::<_, ClientListing>(
            r#"
            SELECT c.id AS client_id, u.username, c.status, c.balance, p.referral_code
            FROM clients c
            JOIN users u ON u.id = c.user_id
            LEFT JOIN partners p ON p.id = c.partner_id
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(clients)
    }

    async fn list_referred_clients(
        &self,
        partner_user_id: i64,
        limit: i64,
    ) -> Result<Option<Vec<ReferredClient>>> {
        let partner_id = sqlx::query_scalar::<_, i64>("SELECT id FROM partners WHERE user_id = $1")
            .bind(partner_user_id)
            .fetch_optional(&self.pool)
            .await?;

        let partner_id = match partner_id {
            Some(id) => id,
            None => return Ok(None),
        };

        let clients = sqlx::query_as::<_, ReferredClient>(
            r#"
            SELECT c.id AS client_id, u.username, c.balance, c.status, c.created_at
            FROM clients c
            JOIN users u ON u.id = c.user_id
            WHERE c.partner_id = $1
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT $2
            "#,
        )
        .bind(partner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(clients))
    }

    async fn list_transactions(&self, client_id: i64, limit: i64) -> Result<Vec<Transaction>> {
        let transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, client_id, type, amount, pnl, balance_after, created_at
            FROM transactions
            WHERE client_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(client_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn list_audit_entries(&self, client_id: i64, limit: i64) -> Result<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT id, user_id, action, details, created_at
            FROM audit_logs
            WHERE action = $1 AND (details->>'clientId')::BIGINT = $2
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(ACTION_BALANCE_ADJUST)
        .bind(client_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
