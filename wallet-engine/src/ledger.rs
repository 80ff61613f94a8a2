//! Storage seam for balances, the transaction ledger and the audit trail.
//!
//! A [`LedgerTx`] is one unit of work: a locking read on a client row,
//! followed by writes that become visible together on [`LedgerTx::commit`].
//! Dropping a transaction without committing discards its writes and
//! releases the row lock.

use crate::errors::Result;
use crate::models::{
    AuditLogEntry, Client, ClientDashboard, ClientListing, NewAuditEntry, NewTransaction, Partner,
    ReferredClient, Transaction,
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use rust_decimal::Decimal;
use tracing::warn;

#[async_trait]
pub trait LedgerTx: Send {
    /// Exclusive row lock on the client; `None` when the client does not exist.
    async fn lock_client_balance(&mut self, client_id: i64) -> Result<Option<Decimal>>;

    async fn update_balance(&mut self, client_id: i64, balance: Decimal) -> Result<()>;

    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<i64>;

    async fn append_transaction(&mut self, entry: NewTransaction) -> Result<i64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start a unit of work on its own connection.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    /// Create a funded account with a zero balance. Used by provisioning only.
    async fn open_client(&self, user_id: i64, partner_id: Option<i64>) -> Result<Client>;

    /// Register a partner profile for `user_id`. Used by provisioning only.
    async fn open_partner(&self, user_id: i64, referral_code: &str) -> Result<Partner>;

    async fn get_client(&self, client_id: i64) -> Result<Option<Client>>;

    async fn find_client_by_user(&self, user_id: i64) -> Result<Option<ClientDashboard>>;

    /// Newest clients first
    async fn list_clients(&self, limit: i64) -> Result<Vec<ClientListing>>;

    /// Clients referred by the partner owned by `partner_user_id`, newest
    /// first; `None` when that user has no partner profile.
    async fn list_referred_clients(
        &self,
        partner_user_id: i64,
        limit: i64,
    ) -> Result<Option<Vec<ReferredClient>>>;

    /// Newest entries first
    async fn list_transactions(&self, client_id: i64, limit: i64) -> Result<Vec<Transaction>>;

    /// `balance_adjust` entries that target the client, newest first
    async fn list_audit_entries(&self, client_id: i64, limit: i64) -> Result<Vec<AuditLogEntry>>;

    async fn health_check(&self) -> Result<()>;
}

/// Run `work` inside one unit of work: commit when it succeeds, roll back
/// when it fails. If the returned future is dropped midway the transaction
/// is dropped with it, which also rolls back.
pub async fn run_in_unit_of_work<T, F>(store: &dyn LedgerStore, work: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut (dyn LedgerTx + 'static)) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut tx = store.begin().await?;

    match work(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed; connection discarded");
            }
            Err(err)
        }
    }
}
