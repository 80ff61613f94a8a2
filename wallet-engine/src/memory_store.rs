//! In-process ledger store.
//!
//! Each client row has its own async mutex standing in for a row lock.
//! Committed state lives behind a single `RwLock` so that a commit makes the
//! balance update and both appended rows visible in one step. Writes are
//! staged on the transaction and thrown away if it is rolled back or dropped.

use crate::errors::{Result, WalletError};
use crate::ledger::{LedgerStore, LedgerTx};
use crate::models::{
    AuditLogEntry, BalanceAdjustDetails, Client, ClientDashboard, ClientListing, ClientStatus,
    NewAuditEntry, NewTransaction, Partner, ReferredClient, Transaction, ACTION_BALANCE_ADJUST,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

/// Step at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    LockRow,
    UpdateBalance,
    AppendAudit,
    AppendTransaction,
    Commit,
}

#[derive(Default)]
struct LedgerState {
    clients: BTreeMap<i64, Client>,
    partners: BTreeMap<i64, Partner>,
    transactions: Vec<Transaction>,
    audit_logs: Vec<AuditLogEntry>,
    next_client_id: i64,
    next_partner_id: i64,
    next_transaction_id: i64,
    next_audit_id: i64,
}

struct Inner {
    state: RwLock<LedgerState>,
    row_locks: Mutex<HashMap<i64, Arc<RowMutex<()>>>>,
    fail_point: Mutex<Option<FailPoint>>,
    lock_timeout: Duration,
}

impl Inner {
    fn check(&self, point: FailPoint) -> Result<()> {
        if *self.fail_point.lock() == Some(point) {
            return Err(WalletError::Storage(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn row_lock(&self, client_id: i64) -> Arc<RowMutex<()>> {
        self.row_locks
            .lock()
            .entry(client_id)
            .or_insert_with(|| Arc::new(RowMutex::new(())))
            .clone()
    }
}

#[derive(Clone)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(LedgerState::default()),
                row_locks: Mutex::new(HashMap::new()),
                fail_point: Mutex::new(None),
                lock_timeout,
            }),
        }
    }

    /// Make every unit of work fail at `point` until cleared with `None`.
    pub fn fail_at(&self, point: Option<FailPoint>) {
        *self.inner.fail_point.lock() = point;
    }

    pub fn transaction_count(&self, client_id: i64) -> usize {
        self.inner
            .state
            .read()
            .transactions
            .iter()
            .filter(|tx| tx.client_id == client_id)
            .count()
    }

    pub fn audit_count(&self) -> usize {
        self.inner.state.read().audit_logs.len()
    }
}

pub struct MemoryLedgerTx {
    inner: Arc<Inner>,
    locked: Option<(i64, OwnedMutexGuard<()>)>,
    balance: Option<Decimal>,
    audit_logs: Vec<NewAuditEntry>,
    transactions: Vec<NewTransaction>,
}

impl MemoryLedgerTx {
    fn locked_client(&self, client_id: i64) -> Result<()> {
        match &self.locked {
            Some((id, _)) if *id == client_id => Ok(()),
            _ => Err(WalletError::Storage(format!(
                "client {} written without holding its row lock",
                client_id
            ))),
        }
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_client_balance(&mut self, client_id: i64) -> Result<Option<Decimal>> {
        self.inner.check(FailPoint::LockRow)?;

        if !self.inner.state.read().clients.contains_key(&client_id) {
            return Ok(None);
        }

        let row = self.inner.row_lock(client_id);
        let guard = tokio::time::timeout(self.inner.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| WalletError::LockTimeout(client_id))?;

        // Read under the lock: the previous holder has already published its commit.
        let balance = self
            .inner
            .state
            .read()
            .clients
            .get(&client_id)
            .map(|client| client.balance);

        self.locked = Some((client_id, guard));
        Ok(balance)
    }

    async fn update_balance(&mut self, client_id: i64, balance: Decimal) -> Result<()> {
        self.inner.check(FailPoint::UpdateBalance)?;
        self.locked_client(client_id)?;
        self.balance = Some(balance);
        Ok(())
    }

    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<i64> {
        self.inner.check(FailPoint::AppendAudit)?;
        self.audit_logs.push(entry);
        Ok(self.audit_logs.len() as i64)
    }

    async fn append_transaction(&mut self, entry: NewTransaction) -> Result<i64> {
        self.inner.check(FailPoint::AppendTransaction)?;
        self.locked_client(entry.client_id)?;
        self.transactions.push(entry);
        Ok(self.transactions.len() as i64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.check(FailPoint::Commit)?;

        let this = *self;
        let now = Utc::now();
        let mut state = this.inner.state.write();

        if let (Some((client_id, _)), Some(balance)) = (&this.locked, this.balance) {
            if let Some(client) = state.clients.get_mut(client_id) {
                client.balance = balance;
            }
        }

        for entry in this.audit_logs {
            state.next_audit_id += 1;
            let id = state.next_audit_id;
            state.audit_logs.push(AuditLogEntry {
                id,
                user_id: entry.user_id,
                action: entry.action,
                details: entry.details,
                created_at: now,
            });
        }

        for entry in this.transactions {
            state.next_transaction_id += 1;
            let id = state.next_transaction_id;
            state.transactions.push(Transaction {
                id,
                client_id: entry.client_id,
                kind: entry.kind,
                amount: entry.amount,
                pnl: entry.pnl,
                balance_after: entry.balance_after,
                created_at: now,
            });
        }

        // Row lock is released only after the commit is visible.
        drop(state);
        drop(this.locked);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        self.inner.check(FailPoint::Begin)?;

        Ok(Box::new(MemoryLedgerTx {
            inner: self.inner.clone(),
            locked: None,
            balance: None,
            audit_logs: Vec::new(),
            transactions: Vec::new(),
        }))
    }

    async fn open_client(&self, user_id: i64, partner_id: Option<i64>) -> Result<Client> {
        let mut state = self.inner.state.write();

        if state.clients.values().any(|client| client.user_id == user_id) {
            return Err(WalletError::Validation(format!(
                "User {} already has a client account",
                user_id
            )));
        }

        state.next_client_id += 1;
        let client = Client {
            id: state.next_client_id,
            user_id,
            partner_id,
            balance: Decimal::new(0, 2),
            status: ClientStatus::Active,
            created_at: Utc::now(),
        };
        state.clients.insert(client.id, client.clone());

        Ok(client)
    }

    async fn open_partner(&self, user_id: i64, referral_code: &str) -> Result<Partner> {
        let mut state = self.inner.state.write();

        if state
            .partners
            .values()
            .any(|partner| partner.user_id == user_id || partner.referral_code == referral_code)
        {
            return Err(WalletError::Validation(format!(
                "Partner profile already exists for user {} or code {}",
                user_id, referral_code
            )));
        }

        state.next_partner_id += 1;
        let partner = Partner {
            id: state.next_partner_id,
            user_id,
            referral_code: referral_code.to_string(),
            created_at: Utc::now(),
        };
        state.partners.insert(partner.id, partner.clone());

        Ok(partner)
    }

    async fn get_client(&self, client_id: i64) -> Result<Option<Client>> {
        Ok(self.inner.state.read().clients.get(&client_id).cloned())
    }

    async fn find_client_by_user(&self, user_id: i64) -> Result<Option<ClientDashboard>> {
        let state = self.inner.state.read();
        let dashboard = state
            .clients
            .values()
            .find(|client| client.user_id == user_id)
            .map(|client| ClientDashboard {
                client_id: client.id,
                username: None,
                status: client.status,
                balance: client.balance,
            });

        Ok(dashboard)
    }

    async fn list_clients(&self, limit: i64) -> Result<Vec<ClientListing>> {
        let state = self.inner.state.read();
        let clients = state
            .clients
            .values()
            .rev()
            .take(limit.max(0) as usize)
            .map(|client| ClientListing {
                client_id: client.id,
                username: None,
                status: client.status,
                balance: client.balance,
                referral_code: client
                    .partner_id
                    .and_then(|id| state.partners.get(&id))
                    .map(|partner| partner.referral_code.clone()),
            })
            .collect();

        Ok(clients)
    }

    async fn list_referred_clients(
        &self,
        partner_user_id: i64,
        limit: i64,
    ) -> Result<Option<Vec<ReferredClient>>> {
        let state = self.inner.state.read();

        let partner_id = match state
            .partners
            .values()
            .find(|partner| partner.user_id == partner_user_id)
        {
            Some(partner) => partner.id,
            None => return Ok(None),
        };

        let clients = state
            .clients
            .values()
            .rev()
            .filter(|client| client.partner_id == Some(partner_id))
            .take(limit.max(0) as usize)
            .map(|client| ReferredClient {
                client_id: client.id,
                username: None,
                balance: client.balance,
                status: client.status,
                created_at: client.created_at,
            })
            .collect();

        Ok(Some(clients))
    }

    async fn list_transactions(&self, client_id: i64, limit: i64) -> Result<Vec<Transaction>> {
        let state = self.inner.state.read();
        let transactions = state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.client_id == client_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();

        Ok(transactions)
    }

    async fn list_audit_entries(&self, client_id: i64, limit: i64) -> Result<Vec<AuditLogEntry>> {
        let state = self.inner.state.read();
        let entries = state
            .audit_logs
            .iter()
            .rev()
            .filter(|entry| entry.action == ACTION_BALANCE_ADJUST)
            .filter(|entry| {
                serde_json::from_value::<BalanceAdjustDetails>(entry.details.clone())
                    .map(|details| details.client_id == client_id)
                    .unwrap_or(false)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect();

        Ok(entries)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
