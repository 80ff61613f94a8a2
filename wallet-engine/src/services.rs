use crate::config::LedgerConfig;
use crate::errors::{Result, WalletError};
use crate::ledger::LedgerStore;
use crate::models::{
    AdjustBalanceRequest, AuditLogEntry, BalanceAdjustment, Client, ClientDashboard,
    ClientListing, ReferredClient, Transaction,
};
use crate::mutator::{parse_client_id, AdjustBalanceCommand, BalanceMutator};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Entry point used by the HTTP layer: the balance mutator plus the
/// read-only views over balances, ledger and audit trail.
pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    mutator: BalanceMutator,
    max_adjustment: Decimal,
    list_clients_limit: i64,
    list_transactions_limit: i64,
}

impl WalletService {
    pub fn new(store: Arc<dyn LedgerStore>, ledger: &LedgerConfig) -> Self {
        WalletService {
            mutator: BalanceMutator::new(store.clone()),
            store,
            max_adjustment: ledger.max_adjustment,
            list_clients_limit: ledger.list_clients_limit,
            list_transactions_limit: ledger.list_transactions_limit,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Validate the raw request, then run the adjustment.
    pub async fn adjust_balance(
        &self,
        raw_client_id: &str,
        request: AdjustBalanceRequest,
        acting_user_id: i64,
    ) -> Result<BalanceAdjustment> {
        let command = AdjustBalanceCommand::parse(raw_client_id, request, self.max_adjustment)?;
        self.mutator.adjust_balance(&command, acting_user_id).await
    }

    pub async fn open_client(&self, user_id: i64, partner_id: Option<i64>) -> Result<Client> {
        self.store.open_client(user_id, partner_id).await
    }

    pub async fn list_clients(&self) -> Result<Vec<ClientListing>> {
        let clients = self.store.list_clients(self.list_clients_limit).await?;
        debug!("Listed {} clients", clients.len());
        Ok(clients)
    }

    /// Clients referred by the partner profile of `user_id`
    pub async fn referred_clients(&self, user_id: i64) -> Result<Vec<ReferredClient>> {
        let clients = self
            .store
            .list_referred_clients(user_id, self.list_clients_limit)
            .await?
            .ok_or(WalletError::PartnerNotFound(user_id))?;

        debug!("Partner user {} has {} referred clients", user_id, clients.len());
        Ok(clients)
    }

    pub async fn dashboard(&self, user_id: i64) -> Result<ClientDashboard> {
        self.store
            .find_client_by_user(user_id)
            .await?
            .ok_or(WalletError::ClientRecordNotFound(user_id))
    }

    pub async fn transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>> {
        let client = self.dashboard(user_id).await?;
        self.store
            .list_transactions(client.client_id, self.list_transactions_limit)
            .await
    }

    pub async fn audit_trail(&self, raw_client_id: &str) -> Result<Vec<AuditLogEntry>> {
        let client_id = parse_client_id(raw_client_id)?;

        if self.store.get_client(client_id).await?.is_none() {
            return Err(WalletError::ClientNotFound(client_id));
        }

        self.store
            .list_audit_entries(client_id, self.list_transactions_limit)
            .await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}
