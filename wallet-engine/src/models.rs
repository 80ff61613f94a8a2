use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Audit action tag written by every balance adjustment.
pub const ACTION_BALANCE_ADJUST: &str = "balance_adjust";

#[derive(Debug, Error)]
#[error("unknown {field} value: {value}")]
pub struct UnknownVariant {
    field: &'static str,
    value: String,
}

/// Client status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Active,
    Suspended,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for ClientStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ClientStatus::Active),
            "suspended" => Ok(ClientStatus::Suspended),
            other => Err(UnknownVariant {
                field: "client status",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ClientStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Trade,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Trade => "trade",
        }
    }

    /// Positive deltas are deposits, everything else a withdrawal.
    pub fn for_delta(delta: Decimal) -> Self {
        if delta > Decimal::ZERO {
            TransactionType::Deposit
        } else {
            TransactionType::Withdrawal
        }
    }
}

impl FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "trade" => Ok(TransactionType::Trade),
            other => Err(UnknownVariant {
                field: "transaction type",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for TransactionType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Funded account owned by a user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: i64,
    pub user_id: i64,
    pub partner_id: Option<i64>,
    pub balance: Decimal,
    #[sqlx(try_from = "String")]
    pub status: ClientStatus,
    pub created_at: DateTime<Utc>,
}

/// Immutable ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub client_id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type", try_from = "String")]
    pub kind: TransactionType,
    pub amount: Decimal,
    pub pnl: Decimal,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of a privileged action
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub id: i64,
    pub user_id: i64,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Ledger entry about to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub client_id: i64,
    pub kind: TransactionType,
    pub amount: Decimal,
    pub pnl: Decimal,
    pub balance_after: Decimal,
}

impl NewTransaction {
    /// Deposit or withdrawal entry for a manual adjustment. The amount column
    /// holds the magnitude; the direction lives in the type.
    pub fn adjustment(client_id: i64, delta: Decimal, balance_after: Decimal) -> Self {
        Self {
            client_id,
            kind: TransactionType::for_delta(delta),
            amount: delta.abs(),
            pnl: Decimal::ZERO,
            balance_after,
        }
    }
}

/// Audit entry about to be appended
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub user_id: i64,
    pub action: String,
    pub details: serde_json::Value,
}

/// Detail payload of a `balance_adjust` audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAdjustDetails {
    pub client_id: i64,
    pub amount: Decimal,
    pub old_balance: Decimal,
    pub new_balance: Decimal,
    pub reason: String,
}

/// Balance adjustment request body. Fields stay raw so that presence and
/// numeric format can be reported separately.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AdjustBalanceRequest {
    pub amount: Option<serde_json::Value>,
    pub reason: Option<serde_json::Value>,
}

/// Outcome of a committed adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAdjustment {
    pub client_id: i64,
    pub old_balance: Decimal,
    pub new_balance: Decimal,
}

/// Back-office client listing row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClientListing {
    pub client_id: i64,
    pub username: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ClientStatus,
    pub balance: Decimal,
    pub referral_code: Option<String>,
}

/// Client dashboard view
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClientDashboard {
    pub client_id: i64,
    pub username: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ClientStatus,
    pub balance: Decimal,
}

/// Introducing broker; clients reference it through `partner_id`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Partner {
    pub id: i64,
    pub user_id: i64,
    pub referral_code: String,
    pub created_at: DateTime<Utc>,
}

/// Client row as seen by the partner who referred it
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferredClient {
    pub client_id: i64,
    pub username: Option<String>,
    pub balance: Decimal,
    #[sqlx(try_from = "String")]
    pub status: ClientStatus,
    pub created_at: DateTime<Utc>,
}
