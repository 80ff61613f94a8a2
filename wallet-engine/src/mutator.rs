//! Balance mutation protocol.
//!
//! An adjustment is validated completely before any connection is taken.
//! Inside the unit of work the client row is locked, the new balance is
//! computed with exact decimal arithmetic, and the balance update, the audit
//! entry and the ledger entry are committed together or not at all.

use crate::errors::{Result, WalletError};
use crate::ledger::{run_in_unit_of_work, LedgerStore, LedgerTx};
use crate::metrics;
use crate::models::{
    AdjustBalanceRequest, BalanceAdjustDetails, BalanceAdjustment, NewAuditEntry, NewTransaction,
    ACTION_BALANCE_ADJUST,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const MIN_REASON_CHARS: usize = 3;

/// Storage scale of balance columns
const MONEY_SCALE: u32 = 2;

/// Largest magnitude a `NUMERIC(15,2)` balance column holds
const MAX_STORED_BALANCE: Decimal = dec!(9999999999999.99);

/// A fully validated adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustBalanceCommand {
    pub client_id: i64,
    pub amount: Decimal,
    pub reason: String,
}

impl AdjustBalanceCommand {
    /// Validate in order: field presence, numeric parse, reason length.
    pub fn parse(
        raw_client_id: &str,
        request: AdjustBalanceRequest,
        max_adjustment: Decimal,
    ) -> Result<Self> {
        let client_id = parse_client_id(raw_client_id)?;

        let amount = match request.amount {
            None | Some(Value::Null) => {
                return Err(WalletError::Validation("Amount is required".to_string()))
            }
            Some(value) => value,
        };

        let reason = match request.reason {
            Some(Value::String(reason)) => reason,
            _ => {
                return Err(WalletError::Validation(
                    "Reason is required and must be at least 3 characters".to_string(),
                ))
            }
        };

        let amount = parse_amount(&amount)?;

        if amount.is_zero() {
            return Err(WalletError::Validation(
                "Amount must be non-zero".to_string(),
            ));
        }

        if amount.normalize().scale() > MONEY_SCALE {
            return Err(WalletError::Validation(format!(
                "Amount supports at most {} decimal places",
                MONEY_SCALE
            )));
        }

        if amount.abs() > max_adjustment {
            return Err(WalletError::Validation(format!(
                "Amount exceeds the maximum adjustment of {}",
                max_adjustment
            )));
        }

        let reason = reason.trim();
        if reason.chars().count() < MIN_REASON_CHARS {
            return Err(WalletError::Validation(
                "Reason is required and must be at least 3 characters".to_string(),
            ));
        }

        Ok(Self {
            client_id,
            amount,
            reason: reason.to_string(),
        })
    }
}

pub(crate) fn parse_client_id(raw: &str) -> Result<i64> {
    match raw.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(WalletError::Validation(format!("Invalid client id: {}", raw))),
    }
}

/// JSON numbers go through their shortest decimal text rather than an `f64`
/// cast, so `0.1` stays exactly `0.1`.
fn parse_amount(value: &Value) -> Result<Decimal> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        _ => return Err(WalletError::Validation("Amount must be a valid number".to_string())),
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| WalletError::Validation("Amount must be a valid number".to_string()))
}

pub struct BalanceMutator {
    store: Arc<dyn LedgerStore>,
}

impl BalanceMutator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Apply a validated adjustment on behalf of `acting_user_id`.
    ///
    /// Concurrent calls for the same client are serialized by the row lock;
    /// each one observes the balance committed by its predecessor. Failures
    /// are never retried here.
    pub async fn adjust_balance(
        &self,
        command: &AdjustBalanceCommand,
        acting_user_id: i64,
    ) -> Result<BalanceAdjustment> {
        let started = Instant::now();
        let work = command.clone();

        let outcome = run_in_unit_of_work(self.store.as_ref(), move |tx| {
            Box::pin(async move { apply_adjustment(tx, &work, acting_user_id).await })
        })
        .await;

        metrics::observe_adjustment(&outcome, started.elapsed());

        match &outcome {
            Ok(adjustment) => info!(
                client_id = adjustment.client_id,
                acting_user_id,
                amount = %command.amount,
                old_balance = %adjustment.old_balance,
                new_balance = %adjustment.new_balance,
                "Balance adjusted"
            ),
            Err(err) => warn!(
                client_id = command.client_id,
                acting_user_id,
                amount = %command.amount,
                error = %err,
                kind = ?err.kind(),
                "Balance adjustment rolled back"
            ),
        }

        outcome
    }
}

async fn apply_adjustment(
    tx: &mut dyn LedgerTx,
    command: &AdjustBalanceCommand,
    acting_user_id: i64,
) -> Result<BalanceAdjustment> {
    let old_balance = tx
        .lock_client_balance(command.client_id)
        .await?
        .ok_or(WalletError::ClientNotFound(command.client_id))?;

    let new_balance = old_balance
        .checked_add(command.amount)
        .filter(|balance| balance.abs() <= MAX_STORED_BALANCE)
        .ok_or_else(|| WalletError::Validation("Resulting balance is out of range".to_string()))?;

    tx.update_balance(command.client_id, new_balance).await?;

    let details = BalanceAdjustDetails {
        client_id: command.client_id,
        amount: command.amount,
        old_balance,
        new_balance,
        reason: command.reason.clone(),
    };

    tx.append_audit(NewAuditEntry {
        user_id: acting_user_id,
        action: ACTION_BALANCE_ADJUST.to_string(),
        details: serde_json::to_value(&details)?,
    })
    .await?;

    tx.append_transaction(NewTransaction::adjustment(
        command.client_id,
        command.amount,
        new_balance,
    ))
    .await?;

    Ok(BalanceAdjustment {
        client_id: command.client_id,
        old_balance,
        new_balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn request(amount: Option<Value>, reason: Option<Value>) -> AdjustBalanceRequest {
        AdjustBalanceRequest { amount, reason }
    }

    fn parse(raw_id: &str, body: AdjustBalanceRequest) -> Result<AdjustBalanceCommand> {
        AdjustBalanceCommand::parse(raw_id, body, dec!(1000000))
    }

    #[test]
    fn test_parses_numbers_and_strings_exactly() {
        let cmd = parse("7", request(Some(json!(100.10)), Some(json!("initial deposit")))).unwrap();
        assert_eq!(cmd.amount, dec!(100.10));
        assert_eq!(cmd.client_id, 7);

        let cmd = parse("7", request(Some(json!("-30.00")), Some(json!("  fee  ")))).unwrap();
        assert_eq!(cmd.amount, dec!(-30.00));
        assert_eq!(cmd.reason, "fee");
    }

    #[test]
    fn test_presence_checked_before_format() {
        let err = parse("7", request(None, None)).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Amount is required");

        let err = parse("7", request(Some(json!("abc")), None)).unwrap_err();
        assert!(err.to_string().contains("Reason is required"));

        let err = parse("7", request(Some(json!("abc")), Some(json!("ok")))).unwrap_err();
        assert!(err.to_string().contains("valid number"));
    }

    #[test]
    fn test_rejects_short_reason() {
        let err = parse("7", request(Some(json!(10)), Some(json!("ok")))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = parse("7", request(Some(json!(10)), Some(json!("  a  ")))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_rejects_non_numeric_amounts() {
        for bad in [json!("NaN"), json!("inf"), json!(""), json!(true), json!([1])] {
            let err = parse("7", request(Some(bad), Some(json!("manual")))).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_rejects_zero_and_sub_cent_amounts() {
        let err = parse("7", request(Some(json!("0.00")), Some(json!("manual")))).unwrap_err();
        assert!(err.to_string().contains("non-zero"));

        let err = parse("7", request(Some(json!("1.005")), Some(json!("manual")))).unwrap_err();
        assert!(err.to_string().contains("decimal places"));

        // Trailing zeros beyond the scale are fine.
        assert!(parse("7", request(Some(json!("1.500")), Some(json!("manual")))).is_ok());
    }

    #[test]
    fn test_rejects_amount_above_limit() {
        let err = parse("7", request(Some(json!("-1000000.01")), Some(json!("manual")))).unwrap_err();
        assert!(err.to_string().contains("maximum adjustment"));
    }

    #[test]
    fn test_rejects_malformed_client_id() {
        for raw in ["abc", "0", "-4", ""] {
            let err = parse(raw, request(Some(json!(1)), Some(json!("manual")))).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }
}
