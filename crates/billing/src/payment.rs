use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use feeledger_core::{AccountId, AggregateId, Money, TenantId, UserId};

use crate::invoice::InvoiceId;

const PAYMENT_NAMESPACE: Uuid = Uuid::from_u128(0x2c8d_71a4_05be_4f39_a6e2_91d0_7b3c_58f4);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub AggregateId);

impl PaymentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Payment id for a caller-supplied idempotency key on a given invoice.
    pub fn for_idempotency_key(invoice_id: InvoiceId, key: &str) -> Self {
        Self(AggregateId::from_natural_key(
            &PAYMENT_NAMESPACE,
            &format!("{invoice_id}/{key}"),
        ))
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for PaymentId {
    type Err = feeledger_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<AggregateId>().map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Cheque,
    Card,
    BankTransfer,
    Upi,
    Online,
    Other,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Online => "online",
            PaymentMethod::Other => "other",
        }
    }
}

/// Free-form payment metadata (cheque number, transaction reference, ...).
pub type PaymentDetails = BTreeMap<String, String>;

/// Immutable record of money received against one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub details: PaymentDetails,
    pub collected_by: UserId,
    pub idempotency_key: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Payment {
    /// True when a retried submission carries the same amount and method.
    pub fn same_submission(&self, amount: Money, method: PaymentMethod) -> bool {
        self.amount == amount && self.method == method
    }
}

/// Administrative reversal of a recorded payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentVoid {
    pub reason: String,
    pub voided_by: UserId,
    pub voided_at: DateTime<Utc>,
}

/// A payment as held in an invoice's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub payment: Payment,
    pub voided: Option<PaymentVoid>,
}

impl LedgerEntry {
    pub fn is_voided(&self) -> bool {
        self.voided.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_ids_are_scoped_to_invoice() {
        let inv_a = InvoiceId::new(AggregateId::new());
        let inv_b = InvoiceId::new(AggregateId::new());
        assert_eq!(
            PaymentId::for_idempotency_key(inv_a, "retry-1"),
            PaymentId::for_idempotency_key(inv_a, "retry-1")
        );
        assert_ne!(
            PaymentId::for_idempotency_key(inv_a, "retry-1"),
            PaymentId::for_idempotency_key(inv_b, "retry-1")
        );
    }

    #[test]
    fn method_serializes_snake_case() {
        let json = serde_json::to_string(&PaymentMethod::BankTransfer).unwrap();
        assert_eq!(json, "\"bank_transfer\"");
    }
}
