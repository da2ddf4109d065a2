//! Invoice status derivation.
//!
//! `derive_status` is the single place where `due_amount` and the payment-driven
//! part of the status are computed. Aggregates call it after every applied event
//! and read models call it again at query time so `overdue` tracks the clock.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feeledger_core::{DomainError, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Partial,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(InvoiceStatus::Draft),
            "pending" => Ok(InvoiceStatus::Pending),
            "partial" => Ok(InvoiceStatus::Partial),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown invoice status: {other:?}"
            ))),
        }
    }
}

/// Lifecycle stage set by explicit commands; everything else is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Draft,
    Open,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedBalance {
    pub due_amount: Money,
    pub status: InvoiceStatus,
}

/// ```text
/// due = total - paid
/// due == 0          -> paid
/// paid > 0          -> partial
/// now > due_date    -> overdue
/// otherwise         -> pending
/// ```
///
/// `paid` above `total` is not representable on a valid invoice; it is clamped
/// so the function stays total.
pub fn derive_status(
    total: Money,
    paid: Money,
    due_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DerivedBalance {
    let due_amount = total.saturating_sub(paid);
    let status = if due_amount.is_zero() {
        InvoiceStatus::Paid
    } else if !paid.is_zero() {
        InvoiceStatus::Partial
    } else if now > due_date {
        InvoiceStatus::Overdue
    } else {
        InvoiceStatus::Pending
    };
    DerivedBalance { due_amount, status }
}

/// Status shown to callers: draft and cancelled are sticky, open invoices derive.
pub fn current_status(
    lifecycle: Lifecycle,
    total: Money,
    paid: Money,
    due_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DerivedBalance {
    let derived = derive_status(total, paid, due_date, now);
    match lifecycle {
        Lifecycle::Open => derived,
        Lifecycle::Draft => DerivedBalance {
            status: InvoiceStatus::Draft,
            ..derived
        },
        Lifecycle::Cancelled => DerivedBalance {
            status: InvoiceStatus::Cancelled,
            ..derived
        },
    }
}
