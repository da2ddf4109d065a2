//! Billing period: academic year plus an optional month of a recurring cycle.

use core::fmt;

use serde::{Deserialize, Serialize};

use feeledger_core::{AccountId, DomainError, DomainResult, TenantId};

/// Academic year label, e.g. `2025-2026`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcademicYear(String);

impl AcademicYear {
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(DomainError::validation("academic year is required"));
        }
        if raw.len() > 32 {
            return Err(DomainError::validation("academic year is too long"));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '/')
        {
            return Err(DomainError::validation(format!(
                "academic year contains invalid characters: {raw:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AcademicYear {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AcademicYear> for String {
    fn from(value: AcademicYear) -> Self {
        value.0
    }
}

/// Calendar month number (1 = January).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BillingMonth(u8);

impl BillingMonth {
    pub fn new(month: u8) -> DomainResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(DomainError::validation(format!(
                "month must be between 1 and 12 (got {month})"
            )));
        }
        Ok(Self(month))
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for BillingMonth {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BillingMonth> for u8 {
    fn from(value: BillingMonth) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub academic_year: AcademicYear,
    pub month: Option<BillingMonth>,
}

impl BillingPeriod {
    pub fn new(academic_year: AcademicYear, month: Option<BillingMonth>) -> Self {
        Self {
            academic_year,
            month,
        }
    }

    pub fn monthly(academic_year: AcademicYear, month: BillingMonth) -> Self {
        Self::new(academic_year, Some(month))
    }

    /// Natural key of the one invoice an account may hold for this period.
    pub fn invoice_key(&self, tenant_id: TenantId, account_id: AccountId) -> String {
        let month = self
            .month
            .map(|m| m.number().to_string())
            .unwrap_or_else(|| "annual".to_string());
        format!("{tenant_id}/{account_id}/{}/{month}", self.academic_year)
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(m) => write!(f, "{} month {}", self.academic_year, m.number()),
            None => write!(f, "{}", self.academic_year),
        }
    }
}
