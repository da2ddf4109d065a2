//! Cohort directory boundary.
//!
//! Accounts and cohorts are owned by an external system; the billing engine
//! only reads rosters through [`CohortDirectory`].

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use feeledger_core::{AccountId, DiscountRate, DomainResult, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortFilter {
    pub cohort: String,
    /// Narrow the roster to one group (section) of the cohort.
    pub group: Option<String>,
}

impl CohortFilter {
    pub fn new(cohort: impl Into<String>) -> Self {
        Self {
            cohort: cohort.into(),
            group: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Account as reported by the directory.
///
/// `discount_percent` is kept as the raw directory value; a malformed rate
/// fails that one account during generation, not the whole roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub discount_percent: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Account {
    pub fn discount_rate(&self) -> DomainResult<DiscountRate> {
        match self.discount_percent.as_deref() {
            None => Ok(DiscountRate::ZERO),
            Some(raw) if raw.trim().is_empty() => Ok(DiscountRate::ZERO),
            Some(raw) => raw.parse(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("cohort directory unavailable: {0}")]
    Unavailable(String),
}

pub trait CohortDirectory: Send + Sync {
    /// Roster of `filter.cohort` in `tenant_id`, inactive accounts included.
    fn resolve_cohort(
        &self,
        tenant_id: TenantId,
        filter: &CohortFilter,
    ) -> Result<Vec<Account>, DirectoryError>;
}

/// In-memory directory for tests and dev wiring.
#[derive(Debug, Default)]
pub struct InMemoryCohortDirectory {
    inner: RwLock<HashMap<(TenantId, String), Vec<Account>>>,
}

impl InMemoryCohortDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace accounts (matched by `account_id`) in a cohort.
    pub fn upsert_accounts(
        &self,
        tenant_id: TenantId,
        cohort: &str,
        accounts: impl IntoIterator<Item = Account>,
    ) -> Result<(), DirectoryError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| DirectoryError::Unavailable("lock poisoned".to_string()))?;
        let roster = map.entry((tenant_id, cohort.to_string())).or_default();
        for account in accounts {
            match roster.iter_mut().find(|a| a.account_id == account.account_id) {
                Some(existing) => *existing = account,
                None => roster.push(account),
            }
        }
        Ok(())
    }
}

impl CohortDirectory for InMemoryCohortDirectory {
    fn resolve_cohort(
        &self,
        tenant_id: TenantId,
        filter: &CohortFilter,
    ) -> Result<Vec<Account>, DirectoryError> {
        let map = self
            .inner
            .read()
            .map_err(|_| DirectoryError::Unavailable("lock poisoned".to_string()))?;
        let roster = map
            .get(&(tenant_id, filter.cohort.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(match filter.group.as_deref() {
            Some(group) => roster
                .into_iter()
                .filter(|a| a.group.as_deref() == Some(group))
                .collect(),
            None => roster,
        })
    }
}
