//! Engine configuration.

use tracing::warn;

pub const ENV_INVOICE_PREFIX: &str = "FEELEDGER_INVOICE_PREFIX";
pub const ENV_GENERATION_WORKERS: &str = "FEELEDGER_GENERATION_WORKERS";
pub const ENV_RETRY_LIMIT: &str = "FEELEDGER_RETRY_LIMIT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingConfig {
    /// Leading segment of every invoice number.
    pub invoice_prefix: String,
    /// Threads used by bulk generation.
    pub generation_workers: usize,
    /// Extra attempts for a per-invoice command that lost a concurrent append.
    pub retry_limit: u32,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            invoice_prefix: "INV".to_string(),
            generation_workers: 4,
            retry_limit: 3,
        }
    }
}

impl BillingConfig {
    pub fn with_invoice_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.invoice_prefix = prefix.into();
        self
    }

    pub fn with_generation_workers(mut self, workers: usize) -> Self {
        self.generation_workers = workers.max(1);
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(prefix) = lookup(ENV_INVOICE_PREFIX) {
            let prefix = prefix.trim();
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                warn!(key = ENV_INVOICE_PREFIX, value = prefix, "invalid invoice prefix; using default");
            } else {
                cfg.invoice_prefix = prefix.to_string();
            }
        }

        if let Some(raw) = lookup(ENV_GENERATION_WORKERS) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => cfg.generation_workers = n,
                _ => warn!(key = ENV_GENERATION_WORKERS, value = %raw, "invalid worker count; using default"),
            }
        }

        if let Some(raw) = lookup(ENV_RETRY_LIMIT) {
            match raw.trim().parse::<u32>() {
                Ok(n) => cfg.retry_limit = n,
                Err(_) => warn!(key = ENV_RETRY_LIMIT, value = %raw, "invalid retry limit; using default"),
            }
        }

        cfg
    }
}
