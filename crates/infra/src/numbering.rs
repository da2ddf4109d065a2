//! Human-readable invoice numbers: `<PREFIX>-<academicYear>-<000001>`.
//!
//! Numbers are unique per tenant. A number drawn for an issue that then loses
//! its race is not returned to the pool, so sequences may have gaps.
//!
//! Counters live in memory; the engine advances them past every number already
//! issued in the store (`observe`) before it draws for a tenant.

use std::collections::HashMap;
use std::sync::Mutex;

use feeledger_billing::AcademicYear;
use feeledger_core::TenantId;

pub trait InvoiceNumberSequence: Send + Sync {
    fn next(&self, tenant_id: TenantId, academic_year: &AcademicYear) -> String;

    /// Record an already issued number so `next` never hands it out again.
    fn observe(&self, tenant_id: TenantId, academic_year: &AcademicYear, invoice_number: &str);
}

#[derive(Debug)]
pub struct InMemoryInvoiceNumbers {
    prefix: String,
    counters: Mutex<HashMap<(TenantId, AcademicYear), u64>>,
}

impl InMemoryInvoiceNumbers {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl InvoiceNumberSequence for InMemoryInvoiceNumbers {
    fn next(&self, tenant_id: TenantId, academic_year: &AcademicYear) -> String {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = counters
            .entry((tenant_id, academic_year.clone()))
            .or_insert(0);
        *seq += 1;
        format_invoice_number(&self.prefix, academic_year, *seq)
    }

    fn observe(&self, tenant_id: TenantId, academic_year: &AcademicYear, invoice_number: &str) {
        let Some(issued) = parse_sequence(invoice_number) else {
            return;
        };
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = counters
            .entry((tenant_id, academic_year.clone()))
            .or_insert(0);
        *seq = (*seq).max(issued);
    }
}

/// Trailing sequence of a formatted number, whatever its prefix.
pub fn parse_sequence(invoice_number: &str) -> Option<u64> {
    invoice_number.rsplit('-').next()?.parse().ok()
}

pub fn format_invoice_number(prefix: &str, academic_year: &AcademicYear, seq: u64) -> String {
    format!("{prefix}-{academic_year}-{seq:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_per_tenant_and_year() {
        let numbers = InMemoryInvoiceNumbers::new("INV");
        let y1 = AcademicYear::parse("2025-2026").unwrap();
        let y2 = AcademicYear::parse("2026-2027").unwrap();
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        assert_eq!(numbers.next(t1, &y1), "INV-2025-2026-000001");
        assert_eq!(numbers.next(t1, &y1), "INV-2025-2026-000002");
        assert_eq!(numbers.next(t2, &y1), "INV-2025-2026-000001");
        assert_eq!(numbers.next(t1, &y2), "INV-2026-2027-000001");
    }

    #[test]
    fn observed_numbers_are_never_reissued() {
        let numbers = InMemoryInvoiceNumbers::new("INV");
        let year = AcademicYear::parse("2025-2026").unwrap();
        let tenant = TenantId::new();

        numbers.observe(tenant, &year, "INV-2025-2026-000007");
        numbers.observe(tenant, &year, "INV-2025-2026-000003");
        numbers.observe(tenant, &year, "garbage");
        assert_eq!(numbers.next(tenant, &year), "INV-2025-2026-000008");
    }
}
