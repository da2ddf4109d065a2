//! Projections: rebuildable, tenant-isolated read models fed by billing events.
//!
//! Every projection is idempotent under at-least-once delivery (see
//! [`cursor::StreamCursors`]) and ignores aggregate types it does not own.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use feeledger_events::EventEnvelope;

pub mod cursor;
pub mod fee_structures;
pub mod invoices;
pub mod payments;

pub use fee_structures::{FeeStructureReadModel, FeeStructuresProjection};
pub use invoices::{InvoiceFilter, InvoiceReadModel, InvoicesProjection};
pub use payments::{PaymentReadModel, PaymentsProjection};

use crate::read_model::InMemoryTenantStore;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

pub type InMemoryFeeStructures =
    FeeStructuresProjection<Arc<InMemoryTenantStore<feeledger_billing::FeeStructureId, FeeStructureReadModel>>>;
pub type InMemoryInvoices =
    InvoicesProjection<Arc<InMemoryTenantStore<feeledger_billing::InvoiceId, InvoiceReadModel>>>;
pub type InMemoryPayments =
    PaymentsProjection<Arc<InMemoryTenantStore<feeledger_billing::PaymentId, PaymentReadModel>>>;

/// The read side of the billing engine.
#[derive(Debug)]
pub struct BillingProjections {
    pub fee_structures: InMemoryFeeStructures,
    pub invoices: InMemoryInvoices,
    pub payments: InMemoryPayments,
}

impl Default for BillingProjections {
    fn default() -> Self {
        Self::new()
    }
}

impl BillingProjections {
    pub fn new() -> Self {
        Self {
            fee_structures: FeeStructuresProjection::new(Arc::new(InMemoryTenantStore::new())),
            invoices: InvoicesProjection::new(Arc::new(InMemoryTenantStore::new())),
            payments: PaymentsProjection::new(Arc::new(InMemoryTenantStore::new())),
        }
    }

    /// Feed one committed envelope to every projection.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.fee_structures.apply_envelope(envelope)?;
        self.invoices.apply_envelope(envelope)?;
        self.payments.apply_envelope(envelope)?;
        Ok(())
    }

    /// Rebuild every read model for the tenants present in `envelopes`.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
        tenants.sort();
        tenants.dedup();
        for t in tenants {
            self.fee_structures.clear_tenant(t);
            self.invoices.clear_tenant(t);
            self.payments.clear_tenant(t);
        }

        envs.sort_by_key(|e| (e.tenant_id(), e.aggregate_id(), e.sequence_number()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
