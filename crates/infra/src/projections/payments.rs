use serde::Serialize;
use serde_json::Value as JsonValue;

use feeledger_billing::{Invoice, InvoiceEvent, InvoiceId, Payment, PaymentId, PaymentVoid};
use feeledger_core::TenantId;
use feeledger_events::EventEnvelope;

use super::ProjectionError;
use super::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// A payment row, including its reversal if one was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentReadModel {
    #[serde(flatten)]
    pub payment: Payment,
    pub voided: Option<PaymentVoid>,
}

impl PaymentReadModel {
    pub fn is_voided(&self) -> bool {
        self.voided.is_some()
    }
}

#[derive(Debug)]
pub struct PaymentsProjection<S>
where
    S: TenantStore<PaymentId, PaymentReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PaymentsProjection<S>
where
    S: TenantStore<PaymentId, PaymentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, payment_id: &PaymentId) -> Option<PaymentReadModel> {
        self.store.get(tenant_id, payment_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<PaymentReadModel> {
        self.store.list(tenant_id)
    }

    /// Ledger of one invoice in recording order.
    pub fn list_for_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Vec<PaymentReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|p| p.payment.invoice_id == invoice_id)
            .collect();
        rows.sort_by_key(|p| (p.payment.recorded_at, p.payment.payment_id));
        rows
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Invoice::AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.check(tenant_id, aggregate_id, seq)? == CursorCheck::AlreadySeen {
            return Ok(());
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        if ev.tenant_id() != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        match ev {
            InvoiceEvent::PaymentRecorded(e) => {
                self.store.upsert(
                    tenant_id,
                    e.payment.payment_id,
                    PaymentReadModel {
                        payment: e.payment,
                        voided: None,
                    },
                );
            }
            InvoiceEvent::PaymentVoided(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.payment_id) {
                    rm.voided = Some(PaymentVoid {
                        reason: e.reason,
                        voided_by: e.voided_by,
                        voided_at: e.occurred_at,
                    });
                    self.store.upsert(tenant_id, e.payment_id, rm);
                }
            }
            _ => {}
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
