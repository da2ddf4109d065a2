use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use feeledger_billing::invoice::InvoiceIssued;
use feeledger_billing::{
    AcademicYear, BillingMonth, BillingPeriod, FeeStructureId, Invoice, InvoiceDiscount,
    InvoiceEvent, InvoiceId, InvoiceItem, InvoiceStatus, Lifecycle, current_status,
};
use feeledger_core::{AccountId, Money, TenantId, UserId};
use feeledger_events::EventEnvelope;

use super::ProjectionError;
use super::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable invoice.
///
/// `due_amount` and `status` are stored as of the last event; call
/// [`InvoiceReadModel::refreshed`] before handing the row to a caller so
/// `overdue` reflects the current clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub account_id: AccountId,
    pub fee_structure_id: FeeStructureId,
    pub period: BillingPeriod,
    pub items: Vec<InvoiceItem>,
    pub subtotal: Money,
    pub discount: Option<InvoiceDiscount>,
    pub late_fee: Money,
    pub previous_due: Money,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub due_amount: Money,
    pub due_date: DateTime<Utc>,
    pub status: InvoiceStatus,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub remarks: Option<String>,
    pub issued_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceReadModel {
    pub fn from_issued(e: InvoiceIssued) -> Self {
        let at = e.occurred_at;
        let mut rm = Self {
            invoice_id: e.invoice_id,
            invoice_number: e.invoice_number,
            account_id: e.account_id,
            fee_structure_id: e.fee_structure_id,
            period: e.period,
            items: e.items,
            subtotal: e.subtotal,
            discount: None,
            late_fee: Money::ZERO,
            previous_due: Money::ZERO,
            total_amount: e.total_amount,
            paid_amount: Money::ZERO,
            due_amount: e.total_amount,
            due_date: e.due_date,
            status: InvoiceStatus::Pending,
            lifecycle: if e.draft { Lifecycle::Draft } else { Lifecycle::Open },
            remarks: None,
            issued_by: e.issued_by,
            created_at: at,
            updated_at: at,
        };
        rm.rederive(at);
        rm
    }

    /// Snapshot of a rehydrated aggregate; `None` until the invoice is issued.
    pub fn from_invoice(invoice: &Invoice) -> Option<Self> {
        if !invoice.is_created() {
            return None;
        }
        Some(Self {
            invoice_id: invoice.id_typed(),
            invoice_number: invoice.invoice_number().to_string(),
            account_id: invoice.account_id()?,
            fee_structure_id: invoice.fee_structure_id()?,
            period: invoice.period()?.clone(),
            items: invoice.items().to_vec(),
            subtotal: invoice.subtotal(),
            discount: invoice.discount().cloned(),
            late_fee: invoice.late_fee(),
            previous_due: invoice.previous_due(),
            total_amount: invoice.total_amount(),
            paid_amount: invoice.paid_amount(),
            due_amount: invoice.due_amount(),
            due_date: invoice.due_date()?,
            status: invoice.status(),
            lifecycle: invoice.lifecycle(),
            remarks: invoice.remarks().map(str::to_string),
            issued_by: invoice.issued_by()?,
            created_at: invoice.created_at()?,
            updated_at: invoice.updated_at()?,
        })
    }

    pub fn refreshed(mut self, now: DateTime<Utc>) -> Self {
        self.rederive(now);
        self
    }

    fn rederive(&mut self, at: DateTime<Utc>) {
        let derived = current_status(
            self.lifecycle,
            self.total_amount,
            self.paid_amount,
            self.due_date,
            at,
        );
        self.due_amount = derived.due_amount;
        self.status = derived.status;
    }
}

/// List filter; every `Some` field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub account_id: Option<AccountId>,
    pub academic_year: Option<AcademicYear>,
    pub month: Option<BillingMonth>,
    pub fee_structure_id: Option<FeeStructureId>,
}

impl InvoiceFilter {
    fn matches(&self, rm: &InvoiceReadModel) -> bool {
        self.status.is_none_or(|s| rm.status == s)
            && self.account_id.is_none_or(|a| rm.account_id == a)
            && self
                .academic_year
                .as_ref()
                .is_none_or(|y| &rm.period.academic_year == y)
            && self.month.is_none_or(|m| rm.period.month == Some(m))
            && self.fee_structure_id.is_none_or(|f| rm.fee_structure_id == f)
    }
}

#[derive(Debug)]
pub struct InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.store.get(tenant_id, invoice_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<InvoiceReadModel> {
        self.store.list(tenant_id)
    }

    /// Invoices matching `filter`, with status derived at `now`, ordered by number.
    pub fn query(
        &self,
        tenant_id: TenantId,
        filter: &InvoiceFilter,
        now: DateTime<Utc>,
    ) -> Vec<InvoiceReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .map(|rm| rm.refreshed(now))
            .filter(|rm| filter.matches(rm))
            .collect();
        rows.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));
        rows
    }

    /// Number of invoices generated from `structure_id`, in any status.
    pub fn count_for_structure(&self, tenant_id: TenantId, structure_id: FeeStructureId) -> usize {
        self.store
            .list(tenant_id)
            .iter()
            .filter(|rm| rm.fee_structure_id == structure_id)
            .count()
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

        let invoice_id = InvoiceId::new(aggregate_id);
        match ev {
            InvoiceEvent::InvoiceIssued(e) => {
                if e.invoice_id != invoice_id {
                    return Err(ProjectionError::TenantIsolation(
                        "event invoice_id does not match envelope aggregate_id".to_string(),
                    ));
                }
                let rm = InvoiceReadModel::from_issued(e);
                self.store.upsert(tenant_id, invoice_id, rm);
            }
            other => {
                // Later events need the issued row; a missing row means the
                // stream was picked up mid-way and is skipped.
                if let Some(mut rm) = self.store.get(tenant_id, &invoice_id) {
                    let at = match &other {
                        InvoiceEvent::InvoiceFinalized(e) => {
                            rm.lifecycle = Lifecycle::Open;
                            e.occurred_at
                        }
                        InvoiceEvent::PaymentRecorded(e) => {
                            rm.paid_amount = e.new_paid_amount;
                            e.occurred_at
                        }
                        InvoiceEvent::PaymentVoided(e) => {
                            rm.paid_amount = e.new_paid_amount;
                            e.occurred_at
                        }
                        InvoiceEvent::InvoiceUpdated(e) => {
                            rm.due_date = e.due_date;
                            rm.discount = e.discount.clone();
                            rm.late_fee = e.late_fee;
                            rm.previous_due = e.previous_due;
                            rm.remarks = e.remarks.clone();
                            rm.total_amount = e.total_amount;
                            e.occurred_at
                        }
                        InvoiceEvent::InvoiceCancelled(e) => {
                            rm.lifecycle = Lifecycle::Cancelled;
                            if e.reason.is_some() {
                                rm.remarks = e.reason.clone();
                            }
                            e.occurred_at
                        }
                        InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
                    };
                    rm.updated_at = at;
                    rm.rederive(at);
                    self.store.upsert(tenant_id, invoice_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
