//! Payment ledger and administrative invoice operations.

use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use feeledger_billing::{
    CancelInvoice, FinalizeInvoice, Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoicePatch,
    Payment, PaymentDetails, PaymentId, PaymentMethod, RecordPayment, UpdateInvoice, VoidPayment,
};
use feeledger_core::{AggregateId, Money};
use feeledger_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::DispatchError;
use crate::engine::{decode, BillingContext, BillingEngine, BillingError, BillingResult};
use crate::event_store::EventStore;
use crate::projections::{InvoiceFilter, InvoiceReadModel, PaymentReadModel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaymentRequest {
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub method: PaymentMethod,
    /// Defaults to today (per the engine clock).
    pub payment_date: Option<NaiveDate>,
    pub details: PaymentDetails,
    /// Retries carrying the same key return the original payment.
    pub idempotency_key: Option<String>,
}

impl<S, B> BillingEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    #[instrument(
        skip(self, request),
        fields(tenant_id = %ctx.tenant_id, invoice_id = %request.invoice_id, amount = request.amount.minor())
    )]
    pub fn record_payment(
        &self,
        ctx: &BillingContext,
        request: RecordPaymentRequest,
    ) -> BillingResult<Payment> {
        let invoice_id = request.invoice_id;
        let key = request
            .idempotency_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let payment_id = match key.as_deref() {
            Some(k) => PaymentId::for_idempotency_key(invoice_id, k),
            None => PaymentId::new(AggregateId::new()),
        };
        let now = self.clock.now();

        let cmd = InvoiceCommand::RecordPayment(RecordPayment {
            tenant_id: ctx.tenant_id,
            invoice_id,
            payment_id,
            amount: request.amount,
            method: request.method,
            payment_date: request.payment_date.unwrap_or_else(|| now.date_naive()),
            details: request.details,
            collected_by: ctx.actor_id,
            idempotency_key: key.clone(),
            occurred_at: now,
        });
        let committed = self.execute_invoice(ctx, invoice_id, &cmd)?;

        if committed.is_empty() {
            // Replayed key: hand back what the first submission recorded.
            let invoice = self.load_invoice(ctx.tenant_id, invoice_id)?;
            let original = invoice
                .payments()
                .iter()
                .find(|e| e.payment.idempotency_key == key)
                .map(|e| e.payment.clone())
                .ok_or_else(|| {
                    DispatchError::InvariantViolation("deduplicated payment not in ledger".to_string())
                })?;
            info!(payment_id = %original.payment_id, "duplicate payment submission ignored");
            return Ok(original);
        }

        let payment = decode::<InvoiceEvent>(&committed)?
            .into_iter()
            .find_map(|ev| match ev {
                InvoiceEvent::PaymentRecorded(e) => Some(e.payment),
                _ => None,
            })
            .ok_or_else(|| {
                DispatchError::InvariantViolation("payment committed no PaymentRecorded event".to_string())
            })?;
        info!(payment_id = %payment.payment_id, method = payment.method.as_str(), "payment recorded");
        Ok(payment)
    }

    #[instrument(skip(self, patch), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub fn update_invoice(
        &self,
        ctx: &BillingContext,
        invoice_id: InvoiceId,
        patch: InvoicePatch,
    ) -> BillingResult<InvoiceReadModel> {
        let cmd = InvoiceCommand::UpdateInvoice(UpdateInvoice {
            tenant_id: ctx.tenant_id,
            invoice_id,
            patch,
            updated_by: ctx.actor_id,
            occurred_at: self.clock.now(),
        });
        self.execute_invoice(ctx, invoice_id, &cmd)?;
        let view = self.invoice_view(ctx, invoice_id)?;
        info!(total_amount = view.total_amount.minor(), "invoice updated");
        Ok(view)
    }

    #[instrument(skip(self, reason), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub fn cancel_invoice(
        &self,
        ctx: &BillingContext,
        invoice_id: InvoiceId,
        reason: Option<String>,
    ) -> BillingResult<InvoiceReadModel> {
        let cmd = InvoiceCommand::CancelInvoice(CancelInvoice {
            tenant_id: ctx.tenant_id,
            invoice_id,
            reason,
            cancelled_by: ctx.actor_id,
            occurred_at: self.clock.now(),
        });
        self.execute_invoice(ctx, invoice_id, &cmd)?;
        info!("invoice cancelled");
        self.invoice_view(ctx, invoice_id)
    }

    #[instrument(skip(self), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub fn finalize_invoice(
        &self,
        ctx: &BillingContext,
        invoice_id: InvoiceId,
    ) -> BillingResult<InvoiceReadModel> {
        let cmd = InvoiceCommand::FinalizeInvoice(FinalizeInvoice {
            tenant_id: ctx.tenant_id,
            invoice_id,
            finalized_by: ctx.actor_id,
            occurred_at: self.clock.now(),
        });
        self.execute_invoice(ctx, invoice_id, &cmd)?;
        info!("invoice finalized");
        self.invoice_view(ctx, invoice_id)
    }

    #[instrument(
        skip(self, reason),
        fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id, payment_id = %payment_id)
    )]
    pub fn void_payment(
        &self,
        ctx: &BillingContext,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
        reason: String,
    ) -> BillingResult<InvoiceReadModel> {
        let cmd = InvoiceCommand::VoidPayment(VoidPayment {
            tenant_id: ctx.tenant_id,
            invoice_id,
            payment_id,
            reason,
            voided_by: ctx.actor_id,
            occurred_at: self.clock.now(),
        });
        self.execute_invoice(ctx, invoice_id, &cmd)?;
        let view = self.invoice_view(ctx, invoice_id)?;
        info!(paid_amount = view.paid_amount.minor(), "payment voided");
        Ok(view)
    }

    /// Invoice as currently projected, status derived against the clock.
    pub fn get_invoice(
        &self,
        ctx: &BillingContext,
        invoice_id: InvoiceId,
    ) -> BillingResult<InvoiceReadModel> {
        self.projections
            .invoices
            .get(ctx.tenant_id, &invoice_id)
            .map(|rm| rm.refreshed(self.clock.now()))
            .ok_or_else(BillingError::not_found)
    }

    pub fn list_invoices(&self, ctx: &BillingContext, filter: &InvoiceFilter) -> Vec<InvoiceReadModel> {
        self.projections
            .invoices
            .query(ctx.tenant_id, filter, self.clock.now())
    }

    pub fn list_payments(
        &self,
        ctx: &BillingContext,
        invoice_id: InvoiceId,
    ) -> BillingResult<Vec<PaymentReadModel>> {
        if self.projections.invoices.get(ctx.tenant_id, &invoice_id).is_none() {
            return Err(BillingError::not_found());
        }
        Ok(self
            .projections
            .payments
            .list_for_invoice(ctx.tenant_id, invoice_id))
    }

    fn execute_invoice(
        &self,
        ctx: &BillingContext,
        invoice_id: InvoiceId,
        cmd: &InvoiceCommand,
    ) -> Result<Vec<crate::event_store::StoredEvent>, DispatchError> {
        self.execute(
            ctx.tenant_id,
            invoice_id.0,
            Invoice::AGGREGATE_TYPE,
            cmd,
            true,
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )
    }

    /// State straight from the stream, independent of projection lag.
    fn invoice_view(
        &self,
        ctx: &BillingContext,
        invoice_id: InvoiceId,
    ) -> BillingResult<InvoiceReadModel> {
        let invoice = self.load_invoice(ctx.tenant_id, invoice_id)?;
        InvoiceReadModel::from_invoice(&invoice)
            .map(|rm| rm.refreshed(self.clock.now()))
            .ok_or_else(BillingError::not_found)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};
    use feeledger_billing::{
        AcademicYear, BillingMonth, BillingPeriod, ComponentType, FeeComponent, Frequency,
        InvoiceDiscount, InvoiceStatus,
    };
    use feeledger_core::{AccountId, FixedClock, TenantId, UserId};
    use feeledger_events::InMemoryEventBus;

    use super::*;
    use crate::config::BillingConfig;
    use crate::directory::{Account, CohortFilter, InMemoryCohortDirectory};
    use crate::engine::InMemoryBillingEngine;
    use crate::event_store::InMemoryEventStore;
    use crate::services::{DefineStructure, GenerateInvoices};

    struct Fixture {
        engine: InMemoryBillingEngine,
        clock: Arc<FixedClock>,
        ctx: BillingContext,
        invoice_id: InvoiceId,
    }

    fn fixture(as_draft: bool) -> Fixture {
        let directory = Arc::new(InMemoryCohortDirectory::new());
        let now: DateTime<Utc> = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let engine = InMemoryBillingEngine::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            directory.clone(),
            clock.clone(),
            BillingConfig::default(),
        );
        let ctx = BillingContext::new(TenantId::new(), UserId::new());
        let year = AcademicYear::parse("2025-2026").unwrap();
        let structure = engine
            .define_structure(
                &ctx,
                DefineStructure {
                    name: "Grade 5".to_string(),
                    academic_year: year.clone(),
                    cohort_groups: vec![],
                    description: None,
                    components: vec![FeeComponent {
                        name: "Tuition".to_string(),
                        component_type: ComponentType::Tuition,
                        amount: Money::from_minor(500),
                        frequency: Frequency::Monthly,
                        is_mandatory: true,
                        due_day: 10,
                    }],
                    late_fee: None,
                },
            )
            .unwrap();
        directory
            .upsert_accounts(
                ctx.tenant_id,
                "grade-5",
                [Account {
                    account_id: AccountId::new(),
                    name: "Ravi".to_string(),
                    group: None,
                    active: true,
                    discount_percent: Some("10".to_string()),
                }],
            )
            .unwrap();
        let out = engine
            .generate_invoices(
                &ctx,
                &GenerateInvoices {
                    structure_id: structure.structure_id,
                    cohort: CohortFilter::new("grade-5"),
                    period: BillingPeriod::monthly(year, BillingMonth::new(4).unwrap()),
                    due_date: now + Duration::days(10),
                    as_draft,
                },
            )
            .unwrap();
        let invoice_id = out.generated[0].invoice_id;
        Fixture {
            engine,
            clock,
            ctx,
            invoice_id,
        }
    }

    fn payment(f: &Fixture, amount: u64, key: Option<&str>) -> RecordPaymentRequest {
        RecordPaymentRequest {
            invoice_id: f.invoice_id,
            amount: Money::from_minor(amount),
            method: PaymentMethod::Cash,
            payment_date: None,
            details: PaymentDetails::new(),
            idempotency_key: key.map(str::to_string),
        }
    }

    #[test]
    fn full_payment_settles_and_overpayment_is_rejected() {
        let f = fixture(false);
        f.engine.record_payment(&f.ctx, payment(&f, 450, None)).unwrap();
        let inv = f.engine.get_invoice(&f.ctx, f.invoice_id).unwrap();
        assert_eq!(inv.paid_amount, Money::from_minor(450));
        assert!(inv.due_amount.is_zero());
        assert_eq!(inv.status, InvoiceStatus::Paid);

        let err = f.engine.record_payment(&f.ctx, payment(&f, 100, None)).unwrap_err();
        assert_eq!(err.kind(), "bad_request");
        assert_eq!(err.message(), "payment exceeds due amount");
        let inv = f.engine.get_invoice(&f.ctx, f.invoice_id).unwrap();
        assert_eq!(inv.paid_amount, Money::from_minor(450));
    }

    #[test]
    fn overdue_then_partial() {
        let f = fixture(false);
        f.clock.advance(Duration::days(11));
        assert_eq!(
            f.engine.get_invoice(&f.ctx, f.invoice_id).unwrap().status,
            InvoiceStatus::Overdue
        );
        f.engine.record_payment(&f.ctx, payment(&f, 50, None)).unwrap();
        let inv = f.engine.get_invoice(&f.ctx, f.invoice_id).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Partial);
        assert_eq!(inv.due_amount, Money::from_minor(400));
    }

    #[test]
    fn idempotent_retry_returns_original_payment() {
        let f = fixture(false);
        let first = f.engine.record_payment(&f.ctx, payment(&f, 100, Some("k-1"))).unwrap();
        let again = f.engine.record_payment(&f.ctx, payment(&f, 100, Some("k-1"))).unwrap();
        assert_eq!(first, again);
        assert_eq!(f.engine.list_payments(&f.ctx, f.invoice_id).unwrap().len(), 1);
        assert_eq!(
            f.engine.get_invoice(&f.ctx, f.invoice_id).unwrap().paid_amount,
            Money::from_minor(100)
        );

        let err = f
            .engine
            .record_payment(&f.ctx, payment(&f, 200, Some("k-1")))
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn paid_invoice_cannot_be_edited_or_cancelled() {
        let f = fixture(false);
        f.engine.record_payment(&f.ctx, payment(&f, 450, None)).unwrap();
        let patch = InvoicePatch {
            remarks: Some("late".to_string()),
            ..Default::default()
        };
        let err = f.engine.update_invoice(&f.ctx, f.invoice_id, patch).unwrap_err();
        assert_eq!(err.message(), "cannot modify paid invoice");
        let err = f.engine.cancel_invoice(&f.ctx, f.invoice_id, None).unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }

    #[test]
    fn discount_patch_recomputes_total() {
        let f = fixture(false);
        let patch = InvoicePatch {
            discount: Some(InvoiceDiscount {
                amount: Money::from_minor(50),
                reason: Some("sibling".to_string()),
            }),
            late_fee: Some(Money::from_minor(25)),
            ..Default::default()
        };
        let inv = f.engine.update_invoice(&f.ctx, f.invoice_id, patch).unwrap();
        assert_eq!(inv.total_amount, Money::from_minor(425));
        assert_eq!(inv.due_amount, Money::from_minor(425));
        assert_eq!(
            f.engine.get_invoice(&f.ctx, f.invoice_id).unwrap().total_amount,
            Money::from_minor(425)
        );
    }

    #[test]
    fn void_restores_balance_and_keeps_the_record() {
        let f = fixture(false);
        let p = f.engine.record_payment(&f.ctx, payment(&f, 450, None)).unwrap();
        let inv = f
            .engine
            .void_payment(&f.ctx, f.invoice_id, p.payment_id, "bounced cheque".to_string())
            .unwrap();
        assert_eq!(inv.paid_amount, Money::ZERO);
        assert_eq!(inv.status, InvoiceStatus::Pending);

        let ledger = f.engine.list_payments(&f.ctx, f.invoice_id).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger[0].is_voided());
    }

    #[test]
    fn drafts_take_payment_only_after_finalize() {
        let f = fixture(true);
        assert_eq!(
            f.engine.get_invoice(&f.ctx, f.invoice_id).unwrap().status,
            InvoiceStatus::Draft
        );
        let err = f.engine.record_payment(&f.ctx, payment(&f, 10, None)).unwrap_err();
        assert_eq!(err.kind(), "bad_request");

        let inv = f.engine.finalize_invoice(&f.ctx, f.invoice_id).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Pending);
        f.engine.record_payment(&f.ctx, payment(&f, 10, None)).unwrap();
    }

    #[test]
    fn cancelled_invoice_rejects_payments() {
        let f = fixture(false);
        let inv = f
            .engine
            .cancel_invoice(&f.ctx, f.invoice_id, Some("withdrawn".to_string()))
            .unwrap();
        assert_eq!(inv.status, InvoiceStatus::Cancelled);
        let err = f.engine.record_payment(&f.ctx, payment(&f, 10, None)).unwrap_err();
        assert_eq!(err.kind(), "bad_request");
        let err = f.engine.cancel_invoice(&f.ctx, f.invoice_id, None).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn other_tenant_cannot_see_or_pay() {
        let f = fixture(false);
        let stranger = BillingContext::new(TenantId::new(), UserId::new());
        assert_eq!(f.engine.get_invoice(&stranger, f.invoice_id).unwrap_err().kind(), "not_found");
        assert_eq!(
            f.engine.list_payments(&stranger, f.invoice_id).unwrap_err().kind(),
            "not_found"
        );
        let err = f.engine.record_payment(&stranger, payment(&f, 10, None)).unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(f.engine.list_invoices(&stranger, &InvoiceFilter::default()).is_empty());
    }
}
