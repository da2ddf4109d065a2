//! Bulk invoice generation for one cohort and billing period.
//!
//! ```text
//! load structure (held under its stream lock for the whole run)
//!   ↓
//! resolve roster → active accounts
//!   ↓
//! workers pull accounts by index:
//!   invoice exists?  → skipped
//!   build items (per-account discount) → draw number → issue (Exact(0))
//!   lost the issue race → skipped
//!   anything else → per-account failure
//! ```
//!
//! One failure never aborts the batch. Cancellation stops workers from taking
//! new accounts; invoices already issued stay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use feeledger_billing::invoice::InvoiceIssued;
use feeledger_billing::{
    BillingPeriod, FeeComponent, FeeStructure, FeeStructureId, Invoice, InvoiceCommand,
    InvoiceEvent, InvoiceId, InvoiceItem, IssueInvoice,
};
use feeledger_core::AccountId;
use feeledger_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::DispatchError;
use crate::directory::{Account, CohortFilter};
use crate::engine::{decode, BillingContext, BillingEngine, BillingError, BillingResult};
use crate::event_store::EventStore;
use crate::projections::InvoiceReadModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateInvoices {
    pub structure_id: FeeStructureId,
    pub cohort: CohortFilter,
    pub period: BillingPeriod,
    pub due_date: DateTime<Utc>,
    /// Issue as drafts; they take no payments until finalized.
    pub as_draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountFailure {
    pub account_id: AccountId,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationOutcome {
    /// Invoices issued by this run, in roster order.
    pub generated: Vec<InvoiceReadModel>,
    /// Accounts that already had an invoice for the period.
    pub skipped: usize,
    pub failures: Vec<AccountFailure>,
    /// The run was cancelled before every account was visited.
    pub cancelled: bool,
}

enum AccountOutcome {
    Generated(Box<InvoiceReadModel>),
    Skipped,
    Failed(AccountFailure),
}

impl<S, B> BillingEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn generate_invoices(
        &self,
        ctx: &BillingContext,
        request: &GenerateInvoices,
    ) -> BillingResult<GenerationOutcome> {
        self.generate_invoices_with_cancel(ctx, request, &CancellationToken::new())
    }

    #[instrument(
        skip(self, request, cancel),
        fields(
            tenant_id = %ctx.tenant_id,
            structure_id = %request.structure_id,
            cohort = %request.cohort.cohort,
            academic_year = %request.period.academic_year,
        )
    )]
    pub fn generate_invoices_with_cancel(
        &self,
        ctx: &BillingContext,
        request: &GenerateInvoices,
        cancel: &CancellationToken,
    ) -> BillingResult<GenerationOutcome> {
        self.locks.with_lock(ctx.tenant_id, request.structure_id.0, || {
            let structure = self.load_structure(ctx.tenant_id, request.structure_id)?;
            structure.ensure_visible_to(ctx.tenant_id)?;
            if structure.academic_year() != Some(&request.period.academic_year) {
                return Err(BillingError::from(DispatchError::Validation(
                    "billing period is outside the fee structure's academic year".to_string(),
                )));
            }

            let components: Vec<FeeComponent> = structure.periodic_components().cloned().collect();
            if components.is_empty() {
                return Err(BillingError::from(DispatchError::Validation(
                    "fee structure has no monthly or one-time components".to_string(),
                )));
            }

            self.ensure_numbering_seeded(ctx.tenant_id)?;

            let roster: Vec<Account> = self
                .directory
                .resolve_cohort(ctx.tenant_id, &request.cohort)?
                .into_iter()
                .filter(|a| a.active)
                .collect();
            debug!(accounts = roster.len(), "roster resolved");

            let outcome = self.run_workers(ctx, &structure, &components, request, &roster, cancel);
            info!(
                generated = outcome.generated.len(),
                skipped = outcome.skipped,
                failed = outcome.failures.len(),
                cancelled = outcome.cancelled,
                "invoice generation finished"
            );
            Ok(outcome)
        })
    }

    fn run_workers(
        &self,
        ctx: &BillingContext,
        structure: &FeeStructure,
        components: &[FeeComponent],
        request: &GenerateInvoices,
        roster: &[Account],
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<AccountOutcome>>> =
            Mutex::new((0..roster.len()).map(|_| None).collect());
        let workers = self.config.generation_workers.clamp(1, roster.len().max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let idx = next.fetch_add(1, Ordering::SeqCst);
                        let Some(account) = roster.get(idx) else {
                            break;
                        };
                        let result = self.generate_for_account(ctx, structure, components, request, account);
                        let mut slots = match slots.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        slots[idx] = Some(result);
                    }
                });
            }
        });

        let slots = match slots.into_inner() {
            Ok(v) => v,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut outcome = GenerationOutcome::default();
        for slot in slots {
            match slot {
                Some(AccountOutcome::Generated(rm)) => outcome.generated.push(*rm),
                Some(AccountOutcome::Skipped) => outcome.skipped += 1,
                Some(AccountOutcome::Failed(f)) => outcome.failures.push(f),
                None => outcome.cancelled = true,
            }
        }
        outcome
    }

    fn generate_for_account(
        &self,
        ctx: &BillingContext,
        structure: &FeeStructure,
        components: &[FeeComponent],
        request: &GenerateInvoices,
        account: &Account,
    ) -> AccountOutcome {
        let invoice_id = InvoiceId::for_period(ctx.tenant_id, account.account_id, &request.period);
        if self.projections.invoices.get(ctx.tenant_id, &invoice_id).is_some() {
            return AccountOutcome::Skipped;
        }

        let rate = match account.discount_rate() {
            Ok(rate) => rate,
            Err(e) => {
                let e = BillingError::from(e);
                warn!(account_id = %account.account_id, error = %e, "invalid discount rate");
                return failure(account, &e);
            }
        };
        let items: Vec<InvoiceItem> = components
            .iter()
            .map(|c| InvoiceItem::from_component(c, rate))
            .collect();

        let cmd = InvoiceCommand::IssueInvoice(IssueInvoice {
            tenant_id: ctx.tenant_id,
            invoice_id,
            invoice_number: self
                .numbering
                .next(ctx.tenant_id, &request.period.academic_year),
            account_id: account.account_id,
            fee_structure_id: structure.id_typed(),
            period: request.period.clone(),
            items,
            due_date: request.due_date,
            as_draft: request.as_draft,
            issued_by: ctx.actor_id,
            occurred_at: self.clock.now(),
        });

        let committed = match self.execute(
            ctx.tenant_id,
            invoice_id.0,
            Invoice::AGGREGATE_TYPE,
            &cmd,
            false,
            |_, id| Invoice::empty(InvoiceId::new(id)),
        ) {
            Ok(committed) => committed,
            Err(DispatchError::Concurrency(_) | DispatchError::Conflict(_)) => {
                debug!(account_id = %account.account_id, "invoice already issued for period");
                return AccountOutcome::Skipped;
            }
            Err(e) => {
                let e = BillingError::from(e);
                warn!(account_id = %account.account_id, error = %e, "invoice issue failed");
                return failure(account, &e);
            }
        };

        match issued(&committed) {
            Ok(e) => {
                let rm = InvoiceReadModel::from_issued(e).refreshed(self.clock.now());
                AccountOutcome::Generated(Box::new(rm))
            }
            Err(e) => failure(account, &BillingError::from(e)),
        }
    }
}

fn issued(committed: &[crate::event_store::StoredEvent]) -> Result<InvoiceIssued, DispatchError> {
    decode::<InvoiceEvent>(committed)?
        .into_iter()
        .find_map(|ev| match ev {
            InvoiceEvent::InvoiceIssued(e) => Some(e),
            _ => None,
        })
        .ok_or_else(|| DispatchError::InvariantViolation("issue committed no InvoiceIssued event".to_string()))
}

fn failure(account: &Account, e: &BillingError) -> AccountOutcome {
    AccountOutcome::Failed(AccountFailure {
        account_id: account.account_id,
        kind: e.kind(),
        message: e.message(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use feeledger_billing::{AcademicYear, BillingMonth, ComponentType, Frequency, InvoiceStatus};
    use feeledger_core::{FixedClock, Money, TenantId, UserId};

    use super::*;
    use crate::config::BillingConfig;
    use crate::directory::InMemoryCohortDirectory;
    use crate::engine::InMemoryBillingEngine;
    use crate::event_store::InMemoryEventStore;
    use crate::services::DefineStructure;
    use feeledger_events::InMemoryEventBus;

    struct Fixture {
        engine: InMemoryBillingEngine,
        directory: Arc<InMemoryCohortDirectory>,
        ctx: BillingContext,
        structure_id: FeeStructureId,
        now: DateTime<Utc>,
    }

    fn year() -> AcademicYear {
        AcademicYear::parse("2025-2026").unwrap()
    }

    fn fixture(components: Vec<FeeComponent>) -> Fixture {
        let directory = Arc::new(InMemoryCohortDirectory::new());
        let now = Utc::now();
        let engine = InMemoryBillingEngine::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            directory.clone(),
            Arc::new(FixedClock::new(now)),
            BillingConfig::default().with_generation_workers(3),
        );
        let ctx = BillingContext::new(TenantId::new(), UserId::new());
        let structure = engine
            .define_structure(
                &ctx,
                DefineStructure {
                    name: "Grade 5".to_string(),
                    academic_year: year(),
                    cohort_groups: vec![],
                    description: None,
                    components,
                    late_fee: None,
                },
            )
            .unwrap();
        Fixture {
            engine,
            directory,
            ctx,
            structure_id: structure.structure_id,
            now,
        }
    }

    fn monthly(amount: u64) -> FeeComponent {
        FeeComponent {
            name: "Tuition".to_string(),
            component_type: ComponentType::Tuition,
            amount: Money::from_minor(amount),
            frequency: Frequency::Monthly,
            is_mandatory: true,
            due_day: 10,
        }
    }

    fn account(discount: Option<&str>, active: bool) -> Account {
        Account {
            account_id: AccountId::new(),
            name: "student".to_string(),
            group: Some("A".to_string()),
            active,
            discount_percent: discount.map(str::to_string),
        }
    }

    fn request(f: &Fixture) -> GenerateInvoices {
        GenerateInvoices {
            structure_id: f.structure_id,
            cohort: CohortFilter::new("grade-5"),
            period: BillingPeriod::monthly(year(), BillingMonth::new(4).unwrap()),
            due_date: f.now + Duration::days(10),
            as_draft: false,
        }
    }

    #[test]
    fn applies_account_discount() {
        let f = fixture(vec![monthly(500)]);
        f.directory
            .upsert_accounts(f.ctx.tenant_id, "grade-5", [account(Some("10"), true)])
            .unwrap();

        let out = f.engine.generate_invoices(&f.ctx, &request(&f)).unwrap();
        assert_eq!(out.generated.len(), 1);
        let inv = &out.generated[0];
        assert_eq!(inv.items[0].final_amount, Money::from_minor(450));
        assert_eq!(inv.subtotal, Money::from_minor(450));
        assert_eq!(inv.total_amount, Money::from_minor(450));
        assert_eq!(inv.due_amount, Money::from_minor(450));
        assert_eq!(inv.status, InvoiceStatus::Pending);
        assert!(inv.invoice_number.starts_with("INV-2025-2026-"));
    }

    #[test]
    fn rerun_skips_everything() {
        let f = fixture(vec![monthly(500)]);
        f.directory
            .upsert_accounts(
                f.ctx.tenant_id,
                "grade-5",
                (0..5).map(|_| account(None, true)),
            )
            .unwrap();

        let first = f.engine.generate_invoices(&f.ctx, &request(&f)).unwrap();
        assert_eq!(first.generated.len(), 5);
        let second = f.engine.generate_invoices(&f.ctx, &request(&f)).unwrap();
        assert!(second.generated.is_empty());
        assert_eq!(second.skipped, 5);
        assert_eq!(f.engine.dispatcher().store().event_count(), 6);
    }

    #[test]
    fn inactive_accounts_are_ignored_and_bad_rates_fail_alone() {
        let f = fixture(vec![monthly(500)]);
        let bad = account(Some("abc"), true);
        f.directory
            .upsert_accounts(
                f.ctx.tenant_id,
                "grade-5",
                [account(None, true), account(None, false), bad.clone()],
            )
            .unwrap();

        let out = f.engine.generate_invoices(&f.ctx, &request(&f)).unwrap();
        assert_eq!(out.generated.len(), 1);
        assert_eq!(out.skipped, 0);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].account_id, bad.account_id);
        assert_eq!(out.failures[0].kind, "validation_error");
    }

    #[test]
    fn only_monthly_and_one_time_components_are_billed() {
        let mut yearly = monthly(1200);
        yearly.name = "Annual".to_string();
        yearly.frequency = Frequency::Yearly;
        let mut admission = monthly(300);
        admission.name = "Admission".to_string();
        admission.frequency = Frequency::OneTime;
        let f = fixture(vec![monthly(500), yearly, admission]);
        f.directory
            .upsert_accounts(f.ctx.tenant_id, "grade-5", [account(None, true)])
            .unwrap();

        let out = f.engine.generate_invoices(&f.ctx, &request(&f)).unwrap();
        let inv = &out.generated[0];
        assert_eq!(inv.items.len(), 2);
        assert_eq!(inv.total_amount, Money::from_minor(800));
    }

    #[test]
    fn structure_without_periodic_components_is_rejected() {
        let mut yearly = monthly(1200);
        yearly.frequency = Frequency::Yearly;
        let f = fixture(vec![yearly]);
        let err = f.engine.generate_invoices(&f.ctx, &request(&f)).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn cancelled_run_issues_nothing_further() {
        let f = fixture(vec![monthly(500)]);
        f.directory
            .upsert_accounts(f.ctx.tenant_id, "grade-5", (0..4).map(|_| account(None, true)))
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let out = f
            .engine
            .generate_invoices_with_cancel(&f.ctx, &request(&f), &token)
            .unwrap();
        assert!(out.cancelled);
        assert!(out.generated.is_empty());

        let resumed = f.engine.generate_invoices(&f.ctx, &request(&f)).unwrap();
        assert_eq!(resumed.generated.len(), 4);
        assert!(!resumed.cancelled);
    }

    #[test]
    fn unknown_structure_is_not_found() {
        let f = fixture(vec![monthly(500)]);
        let mut req = request(&f);
        req.structure_id = FeeStructureId::new(feeledger_core::AggregateId::new());
        assert_eq!(f.engine.generate_invoices(&f.ctx, &req).unwrap_err().kind(), "not_found");

        let stranger = BillingContext::new(TenantId::new(), UserId::new());
        assert_eq!(
            f.engine.generate_invoices(&stranger, &request(&f)).unwrap_err().kind(),
            "not_found"
        );
    }
}
