//! Read-only aggregates over the projected invoices and payments.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use feeledger_billing::{InvoiceStatus, PaymentMethod};
use feeledger_core::Money;
use feeledger_events::{EventBus, EventEnvelope};

use crate::engine::{BillingContext, BillingEngine, BillingResult};
use crate::event_store::EventStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusTotals {
    pub count: usize,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub due_amount: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvoiceStats {
    pub by_status: BTreeMap<InvoiceStatus, StatusTotals>,
    pub overall: StatusTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MethodTotals {
    pub count: usize,
    pub amount: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DayTotals {
    pub count: usize,
    pub amount: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaymentStats {
    pub by_method: BTreeMap<PaymentMethod, MethodTotals>,
    pub by_day: BTreeMap<NaiveDate, DayTotals>,
    pub count: usize,
    pub total_amount: Money,
}

/// Inclusive payment-date window; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

impl StatusTotals {
    fn add(&mut self, total: Money, paid: Money, due: Money) -> BillingResult<()> {
        self.count += 1;
        self.total_amount = Money::try_sum([self.total_amount, total])?;
        self.paid_amount = Money::try_sum([self.paid_amount, paid])?;
        self.due_amount = Money::try_sum([self.due_amount, due])?;
        Ok(())
    }
}

impl<S, B> BillingEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Invoice totals grouped by status derived at the current clock.
    pub fn invoice_stats(&self, ctx: &BillingContext) -> BillingResult<InvoiceStats> {
        let now = self.clock.now();
        let mut stats = InvoiceStats::default();
        for rm in self.projections.invoices.list(ctx.tenant_id) {
            let rm = rm.refreshed(now);
            stats
                .by_status
                .entry(rm.status)
                .or_default()
                .add(rm.total_amount, rm.paid_amount, rm.due_amount)?;
            stats
                .overall
                .add(rm.total_amount, rm.paid_amount, rm.due_amount)?;
        }
        Ok(stats)
    }

    /// Collections by method and by payment date; voided payments are excluded.
    pub fn payment_stats(
        &self,
        ctx: &BillingContext,
        range: Option<DateRange>,
    ) -> BillingResult<PaymentStats> {
        let range = range.unwrap_or_default();
        let mut stats = PaymentStats::default();
        for p in self.projections.payments.list(ctx.tenant_id) {
            if p.is_voided() || !range.contains(p.payment.payment_date) {
                continue;
            }
            let amount = p.payment.amount;

            let method = stats.by_method.entry(p.payment.method).or_default();
            method.count += 1;
            method.amount = Money::try_sum([method.amount, amount])?;

            let day = stats.by_day.entry(p.payment.payment_date).or_default();
            day.count += 1;
            day.amount = Money::try_sum([day.amount, amount])?;

            stats.count += 1;
            stats.total_amount = Money::try_sum([stats.total_amount, amount])?;
        }
        Ok(stats)
    }
}
