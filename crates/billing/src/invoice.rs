use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use feeledger_core::{
    AccountId, Aggregate, AggregateId, AggregateRoot, DiscountRate, DomainError, DomainResult,
    Money, TenantId, UserId,
};
use feeledger_events::Event;

use crate::fee_structure::{ComponentType, FeeComponent, FeeStructureId};
use crate::payment::{LedgerEntry, Payment, PaymentDetails, PaymentId, PaymentMethod, PaymentVoid};
use crate::period::BillingPeriod;
use crate::status::{current_status, DerivedBalance, InvoiceStatus, Lifecycle};

const INVOICE_NAMESPACE: Uuid = Uuid::from_u128(0x9b47_d3e0_18c2_4a6f_b5e9_0c2d_4f71_a83e);

/// Invoice identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The only id an invoice for `(tenant, account, period)` can have.
    ///
    /// Issuing appends with "stream must be empty", so a second issue for the
    /// same period fails at the store instead of creating a duplicate.
    pub fn for_period(tenant_id: TenantId, account_id: AccountId, period: &BillingPeriod) -> Self {
        Self(AggregateId::from_natural_key(
            &INVOICE_NAMESPACE,
            &period.invoice_key(tenant_id, account_id),
        ))
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for InvoiceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<AggregateId>().map(Self)
    }
}

/// Invoice line derived from one fee component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub name: String,
    pub component_type: ComponentType,
    pub amount: Money,
    pub discount: Money,
    pub final_amount: Money,
}

impl InvoiceItem {
    pub fn from_component(component: &FeeComponent, rate: DiscountRate) -> Self {
        let (discount, final_amount) = rate.apply(component.amount);
        Self {
            name: component.name.clone(),
            component_type: component.component_type,
            amount: component.amount,
            discount,
            final_amount,
        }
    }
}

/// Invoice-level discount applied on top of per-item discounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDiscount {
    pub amount: Money,
    pub reason: Option<String>,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    account_id: Option<AccountId>,
    invoice_number: String,
    fee_structure_id: Option<FeeStructureId>,
    period: Option<BillingPeriod>,
    items: Vec<InvoiceItem>,
    subtotal: Money,
    discount: Option<InvoiceDiscount>,
    late_fee: Money,
    previous_due: Money,
    total_amount: Money,
    paid_amount: Money,
    due_amount: Money,
    due_date: Option<DateTime<Utc>>,
    lifecycle: Lifecycle,
    status: InvoiceStatus,
    remarks: Option<String>,
    issued_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    payments: Vec<LedgerEntry>,
    version: u64,
    created: bool,
}

impl Invoice {
    pub const AGGREGATE_TYPE: &'static str = "billing.invoice";

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            account_id: None,
            invoice_number: String::new(),
            fee_structure_id: None,
            period: None,
            items: Vec::new(),
            subtotal: Money::ZERO,
            discount: None,
            late_fee: Money::ZERO,
            previous_due: Money::ZERO,
            total_amount: Money::ZERO,
            paid_amount: Money::ZERO,
            due_amount: Money::ZERO,
            due_date: None,
            lifecycle: Lifecycle::Open,
            status: InvoiceStatus::Pending,
            remarks: None,
            issued_by: None,
            created_at: None,
            updated_at: None,
            payments: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn fee_structure_id(&self) -> Option<FeeStructureId> {
        self.fee_structure_id
    }

    pub fn period(&self) -> Option<&BillingPeriod> {
        self.period.as_ref()
    }

    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn discount(&self) -> Option<&InvoiceDiscount> {
        self.discount.as_ref()
    }

    pub fn late_fee(&self) -> Money {
        self.late_fee
    }

    pub fn previous_due(&self) -> Money {
        self.previous_due
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn due_amount(&self) -> Money {
        self.due_amount
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Status as of the last applied event. Use [`Invoice::balance_at`] for "now".
    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn remarks(&self) -> Option<&str> {
        self.remarks.as_deref()
    }

    pub fn issued_by(&self) -> Option<UserId> {
        self.issued_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn payments(&self) -> &[LedgerEntry] {
        &self.payments
    }

    pub fn find_payment(&self, payment_id: PaymentId) -> Option<&LedgerEntry> {
        self.payments
            .iter()
            .find(|e| e.payment.payment_id == payment_id)
    }

    /// Sum of non-voided payments; always equals `paid_amount`.
    pub fn ledger_total(&self) -> DomainResult<Money> {
        Money::try_sum(
            self.payments
                .iter()
                .filter(|e| !e.is_voided())
                .map(|e| e.payment.amount),
        )
    }

    /// Balance and status re-derived against `now`.
    pub fn balance_at(&self, now: DateTime<Utc>) -> DerivedBalance {
        match self.due_date {
            Some(due_date) => current_status(
                self.lifecycle,
                self.total_amount,
                self.paid_amount,
                due_date,
                now,
            ),
            None => DerivedBalance {
                due_amount: self.due_amount,
                status: self.status,
            },
        }
    }

    fn is_settled(&self) -> bool {
        self.lifecycle == Lifecycle::Open && self.due_amount.is_zero()
    }

    fn rederive(&mut self, at: DateTime<Utc>) {
        if let Some(due_date) = self.due_date {
            let derived = current_status(
                self.lifecycle,
                self.total_amount,
                self.paid_amount,
                due_date,
                at,
            );
            self.due_amount = derived.due_amount;
            self.status = derived.status;
        }
        self.updated_at = Some(at);
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub account_id: AccountId,
    pub fee_structure_id: FeeStructureId,
    pub period: BillingPeriod,
    pub items: Vec<InvoiceItem>,
    pub due_date: DateTime<Utc>,
    /// Issue as `draft`; payments are refused until finalized.
    pub as_draft: bool,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinalizeInvoice (draft -> open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub finalized_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub details: PaymentDetails,
    pub collected_by: UserId,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Administrative edit; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePatch {
    pub due_date: Option<DateTime<Utc>>,
    pub discount: Option<InvoiceDiscount>,
    pub late_fee: Option<Money>,
    pub previous_due: Option<Money>,
    pub remarks: Option<String>,
}

impl InvoicePatch {
    pub fn is_empty(&self) -> bool {
        self.due_date.is_none()
            && self.discount.is_none()
            && self.late_fee.is_none()
            && self.previous_due.is_none()
            && self.remarks.is_none()
    }
}

/// Command: UpdateInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub patch: InvoicePatch,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VoidPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub reason: String,
    pub voided_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    FinalizeInvoice(FinalizeInvoice),
    RecordPayment(RecordPayment),
    UpdateInvoice(UpdateInvoice),
    CancelInvoice(CancelInvoice),
    VoidPayment(VoidPayment),
}

impl InvoiceCommand {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            InvoiceCommand::IssueInvoice(c) => c.tenant_id,
            InvoiceCommand::FinalizeInvoice(c) => c.tenant_id,
            InvoiceCommand::RecordPayment(c) => c.tenant_id,
            InvoiceCommand::UpdateInvoice(c) => c.tenant_id,
            InvoiceCommand::CancelInvoice(c) => c.tenant_id,
            InvoiceCommand::VoidPayment(c) => c.tenant_id,
        }
    }

    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            InvoiceCommand::IssueInvoice(c) => c.invoice_id,
            InvoiceCommand::FinalizeInvoice(c) => c.invoice_id,
            InvoiceCommand::RecordPayment(c) => c.invoice_id,
            InvoiceCommand::UpdateInvoice(c) => c.invoice_id,
            InvoiceCommand::CancelInvoice(c) => c.invoice_id,
            InvoiceCommand::VoidPayment(c) => c.invoice_id,
        }
    }
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub account_id: AccountId,
    pub fee_structure_id: FeeStructureId,
    pub period: BillingPeriod,
    pub items: Vec<InvoiceItem>,
    pub subtotal: Money,
    pub total_amount: Money,
    pub due_date: DateTime<Utc>,
    pub draft: bool,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceFinalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceFinalized {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub finalized_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub new_paid_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceUpdated (carries the full post-edit adjustable state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceUpdated {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub due_date: DateTime<Utc>,
    pub discount: Option<InvoiceDiscount>,
    pub late_fee: Money,
    pub previous_due: Money,
    pub remarks: Option<String>,
    pub total_amount: Money,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentVoided {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub new_paid_amount: Money,
    pub reason: String,
    pub voided_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    InvoiceFinalized(InvoiceFinalized),
    PaymentRecorded(PaymentRecorded),
    InvoiceUpdated(InvoiceUpdated),
    InvoiceCancelled(InvoiceCancelled),
    PaymentVoided(PaymentVoided),
}

impl InvoiceEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.tenant_id,
            InvoiceEvent::InvoiceFinalized(e) => e.tenant_id,
            InvoiceEvent::PaymentRecorded(e) => e.tenant_id,
            InvoiceEvent::InvoiceUpdated(e) => e.tenant_id,
            InvoiceEvent::InvoiceCancelled(e) => e.tenant_id,
            InvoiceEvent::PaymentVoided(e) => e.tenant_id,
        }
    }
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "billing.invoice.issued",
            InvoiceEvent::InvoiceFinalized(_) => "billing.invoice.finalized",
            InvoiceEvent::PaymentRecorded(_) => "billing.invoice.payment_recorded",
            InvoiceEvent::InvoiceUpdated(_) => "billing.invoice.updated",
            InvoiceEvent::InvoiceCancelled(_) => "billing.invoice.cancelled",
            InvoiceEvent::PaymentVoided(_) => "billing.invoice.payment_voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::InvoiceFinalized(e) => e.occurred_at,
            InvoiceEvent::PaymentRecorded(e) => e.occurred_at,
            InvoiceEvent::InvoiceUpdated(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
            InvoiceEvent::PaymentVoided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.account_id = Some(e.account_id);
                self.invoice_number = e.invoice_number.clone();
                self.fee_structure_id = Some(e.fee_structure_id);
                self.period = Some(e.period.clone());
                self.items = e.items.clone();
                self.subtotal = e.subtotal;
                self.total_amount = e.total_amount;
                self.paid_amount = Money::ZERO;
                self.due_date = Some(e.due_date);
                self.lifecycle = if e.draft {
                    Lifecycle::Draft
                } else {
                    Lifecycle::Open
                };
                self.issued_by = Some(e.issued_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
                self.rederive(e.occurred_at);
            }
            InvoiceEvent::InvoiceFinalized(e) => {
                self.lifecycle = Lifecycle::Open;
                self.rederive(e.occurred_at);
            }
            InvoiceEvent::PaymentRecorded(e) => {
                self.payments.push(LedgerEntry {
                    payment: e.payment.clone(),
                    voided: None,
                });
                self.paid_amount = e.new_paid_amount;
                self.rederive(e.occurred_at);
            }
            InvoiceEvent::InvoiceUpdated(e) => {
                self.due_date = Some(e.due_date);
                self.discount = e.discount.clone();
                self.late_fee = e.late_fee;
                self.previous_due = e.previous_due;
                self.remarks = e.remarks.clone();
                self.total_amount = e.total_amount;
                self.rederive(e.occurred_at);
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                self.lifecycle = Lifecycle::Cancelled;
                if e.reason.is_some() {
                    self.remarks = e.reason.clone();
                }
                self.rederive(e.occurred_at);
            }
            InvoiceEvent::PaymentVoided(e) => {
                if let Some(entry) = self
                    .payments
                    .iter_mut()
                    .find(|entry| entry.payment.payment_id == e.payment_id)
                {
                    entry.voided = Some(PaymentVoid {
                        reason: e.reason.clone(),
                        voided_by: e.voided_by,
                        voided_at: e.occurred_at,
                    });
                }
                self.paid_amount = e.new_paid_amount;
                self.rederive(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::FinalizeInvoice(cmd) => self.handle_finalize(cmd),
            InvoiceCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            InvoiceCommand::UpdateInvoice(cmd) => self.handle_update(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
            InvoiceCommand::VoidPayment(cmd) => self.handle_void_payment(cmd),
        }
    }
}

impl Invoice {
    /// Missing invoices and invoices of another tenant are indistinguishable.
    fn ensure_visible_to(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created || self.tenant_id != Some(tenant_id) {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(
                "invoice already exists for this billing period",
            ));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation(
                "cannot issue invoice without items",
            ));
        }
        if cmd.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice number is required"));
        }

        for item in &cmd.items {
            let reconstituted = item
                .discount
                .checked_add(item.final_amount)
                .ok_or_else(|| DomainError::invariant("invoice item amount overflow"))?;
            if reconstituted != item.amount {
                return Err(DomainError::invariant(format!(
                    "invoice item {:?}: discount + final amount must equal amount",
                    item.name
                )));
            }
        }

        let subtotal = Money::try_sum(cmd.items.iter().map(|i| i.final_amount))?;

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            invoice_number: cmd.invoice_number.clone(),
            account_id: cmd.account_id,
            fee_structure_id: cmd.fee_structure_id,
            period: cmd.period.clone(),
            items: cmd.items.clone(),
            subtotal,
            total_amount: subtotal,
            due_date: cmd.due_date,
            draft: cmd.as_draft,
            issued_by: cmd.issued_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finalize(&self, cmd: &FinalizeInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_visible_to(cmd.tenant_id)?;
        if self.lifecycle != Lifecycle::Draft {
            return Err(DomainError::bad_request("invoice is not a draft"));
        }

        Ok(vec![InvoiceEvent::InvoiceFinalized(InvoiceFinalized {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            finalized_by: cmd.finalized_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_visible_to(cmd.tenant_id)?;

        if let Some(key) = cmd.idempotency_key.as_deref() {
            let seen = self
                .payments
                .iter()
                .find(|e| e.payment.idempotency_key.as_deref() == Some(key));
            if let Some(entry) = seen {
                if entry.payment.same_submission(cmd.amount, cmd.method) {
                    return Ok(Vec::new());
                }
                return Err(DomainError::conflict(
                    "idempotency key was already used for a different payment",
                ));
            }
        }
        if self.find_payment(cmd.payment_id).is_some() {
            return Err(DomainError::conflict("payment already recorded"));
        }

        if cmd.amount.is_zero() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        match self.lifecycle {
            Lifecycle::Cancelled => {
                return Err(DomainError::bad_request(
                    "cannot record payment on cancelled invoice",
                ))
            }
            Lifecycle::Draft => {
                return Err(DomainError::bad_request(
                    "cannot record payment on draft invoice",
                ))
            }
            Lifecycle::Open => {}
        }
        if cmd.amount > self.due_amount {
            return Err(DomainError::bad_request("payment exceeds due amount"));
        }

        let new_paid_amount = self
            .paid_amount
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invariant("paid amount overflow"))?;
        let account_id = self
            .account_id
            .ok_or_else(|| DomainError::invariant("issued invoice has no account"))?;

        Ok(vec![InvoiceEvent::PaymentRecorded(PaymentRecorded {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            payment: Payment {
                payment_id: cmd.payment_id,
                tenant_id: cmd.tenant_id,
                account_id,
                invoice_id: cmd.invoice_id,
                amount: cmd.amount,
                method: cmd.method,
                payment_date: cmd.payment_date,
                details: cmd.details.clone(),
                collected_by: cmd.collected_by,
                idempotency_key: cmd.idempotency_key.clone(),
                recorded_at: cmd.occurred_at,
            },
            new_paid_amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_visible_to(cmd.tenant_id)?;

        let patch = &cmd.patch;
        if patch.is_empty() {
            return Err(DomainError::validation("update contains no changes"));
        }
        if self.lifecycle == Lifecycle::Cancelled {
            return Err(DomainError::bad_request("cannot modify cancelled invoice"));
        }
        if self.is_settled() {
            return Err(DomainError::bad_request("cannot modify paid invoice"));
        }

        let due_date = patch
            .due_date
            .or(self.due_date)
            .ok_or_else(|| DomainError::invariant("issued invoice has no due date"))?;
        let discount = patch.discount.clone().or_else(|| self.discount.clone());
        let late_fee = patch.late_fee.unwrap_or(self.late_fee);
        let previous_due = patch.previous_due.unwrap_or(self.previous_due);

        let gross = Money::try_sum([self.subtotal, late_fee, previous_due])?;
        let discount_amount = discount.as_ref().map(|d| d.amount).unwrap_or(Money::ZERO);
        let total_amount = gross
            .checked_sub(discount_amount)
            .ok_or_else(|| DomainError::validation("discount exceeds invoice amount"))?;
        if total_amount < self.paid_amount {
            return Err(DomainError::bad_request(
                "total cannot be reduced below the amount already paid",
            ));
        }

        Ok(vec![InvoiceEvent::InvoiceUpdated(InvoiceUpdated {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            due_date,
            discount,
            late_fee,
            previous_due,
            remarks: patch.remarks.clone().or_else(|| self.remarks.clone()),
            total_amount,
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_visible_to(cmd.tenant_id)?;
        if self.lifecycle == Lifecycle::Cancelled {
            return Err(DomainError::conflict("invoice is already cancelled"));
        }
        if self.is_settled() {
            return Err(DomainError::bad_request("cannot cancel paid invoice"));
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            reason: cmd.reason.clone(),
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void_payment(&self, cmd: &VoidPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_visible_to(cmd.tenant_id)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("void reason is required"));
        }

        let entry = self
            .find_payment(cmd.payment_id)
            .ok_or_else(DomainError::not_found)?;
        if entry.is_voided() {
            return Err(DomainError::conflict("payment is already voided"));
        }

        let amount = entry.payment.amount;
        let new_paid_amount = self
            .paid_amount
            .checked_sub(amount)
            .ok_or_else(|| DomainError::invariant("paid amount underflow"))?;

        Ok(vec![InvoiceEvent::PaymentVoided(PaymentVoided {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            amount,
            new_paid_amount,
            reason: cmd.reason.trim().to_string(),
            voided_by: cmd.voided_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee_structure::Frequency;
    use crate::period::{AcademicYear, BillingMonth};
    use chrono::Duration;
    use proptest::prelude::*;

    fn period() -> BillingPeriod {
        BillingPeriod::monthly(
            AcademicYear::parse("2025-2026").unwrap(),
            BillingMonth::new(4).unwrap(),
        )
    }

    fn tuition(amount: u64) -> FeeComponent {
        FeeComponent {
            name: "Tuition".to_string(),
            component_type: ComponentType::Tuition,
            amount: Money::from_minor(amount),
            frequency: Frequency::Monthly,
            is_mandatory: true,
            due_day: 10,
        }
    }

    fn issue_cmd(
        tenant_id: TenantId,
        amount: u64,
        rate: DiscountRate,
        due_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> IssueInvoice {
        let account_id = AccountId::new();
        IssueInvoice {
            tenant_id,
            invoice_id: InvoiceId::for_period(tenant_id, account_id, &period()),
            invoice_number: "INV-2025-2026-000001".to_string(),
            account_id,
            fee_structure_id: FeeStructureId::new(AggregateId::new()),
            period: period(),
            items: vec![InvoiceItem::from_component(&tuition(amount), rate)],
            due_date,
            as_draft: false,
            issued_by: UserId::new(),
            occurred_at: now,
        }
    }

    fn run(invoice: &mut Invoice, cmd: InvoiceCommand) -> Result<Vec<InvoiceEvent>, DomainError> {
        let events = invoice.handle(&cmd)?;
        for e in &events {
            invoice.apply(e);
        }
        Ok(events)
    }

    fn issued(tenant_id: TenantId, amount: u64, rate: DiscountRate) -> Invoice {
        let now = Utc::now();
        let cmd = issue_cmd(tenant_id, amount, rate, now + Duration::days(10), now);
        let mut inv = Invoice::empty(cmd.invoice_id);
        run(&mut inv, InvoiceCommand::IssueInvoice(cmd)).unwrap();
        inv
    }

    fn pay(inv: &Invoice, amount: u64, key: Option<&str>) -> RecordPayment {
        RecordPayment {
            tenant_id: inv.tenant_id().unwrap(),
            invoice_id: inv.id_typed(),
            payment_id: PaymentId::new(AggregateId::new()),
            amount: Money::from_minor(amount),
            method: PaymentMethod::Cash,
            payment_date: Utc::now().date_naive(),
            details: PaymentDetails::new(),
            collected_by: UserId::new(),
            idempotency_key: key.map(str::to_string),
            occurred_at: Utc::now(),
        }
    }

    fn record(
        inv: &mut Invoice,
        amount: u64,
        key: Option<&str>,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        let cmd = pay(inv, amount, key);
        run(inv, InvoiceCommand::RecordPayment(cmd))
    }

    fn assert_balanced(inv: &Invoice) {
        assert!(inv.paid_amount() <= inv.total_amount());
        assert_eq!(
            inv.due_amount().minor(),
            inv.total_amount().minor() - inv.paid_amount().minor()
        );
        assert_eq!(inv.ledger_total().unwrap(), inv.paid_amount());
    }

    #[test]
    fn ten_percent_discount_on_five_hundred() {
        let inv = issued(TenantId::new(), 500, DiscountRate::from_percent(10).unwrap());
        assert_eq!(inv.items()[0].final_amount, Money::from_minor(450));
        assert_eq!(inv.subtotal(), Money::from_minor(450));
        assert_eq!(inv.total_amount(), Money::from_minor(450));
        assert_eq!(inv.due_amount(), Money::from_minor(450));
        assert_eq!(inv.status(), InvoiceStatus::Pending);
        assert_eq!(inv.version(), 1);
    }

    #[test]
    fn full_payment_marks_paid_and_overpayment_is_rejected() {
        let mut inv = issued(TenantId::new(), 500, DiscountRate::from_percent(10).unwrap());
        record(&mut inv, 450, None).unwrap();
        assert_eq!(inv.paid_amount(), Money::from_minor(450));
        assert!(inv.due_amount().is_zero());
        assert_eq!(inv.status(), InvoiceStatus::Paid);

        let err = record(&mut inv, 100, None).unwrap_err();
        assert_eq!(err, DomainError::bad_request("payment exceeds due amount"));
        assert_eq!(inv.paid_amount(), Money::from_minor(450));
        assert_balanced(&inv);
    }

    #[test]
    fn overdue_then_partial_after_payment() {
        let tenant_id = TenantId::new();
        let now = Utc::now();
        let cmd = issue_cmd(tenant_id, 500, DiscountRate::ZERO, now - Duration::days(3), now);
        let mut inv = Invoice::empty(cmd.invoice_id);
        run(&mut inv, InvoiceCommand::IssueInvoice(cmd)).unwrap();
        assert_eq!(inv.status(), InvoiceStatus::Overdue);

        record(&mut inv, 100, None).unwrap();
        assert_eq!(inv.status(), InvoiceStatus::Partial);
        assert_eq!(inv.due_amount(), Money::from_minor(400));
    }

    #[test]
    fn zero_payment_is_a_validation_error() {
        let mut inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        let err = record(&mut inv, 0, None).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(inv.version(), 1);
    }

    #[test]
    fn reissue_for_same_period_conflicts() {
        let tenant_id = TenantId::new();
        let now = Utc::now();
        let cmd = issue_cmd(tenant_id, 500, DiscountRate::ZERO, now, now);
        let mut inv = Invoice::empty(cmd.invoice_id);
        run(&mut inv, InvoiceCommand::IssueInvoice(cmd.clone())).unwrap();
        let err = inv.handle(&InvoiceCommand::IssueInvoice(cmd)).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn other_tenant_cannot_pay() {
        let inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        let mut cmd = pay(&inv, 10, None);
        cmd.tenant_id = TenantId::new();
        let err = inv.handle(&InvoiceCommand::RecordPayment(cmd)).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn replayed_idempotency_key_emits_nothing() {
        let mut inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        record(&mut inv, 200, Some("k1")).unwrap();

        let events = record(&mut inv, 200, Some("k1")).unwrap();
        assert!(events.is_empty());
        assert_eq!(inv.paid_amount(), Money::from_minor(200));

        let err = record(&mut inv, 250, Some("k1")).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn edit_recomputes_total_and_paid_invoice_is_locked() {
        let mut inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        let update = |inv: &Invoice, patch: InvoicePatch| UpdateInvoice {
            tenant_id: inv.tenant_id().unwrap(),
            invoice_id: inv.id_typed(),
            patch,
            updated_by: UserId::new(),
            occurred_at: Utc::now(),
        };

        let patch = InvoicePatch {
            late_fee: Some(Money::from_minor(50)),
            previous_due: Some(Money::from_minor(100)),
            discount: Some(InvoiceDiscount {
                amount: Money::from_minor(25),
                reason: Some("sibling".to_string()),
            }),
            ..InvoicePatch::default()
        };
        let cmd = update(&inv, patch);
        run(&mut inv, InvoiceCommand::UpdateInvoice(cmd)).unwrap();
        assert_eq!(inv.total_amount(), Money::from_minor(625));
        assert_eq!(inv.due_amount(), Money::from_minor(625));

        record(&mut inv, 625, None).unwrap();
        let cmd = update(
            &inv,
            InvoicePatch {
                remarks: Some("late".to_string()),
                ..InvoicePatch::default()
            },
        );
        let err = run(&mut inv, InvoiceCommand::UpdateInvoice(cmd)).unwrap_err();
        assert_eq!(err, DomainError::bad_request("cannot modify paid invoice"));
    }

    #[test]
    fn discount_larger_than_invoice_is_rejected() {
        let inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        let cmd = UpdateInvoice {
            tenant_id: inv.tenant_id().unwrap(),
            invoice_id: inv.id_typed(),
            patch: InvoicePatch {
                discount: Some(InvoiceDiscount {
                    amount: Money::from_minor(501),
                    reason: None,
                }),
                ..InvoicePatch::default()
            },
            updated_by: UserId::new(),
            occurred_at: Utc::now(),
        };
        let err = inv.handle(&InvoiceCommand::UpdateInvoice(cmd)).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn edit_cannot_drop_total_below_paid() {
        let mut inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        record(&mut inv, 400, None).unwrap();
        let cmd = UpdateInvoice {
            tenant_id: inv.tenant_id().unwrap(),
            invoice_id: inv.id_typed(),
            patch: InvoicePatch {
                discount: Some(InvoiceDiscount {
                    amount: Money::from_minor(200),
                    reason: None,
                }),
                ..InvoicePatch::default()
            },
            updated_by: UserId::new(),
            occurred_at: Utc::now(),
        };
        let err = inv.handle(&InvoiceCommand::UpdateInvoice(cmd)).unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }

    #[test]
    fn cancelled_invoice_refuses_payments() {
        let mut inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        let cancel = CancelInvoice {
            tenant_id: inv.tenant_id().unwrap(),
            invoice_id: inv.id_typed(),
            reason: Some("left school".to_string()),
            cancelled_by: UserId::new(),
            occurred_at: Utc::now(),
        };
        run(&mut inv, InvoiceCommand::CancelInvoice(cancel.clone())).unwrap();
        assert_eq!(inv.status(), InvoiceStatus::Cancelled);

        let err = inv
            .handle(&InvoiceCommand::RecordPayment(pay(&inv, 10, None)))
            .unwrap_err();
        assert_eq!(err.kind(), "bad_request");
        let err = inv.handle(&InvoiceCommand::CancelInvoice(cancel)).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn draft_must_be_finalized_before_payment() {
        let tenant_id = TenantId::new();
        let now = Utc::now();
        let mut cmd = issue_cmd(tenant_id, 500, DiscountRate::ZERO, now + Duration::days(5), now);
        cmd.as_draft = true;
        let mut inv = Invoice::empty(cmd.invoice_id);
        run(&mut inv, InvoiceCommand::IssueInvoice(cmd)).unwrap();
        assert_eq!(inv.status(), InvoiceStatus::Draft);
        assert!(inv.handle(&InvoiceCommand::RecordPayment(pay(&inv, 10, None))).is_err());

        let finalize = FinalizeInvoice {
            tenant_id,
            invoice_id: inv.id_typed(),
            finalized_by: UserId::new(),
            occurred_at: Utc::now(),
        };
        run(&mut inv, InvoiceCommand::FinalizeInvoice(finalize)).unwrap();
        assert_eq!(inv.status(), InvoiceStatus::Pending);
        record(&mut inv, 10, None).unwrap();
        assert_eq!(inv.status(), InvoiceStatus::Partial);
    }

    #[test]
    fn voiding_a_payment_restores_the_balance() {
        let mut inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        let payment = pay(&inv, 500, None);
        let payment_id = payment.payment_id;
        run(&mut inv, InvoiceCommand::RecordPayment(payment)).unwrap();
        assert_eq!(inv.status(), InvoiceStatus::Paid);

        let void = VoidPayment {
            tenant_id: inv.tenant_id().unwrap(),
            invoice_id: inv.id_typed(),
            payment_id,
            reason: "cheque bounced".to_string(),
            voided_by: UserId::new(),
            occurred_at: Utc::now(),
        };
        run(&mut inv, InvoiceCommand::VoidPayment(void.clone())).unwrap();
        assert_eq!(inv.paid_amount(), Money::ZERO);
        assert_eq!(inv.status(), InvoiceStatus::Pending);
        assert!(inv.payments()[0].is_voided());
        assert_balanced(&inv);

        let err = inv.handle(&InvoiceCommand::VoidPayment(void)).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn balance_at_tracks_the_clock() {
        let inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        let later = inv.due_date().unwrap() + Duration::days(1);
        assert_eq!(inv.balance_at(later).status, InvoiceStatus::Overdue);
    }

    #[test]
    fn ledger_total_reports_overflow_instead_of_dropping_payments() {
        let mut inv = issued(TenantId::new(), 500, DiscountRate::ZERO);
        for _ in 0..2 {
            let cmd = pay(&inv, 1, None);
            let payment = Payment {
                payment_id: cmd.payment_id,
                tenant_id: cmd.tenant_id,
                account_id: inv.account_id().unwrap(),
                invoice_id: cmd.invoice_id,
                amount: Money::from_minor(u64::MAX / 2 + 1),
                method: cmd.method,
                payment_date: cmd.payment_date,
                details: cmd.details,
                collected_by: cmd.collected_by,
                idempotency_key: None,
                recorded_at: cmd.occurred_at,
            };
            inv.apply(&InvoiceEvent::PaymentRecorded(PaymentRecorded {
                tenant_id: cmd.tenant_id,
                invoice_id: cmd.invoice_id,
                payment,
                new_paid_amount: inv.paid_amount(),
                occurred_at: cmd.occurred_at,
            }));
        }
        let err = inv.ledger_total().unwrap_err();
        assert_eq!(err.kind(), "invariant_violation");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of payments is attempted, accepted ones
        /// never push `paid` past `total` and the ledger reconciles.
        #[test]
        fn balance_invariant_holds_for_any_payment_sequence(
            total in 1u64..100_000u64,
            attempts in proptest::collection::vec(0u64..60_000u64, 1..20),
        ) {
            let mut inv = issued(TenantId::new(), total, DiscountRate::ZERO);
            for amount in attempts {
                let before = inv.paid_amount();
                match record(&mut inv, amount, None) {
                    Ok(_) => prop_assert_eq!(inv.paid_amount().minor(), before.minor() + amount),
                    Err(_) => prop_assert_eq!(inv.paid_amount(), before),
                }
                prop_assert!(inv.paid_amount() <= inv.total_amount());
                prop_assert_eq!(
                    inv.due_amount().minor(),
                    inv.total_amount().minor() - inv.paid_amount().minor()
                );
                prop_assert_eq!(inv.ledger_total().unwrap(), inv.paid_amount());
            }
        }
    }
}
