use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use feeledger_billing::{
    AcademicYear, BillingMonth, BillingPeriod, FeeComponent, FeeStructureId, InvoiceStatus,
    LateFeePolicy, PaymentDetails, PaymentMethod,
};
use feeledger_core::{AccountId, Money};
use feeledger_infra::directory::{Account, CohortFilter};
use feeledger_infra::projections::InvoiceFilter;
use feeledger_infra::services::{DefineStructure, GenerateInvoices};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct DefineStructureRequest {
    pub name: String,
    pub academic_year: AcademicYear,
    #[serde(default)]
    pub cohort_groups: Vec<String>,
    pub description: Option<String>,
    pub components: Vec<FeeComponent>,
    pub late_fee: Option<LateFeePolicy>,
}

impl From<DefineStructureRequest> for DefineStructure {
    fn from(body: DefineStructureRequest) -> Self {
        DefineStructure {
            name: body.name,
            academic_year: body.academic_year,
            cohort_groups: body.cohort_groups,
            description: body.description,
            components: body.components,
            late_fee: body.late_fee,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpsertAccountsRequest {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateInvoicesRequest {
    pub structure_id: FeeStructureId,
    pub cohort: String,
    pub group: Option<String>,
    pub academic_year: AcademicYear,
    pub month: Option<BillingMonth>,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub as_draft: bool,
}

impl From<GenerateInvoicesRequest> for GenerateInvoices {
    fn from(body: GenerateInvoicesRequest) -> Self {
        let cohort = match body.group {
            Some(group) => CohortFilter::new(body.cohort).with_group(group),
            None => CohortFilter::new(body.cohort),
        };
        GenerateInvoices {
            structure_id: body.structure_id,
            cohort,
            period: BillingPeriod::new(body.academic_year, body.month),
            due_date: body.due_date,
            as_draft: body.as_draft,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelInvoiceRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentBody {
    /// Minor currency units.
    pub amount: Money,
    pub method: PaymentMethod,
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub details: PaymentDetails,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoidPaymentRequest {
    pub reason: String,
}

// -------------------------
// Query parameters
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct StructureListQuery {
    pub academic_year: Option<AcademicYear>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListQuery {
    pub status: Option<InvoiceStatus>,
    pub account_id: Option<AccountId>,
    pub academic_year: Option<AcademicYear>,
    pub month: Option<BillingMonth>,
    pub fee_structure_id: Option<FeeStructureId>,
}

impl From<InvoiceListQuery> for InvoiceFilter {
    fn from(q: InvoiceListQuery) -> Self {
        InvoiceFilter {
            status: q.status,
            account_id: q.account_id,
            academic_year: q.academic_year,
            month: q.month,
            fee_structure_id: q.fee_structure_id,
        }
    }
}
