//! Fee billing domain: fee structures, invoices, payments and status derivation.
//!
//! Everything here is pure. Persistence, locking and the cohort directory live
//! in `feeledger-infra`.

pub mod fee_structure;
pub mod invoice;
pub mod payment;
pub mod period;
pub mod status;

pub use fee_structure::{
    annual_total, ComponentType, DefineFeeStructure, DeleteFeeStructure, FeeComponent,
    FeeStructure, FeeStructureCommand, FeeStructureEvent, FeeStructureId, FeeStructurePatch,
    Frequency, LateFeePolicy, UpdateFeeStructure,
};
pub use invoice::{
    CancelInvoice, FinalizeInvoice, Invoice, InvoiceCommand, InvoiceDiscount, InvoiceEvent,
    InvoiceId, InvoiceItem, InvoicePatch, IssueInvoice, RecordPayment, UpdateInvoice, VoidPayment,
};
pub use payment::{LedgerEntry, Payment, PaymentDetails, PaymentId, PaymentMethod, PaymentVoid};
pub use period::{AcademicYear, BillingMonth, BillingPeriod};
pub use status::{current_status, derive_status, DerivedBalance, InvoiceStatus, Lifecycle};
