//! Engine operations, one module per billing concern.

pub mod catalog;
pub mod generator;
pub mod ledger;
pub mod reporting;

pub use catalog::DefineStructure;
pub use generator::{AccountFailure, GenerateInvoices, GenerationOutcome};
pub use ledger::RecordPaymentRequest;
pub use reporting::{
    DateRange, DayTotals, InvoiceStats, MethodTotals, PaymentStats, StatusTotals,
};
