//! Domain models for ledger-sync-service.

pub mod classification;
pub mod document;
pub mod plan;
pub mod report;
pub mod statement;
pub mod target;

pub use classification::{Category, Classification, ClassificationMetadata, FeeComponent, FeeKind};
pub use document::{
    DocumentLine, PayrollPayment, PayrollRecord, Reclassification, TaxKind, TaxPayment,
};
pub use plan::{
    BusinessKey, CounterName, EntryType, InvoiceKind, InvoiceLinkDraft, LedgerAccount,
    LedgerLineDraft, MovementDraft, MovementKind, MovementRef, Operation, OperationKind,
    PaymentForm, PlanGroup, SlotId,
};
pub use report::{
    Allocation, GroupDisposition, GroupReport, Identity, IdentityViolation, LineReport,
    LineStatus, ReasonCode, RunReport, RunSummary, TargetReport, TargetStatus,
};
pub use statement::{Direction, StatementLine};
pub use target::{Channel, DailySales, Invoice, MatchAssignment, PeriodTarget, ToleranceLevel};
