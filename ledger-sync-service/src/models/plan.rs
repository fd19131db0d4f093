//! Mutation plans: ordered operation groups that must commit atomically.

use super::classification::Category;
use super::statement::Direction;
use super::target::ToleranceLevel;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Counters and references
// ============================================================================

/// Store-wide consecutive counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterName {
    /// Folio of bank movements, shared by every account.
    MovementFolio,
    /// Number of ledger entries (polizas).
    LedgerEntry,
}

impl CounterName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MovementFolio => "movement_folio",
            Self::LedgerEntry => "ledger_entry",
        }
    }
}

impl std::fmt::Display for CounterName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Group-local handle to the value produced by an `AllocateSequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u8);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Movement targeted by `SetReconciled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementRef {
    /// Created earlier in the same group.
    Slot(SlotId),
    /// Already in the store.
    Existing(i64),
}

/// Chart-of-accounts code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub account: String,
    pub subaccount: String,
}

impl LedgerAccount {
    pub fn new(account: impl Into<String>, subaccount: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            subaccount: subaccount.into(),
        }
    }
}

impl std::fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.account, self.subaccount)
    }
}

// ============================================================================
// Operation payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    GeneralIncome,
    ManualExpense,
    InvoicedExpense,
    SaleIncome,
}

impl MovementKind {
    /// Numeric type code stored in the movements table.
    pub fn code(&self) -> i16 {
        match self {
            Self::GeneralIncome => 1,
            Self::ManualExpense => 2,
            Self::InvoicedExpense => 3,
            Self::SaleIncome => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentForm {
    Cash,
    Card,
    Transfer,
    Check,
}

impl PaymentForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Transfer => "transfer",
            Self::Check => "check",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub folio: SlotId,
    pub account: String,
    pub date: NaiveDate,
    pub category: Category,
    pub direction: Direction,
    pub kind: MovementKind,
    /// Always positive; the direction carries the sign.
    pub amount: Decimal,
    pub concept: String,
    pub class: String,
    pub payment_form: PaymentForm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Global,
    Individual,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Individual => "individual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLinkDraft {
    pub movement: SlotId,
    pub invoice_id: String,
    pub kind: InvoiceKind,
    /// Portion of the movement applied to this invoice.
    pub applied: Decimal,
    pub invoice_total: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Income,
    Expense,
    Journal,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Journal => "journal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLineDraft {
    pub entry: SlotId,
    /// Movement the entry documents.
    pub movement: SlotId,
    pub entry_type: EntryType,
    /// 1-based position within the entry.
    pub line_number: u16,
    pub account: LedgerAccount,
    pub direction: Direction,
    pub amount: Decimal,
    pub concept: String,
}

// ============================================================================
// Operations and groups
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AllocateSequence { slot: SlotId, counter: CounterName },
    CreateMovement(MovementDraft),
    LinkInvoice(InvoiceLinkDraft),
    CreateLedgerLine(LedgerLineDraft),
    SetReconciled { movement: MovementRef },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AllocateSequence,
    CreateMovement,
    LinkInvoice,
    CreateLedgerLine,
    SetReconciled,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllocateSequence => "allocate_sequence",
            Self::CreateMovement => "create_movement",
            Self::LinkInvoice => "link_invoice",
            Self::CreateLedgerLine => "create_ledger_line",
            Self::SetReconciled => "set_reconciled",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::AllocateSequence { .. } => OperationKind::AllocateSequence,
            Self::CreateMovement(_) => OperationKind::CreateMovement,
            Self::LinkInvoice(_) => OperationKind::LinkInvoice,
            Self::CreateLedgerLine(_) => OperationKind::CreateLedgerLine,
            Self::SetReconciled { .. } => OperationKind::SetReconciled,
        }
    }
}

/// Identity of a plan's effect in the store, used to detect re-runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessKey {
    pub account: String,
    pub date: NaiveDate,
    pub category: Category,
    pub amount: Decimal,
    /// `None` matches any concept (records captured by hand).
    pub concept: Option<String>,
}

impl std::fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.account, self.date, self.category, self.amount
        )?;
        if let Some(concept) = &self.concept {
            write!(f, "|{}", concept)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGroup {
    pub id: u32,
    pub category: Category,
    pub source_lines: Vec<u32>,
    pub business_key: BusinessKey,
    pub operations: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance_level: Option<ToleranceLevel>,
}

impl PlanGroup {
    /// Debit and credit totals over the group's ledger lines.
    pub fn ledger_totals(&self) -> (Decimal, Decimal) {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::CreateLedgerLine(line) => Some(line),
                _ => None,
            })
            .fold((Decimal::ZERO, Decimal::ZERO), |(debit, credit), line| {
                match line.direction {
                    Direction::Debit => (debit + line.amount, credit),
                    Direction::Credit => (debit, credit + line.amount),
                }
            })
    }

    pub fn is_balanced(&self) -> bool {
        let (debit, credit) = self.ledger_totals();
        debit == credit
    }

    /// True when the group only marks existing records as reconciled.
    pub fn is_reconciliation_only(&self) -> bool {
        self.operations
            .iter()
            .all(|op| matches!(op, Operation::SetReconciled { movement: MovementRef::Existing(_) }))
    }

    /// Store records the group marks as reconciled without creating them.
    pub fn existing_folios(&self) -> impl Iterator<Item = i64> + '_ {
        self.operations.iter().filter_map(|op| match op {
            Operation::SetReconciled {
                movement: MovementRef::Existing(folio),
            } => Some(*folio),
            _ => None,
        })
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind() == kind).count()
    }
}
