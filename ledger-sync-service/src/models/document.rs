//! Supporting documents for lines the statement alone cannot book: payroll
//! runs and tax or social security payments.

use super::classification::Category;
use super::plan::LedgerAccount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One ledger line taken from a document. The section holding it decides
/// whether it is a debit or a credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub account: LedgerAccount,
    pub concept: String,
    pub amount: Decimal,
}

impl DocumentLine {
    pub fn new(account: LedgerAccount, concept: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account,
            concept: concept.into(),
            amount,
        }
    }
}

/// Lines with a non-positive amount are never posted, so they do not count.
fn total(lines: &[DocumentLine]) -> Decimal {
    lines
        .iter()
        .map(|l| l.amount)
        .filter(|a| *a > Decimal::ZERO)
        .sum()
}

// ============================================================================
// Payroll
// ============================================================================

/// A disbursement of a payroll run: the transfer dispersion, checks, paid
/// vacations or a severance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollPayment {
    /// Label as exported by the payroll system (`DISPERSION`, `CHEQUES`).
    pub kind: String,
    pub amount: Decimal,
    /// Carries the full payroll entry; the others only settle creditors.
    #[serde(default)]
    pub principal: bool,
    #[serde(default)]
    pub severance: bool,
    #[serde(default)]
    pub by_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollRecord {
    pub number: u32,
    pub payments: Vec<PayrollPayment>,
    #[serde(default)]
    pub perceptions: Vec<DocumentLine>,
    #[serde(default)]
    pub deductions: Vec<DocumentLine>,
}

impl PayrollRecord {
    /// The payment that carries the full entry: the first one marked
    /// principal with a positive amount.
    pub fn principal(&self) -> Option<&PayrollPayment> {
        self.payments
            .iter()
            .find(|p| p.principal && p.amount > Decimal::ZERO)
    }

    /// Everything paid out, principal included.
    pub fn net_total(&self) -> Decimal {
        self.payments
            .iter()
            .map(|p| p.amount)
            .filter(|a| *a > Decimal::ZERO)
            .sum()
    }

    /// Owed to payroll creditors until the secondary payments settle it.
    pub fn secondary_total(&self) -> Decimal {
        self.net_total() - self.principal().map_or(Decimal::ZERO, |p| p.amount)
    }

    pub fn perception_total(&self) -> Decimal {
        total(&self.perceptions)
    }

    pub fn deduction_total(&self) -> Decimal {
        total(&self.deductions)
    }

    /// What the perceptions must add up to for the entry to balance.
    pub fn expected_perceptions(&self) -> Decimal {
        self.deduction_total() + self.net_total()
    }
}

// ============================================================================
// Taxes and social security
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxKind {
    Federal,
    State,
    SocialSecurity,
}

impl TaxKind {
    pub fn category(&self) -> Category {
        match self {
            Self::Federal => Category::FederalTax,
            Self::State => Category::StateTax,
            Self::SocialSecurity => Category::SocialSecurity,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Federal => "FEDERAL TAX",
            Self::State => "STATE PAYROLL TAX",
            Self::SocialSecurity => "SOCIAL SECURITY",
        }
    }
}

/// A balance moved between two ledger accounts as part of a tax entry, such
/// as collected VAT leaving the pending account once declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reclassification {
    pub debit: LedgerAccount,
    pub credit: LedgerAccount,
    pub concept: String,
    pub amount: Decimal,
}

/// One payment of a declaration. `charges` are debited and must add up to
/// `amount`, which the bank account is credited with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxPayment {
    pub kind: TaxKind,
    /// Period the declaration covers (`ENERO 2026`).
    pub period: String,
    pub amount: Decimal,
    pub charges: Vec<DocumentLine>,
    #[serde(default)]
    pub reclassifications: Vec<Reclassification>,
}

impl TaxPayment {
    pub fn charge_total(&self) -> Decimal {
        total(&self.charges)
    }
}
