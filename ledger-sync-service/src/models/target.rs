//! Sales-period targets and the assignments that settle them.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement channel of a sales cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Card,
    Cash,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Cash => "cash",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An issued sales invoice with its tax breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub vat: Decimal,
    #[serde(default)]
    pub ieps: Decimal,
}

impl Invoice {
    pub fn new(id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            id: id.into(),
            amount,
            vat: Decimal::ZERO,
            ieps: Decimal::ZERO,
        }
    }

    pub fn with_taxes(mut self, vat: Decimal, ieps: Decimal) -> Self {
        self.vat = vat;
        self.ieps = ieps;
        self
    }
}

/// Expected sales for one day and channel, with the invoices that cover it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTarget {
    pub date: NaiveDate,
    pub channel: Channel,
    pub expected_total: Decimal,
    pub global_invoice: Invoice,
    #[serde(default)]
    pub individual_invoices: Vec<Invoice>,
}

impl PeriodTarget {
    pub fn individual_total(&self) -> Decimal {
        self.individual_invoices.iter().map(|i| i.amount).sum()
    }
}

/// Declared sales for a day across every channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySales {
    pub date: NaiveDate,
    pub declared_total: Decimal,
    /// Sales settled outside the card and cash channels.
    #[serde(default)]
    pub other_total: Decimal,
}

/// Tolerance pass that produced a match, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceLevel {
    /// Exact tolerance for every target.
    Exact,
    /// Exact tolerance for the earliest target, relaxed for the rest.
    ExactLead,
    /// Relaxed tolerance for every target.
    Relaxed,
}

impl ToleranceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::ExactLead => "exact_lead",
            Self::Relaxed => "relaxed",
        }
    }

    /// Anything past the first pass needs a human decision by default.
    pub fn is_approximate(&self) -> bool {
        !matches!(self, Self::Exact)
    }
}

impl std::fmt::Display for ToleranceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Statement lines grouped to settle one period target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAssignment {
    pub target: PeriodTarget,
    /// Line numbers, ascending.
    pub member_lines: Vec<u32>,
    pub member_total: Decimal,
    pub tolerance_level: ToleranceLevel,
    /// Tolerance actually applied to this target in the winning pass.
    pub tolerance: Decimal,
    /// `member_total - expected_total`.
    pub residual: Decimal,
}
