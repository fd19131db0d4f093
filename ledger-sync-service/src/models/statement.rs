//! Bank statement lines as delivered by the statement parser.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of a movement.
///
/// On a statement line `Credit` is money into the account. On a ledger line
/// `Debit` is a cargo and `Credit` is an abono.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// Direction implied by the sign of a statement amount.
    pub fn from_amount(amount: Decimal) -> Self {
        if amount.is_sign_negative() {
            Self::Debit
        } else {
            Self::Credit
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One bank statement entry. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatementLineRecord")]
pub struct StatementLine {
    pub line_no: u32,
    pub account: String,
    pub date: NaiveDate,
    pub description: String,
    /// Signed: deposits positive, withdrawals negative.
    pub amount: Decimal,
    pub direction: Direction,
}

impl StatementLine {
    /// Build a line, deriving the direction from the amount's sign.
    pub fn new(
        line_no: u32,
        account: impl Into<String>,
        date: NaiveDate,
        description: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            line_no,
            account: account.into(),
            date,
            description: description.into(),
            amount,
            direction: Direction::from_amount(amount),
        }
    }

    /// Absolute amount of the line.
    pub fn magnitude(&self) -> Decimal {
        self.amount.abs()
    }

    pub fn is_credit(&self) -> bool {
        self.direction == Direction::Credit
    }
}

/// Wire shape of a line; `direction` may be left out and follows the sign.
#[derive(Deserialize)]
struct StatementLineRecord {
    line_no: u32,
    account: String,
    date: NaiveDate,
    description: String,
    amount: Decimal,
    #[serde(default)]
    direction: Option<Direction>,
}

impl From<StatementLineRecord> for StatementLine {
    fn from(record: StatementLineRecord) -> Self {
        let direction = record
            .direction
            .unwrap_or_else(|| Direction::from_amount(record.amount));
        Self {
            line_no: record.line_no,
            account: record.account,
            date: record.date,
            description: record.description,
            amount: record.amount,
            direction,
        }
    }
}
