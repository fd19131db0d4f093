//! Run report returned to the caller after simulate or commit.

use super::classification::Category;
use super::plan::{CounterName, PlanGroup, SlotId};
use super::target::{Channel, ToleranceLevel};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Machine-readable reason attached to every flagged item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    MissingPeriodTarget,
    MissingSupportingDocument,
    UnknownAccount,
    UnresolvedAssignment,
    IdentityViolation,
    DuplicateDetected,
    SequenceCollision,
    PartialCommit,
    ApproximateMatch,
    UnassignedDeposit,
    NoMatchingRecord,
    GlobalShareNegative,
    DocumentMismatch,
    EmptyGroup,
    Unclassified,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingPeriodTarget => "MISSING_PERIOD_TARGET",
            Self::MissingSupportingDocument => "MISSING_SUPPORTING_DOCUMENT",
            Self::UnknownAccount => "UNKNOWN_ACCOUNT",
            Self::UnresolvedAssignment => "UNRESOLVED_ASSIGNMENT",
            Self::IdentityViolation => "IDENTITY_VIOLATION",
            Self::DuplicateDetected => "DUPLICATE_DETECTED",
            Self::SequenceCollision => "SEQUENCE_COLLISION",
            Self::PartialCommit => "PARTIAL_COMMIT",
            Self::ApproximateMatch => "APPROXIMATE_MATCH",
            Self::UnassignedDeposit => "UNASSIGNED_DEPOSIT",
            Self::NoMatchingRecord => "NO_MATCHING_RECORD",
            Self::GlobalShareNegative => "GLOBAL_SHARE_NEGATIVE",
            Self::DocumentMismatch => "DOCUMENT_MISMATCH",
            Self::EmptyGroup => "EMPTY_GROUP",
            Self::Unclassified => "UNCLASSIFIED",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Per-line status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    /// Part of a group that has not reached the mediator yet.
    Planned,
    Executed,
    Simulated,
    AlreadyPresent,
    Failed,
    RequiresRevision,
    RequiresReview,
    #[serde(rename = "SIN_PROCESAR")]
    Unprocessed,
    Unclassified,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Executed => "executed",
            Self::Simulated => "simulated",
            Self::AlreadyPresent => "already_present",
            Self::Failed => "failed",
            Self::RequiresRevision => "requires_revision",
            Self::RequiresReview => "requires_review",
            Self::Unprocessed => "unprocessed",
            Self::Unclassified => "unclassified",
        }
    }

    pub fn is_flagged(&self) -> bool {
        matches!(
            self,
            Self::Failed
                | Self::RequiresRevision
                | Self::RequiresReview
                | Self::Unprocessed
                | Self::Unclassified
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReport {
    pub line_no: u32,
    pub date: NaiveDate,
    pub account: String,
    pub amount: Decimal,
    pub description: String,
    pub category: Category,
    pub rule: Option<String>,
    pub status: LineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance_level: Option<ToleranceLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<Decimal>,
}

// ============================================================================
// Per-group outcome
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum GroupDisposition {
    Executed,
    Simulated,
    AlreadyPresent { folio: i64 },
    Failed { reason: ReasonCode, message: String },
}

impl GroupDisposition {
    pub fn line_status(&self) -> LineStatus {
        match self {
            Self::Executed => LineStatus::Executed,
            Self::Simulated => LineStatus::Simulated,
            Self::AlreadyPresent { .. } => LineStatus::AlreadyPresent,
            Self::Failed { .. } => LineStatus::Failed,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Simulated => "simulated",
            Self::AlreadyPresent { .. } => "already_present",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Counter value bound to a slot while running a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub slot: SlotId,
    pub counter: CounterName,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub group: PlanGroup,
    #[serde(flatten)]
    pub disposition: GroupDisposition,
    pub allocations: Vec<Allocation>,
}

// ============================================================================
// Per-target outcome
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Matched,
    Unresolved,
    /// Failed a consistency identity; never offered to the matcher.
    Blocked,
    /// No deposit in the statement settles it yet.
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub date: NaiveDate,
    pub channel: Channel,
    pub expected_total: Decimal,
    pub status: TargetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance_level: Option<ToleranceLevel>,
    #[serde(default)]
    pub member_lines: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub residual: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<Decimal>,
}

// ============================================================================
// Identity violations
// ============================================================================

/// Accounting identity checked before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// `sum(individual) + global == expected_total`
    InvoiceBreakdown,
    /// `card + cash + other == declared_total`
    DailyChannels,
    /// `expected_total > 0`
    PositiveTotal,
    /// every invoice amount `>= 0`
    NonNegativeInvoices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityViolation {
    pub date: NaiveDate,
    /// `None` when the identity spans every channel of the day.
    pub channel: Option<Channel>,
    pub identity: Identity,
    pub lhs: Decimal,
    pub rhs: Decimal,
    pub tolerance: Decimal,
}

impl IdentityViolation {
    pub fn difference(&self) -> Decimal {
        self.lhs - self.rhs
    }
}

impl std::fmt::Display for IdentityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scope = self
            .channel
            .map(|c| c.to_string())
            .unwrap_or_else(|| "all channels".to_string());
        let relation = match self.identity {
            Identity::InvoiceBreakdown => "sum(individual) + global != expected_total",
            Identity::DailyChannels => "card + cash + other != declared_total",
            Identity::PositiveTotal => "expected_total <= 0",
            Identity::NonNegativeInvoices => "invoice amount < 0",
        };
        write!(
            f,
            "{} {}: {} ({} vs {}, diff {}, tolerance {})",
            self.date,
            scope,
            relation,
            self.lhs,
            self.rhs,
            self.difference(),
            self.tolerance
        )
    }
}

// ============================================================================
// Run report
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub lines: usize,
    pub unclassified: usize,
    pub groups_planned: usize,
    pub executed: usize,
    pub simulated: usize,
    pub already_present: usize,
    pub failed: usize,
    pub requires_revision: usize,
    pub requires_review: usize,
    pub unprocessed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    pub lines: Vec<LineReport>,
    pub groups: Vec<GroupReport>,
    pub targets: Vec<TargetReport>,
    pub violations: Vec<IdentityViolation>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn line(&self, line_no: u32) -> Option<&LineReport> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn groups_with(&self, label: &str) -> impl Iterator<Item = &GroupReport> {
        let label = label.to_string();
        self.groups
            .iter()
            .filter(move |g| g.disposition.label() == label)
    }
}
