//! Error taxonomy for the sync engine.

use crate::models::{Channel, CounterName, IdentityViolation, OperationKind, ReasonCode};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;

/// Failures raised by a store or one of its units of work.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter {counter} value {value} is already in use")]
    SequenceCollision { counter: CounterName, value: i64 },

    #[error("movement {0} does not exist")]
    MovementNotFound(i64),

    #[error(transparent)]
    Backend(#[from] AppError),
}

/// Domain errors. Apart from `Cancelled` and `Store`, none of these abort a
/// run; they are recorded against the affected lines or groups.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no {channel} period target settles deposits of {date}")]
    MissingPeriodTarget { date: NaiveDate, channel: Channel },

    #[error("no supporting document matches line {line_no}")]
    MissingSupportingDocument { line_no: u32 },

    #[error("no tolerance pass resolved {targets} target(s) of {date}; gap {gap}")]
    UnresolvedAssignment {
        date: NaiveDate,
        targets: usize,
        gap: Decimal,
    },

    #[error("identity violation: {0}")]
    IdentityViolation(IdentityViolation),

    #[error("record already present as folio {folio}")]
    DuplicateDetected { folio: i64 },

    #[error("sequence collision on {counter} value {value}")]
    SequenceCollision { counter: CounterName, value: i64 },

    #[error("operation #{index} ({kind}) failed: {message}")]
    PartialCommitAttempt {
        index: usize,
        kind: OperationKind,
        message: String,
    },

    #[error("run cancelled before commit")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SequenceCollision { counter, value } => {
                SyncError::SequenceCollision { counter, value }
            }
            StoreError::MovementNotFound(folio) => {
                SyncError::Store(AppError::NotFound(anyhow::anyhow!("movement {}", folio)))
            }
            StoreError::Backend(e) => SyncError::Store(e),
        }
    }
}

impl SyncError {
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            Self::MissingPeriodTarget { .. } => Some(ReasonCode::MissingPeriodTarget),
            Self::MissingSupportingDocument { .. } => Some(ReasonCode::MissingSupportingDocument),
            Self::UnresolvedAssignment { .. } => Some(ReasonCode::UnresolvedAssignment),
            Self::IdentityViolation(_) => Some(ReasonCode::IdentityViolation),
            Self::DuplicateDetected { .. } => Some(ReasonCode::DuplicateDetected),
            Self::SequenceCollision { .. } => Some(ReasonCode::SequenceCollision),
            Self::PartialCommitAttempt { .. } => Some(ReasonCode::PartialCommit),
            Self::Cancelled | Self::Store(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        let err = SyncError::SequenceCollision {
            counter: CounterName::MovementFolio,
            value: 11,
        };
        assert_eq!(err.reason_code().unwrap().as_str(), "SEQUENCE_COLLISION");
        assert_eq!(err.to_string(), "sequence collision on movement_folio value 11");

        let err = SyncError::PartialCommitAttempt {
            index: 3,
            kind: OperationKind::LinkInvoice,
            message: "boom".to_string(),
        };
        assert_eq!(err.reason_code(), Some(ReasonCode::PartialCommit));
        assert_eq!(err.to_string(), "operation #3 (link_invoice) failed: boom");
    }

    #[test]
    fn test_cancellation_has_no_reason_code() {
        assert!(SyncError::Cancelled.reason_code().is_none());
    }
}
