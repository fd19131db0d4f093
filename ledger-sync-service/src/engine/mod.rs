//! Classification, matching, planning and execution.

pub mod classifier;
pub mod executor;
pub mod idempotency;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod planner;
pub mod subset;
pub mod validator;

pub use classifier::{Classifier, Rule, RuleSet};
pub use executor::{Approval, ExecutionMediator, RunMode};
pub use idempotency::{GuardOutcome, IdempotencyGuard};
pub use matcher::{MatchOutcome, Matcher, PassPolicy};
pub use pipeline::{Reconciler, RunInput};
pub use planner::{BuildIssue, PlanBuilder, PlanInput};
pub use validator::{ValidationOutcome, Validator};
