//! Multi-period deposit matching with escalating tolerance.
//!
//! A batch is a set of deposits plus the ordered cutoffs they may settle.
//! [`PassPolicy`] decides which tolerances to try and in what order; the
//! search itself lives in [`crate::engine::subset`]. A pass either resolves
//! every target of the batch or is discarded whole.

use crate::engine::subset::{Bound, Candidate, CandidatePool, Exhausted, SearchBudget};
use crate::models::{MatchAssignment, PeriodTarget, ToleranceLevel};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

/// Tolerances for one pass: `lead` applies to the earliest target, `rest`
/// to every other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TolerancePass {
    pub level: ToleranceLevel,
    pub lead: Decimal,
    pub rest: Decimal,
}

impl TolerancePass {
    pub fn tolerance_for(&self, position: usize) -> Decimal {
        if position == 0 {
            self.lead
        } else {
            self.rest
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassPolicy {
    passes: [TolerancePass; 3],
}

impl PassPolicy {
    pub fn new(exact: Decimal, relaxed: Decimal) -> Self {
        Self {
            passes: [
                TolerancePass {
                    level: ToleranceLevel::Exact,
                    lead: exact,
                    rest: exact,
                },
                TolerancePass {
                    level: ToleranceLevel::ExactLead,
                    lead: exact,
                    rest: relaxed,
                },
                TolerancePass {
                    level: ToleranceLevel::Relaxed,
                    lead: relaxed,
                    rest: relaxed,
                },
            ],
        }
    }

    pub fn passes(&self) -> &[TolerancePass] {
        &self.passes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassResult {
    Resolved,
    Failed,
    /// Search budget ran out; treated as a failed pass.
    Exhausted,
}

impl PassResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassAttempt {
    pub level: ToleranceLevel,
    pub result: PassResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedTarget {
    pub target: PeriodTarget,
    /// Pool total minus the batch's expected total.
    pub gap: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub assignments: Vec<MatchAssignment>,
    /// Pool lines not used by any assignment, ascending.
    pub remainder: Vec<u32>,
    pub unresolved: Vec<UnresolvedTarget>,
    /// Passes in the order they were tried.
    pub attempts: Vec<PassAttempt>,
}

impl MatchOutcome {
    pub fn resolved_level(&self) -> Option<ToleranceLevel> {
        self.attempts
            .iter()
            .find(|a| a.result == PassResult::Resolved)
            .map(|a| a.level)
    }
}

#[derive(Debug, Clone)]
pub struct Matcher {
    policy: PassPolicy,
    search_budget: usize,
}

impl Matcher {
    pub fn new(policy: PassPolicy, search_budget: usize) -> Self {
        Self {
            policy,
            search_budget,
        }
    }

    /// Assign disjoint groups of `pool` to `targets`, oldest target first.
    ///
    /// Non-positive candidates are ignored. With no targets every candidate
    /// is returned as remainder.
    pub fn assign(&self, pool: &[Candidate], targets: &[PeriodTarget]) -> MatchOutcome {
        let pool = CandidatePool::new(
            pool.iter()
                .copied()
                .filter(|c| c.amount > Decimal::ZERO)
                .collect(),
        );
        let mut ordered = targets.to_vec();
        ordered.sort_by_key(|t| t.date);

        let all_lines = || -> Vec<u32> {
            let mut lines: Vec<u32> = (0..pool.len())
                .filter_map(|i| pool.get(i).map(|c| c.line_no))
                .collect();
            lines.sort_unstable();
            lines
        };

        if ordered.is_empty() {
            return MatchOutcome {
                remainder: all_lines(),
                ..MatchOutcome::default()
            };
        }

        let mut attempts = Vec::with_capacity(3);
        for pass in self.policy.passes() {
            let bounds: Vec<Bound> = ordered
                .iter()
                .enumerate()
                .map(|(i, t)| Bound {
                    target: t.expected_total,
                    tolerance: pass.tolerance_for(i),
                })
                .collect();

            let mut budget = SearchBudget::new(self.search_budget);
            match pool.assign(&bounds, &mut budget) {
                Ok(Some(groups)) => {
                    attempts.push(PassAttempt {
                        level: pass.level,
                        result: PassResult::Resolved,
                    });
                    debug!(
                        level = %pass.level,
                        targets = ordered.len(),
                        nodes = self.search_budget - budget.remaining(),
                        "Tolerance pass resolved batch"
                    );
                    return self.resolved(&pool, &ordered, pass, groups, attempts);
                }
                Ok(None) => {
                    debug!(level = %pass.level, "Tolerance pass failed");
                    attempts.push(PassAttempt {
                        level: pass.level,
                        result: PassResult::Failed,
                    });
                }
                Err(Exhausted) => {
                    debug!(level = %pass.level, budget = self.search_budget, "Search budget exhausted");
                    attempts.push(PassAttempt {
                        level: pass.level,
                        result: PassResult::Exhausted,
                    });
                }
            }
        }

        let expected: Decimal = ordered.iter().map(|t| t.expected_total).sum();
        let gap = pool.total() - expected;
        MatchOutcome {
            assignments: Vec::new(),
            remainder: all_lines(),
            unresolved: ordered
                .into_iter()
                .map(|target| UnresolvedTarget { target, gap })
                .collect(),
            attempts,
        }
    }

    fn resolved(
        &self,
        pool: &CandidatePool,
        ordered: &[PeriodTarget],
        pass: &TolerancePass,
        groups: Vec<Vec<usize>>,
        attempts: Vec<PassAttempt>,
    ) -> MatchOutcome {
        let mut used = vec![false; pool.len()];
        let assignments = ordered
            .iter()
            .zip(groups)
            .enumerate()
            .map(|(position, (target, group))| {
                let mut member_lines = Vec::with_capacity(group.len());
                let mut member_total = Decimal::ZERO;
                for i in group {
                    used[i] = true;
                    if let Some(candidate) = pool.get(i) {
                        member_lines.push(candidate.line_no);
                        member_total += candidate.amount;
                    }
                }
                member_lines.sort_unstable();
                MatchAssignment {
                    target: target.clone(),
                    member_lines,
                    member_total,
                    tolerance_level: pass.level,
                    tolerance: pass.tolerance_for(position),
                    residual: member_total - target.expected_total,
                }
            })
            .collect();

        let mut remainder: Vec<u32> = used
            .iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .filter_map(|(i, _)| pool.get(i).map(|c| c.line_no))
            .collect();
        remainder.sort_unstable();

        MatchOutcome {
            assignments,
            remainder,
            unresolved: Vec::new(),
            attempts,
        }
    }
}
