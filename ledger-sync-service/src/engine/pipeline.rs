//! Run orchestration.
//!
//! A run is sequential: classify every line, check the accounting identities,
//! match deposits to period targets per channel, pair payroll and tax lines
//! with their documents, build plan groups, drop the ones the store already
//! holds and hand the rest to the execution mediator.
//! Nothing here aborts on a bad line; problems are recorded on the report and
//! only store failures or cancellation end the run early.

use crate::config::{ApproximateMatchPolicy, EngineSettings};
use crate::engine::classifier::Classifier;
use crate::engine::executor::{ExecutionMediator, RunMode};
use crate::engine::idempotency::{IdempotencyGuard, PresentGroup};
use crate::engine::matcher::{Matcher, PassPolicy};
use crate::engine::planner::{BuildIssue, PlanBuilder, PlanInput};
use crate::engine::subset::Candidate;
use crate::engine::validator::{ValidationOutcome, Validator};
use crate::error::SyncError;
use crate::models::{
    Category, Channel, Classification, DailySales, GroupDisposition, GroupReport, LineReport,
    LineStatus, MatchAssignment, PayrollRecord, PeriodTarget, PlanGroup, ReasonCode, RunReport,
    RunSummary, StatementLine, TargetReport, TargetStatus, TaxPayment, ToleranceLevel,
};
use crate::services::metrics::{
    record_classified, record_error, record_group_outcome, record_match_pass,
};
use crate::services::store::LedgerStore;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Everything a run consumes besides the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInput {
    pub lines: Vec<StatementLine>,
    #[serde(default)]
    pub targets: Vec<PeriodTarget>,
    #[serde(default)]
    pub daily_sales: Vec<DailySales>,
    #[serde(default)]
    pub payroll: Vec<PayrollRecord>,
    #[serde(default)]
    pub tax_payments: Vec<TaxPayment>,
}

type Classified<'a> = (&'a StatementLine, &'a Classification);

pub struct Reconciler {
    settings: EngineSettings,
    classifier: Classifier,
    validator: Validator,
    matcher: Matcher,
    builder: PlanBuilder,
    guard: IdempotencyGuard,
    mediator: ExecutionMediator,
}

impl Reconciler {
    pub fn new(settings: EngineSettings) -> Result<Self, AppError> {
        let classifier = Classifier::standard(settings.accounts.clone())?;
        Ok(Self::with_classifier(settings, classifier))
    }

    pub fn with_classifier(settings: EngineSettings, classifier: Classifier) -> Self {
        let guard = IdempotencyGuard::new(
            settings.reconciliation_window_days,
            settings.reconcile_open_records,
        );
        Self {
            validator: Validator::new(settings.identity_tolerance),
            matcher: Matcher::new(
                PassPolicy::new(settings.exact_tolerance, settings.relaxed_tolerance),
                settings.search_budget,
            ),
            builder: PlanBuilder::new(
                settings.accounts.clone(),
                settings.chart.clone(),
                settings.concept_width,
            ),
            mediator: ExecutionMediator::new(guard),
            guard,
            classifier,
            settings,
        }
    }

    #[instrument(skip_all, fields(mode = mode.label(), lines = input.lines.len(), targets = input.targets.len()))]
    pub async fn run(
        &self,
        input: RunInput,
        mode: &RunMode,
        store: &dyn LedgerStore,
        cancel: &CancellationToken,
    ) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, "Starting sync run");

        let classifications: Vec<Classification> = input
            .lines
            .iter()
            .map(|line| {
                let classification = self.classifier.classify(line);
                record_classified(classification.category.as_str());
                classification
            })
            .collect();
        let pairs: Vec<Classified<'_>> = input.lines.iter().zip(&classifications).collect();
        let mut state = RunState::new(&pairs);

        let validation = self.validator.validate(&input.targets, &input.daily_sales);
        for violation in &validation.violations {
            warn!(violation = %violation, "Identity violation");
            record_error(ReasonCode::IdentityViolation.as_str());
        }

        for channel in [Channel::Card, Channel::Cash] {
            self.plan_channel(channel, &pairs, &input.targets, &validation, &mut state);
        }
        self.plan_fees(&pairs, &mut state);
        let produced = self.plan_transfers(&pairs, &mut state);
        self.plan_reconciliations(&pairs, produced, store, &mut state)
            .await?;
        self.plan_documents(&pairs, &input.payroll, &input.tax_payments, &mut state);

        let groups = std::mem::take(&mut state.groups);
        let planned = groups.len();
        let guarded = self.guard.filter(groups, store).await?;
        let mut reports = state.present(guarded.already_present);

        if cancel.is_cancelled() {
            warn!(run_id = %run_id, "Run cancelled before execution");
            return Err(SyncError::Cancelled);
        }

        reports.extend(self.mediator.run(guarded.to_execute, mode, store).await?);
        reports.sort_by_key(|r| r.group.id);
        state.settle(&reports);

        let report = state.into_report(run_id, mode, planned, reports, validation.violations);
        info!(
            run_id = %run_id,
            groups = report.groups.len(),
            executed = report.summary.executed,
            simulated = report.summary.simulated,
            already_present = report.summary.already_present,
            failed = report.summary.failed,
            flagged = report.summary.requires_revision + report.summary.requires_review + report.summary.unprocessed,
            "Sync run finished"
        );
        Ok(report)
    }

    // ========================================================================
    // Sales
    // ========================================================================

    /// Group the channel's deposits by date; each deposit date settles the
    /// targets dated since the previous deposit.
    fn plan_channel(
        &self,
        channel: Channel,
        pairs: &[Classified<'_>],
        targets: &[PeriodTarget],
        validation: &ValidationOutcome,
        state: &mut RunState,
    ) {
        let mut batches: BTreeMap<NaiveDate, Vec<&StatementLine>> = BTreeMap::new();
        for (line, classification) in pairs {
            if classification.category.channel() != Some(channel) {
                continue;
            }
            if line.amount > Decimal::ZERO {
                batches.entry(line.date).or_default().push(*line);
            } else {
                state.flag(
                    line.line_no,
                    ReasonCode::UnassignedDeposit,
                    Some("sale line with a non-positive amount".to_string()),
                    None,
                );
            }
        }

        let mut pending: Vec<&PeriodTarget> =
            targets.iter().filter(|t| t.channel == channel).collect();
        pending.sort_by_key(|t| t.date);
        let mut consumed = vec![false; pending.len()];
        let mut previous: Option<NaiveDate> = None;

        for (date, lines) in batches {
            let start = previous.unwrap_or_else(|| {
                date - Duration::days(i64::from(self.settings.lookback_days))
            });
            previous = Some(date);

            let indices: Vec<usize> = (0..pending.len())
                .filter(|&i| !consumed[i] && pending[i].date >= start && pending[i].date < date)
                .collect();
            for &i in &indices {
                consumed[i] = true;
            }
            let batch: Vec<PeriodTarget> = indices.iter().map(|&i| pending[i].clone()).collect();
            let line_nos: Vec<u32> = lines.iter().map(|l| l.line_no).collect();

            debug!(
                channel = %channel,
                date = %date,
                lines = line_nos.len(),
                targets = batch.len(),
                "Matching deposit batch"
            );
            self.match_batch(channel, date, &lines, &line_nos, &batch, validation, state);
        }

        for (i, target) in pending.iter().enumerate() {
            if !consumed[i] {
                state.target(TargetReport::new(target, TargetStatus::Unmatched));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn match_batch(
        &self,
        channel: Channel,
        date: NaiveDate,
        lines: &[&StatementLine],
        line_nos: &[u32],
        batch: &[PeriodTarget],
        validation: &ValidationOutcome,
        state: &mut RunState,
    ) {
        if batch.is_empty() {
            let err = SyncError::MissingPeriodTarget { date, channel };
            for &line_no in line_nos {
                state.flag(line_no, ReasonCode::MissingPeriodTarget, Some(err.to_string()), None);
            }
            return;
        }

        let blocking = batch
            .iter()
            .find_map(|t| validation.blocking(t.date, channel));
        if let Some(violation) = blocking {
            let err = SyncError::IdentityViolation(violation.clone());
            for &line_no in line_nos {
                state.flag(line_no, ReasonCode::IdentityViolation, Some(err.to_string()), None);
            }
            for target in batch {
                state.target(TargetReport::new(target, TargetStatus::Blocked));
            }
            return;
        }

        let candidates: Vec<Candidate> = lines
            .iter()
            .map(|l| Candidate {
                line_no: l.line_no,
                amount: l.amount,
            })
            .collect();
        let outcome = self.matcher.assign(&candidates, batch);
        for attempt in &outcome.attempts {
            record_match_pass(attempt.level.as_str(), attempt.result.as_str());
        }

        if !outcome.unresolved.is_empty() {
            let gap = outcome.unresolved[0].gap;
            let err = SyncError::UnresolvedAssignment {
                date,
                targets: batch.len(),
                gap,
            };
            warn!(channel = %channel, error = %err, "Batch unresolved");
            for &line_no in line_nos {
                state.flag(line_no, ReasonCode::UnresolvedAssignment, Some(err.to_string()), Some(gap));
            }
            for unresolved in &outcome.unresolved {
                let mut report = TargetReport::new(&unresolved.target, TargetStatus::Unresolved);
                report.gap = Some(unresolved.gap);
                state.target(report);
            }
            return;
        }

        for assignment in &outcome.assignments {
            self.plan_sale(assignment, lines, state);
        }
        for &line_no in &outcome.remainder {
            state.flag(
                line_no,
                ReasonCode::UnassignedDeposit,
                Some(format!("no {} target of the batch needs this deposit", channel)),
                None,
            );
        }
    }

    fn plan_sale(
        &self,
        assignment: &MatchAssignment,
        lines: &[&StatementLine],
        state: &mut RunState,
    ) {
        let mut report = TargetReport::new(&assignment.target, TargetStatus::Matched);
        report.tolerance_level = Some(assignment.tolerance_level);
        report.member_lines = assignment.member_lines.clone();
        report.residual = Some(assignment.residual);
        state.target(report);

        let approximate = assignment.tolerance_level.is_approximate();
        if approximate && self.settings.approximate_match_policy == ApproximateMatchPolicy::Review {
            let note = format!(
                "matched {} target of {} at {} tolerance {}",
                assignment.target.channel,
                assignment.target.date,
                assignment.tolerance_level,
                assignment.tolerance
            );
            for &line_no in &assignment.member_lines {
                state.flag(line_no, ReasonCode::ApproximateMatch, Some(note.clone()), Some(assignment.residual));
                state.set_tolerance(line_no, assignment.tolerance_level);
            }
            return;
        }

        let members: Vec<&StatementLine> = lines
            .iter()
            .copied()
            .filter(|l| assignment.member_lines.contains(&l.line_no))
            .collect();
        let input = PlanInput::Sale {
            assignment,
            members: &members,
        };
        match self.builder.build(state.next_group_id(), input, None) {
            Ok(group) => state.add_group(group),
            Err(issue) => {
                for &line_no in &assignment.member_lines {
                    state.flag_issue(line_no, &issue);
                    state.set_tolerance(line_no, assignment.tolerance_level);
                }
            }
        }
    }

    // ========================================================================
    // Fees, transfers and reconciliation
    // ========================================================================

    fn plan_fees(&self, pairs: &[Classified<'_>], state: &mut RunState) {
        let mut by_day: BTreeMap<(NaiveDate, &str), Vec<Classified<'_>>> = BTreeMap::new();
        for &(line, classification) in pairs {
            if classification.category.is_bank_fee() {
                by_day
                    .entry((line.date, line.account.as_str()))
                    .or_default()
                    .push((line, classification));
            }
        }

        for ((date, account), lines) in by_day {
            let input = PlanInput::Fees {
                account,
                date,
                lines: &lines,
            };
            match self.builder.build(state.next_group_id(), input, None) {
                Ok(group) => state.add_group(group),
                Err(issue) => {
                    for (line, _) in &lines {
                        state.flag_issue(line.line_no, &issue);
                    }
                }
            }
        }
    }

    /// Build own-account transfers. Returns the incoming side of each one so
    /// the destination's statement line can ride on the same group.
    fn plan_transfers(&self, pairs: &[Classified<'_>], state: &mut RunState) -> Vec<IncomingLeg> {
        let mut produced = Vec::new();
        for &(line, classification) in pairs {
            if classification.category != Category::TransferOut {
                continue;
            }
            let input = PlanInput::Transfer {
                line,
                classification,
            };
            match self.builder.build(state.next_group_id(), input, None) {
                Ok(group) => {
                    if let Some(destination) = classification
                        .metadata
                        .counterparty_account
                        .as_deref()
                        .and_then(|c| self.settings.accounts.resolve_own(c))
                    {
                        produced.push(IncomingLeg {
                            account: destination.number.clone(),
                            date: line.date,
                            amount: line.magnitude(),
                            group_id: group.id,
                        });
                    }
                    state.add_group(group);
                }
                Err(issue) => state.flag_issue(line.line_no, &issue),
            }
        }
        produced
    }

    /// Each line reconciles its own store record: a record answering one
    /// line is not offered to a later line with the same key.
    async fn plan_reconciliations(
        &self,
        pairs: &[Classified<'_>],
        mut produced: Vec<IncomingLeg>,
        store: &dyn LedgerStore,
        state: &mut RunState,
    ) -> Result<(), SyncError> {
        let mut claimed: Vec<i64> = Vec::new();
        for &(line, classification) in pairs {
            let category = classification.category;
            if !category.is_reconciliation_only() {
                continue;
            }

            if category == Category::TransferIn {
                let leg = produced.iter().position(|leg| {
                    leg.account == line.account
                        && leg.date == line.date
                        && leg.amount == line.magnitude()
                });
                if let Some(index) = leg {
                    let leg = produced.swap_remove(index);
                    state.attach(leg.group_id, line.line_no);
                    continue;
                }
            }

            let key = PlanBuilder::reconciliation_key(line, classification);
            let existing = store
                .find_movement(&key, self.guard.window_days(), &claimed)
                .await?;
            let input = PlanInput::Reconcile {
                line,
                classification,
            };
            match self
                .builder
                .build(state.next_group_id(), input, existing.as_ref())
            {
                Ok(group) => {
                    claimed.extend(group.existing_folios());
                    state.add_group(group);
                }
                Err(issue) => state.flag_issue(line.line_no, &issue),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Document-backed lines
    // ========================================================================

    /// Pair each payroll and tax line with the first unclaimed document of
    /// the same amount. Lines without one stay unprocessed.
    fn plan_documents(
        &self,
        pairs: &[Classified<'_>],
        payroll: &[PayrollRecord],
        taxes: &[TaxPayment],
        state: &mut RunState,
    ) {
        let mut payroll_claimed = vec![false; payroll.len()];
        let mut taxes_claimed = vec![false; taxes.len()];

        for &(line, classification) in pairs {
            let category = classification.category;
            if !category.needs_supporting_document() {
                continue;
            }

            let input = if category == Category::Payroll {
                claim(payroll, &mut payroll_claimed, |r| {
                    r.principal().map(|p| p.amount) == Some(line.magnitude())
                })
                .map(|record| PlanInput::Payroll { line, record })
            } else {
                claim(taxes, &mut taxes_claimed, |t| {
                    t.kind.category() == category && t.amount == line.magnitude()
                })
                .map(|payment| PlanInput::Tax { line, payment })
            };

            let Some(input) = input else {
                let err = SyncError::MissingSupportingDocument {
                    line_no: line.line_no,
                };
                state.flag(line.line_no, ReasonCode::MissingSupportingDocument, Some(err.to_string()), None);
                continue;
            };
            match self.builder.build(state.next_group_id(), input, None) {
                Ok(group) => state.add_group(group),
                Err(issue) => state.flag_issue(line.line_no, &issue),
            }
        }
    }
}

/// First record satisfying `fits` that no earlier line took.
fn claim<'r, T>(records: &'r [T], claimed: &mut [bool], fits: impl Fn(&T) -> bool) -> Option<&'r T> {
    let index = (0..records.len()).find(|&i| !claimed[i] && fits(&records[i]))?;
    claimed[index] = true;
    Some(&records[index])
}

#[derive(Debug)]
struct IncomingLeg {
    account: String,
    date: NaiveDate,
    amount: Decimal,
    group_id: u32,
}

impl TargetReport {
    fn new(target: &PeriodTarget, status: TargetStatus) -> Self {
        Self {
            date: target.date,
            channel: target.channel,
            expected_total: target.expected_total,
            status,
            tolerance_level: None,
            member_lines: Vec::new(),
            residual: None,
            gap: None,
        }
    }
}

fn status_for(reason: ReasonCode) -> LineStatus {
    match reason {
        ReasonCode::MissingPeriodTarget
        | ReasonCode::MissingSupportingDocument
        | ReasonCode::UnknownAccount => LineStatus::Unprocessed,
        ReasonCode::IdentityViolation => LineStatus::RequiresReview,
        ReasonCode::Unclassified => LineStatus::Unclassified,
        ReasonCode::DuplicateDetected => LineStatus::AlreadyPresent,
        ReasonCode::SequenceCollision | ReasonCode::PartialCommit => LineStatus::Failed,
        ReasonCode::UnresolvedAssignment
        | ReasonCode::ApproximateMatch
        | ReasonCode::UnassignedDeposit
        | ReasonCode::NoMatchingRecord
        | ReasonCode::GlobalShareNegative
        | ReasonCode::DocumentMismatch
        | ReasonCode::EmptyGroup => LineStatus::RequiresRevision,
    }
}

// ============================================================================
// Per-run bookkeeping
// ============================================================================

struct RunState {
    lines: BTreeMap<u32, LineReport>,
    groups: Vec<PlanGroup>,
    targets: Vec<TargetReport>,
    issued: u32,
}

impl RunState {
    fn new(pairs: &[Classified<'_>]) -> Self {
        let lines = pairs
            .iter()
            .map(|(line, classification)| {
                let unclassified = !classification.is_classified();
                let report = LineReport {
                    line_no: line.line_no,
                    date: line.date,
                    account: line.account.clone(),
                    amount: line.amount,
                    description: line.description.clone(),
                    category: classification.category,
                    rule: classification.rule.clone(),
                    status: if unclassified {
                        LineStatus::Unclassified
                    } else {
                        LineStatus::Planned
                    },
                    tolerance_level: None,
                    group_id: None,
                    reason: unclassified.then_some(ReasonCode::Unclassified),
                    note: None,
                    gap: None,
                };
                (line.line_no, report)
            })
            .collect();
        Self {
            lines,
            groups: Vec::new(),
            targets: Vec::new(),
            issued: 0,
        }
    }

    fn next_group_id(&mut self) -> u32 {
        self.issued += 1;
        self.issued
    }

    fn add_group(&mut self, group: PlanGroup) {
        for line_no in &group.source_lines {
            if let Some(line) = self.lines.get_mut(line_no) {
                line.group_id = Some(group.id);
                line.tolerance_level = group.tolerance_level;
            }
        }
        self.groups.push(group);
    }

    fn attach(&mut self, group_id: u32, line_no: u32) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.id == group_id) {
            group.source_lines.push(line_no);
            group.source_lines.sort_unstable();
        }
        if let Some(line) = self.lines.get_mut(&line_no) {
            line.group_id = Some(group_id);
        }
    }

    fn flag(&mut self, line_no: u32, reason: ReasonCode, note: Option<String>, gap: Option<Decimal>) {
        if let Some(line) = self.lines.get_mut(&line_no) {
            line.status = status_for(reason);
            line.reason = Some(reason);
            line.note = note;
            line.gap = gap;
        }
    }

    fn flag_issue(&mut self, line_no: u32, issue: &BuildIssue) {
        self.flag(line_no, issue.reason_code(), Some(issue.to_string()), None);
    }

    fn set_tolerance(&mut self, line_no: u32, level: ToleranceLevel) {
        if let Some(line) = self.lines.get_mut(&line_no) {
            line.tolerance_level = Some(level);
        }
    }

    fn target(&mut self, report: TargetReport) {
        self.targets.push(report);
    }

    fn present(&mut self, present: Vec<PresentGroup>) -> Vec<GroupReport> {
        present
            .into_iter()
            .map(|PresentGroup { group, existing }| {
                record_group_outcome("already_present");
                GroupReport {
                    group,
                    disposition: GroupDisposition::AlreadyPresent {
                        folio: existing.folio,
                    },
                    allocations: Vec::new(),
                }
            })
            .collect()
    }

    /// Carry each group's disposition onto its source lines.
    fn settle(&mut self, reports: &[GroupReport]) {
        for report in reports {
            for line_no in &report.group.source_lines {
                let Some(line) = self.lines.get_mut(line_no) else {
                    continue;
                };
                line.status = report.disposition.line_status();
                match &report.disposition {
                    GroupDisposition::Failed { reason, message } => {
                        line.reason = Some(*reason);
                        line.note = Some(message.clone());
                    }
                    GroupDisposition::AlreadyPresent { folio } => {
                        line.note = Some(format!("present as folio {}", folio));
                    }
                    GroupDisposition::Executed | GroupDisposition::Simulated => {}
                }
            }
        }
    }

    fn into_report(
        mut self,
        run_id: Uuid,
        mode: &RunMode,
        planned: usize,
        groups: Vec<GroupReport>,
        violations: Vec<crate::models::IdentityViolation>,
    ) -> RunReport {
        self.targets
            .sort_by(|a, b| (a.date, a.channel).cmp(&(b.date, b.channel)));
        let lines: Vec<LineReport> = self.lines.into_values().collect();

        let count_lines = |status: LineStatus| lines.iter().filter(|l| l.status == status).count();
        let count_groups = |label: &str| {
            groups
                .iter()
                .filter(|g| g.disposition.label() == label)
                .count()
        };
        let summary = RunSummary {
            lines: lines.len(),
            unclassified: count_lines(LineStatus::Unclassified),
            groups_planned: planned,
            executed: count_groups("executed"),
            simulated: count_groups("simulated"),
            already_present: count_groups("already_present"),
            failed: count_groups("failed"),
            requires_revision: count_lines(LineStatus::RequiresRevision),
            requires_review: count_lines(LineStatus::RequiresReview),
            unprocessed: count_lines(LineStatus::Unprocessed),
        };

        RunReport {
            run_id,
            mode: mode.label().to_string(),
            approved_by: mode.approved_by().map(str::to_string),
            lines,
            groups,
            targets: self.targets,
            violations,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Invoice;
    use crate::services::memory::InMemoryStore;
    use std::collections::HashSet;
    use std::str::FromStr;

    const CASH: &str = "055003730017";
    const CARD: &str = "038900320016";

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, n).unwrap()
    }

    fn target(date: NaiveDate, channel: Channel, total: &str) -> PeriodTarget {
        PeriodTarget {
            date,
            channel,
            expected_total: d(total),
            global_invoice: Invoice::new(format!("FD-{}", date.format("%d")), d(total)),
            individual_invoices: Vec::new(),
        }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(EngineSettings::default()).unwrap()
    }

    async fn simulate(input: RunInput) -> RunReport {
        reconciler()
            .run(input, &RunMode::Simulate, &InMemoryStore::new(), &CancellationToken::new())
            .await
            .unwrap()
    }

    /// Lines with neither a group nor a reason.
    fn unaccounted(report: &RunReport) -> Vec<u32> {
        let grouped: HashSet<u32> = report
            .groups
            .iter()
            .flat_map(|g| g.group.source_lines.iter().copied())
            .collect();
        report
            .lines
            .iter()
            .filter(|l| l.reason.is_none() && !grouped.contains(&l.line_no))
            .map(|l| l.line_no)
            .collect()
    }

    #[tokio::test]
    async fn test_deposit_without_target_is_unprocessed() {
        let input = RunInput {
            lines: vec![StatementLine::new(1, CASH, day(10), "DEPOSITO EN EFECTIVO", d("1500.00"))],
            ..RunInput::default()
        };
        let report = simulate(input).await;
        let line = report.line(1).unwrap();
        assert_eq!(line.category, Category::CashDeposit);
        assert_eq!(line.status, LineStatus::Unprocessed);
        assert_eq!(line.reason, Some(ReasonCode::MissingPeriodTarget));
    }

    #[tokio::test]
    async fn test_targets_consumed_by_first_later_deposit() {
        let input = RunInput {
            lines: vec![
                StatementLine::new(1, CASH, day(10), "DEPOSITO EN EFECTIVO", d("1000.00")),
                StatementLine::new(2, CASH, day(12), "DEPOSITO EN EFECTIVO", d("700.00")),
            ],
            targets: vec![
                target(day(9), Channel::Cash, "1000.00"),
                target(day(11), Channel::Cash, "700.00"),
                target(day(12), Channel::Cash, "50.00"),
            ],
            ..RunInput::default()
        };
        let report = simulate(input).await;

        assert_eq!(report.line(1).unwrap().status, LineStatus::Simulated);
        assert_eq!(report.line(2).unwrap().status, LineStatus::Simulated);
        let statuses: Vec<TargetStatus> = report.targets.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![TargetStatus::Matched, TargetStatus::Matched, TargetStatus::Unmatched]
        );
        assert!(unaccounted(&report).is_empty());
    }

    #[tokio::test]
    async fn test_identity_violation_demotes_batch() {
        let mut broken = target(day(9), Channel::Card, "1000.00");
        broken.individual_invoices = vec![Invoice::new("A-1", d("10.00"))];
        let input = RunInput {
            lines: vec![
                StatementLine::new(1, CARD, day(10), "ABONO VENTAS TDC", d("1000.00")),
                StatementLine::new(2, CARD, day(10), "ABONO VENTAS TDD", d("10.00")),
            ],
            targets: vec![broken],
            ..RunInput::default()
        };
        let report = simulate(input).await;

        for line_no in [1, 2] {
            let line = report.line(line_no).unwrap();
            assert_eq!(line.status, LineStatus::RequiresReview);
            assert_eq!(line.reason, Some(ReasonCode::IdentityViolation));
        }
        assert_eq!(report.targets[0].status, TargetStatus::Blocked);
        assert_eq!(report.violations.len(), 1);
        assert!(report.groups.is_empty());
    }

    #[tokio::test]
    async fn test_document_backed_lines_without_documents_are_unprocessed() {
        let input = RunInput {
            lines: vec![StatementLine::new(1, CASH, day(10), "NOMINA QUINCENAL PAGO DE NOMINA", d("-85000.00"))],
            ..RunInput::default()
        };
        let report = simulate(input).await;
        let line = report.line(1).unwrap();
        assert_eq!(line.status, LineStatus::Unprocessed);
        assert_eq!(line.reason, Some(ReasonCode::MissingSupportingDocument));
    }

    #[tokio::test]
    async fn test_payroll_line_takes_the_matching_record() {
        let record = |number: u32, amount: &str| PayrollRecord {
            number,
            payments: vec![crate::models::PayrollPayment {
                kind: "DISPERSION".to_string(),
                amount: d(amount),
                principal: true,
                severance: false,
                by_check: false,
            }],
            perceptions: Vec::new(),
            deductions: Vec::new(),
        };
        let input = RunInput {
            lines: vec![
                StatementLine::new(1, CASH, day(13), "NOMINA 03 PAGO DE NOMINA", d("-85000.00")),
                StatementLine::new(2, CASH, day(27), "NOMINA 04 PAGO DE NOMINA", d("-85000.00")),
            ],
            payroll: vec![record(2, "70000.00"), record(3, "85000.00")],
            ..RunInput::default()
        };
        let report = simulate(input).await;

        let first = report.line(1).unwrap();
        assert_eq!(first.status, LineStatus::Simulated);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(
            report.groups[0].group.business_key.concept.as_deref(),
            Some("PAYROLL 03 DISPERSION")
        );
        // The one record of that amount is already taken by line 1.
        let second = report.line(2).unwrap();
        assert_eq!(second.status, LineStatus::Unprocessed);
        assert_eq!(second.reason, Some(ReasonCode::MissingSupportingDocument));
    }

    #[tokio::test]
    async fn test_unclassified_line_is_reported() {
        let input = RunInput {
            lines: vec![StatementLine::new(1, CASH, day(10), "MOVIMIENTO DESCONOCIDO", d("-1.00"))],
            ..RunInput::default()
        };
        let report = simulate(input).await;
        assert_eq!(report.summary.unclassified, 1);
        assert_eq!(report.line(1).unwrap().reason, Some(ReasonCode::Unclassified));
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_error() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = reconciler()
            .run(RunInput::default(), &RunMode::Simulate, &InMemoryStore::new(), &cancel)
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
