//! Execution mediator: previews or commits plan groups, one unit of work per
//! group.

use crate::engine::idempotency::IdempotencyGuard;
use crate::error::{StoreError, SyncError};
use crate::models::{
    Allocation, CounterName, GroupDisposition, GroupReport, MovementRef, Operation, PlanGroup,
    ReasonCode, SlotId,
};
use crate::services::metrics::{record_error, record_group_outcome};
use crate::services::store::{LedgerStore, UnitOfWork};
use service_core::error::AppError;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// Operator confirmation required before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    operator: String,
}

impl Approval {
    pub fn confirmed_by(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
        }
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Simulate,
    Commit(Approval),
}

impl RunMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Simulate => "simulate",
            Self::Commit(_) => "commit",
        }
    }

    pub fn approved_by(&self) -> Option<&str> {
        match self {
            Self::Simulate => None,
            Self::Commit(approval) => Some(approval.operator()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionMediator {
    guard: IdempotencyGuard,
}

impl ExecutionMediator {
    pub fn new(guard: IdempotencyGuard) -> Self {
        Self { guard }
    }

    #[instrument(skip_all, fields(mode = mode.label(), groups = groups.len()))]
    pub async fn run(
        &self,
        groups: Vec<PlanGroup>,
        mode: &RunMode,
        store: &dyn LedgerStore,
    ) -> Result<Vec<GroupReport>, AppError> {
        match mode {
            RunMode::Simulate => self.simulate(groups, store).await,
            RunMode::Commit(approval) => Ok(self.commit(groups, approval, store).await),
        }
    }

    /// Read counters once and hand out values from local copies.
    async fn simulate(
        &self,
        groups: Vec<PlanGroup>,
        store: &dyn LedgerStore,
    ) -> Result<Vec<GroupReport>, AppError> {
        let mut counters = HashMap::new();
        for counter in [CounterName::MovementFolio, CounterName::LedgerEntry] {
            counters.insert(counter, store.current_counter(counter).await?);
        }

        let reports = groups
            .into_iter()
            .map(|group| {
                let allocations = group
                    .operations
                    .iter()
                    .filter_map(|op| match op {
                        Operation::AllocateSequence { slot, counter } => {
                            let value = counters.entry(*counter).or_insert(0);
                            *value += 1;
                            Some(Allocation {
                                slot: *slot,
                                counter: *counter,
                                value: *value,
                            })
                        }
                        _ => None,
                    })
                    .collect();
                record_group_outcome("simulated");
                GroupReport {
                    group,
                    disposition: GroupDisposition::Simulated,
                    allocations,
                }
            })
            .collect();

        Ok(reports)
    }

    async fn commit(
        &self,
        groups: Vec<PlanGroup>,
        approval: &Approval,
        store: &dyn LedgerStore,
    ) -> Vec<GroupReport> {
        let mut reports = Vec::with_capacity(groups.len());

        for group in groups {
            let (disposition, allocations) = match self.commit_group(&group, store).await {
                Ok(allocations) => {
                    info!(
                        group = group.id,
                        category = %group.category,
                        operator = approval.operator(),
                        "Group committed"
                    );
                    (GroupDisposition::Executed, allocations)
                }
                Err(SyncError::DuplicateDetected { folio }) => {
                    info!(group = group.id, folio = folio, "Group already present at commit");
                    (GroupDisposition::AlreadyPresent { folio }, Vec::new())
                }
                Err(e) => {
                    let reason = e.reason_code().unwrap_or(ReasonCode::PartialCommit);
                    warn!(
                        group = group.id,
                        reason = %reason,
                        error = %e,
                        "Group rolled back"
                    );
                    record_error(reason.as_str());
                    (
                        GroupDisposition::Failed {
                            reason,
                            message: e.to_string(),
                        },
                        Vec::new(),
                    )
                }
            };
            record_group_outcome(disposition.label());
            reports.push(GroupReport {
                group,
                disposition,
                allocations,
            });
        }

        reports
    }

    async fn commit_group(
        &self,
        group: &PlanGroup,
        store: &dyn LedgerStore,
    ) -> Result<Vec<Allocation>, SyncError> {
        let mut unit = store.begin().await?;

        let found = match unit
            .find_movement(&group.business_key, self.guard.window_for(group))
            .await
        {
            Ok(found) => found,
            Err(e) => {
                unit.rollback().await.ok();
                return Err(e.into());
            }
        };
        if let Some(existing) = found {
            if self.guard.is_present(group, &existing) {
                unit.rollback().await.ok();
                return Err(SyncError::DuplicateDetected {
                    folio: existing.folio,
                });
            }
        }

        let mut slots = SlotTable::default();
        for (index, op) in group.operations.iter().enumerate() {
            if let Err(e) = apply(unit.as_mut(), op, &mut slots).await {
                unit.rollback().await.ok();
                return Err(match e {
                    StoreError::SequenceCollision { counter, value } => {
                        SyncError::SequenceCollision { counter, value }
                    }
                    other => SyncError::PartialCommitAttempt {
                        index,
                        kind: op.kind(),
                        message: other.to_string(),
                    },
                });
            }
        }

        unit.commit().await?;
        Ok(slots.allocations)
    }
}

#[derive(Debug, Default)]
struct SlotTable {
    values: HashMap<SlotId, i64>,
    allocations: Vec<Allocation>,
}

impl SlotTable {
    fn bind(&mut self, slot: SlotId, counter: CounterName, value: i64) {
        self.values.insert(slot, value);
        self.allocations.push(Allocation {
            slot,
            counter,
            value,
        });
    }

    fn resolve(&self, slot: SlotId) -> Result<i64, StoreError> {
        self.values.get(&slot).copied().ok_or_else(|| {
            StoreError::Backend(AppError::InternalError(anyhow::anyhow!(
                "{} used before allocation",
                slot
            )))
        })
    }
}

async fn apply(
    unit: &mut dyn UnitOfWork,
    op: &Operation,
    slots: &mut SlotTable,
) -> Result<(), StoreError> {
    match op {
        Operation::AllocateSequence { slot, counter } => {
            let value = unit.reserve_next(*counter).await?;
            slots.bind(*slot, *counter, value);
        }
        Operation::CreateMovement(draft) => {
            let folio = slots.resolve(draft.folio)?;
            unit.insert_movement(folio, draft).await?;
        }
        Operation::LinkInvoice(link) => {
            let folio = slots.resolve(link.movement)?;
            unit.link_invoice(folio, link).await?;
        }
        Operation::CreateLedgerLine(line) => {
            let entry = slots.resolve(line.entry)?;
            let folio = slots.resolve(line.movement)?;
            unit.insert_ledger_line(entry, folio, line).await?;
        }
        Operation::SetReconciled { movement } => {
            let folio = match movement {
                MovementRef::Slot(slot) => slots.resolve(*slot)?,
                MovementRef::Existing(folio) => *folio,
            };
            unit.set_reconciled(folio).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountBook, Chart};
    use crate::engine::planner::{PlanBuilder, PlanInput};
    use crate::models::{BusinessKey, Category, Classification, ClassificationMetadata, StatementLine};
    use crate::services::memory::{InMemoryStore, StoredMovement};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    const CASH: &str = "055003730017";

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, n).unwrap()
    }

    fn fee_group(id: u32, date: NaiveDate, cents: i64) -> PlanGroup {
        let line = StatementLine::new(id, CASH, date, "COMISION", Decimal::new(-cents, 2));
        let classification = Classification {
            line_no: id,
            category: Category::BankFee,
            direction: line.direction,
            rule: Some("transfer_fee".to_string()),
            metadata: ClassificationMetadata::default(),
        };
        let lines = [(&line, &classification)];
        PlanBuilder::new(AccountBook::default(), Chart::default(), 60)
            .build(
                id,
                PlanInput::Fees {
                    account: CASH,
                    date,
                    lines: &lines,
                },
                None,
            )
            .unwrap()
    }

    fn mediator() -> ExecutionMediator {
        ExecutionMediator::new(IdempotencyGuard::new(0, false))
    }

    fn reconcile_group(id: u32, folio: i64) -> PlanGroup {
        PlanGroup {
            id,
            category: Category::SupplierPayment,
            source_lines: vec![id],
            business_key: BusinessKey {
                account: CASH.to_string(),
                date: day(10),
                category: Category::SupplierPayment,
                amount: Decimal::new(600000, 2),
                concept: None,
            },
            operations: vec![Operation::SetReconciled {
                movement: MovementRef::Existing(folio),
            }],
            tolerance_level: None,
        }
    }

    #[tokio::test]
    async fn test_simulate_shows_sequential_values_without_writing() {
        let store = InMemoryStore::with_counters(500, 90);
        let groups = vec![fee_group(1, day(9), 600), fee_group(2, day(10), 1200)];

        let reports = mediator()
            .run(groups, &RunMode::Simulate, &store)
            .await
            .unwrap();

        let values: Vec<(CounterName, i64)> = reports
            .iter()
            .flat_map(|r| r.allocations.iter().map(|a| (a.counter, a.value)))
            .collect();
        assert_eq!(
            values,
            vec![
                (CounterName::MovementFolio, 501),
                (CounterName::LedgerEntry, 91),
                (CounterName::MovementFolio, 502),
                (CounterName::LedgerEntry, 92),
            ]
        );
        assert!(store.movements().await.is_empty());
        assert_eq!(store.counter(CounterName::MovementFolio).await, 500);
    }

    #[tokio::test]
    async fn test_commit_writes_and_reconciles() {
        let store = InMemoryStore::with_counters(500, 90);
        let mode = RunMode::Commit(Approval::confirmed_by("auditor"));

        let reports = mediator()
            .run(vec![fee_group(1, day(9), 696)], &mode, &store)
            .await
            .unwrap();
        assert_eq!(reports[0].disposition, GroupDisposition::Executed);

        let movement = store.movement(501).await.unwrap();
        assert!(movement.reconciled);
        assert_eq!(movement.ledger_entry, Some(91));
        assert_eq!(store.ledger_lines().await.len(), 4);
    }

    #[tokio::test]
    async fn test_collision_surfaces_without_overwrite() {
        let store = InMemoryStore::with_counters(500, 90);
        store
            .seed_movement(StoredMovement::manual(
                501,
                "038900320016",
                day(1),
                Category::SupplierPayment,
                Decimal::ONE,
                "CAPTURED OUTSIDE THE SYNC",
            ))
            .await;
        let mode = RunMode::Commit(Approval::confirmed_by("auditor"));

        let reports = mediator()
            .run(vec![fee_group(1, day(9), 600)], &mode, &store)
            .await
            .unwrap();

        assert!(matches!(
            reports[0].disposition,
            GroupDisposition::Failed {
                reason: ReasonCode::SequenceCollision,
                ..
            }
        ));
        let seeded = store.movement(501).await.unwrap();
        assert_eq!(seeded.concept, "CAPTURED OUTSIDE THE SYNC");
        assert!(!seeded.reconciled);
        assert!(store.ledger_lines().await.is_empty());
        assert_eq!(store.counter(CounterName::MovementFolio).await, 500);
    }

    #[tokio::test]
    async fn test_failed_group_rolls_back_and_siblings_continue() {
        let store = InMemoryStore::with_counters(500, 90);
        let mut broken = fee_group(1, day(9), 600);
        broken.operations.push(Operation::SetReconciled {
            movement: MovementRef::Existing(77),
        });
        let failing_index = broken.operations.len() - 1;
        let mode = RunMode::Commit(Approval::confirmed_by("auditor"));

        let reports = mediator()
            .run(vec![broken, fee_group(2, day(10), 700)], &mode, &store)
            .await
            .unwrap();

        match &reports[0].disposition {
            GroupDisposition::Failed { reason, message } => {
                assert_eq!(*reason, ReasonCode::PartialCommit);
                assert!(message.contains(&format!("operation #{} (set_reconciled)", failing_index)));
            }
            other => panic!("unexpected disposition {:?}", other),
        }
        assert_eq!(reports[1].disposition, GroupDisposition::Executed);
        assert_eq!(reports[1].allocations[0].value, 501);

        let movements = store.movements().await;
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].date, day(10));
        assert_eq!(store.ledger_lines().await.len(), 4);
    }

    #[tokio::test]
    async fn test_twin_records_are_reconciled_by_their_own_groups() {
        let store = InMemoryStore::new();
        for folio in [40, 41] {
            store
                .seed_movement(StoredMovement::manual(
                    folio,
                    CASH,
                    day(10),
                    Category::SupplierPayment,
                    Decimal::new(600000, 2),
                    "PAGO PROVEEDOR",
                ))
                .await;
        }
        let mode = RunMode::Commit(Approval::confirmed_by("auditor"));

        let reports = ExecutionMediator::new(IdempotencyGuard::new(0, true))
            .run(vec![reconcile_group(1, 40), reconcile_group(2, 41)], &mode, &store)
            .await
            .unwrap();

        assert_eq!(reports[0].disposition, GroupDisposition::Executed);
        assert_eq!(reports[1].disposition, GroupDisposition::Executed);
        assert!(store.movement(40).await.unwrap().reconciled);
        assert!(store.movement(41).await.unwrap().reconciled);
    }

    #[tokio::test]
    async fn test_open_record_counts_as_present_by_default() {
        let store = InMemoryStore::new();
        store
            .seed_movement(StoredMovement::manual(
                40,
                CASH,
                day(10),
                Category::SupplierPayment,
                Decimal::new(600000, 2),
                "PAGO PROVEEDOR",
            ))
            .await;
        let mode = RunMode::Commit(Approval::confirmed_by("auditor"));

        let reports = mediator()
            .run(vec![reconcile_group(1, 40)], &mode, &store)
            .await
            .unwrap();

        assert_eq!(reports[0].disposition, GroupDisposition::AlreadyPresent { folio: 40 });
        assert!(!store.movement(40).await.unwrap().reconciled);
    }

    #[test]
    fn test_mode_labels() {
        let mode = RunMode::Commit(Approval::confirmed_by("maria"));
        assert_eq!(mode.label(), "commit");
        assert_eq!(mode.approved_by(), Some("maria"));
        assert_eq!(RunMode::Simulate.approved_by(), None);
    }
}
