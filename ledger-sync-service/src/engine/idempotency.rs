//! Business-key duplicate suppression ahead of execution.

use crate::models::PlanGroup;
use crate::services::store::{ExistingMovement, LedgerStore};
use service_core::error::AppError;
use tracing::{debug, instrument};

/// A group whose effect the store already holds.
#[derive(Debug, Clone)]
pub struct PresentGroup {
    pub group: PlanGroup,
    pub existing: ExistingMovement,
}

#[derive(Debug, Clone, Default)]
pub struct GuardOutcome {
    pub to_execute: Vec<PlanGroup>,
    pub already_present: Vec<PresentGroup>,
}

#[derive(Debug, Clone, Copy)]
pub struct IdempotencyGuard {
    window_days: u32,
    reconcile_open: bool,
}

impl IdempotencyGuard {
    /// `window_days` only applies to reconciliation-only groups; creating
    /// groups carry their own concept and match on the exact date. With
    /// `reconcile_open` a matching record that is still open is reconciled
    /// instead of counting as present.
    pub fn new(window_days: u32, reconcile_open: bool) -> Self {
        Self {
            window_days,
            reconcile_open,
        }
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    /// Window used when looking up `group`'s key.
    pub fn window_for(&self, group: &PlanGroup) -> u32 {
        if group.is_reconciliation_only() {
            self.window_days
        } else {
            0
        }
    }

    /// Whether `existing`, found under `group`'s key, already satisfies the
    /// group. A reconciliation-only group is only satisfied by a record it
    /// points at; another record under the same key belongs to a sibling line.
    pub fn is_present(&self, group: &PlanGroup, existing: &ExistingMovement) -> bool {
        if !group.is_reconciliation_only() {
            return true;
        }
        if !group.existing_folios().any(|folio| folio == existing.folio) {
            return false;
        }
        !self.reconcile_open || existing.reconciled
    }

    #[instrument(skip(self, groups, store), fields(groups = groups.len()))]
    pub async fn filter(
        &self,
        groups: Vec<PlanGroup>,
        store: &dyn LedgerStore,
    ) -> Result<GuardOutcome, AppError> {
        let mut outcome = GuardOutcome::default();
        let referenced: Vec<i64> = groups
            .iter()
            .filter(|g| g.is_reconciliation_only())
            .flat_map(|g| g.existing_folios())
            .collect();

        for group in groups {
            // Records claimed by sibling groups must not answer this key.
            let exclude: Vec<i64> = if group.is_reconciliation_only() {
                referenced
                    .iter()
                    .copied()
                    .filter(|folio| !group.existing_folios().any(|own| own == *folio))
                    .collect()
            } else {
                Vec::new()
            };
            let found = store
                .find_movement(&group.business_key, self.window_for(&group), &exclude)
                .await?;

            match found.filter(|existing| self.is_present(&group, existing)) {
                Some(existing) => {
                    debug!(
                        group = group.id,
                        folio = existing.folio,
                        key = %group.business_key,
                        "Group already present"
                    );
                    outcome
                        .already_present
                        .push(PresentGroup { group, existing });
                }
                None => outcome.to_execute.push(group),
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessKey, Category, MovementRef, Operation, OperationKind};
    use crate::services::memory::{InMemoryStore, StoredMovement};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    const ACCOUNT: &str = "055003730017";

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, n).unwrap()
    }

    fn key(category: Category, concept: Option<&str>) -> BusinessKey {
        BusinessKey {
            account: ACCOUNT.to_string(),
            date: day(10),
            category,
            amount: Decimal::new(600000, 2),
            concept: concept.map(str::to_string),
        }
    }

    fn reconcile_group(folio: i64) -> PlanGroup {
        PlanGroup {
            id: 1,
            category: Category::SupplierPayment,
            source_lines: vec![3],
            business_key: key(Category::SupplierPayment, None),
            operations: vec![Operation::SetReconciled {
                movement: MovementRef::Existing(folio),
            }],
            tolerance_level: None,
        }
    }

    fn creating_group() -> PlanGroup {
        PlanGroup {
            id: 2,
            category: Category::BankFee,
            source_lines: vec![4, 5],
            business_key: key(Category::BankFee, Some("BANK FEES 10/03/2026")),
            operations: vec![Operation::AllocateSequence {
                slot: crate::models::SlotId(0),
                counter: crate::models::CounterName::MovementFolio,
            }],
            tolerance_level: None,
        }
    }

    fn open_record(folio: i64) -> StoredMovement {
        StoredMovement::manual(
            folio,
            ACCOUNT,
            day(10),
            Category::SupplierPayment,
            Decimal::new(600000, 2),
            "PAGO",
        )
    }

    #[tokio::test]
    async fn test_open_record_is_skipped_by_default() {
        let store = InMemoryStore::new();
        store.seed_movement(open_record(12)).await;

        let outcome = IdempotencyGuard::new(0, false)
            .filter(vec![reconcile_group(12)], &store)
            .await
            .unwrap();
        assert!(outcome.to_execute.is_empty());
        assert_eq!(outcome.already_present[0].existing.folio, 12);
        assert!(!outcome.already_present[0].existing.reconciled);
    }

    #[tokio::test]
    async fn test_open_record_is_executed_when_reconciling_open_records() {
        let store = InMemoryStore::new();
        store.seed_movement(open_record(12)).await;

        let outcome = IdempotencyGuard::new(0, true)
            .filter(vec![reconcile_group(12)], &store)
            .await
            .unwrap();
        assert_eq!(outcome.to_execute.len(), 1);
        assert!(outcome.already_present.is_empty());
    }

    #[tokio::test]
    async fn test_sibling_groups_are_judged_by_their_own_record() {
        let store = InMemoryStore::new();
        let mut first = open_record(12);
        first.reconciled = true;
        store.seed_movement(first).await;
        store.seed_movement(open_record(13)).await;

        let mut sibling = reconcile_group(13);
        sibling.id = 2;
        let outcome = IdempotencyGuard::new(0, true)
            .filter(vec![reconcile_group(12), sibling], &store)
            .await
            .unwrap();
        assert_eq!(outcome.already_present.len(), 1);
        assert_eq!(outcome.already_present[0].existing.folio, 12);
        assert_eq!(outcome.to_execute.len(), 1);
        assert_eq!(outcome.to_execute[0].existing_folios().collect::<Vec<_>>(), vec![13]);
    }

    #[tokio::test]
    async fn test_reconciled_record_is_skipped() {
        let store = InMemoryStore::new();
        let mut movement = StoredMovement::manual(
            12,
            ACCOUNT,
            day(10),
            Category::SupplierPayment,
            Decimal::new(600000, 2),
            "PAGO",
        );
        movement.reconciled = true;
        store.seed_movement(movement).await;

        let outcome = IdempotencyGuard::new(0, true)
            .filter(vec![reconcile_group(12)], &store)
            .await
            .unwrap();
        assert!(outcome.to_execute.is_empty());
        assert_eq!(outcome.already_present[0].existing.folio, 12);
    }

    #[tokio::test]
    async fn test_creating_group_dropped_on_any_match() {
        let store = InMemoryStore::new();
        let mut movement = StoredMovement::manual(
            30,
            ACCOUNT,
            day(10),
            Category::BankFee,
            Decimal::new(600000, 2),
            "BANK FEES 10/03/2026",
        );
        movement.reconciled = false;
        store.seed_movement(movement).await;

        let outcome = IdempotencyGuard::new(5, false)
            .filter(vec![creating_group()], &store)
            .await
            .unwrap();
        assert_eq!(outcome.already_present.len(), 1);
        assert_eq!(
            outcome.already_present[0].group.count(OperationKind::AllocateSequence),
            1
        );
    }

    #[tokio::test]
    async fn test_creating_group_ignores_reconciliation_window() {
        let store = InMemoryStore::new();
        store
            .seed_movement(StoredMovement::manual(
                30,
                ACCOUNT,
                day(9),
                Category::BankFee,
                Decimal::new(600000, 2),
                "BANK FEES 10/03/2026",
            ))
            .await;

        let outcome = IdempotencyGuard::new(3, false)
            .filter(vec![creating_group()], &store)
            .await
            .unwrap();
        assert_eq!(outcome.to_execute.len(), 1);
    }
}
