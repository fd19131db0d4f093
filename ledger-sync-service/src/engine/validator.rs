//! Accounting identities checked before any target reaches the matcher.

use crate::models::{Channel, DailySales, Identity, IdentityViolation, PeriodTarget};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub violations: Vec<IdentityViolation>,
}

impl ValidationOutcome {
    /// First violation that blocks the target of `date` on `channel`: one on
    /// its own channel or one that spans the whole day.
    pub fn blocking(&self, date: NaiveDate, channel: Channel) -> Option<&IdentityViolation> {
        self.violations
            .iter()
            .find(|v| v.date == date && v.channel.map_or(true, |c| c == channel))
    }

    fn extend(&mut self, other: ValidationOutcome) {
        self.violations.extend(other.violations);
    }
}

#[derive(Debug, Clone)]
pub struct Validator {
    tolerance: Decimal,
}

impl Validator {
    pub fn new(tolerance: Decimal) -> Self {
        Self { tolerance }
    }

    /// Validate every day present in either input.
    pub fn validate(&self, targets: &[PeriodTarget], daily: &[DailySales]) -> ValidationOutcome {
        let days: BTreeSet<NaiveDate> = targets
            .iter()
            .map(|t| t.date)
            .chain(daily.iter().map(|d| d.date))
            .collect();

        let mut outcome = ValidationOutcome::default();
        for day in days {
            let of_day: Vec<&PeriodTarget> = targets.iter().filter(|t| t.date == day).collect();
            let declared = daily.iter().find(|d| d.date == day);
            outcome.extend(self.validate_day(day, &of_day, declared));
        }
        outcome
    }

    pub fn validate_day(
        &self,
        day: NaiveDate,
        targets: &[&PeriodTarget],
        declared: Option<&DailySales>,
    ) -> ValidationOutcome {
        let mut violations: Vec<IdentityViolation> = targets
            .iter()
            .flat_map(|t| self.check_target(t))
            .collect();

        if let Some(declared) = declared {
            let channel_sum: Decimal = targets.iter().map(|t| t.expected_total).sum();
            let lhs = channel_sum + declared.other_total;
            if (lhs - declared.declared_total).abs() > self.tolerance {
                violations.push(IdentityViolation {
                    date: day,
                    channel: None,
                    identity: Identity::DailyChannels,
                    lhs,
                    rhs: declared.declared_total,
                    tolerance: self.tolerance,
                });
            }
        }

        ValidationOutcome { violations }
    }

    pub fn check_target(&self, target: &PeriodTarget) -> Vec<IdentityViolation> {
        let violation = |identity, lhs, rhs, tolerance| IdentityViolation {
            date: target.date,
            channel: Some(target.channel),
            identity,
            lhs,
            rhs,
            tolerance,
        };

        let mut violations = Vec::new();

        if target.expected_total <= Decimal::ZERO {
            violations.push(violation(
                Identity::PositiveTotal,
                target.expected_total,
                Decimal::ZERO,
                Decimal::ZERO,
            ));
        }

        let negative = target
            .individual_invoices
            .iter()
            .chain(std::iter::once(&target.global_invoice))
            .find(|i| i.amount.is_sign_negative() && !i.amount.is_zero());
        if let Some(invoice) = negative {
            violations.push(violation(
                Identity::NonNegativeInvoices,
                invoice.amount,
                Decimal::ZERO,
                Decimal::ZERO,
            ));
        }

        let lhs = target.individual_total() + target.global_invoice.amount;
        if (lhs - target.expected_total).abs() > self.tolerance {
            violations.push(violation(
                Identity::InvoiceBreakdown,
                lhs,
                target.expected_total,
                self.tolerance,
            ));
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Invoice;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, n).unwrap()
    }

    fn target(date: NaiveDate, channel: Channel, total: &str, individuals: &[&str], global: &str) -> PeriodTarget {
        PeriodTarget {
            date,
            channel,
            expected_total: d(total),
            global_invoice: Invoice::new("FD-100", d(global)),
            individual_invoices: individuals
                .iter()
                .enumerate()
                .map(|(i, a)| Invoice::new(format!("A-{}", i + 1), d(a)))
                .collect(),
        }
    }

    #[test]
    fn test_consistent_target_passes() {
        let v = Validator::new(d("0.50"));
        let t = target(day(2), Channel::Cash, "1000.00", &["200.00", "300.00"], "500.00");
        assert!(v.check_target(&t).is_empty());
    }

    #[test]
    fn test_rounding_within_tolerance_passes() {
        let v = Validator::new(d("0.50"));
        let t = target(day(2), Channel::Cash, "1000.00", &["200.00"], "800.37");
        assert!(v.check_target(&t).is_empty());
    }

    #[test]
    fn test_breakdown_violation_reports_the_inequality() {
        let v = Validator::new(d("0.50"));
        let t = target(day(2), Channel::Card, "1000.00", &["200.00"], "802.00");
        let violations = v.check_target(&t);
        assert_eq!(violations.len(), 1);
        let violation = &violations[0];
        assert_eq!(violation.identity, Identity::InvoiceBreakdown);
        assert_eq!(violation.difference(), d("2.00"));
        let text = violation.to_string();
        assert!(text.contains("sum(individual) + global != expected_total"));
        assert!(text.contains("1002.00 vs 1000.00"));
    }

    #[test]
    fn test_non_positive_total_is_rejected() {
        let v = Validator::new(d("0.50"));
        let t = target(day(2), Channel::Cash, "0", &[], "0");
        let violations = v.check_target(&t);
        assert!(violations.iter().any(|x| x.identity == Identity::PositiveTotal));
    }

    #[test]
    fn test_daily_identity_blocks_both_channels() {
        let v = Validator::new(d("0.50"));
        let targets = vec![
            target(day(3), Channel::Card, "700.00", &[], "700.00"),
            target(day(3), Channel::Cash, "300.00", &[], "300.00"),
        ];
        let daily = vec![DailySales {
            date: day(3),
            declared_total: d("1100.00"),
            other_total: d("50.00"),
        }];
        let outcome = v.validate(&targets, &daily);
        assert_eq!(outcome.violations.len(), 1);
        assert!(outcome.blocking(day(3), Channel::Card).is_some());
        assert!(outcome.blocking(day(3), Channel::Cash).is_some());
        assert!(outcome.blocking(day(4), Channel::Card).is_none());
    }

    #[test]
    fn test_target_violation_blocks_only_its_channel() {
        let v = Validator::new(d("0.50"));
        let targets = vec![
            target(day(5), Channel::Card, "700.00", &[], "650.00"),
            target(day(5), Channel::Cash, "300.00", &[], "300.00"),
        ];
        let outcome = v.validate(&targets, &[]);
        assert!(!outcome.violations.is_empty());
        assert!(outcome.blocking(day(5), Channel::Card).is_some());
        assert!(outcome.blocking(day(5), Channel::Cash).is_none());
    }
}
