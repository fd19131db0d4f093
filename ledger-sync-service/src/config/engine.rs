use crate::models::LedgerAccount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

/// What to do with matches that needed more than the exact tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproximateMatchPolicy {
    /// Flag for revision with the residual; no plan is generated.
    #[default]
    Review,
    /// Plan it, absorbing the residual into the global invoice application.
    Plan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    /// Receives card settlements.
    CardSettlement,
    /// Receives cash deposits.
    CashSettlement,
    Expenses,
    PettyCash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub number: String,
    pub bank: String,
    pub ledger: LedgerAccount,
    #[serde(default)]
    pub role: Option<AccountRole>,
}

impl BankAccount {
    fn new(number: &str, bank: &str, account: &str, subaccount: &str, role: Option<AccountRole>) -> Self {
        Self {
            number: number.to_string(),
            bank: bank.to_string(),
            ledger: LedgerAccount::new(account, subaccount),
            role,
        }
    }
}

/// The company's own bank accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBook {
    pub accounts: Vec<BankAccount>,
}

impl Default for AccountBook {
    fn default() -> Self {
        Self {
            accounts: vec![
                BankAccount::new("055003730017", "BANREGIO", "1120", "040000", Some(AccountRole::CashSettlement)),
                BankAccount::new("038900320016", "BANREGIO", "1120", "060000", Some(AccountRole::CardSettlement)),
                BankAccount::new("055003730157", "BANREGIO", "1120", "070000", Some(AccountRole::Expenses)),
                BankAccount::new("0000000000", "CAJA CHICA", "1110", "010000", Some(AccountRole::PettyCash)),
            ],
        }
    }
}

/// Interbank keys carry the 11-digit account number at these positions.
const CLABE_LEN: usize = 18;
const CLABE_ACCOUNT: std::ops::Range<usize> = 6..17;

impl AccountBook {
    pub fn find(&self, number: &str) -> Option<&BankAccount> {
        self.accounts.iter().find(|a| a.number == number)
    }

    pub fn role_of(&self, number: &str) -> Option<AccountRole> {
        self.find(number).and_then(|a| a.role)
    }

    /// Resolve a counterparty reference (plain account or 18-digit interbank
    /// key) to one of our accounts.
    pub fn resolve_own(&self, reference: &str) -> Option<&BankAccount> {
        if let Some(account) = self.find(reference) {
            return Some(account);
        }
        if reference.len() != CLABE_LEN || !reference.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let embedded = reference[CLABE_ACCOUNT].trim_start_matches('0');
        self.accounts
            .iter()
            .find(|a| !embedded.is_empty() && a.number.trim_start_matches('0') == embedded)
    }
}

/// Ledger accounts used by the templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chart {
    pub customers: LedgerAccount,
    pub suppliers: LedgerAccount,
    pub vat_collected: LedgerAccount,
    pub vat_pending_collection: LedgerAccount,
    pub ieps_collected: LedgerAccount,
    pub ieps_pending_collection: LedgerAccount,
    pub vat_creditable_pending: LedgerAccount,
    pub vat_creditable_paid: LedgerAccount,
    /// Salaries not broken down by the payroll document.
    pub payroll_expense: LedgerAccount,
    /// Payroll creditors, settled by checks and other secondary payments.
    pub payroll_creditors: LedgerAccount,
}

impl Default for Chart {
    fn default() -> Self {
        Self {
            customers: LedgerAccount::new("1210", "010000"),
            suppliers: LedgerAccount::new("2110", "010000"),
            vat_collected: LedgerAccount::new("2141", "010000"),
            vat_pending_collection: LedgerAccount::new("2146", "010000"),
            ieps_collected: LedgerAccount::new("2141", "020000"),
            ieps_pending_collection: LedgerAccount::new("2146", "020000"),
            vat_creditable_pending: LedgerAccount::new("1240", "010000"),
            vat_creditable_paid: LedgerAccount::new("1246", "010000"),
            payroll_expense: LedgerAccount::new("6200", "010000"),
            payroll_creditors: LedgerAccount::new("2120", "040000"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Cent-level slack for the consistency identities.
    #[serde(default = "default_identity_tolerance")]
    pub identity_tolerance: Decimal,
    #[serde(default = "default_exact_tolerance")]
    pub exact_tolerance: Decimal,
    #[serde(default = "default_relaxed_tolerance")]
    pub relaxed_tolerance: Decimal,
    #[serde(default)]
    pub approximate_match_policy: ApproximateMatchPolicy,
    #[serde(default = "default_concept_width")]
    pub concept_width: usize,
    /// Date slack for reconciliation-only lookups. Zero means exact date.
    #[serde(default)]
    pub reconciliation_window_days: u32,
    /// Reconcile a matching record that is still open instead of skipping it.
    #[serde(default)]
    pub reconcile_open_records: bool,
    /// How far back the first deposit of a channel looks for cutoffs.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Maximum search nodes per tolerance pass.
    #[serde(default = "default_search_budget")]
    pub search_budget: usize,
    #[serde(default)]
    pub accounts: AccountBook,
    #[serde(default)]
    pub chart: Chart,
}

fn default_identity_tolerance() -> Decimal {
    Decimal::new(50, 2)
}

fn default_exact_tolerance() -> Decimal {
    Decimal::ONE
}

fn default_relaxed_tolerance() -> Decimal {
    Decimal::new(500, 0)
}

fn default_concept_width() -> usize {
    60
}

fn default_lookback_days() -> u32 {
    7
}

fn default_search_budget() -> usize {
    500_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            identity_tolerance: default_identity_tolerance(),
            exact_tolerance: default_exact_tolerance(),
            relaxed_tolerance: default_relaxed_tolerance(),
            approximate_match_policy: ApproximateMatchPolicy::default(),
            concept_width: default_concept_width(),
            reconciliation_window_days: 0,
            reconcile_open_records: false,
            lookback_days: default_lookback_days(),
            search_budget: default_search_budget(),
            accounts: AccountBook::default(),
            chart: Chart::default(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.exact_tolerance.is_sign_negative() || self.identity_tolerance.is_sign_negative() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Tolerances must not be negative"
            )));
        }
        if self.relaxed_tolerance < self.exact_tolerance {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "relaxed_tolerance ({}) must be >= exact_tolerance ({})",
                self.relaxed_tolerance,
                self.exact_tolerance
            )));
        }
        if self.concept_width == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "concept_width must be positive"
            )));
        }
        if self.search_budget == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "search_budget must be positive"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_own_by_plain_number() {
        let book = AccountBook::default();
        let account = book.resolve_own("055003730157").unwrap();
        assert_eq!(account.ledger, LedgerAccount::new("1120", "070000"));
    }

    #[test]
    fn test_resolve_own_by_interbank_key() {
        let book = AccountBook::default();
        // bank 058, branch 580, account 55003730017, check digit 4
        let account = book.resolve_own("058580550037300174").unwrap();
        assert_eq!(account.number, "055003730017");
    }

    #[test]
    fn test_resolve_own_rejects_foreign_accounts() {
        let book = AccountBook::default();
        assert!(book.resolve_own("012180001234567891").is_none());
        assert!(book.resolve_own("1234").is_none());
        assert!(book.resolve_own("").is_none());
    }

    #[test]
    fn test_defaults_pass_validation() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.reconciliation_window_days, 0);
        assert!(!settings.reconcile_open_records);
        assert_eq!(settings.approximate_match_policy, ApproximateMatchPolicy::Review);
    }

    #[test]
    fn test_relaxed_below_exact_is_rejected() {
        let settings = EngineSettings {
            relaxed_tolerance: Decimal::new(50, 2),
            ..EngineSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
