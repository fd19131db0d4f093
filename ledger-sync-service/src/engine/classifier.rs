//! Rule-based statement line classifier.
//!
//! Rules are evaluated in ascending priority; the first one whose pattern,
//! account role and direction all match decides the category. The rule set is
//! sorted when it is built, so the order rules are supplied in never matters.

use crate::config::{AccountBook, AccountRole};
use crate::engine::normalize::normalize;
use crate::models::{
    Category, Classification, ClassificationMetadata, Direction, FeeComponent, FeeKind,
    StatementLine,
};
use regex::Regex;
use service_core::error::AppError;
use std::collections::HashSet;

/// How a matching rule turns into a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Fixed(Category),
    /// Decided by whether the captured counterparty is one of our accounts.
    ByCounterparty { own: Category, foreign: Category },
}

/// Metadata pulled out of the description when a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    Nothing,
    /// First capture group is the counterparty account.
    Counterparty,
    Fee(FeeKind, FeeComponent),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub priority: u16,
    pattern: Regex,
    account_role: Option<AccountRole>,
    direction: Option<Direction>,
    outcome: RuleOutcome,
    extractor: Extractor,
}

impl Rule {
    /// Patterns run against normalized text: uppercase, unaccented ASCII.
    pub fn new(
        name: impl Into<String>,
        priority: u16,
        pattern: &str,
        outcome: RuleOutcome,
    ) -> Result<Self, AppError> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid pattern for rule {}: {}", name, e))
        })?;
        Ok(Self {
            name,
            priority,
            pattern,
            account_role: None,
            direction: None,
            outcome,
            extractor: Extractor::Nothing,
        })
    }

    pub fn on_account(mut self, role: AccountRole) -> Self {
        self.account_role = Some(role);
        self
    }

    pub fn when(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn extract(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    fn applies(&self, line: &StatementLine, text: &str, accounts: &AccountBook) -> bool {
        if let Some(direction) = self.direction {
            if line.direction != direction {
                return false;
            }
        }
        if let Some(role) = self.account_role {
            if accounts.role_of(&line.account) != Some(role) {
                return false;
            }
        }
        self.pattern.is_match(text)
    }
}

/// Rules in evaluation order.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Sort by priority. Two rules sharing a priority would make the outcome
    /// depend on input order, so that is rejected.
    pub fn new(mut rules: Vec<Rule>) -> Result<Self, AppError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.priority) {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Duplicate rule priority {} ({})",
                    rule.priority,
                    rule.name
                )));
            }
        }
        rules.sort_by_key(|r| r.priority);
        Ok(Self { rules })
    }

    pub fn standard() -> Result<Self, AppError> {
        Self::new(standard_rules()?)
    }
}

/// The production rule table. Each VAT rule sits before the base-fee rule
/// whose pattern it also contains.
pub fn standard_rules() -> Result<Vec<Rule>, AppError> {
    use Category::*;
    use Direction::{Credit, Debit};
    use RuleOutcome::{ByCounterparty, Fixed};

    Ok(vec![
        Rule::new(
            "outgoing_transfer",
            10,
            r"^\(BE\)\s*TRASPASO A CUENTA:\s*(\d+)",
            ByCounterparty { own: TransferOut, foreign: SupplierPayment },
        )?
        .when(Debit)
        .extract(Extractor::Counterparty),
        Rule::new(
            "incoming_transfer",
            20,
            r"^\(NB\)\s*RECEPCI.N DE CUENTA:\s*(\d+)",
            ByCounterparty { own: TransferIn, foreign: ClientCollection },
        )?
        .when(Credit)
        .extract(Extractor::Counterparty),
        Rule::new("card_sale_credit", 30, r"ABONO VENTAS TDC", Fixed(CardSale))?
            .on_account(AccountRole::CardSettlement)
            .when(Credit),
        Rule::new("card_sale_debit", 40, r"ABONO VENTAS TDD", Fixed(DebitCardSale))?
            .on_account(AccountRole::CardSettlement)
            .when(Credit),
        Rule::new("cash_deposit", 50, r"DEP.SITO EN EFECTIVO", Fixed(CashDeposit))?
            .on_account(AccountRole::CashSettlement)
            .when(Credit),
        Rule::new("transfer_fee_vat", 60, r"IVA DE COMISI.N TRANSFER", Fixed(BankFeeVat))?
            .when(Debit)
            .extract(Extractor::Fee(FeeKind::Transfer, FeeComponent::Vat)),
        Rule::new("transfer_fee", 70, r"COMISI.N TRANSFERENCIA", Fixed(BankFee))?
            .when(Debit)
            .extract(Extractor::Fee(FeeKind::Transfer, FeeComponent::Base)),
        Rule::new("card_fee_vat", 80, r"IVA APLICACI.N DE TASAS", Fixed(BankFeeVat))?
            .on_account(AccountRole::CardSettlement)
            .when(Debit)
            .extract(Extractor::Fee(FeeKind::CardDiscount, FeeComponent::Vat)),
        Rule::new("card_fee", 90, r"APLICACI.N DE TASAS DE DESCUENTO", Fixed(BankFee))?
            .on_account(AccountRole::CardSettlement)
            .when(Debit)
            .extract(Extractor::Fee(FeeKind::CardDiscount, FeeComponent::Base)),
        Rule::new("payroll", 100, r"NOMINA.*PAGO DE NOMINA", Fixed(Payroll))?.when(Debit),
        Rule::new(
            "federal_tax",
            110,
            r"\(BE\)\s*PAGO SERVICIO.*PAGO REFERENCIADO",
            Fixed(FederalTax),
        )?
        .on_account(AccountRole::CashSettlement)
        .when(Debit),
        Rule::new("state_tax", 120, r"SECRETAR.A DE FINANZAS", Fixed(StateTax))?.when(Debit),
        Rule::new(
            "social_security",
            130,
            r"\(BE\)\s*PAGO SERVICIO.*PAGO SUA",
            Fixed(SocialSecurity),
        )?
        .on_account(AccountRole::CashSettlement)
        .when(Debit),
        Rule::new("spei_collection", 140, r"[A-Z0-9]{5,}.*SPEI", Fixed(ClientCollection))?
            .on_account(AccountRole::CashSettlement)
            .when(Credit),
        Rule::new("spei_payment", 150, r"[A-Z0-9]{5,}.*SPEI", Fixed(SupplierPayment))?
            .on_account(AccountRole::CashSettlement)
            .when(Debit),
    ])
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: RuleSet,
    accounts: AccountBook,
}

impl Classifier {
    pub fn new(rules: RuleSet, accounts: AccountBook) -> Self {
        Self { rules, accounts }
    }

    pub fn standard(accounts: AccountBook) -> Result<Self, AppError> {
        Ok(Self::new(RuleSet::standard()?, accounts))
    }

    pub fn classify(&self, line: &StatementLine) -> Classification {
        let normalized = normalize(&line.description);
        let mut metadata = ClassificationMetadata {
            normalized_description: normalized.text.clone(),
            lossy_text: normalized.lossy,
            ..ClassificationMetadata::default()
        };

        // First match wins - stop checking rules
        let Some(rule) = self
            .rules
            .rules
            .iter()
            .find(|rule| rule.applies(line, &normalized.text, &self.accounts))
        else {
            return Classification {
                line_no: line.line_no,
                category: Category::Unclassified,
                direction: line.direction,
                rule: None,
                metadata,
            };
        };

        match rule.extractor {
            Extractor::Nothing => {}
            Extractor::Counterparty => {
                metadata.counterparty_account = rule
                    .pattern
                    .captures(&normalized.text)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
            }
            Extractor::Fee(kind, component) => {
                metadata.fee_kind = Some(kind);
                metadata.fee_component = Some(component);
                metadata.fee_unit_amount = Some(line.magnitude());
            }
        }

        let category = match rule.outcome {
            RuleOutcome::Fixed(category) => category,
            RuleOutcome::ByCounterparty { own, foreign } => {
                let is_own = metadata
                    .counterparty_account
                    .as_deref()
                    .and_then(|reference| self.accounts.resolve_own(reference))
                    .is_some_and(|account| account.number != line.account);
                if is_own {
                    own
                } else {
                    foreign
                }
            }
        };

        Classification {
            line_no: line.line_no,
            category,
            direction: line.direction,
            rule: Some(rule.name.clone()),
            metadata,
        }
    }
}
