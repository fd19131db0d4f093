//! Operation templates per category.
//!
//! Ledger lines come from [`LedgerBlock::transfer`], which always emits a
//! debit and a credit of the same amount, or from [`LedgerBlock::compound`],
//! which refuses sides that differ. A group cannot come out unbalanced.
//! Counter values are never computed here: templates emit `AllocateSequence`
//! and refer to the result through slots.

use crate::config::{AccountBook, BankAccount, Chart};
use crate::models::{
    BusinessKey, Category, Channel, Classification, CounterName, Direction, DocumentLine,
    EntryType, InvoiceKind, InvoiceLinkDraft, LedgerAccount, LedgerLineDraft, MatchAssignment,
    MovementDraft, MovementKind, MovementRef, Operation, PaymentForm, PayrollRecord, PlanGroup,
    ReasonCode, SlotId, StatementLine, TaxKind, TaxPayment,
};
use crate::services::store::ExistingMovement;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Why a template could not produce a group.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildIssue {
    #[error("individual invoices ({individual_total}) exceed the deposited amount ({deposited})")]
    GlobalShareNegative {
        individual_total: Decimal,
        deposited: Decimal,
    },

    #[error("account {0} is not in the account book")]
    UnknownAccount(String),

    #[error("no store record matches {0}")]
    NoMatchingRecord(BusinessKey),

    #[error("{category} group for {date} has nothing to post")]
    EmptyGroup { category: Category, date: NaiveDate },

    #[error("supporting document totals {documented}, expected {expected}")]
    DocumentMismatch {
        documented: Decimal,
        expected: Decimal,
    },
}

impl BuildIssue {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::GlobalShareNegative { .. } => ReasonCode::GlobalShareNegative,
            Self::UnknownAccount(_) => ReasonCode::UnknownAccount,
            Self::NoMatchingRecord(_) => ReasonCode::NoMatchingRecord,
            Self::EmptyGroup { .. } => ReasonCode::EmptyGroup,
            Self::DocumentMismatch { .. } => ReasonCode::DocumentMismatch,
        }
    }
}

/// Cut `text` to at most `width` characters. Lossy on purpose: the ledger
/// column is fixed-width.
pub fn truncate_concept(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// What a group is built from.
#[derive(Debug, Clone, Copy)]
pub enum PlanInput<'a> {
    /// Deposits matched to one period target.
    Sale {
        assignment: &'a MatchAssignment,
        members: &'a [&'a StatementLine],
    },
    /// All fee lines of one account and day.
    Fees {
        account: &'a str,
        date: NaiveDate,
        lines: &'a [(&'a StatementLine, &'a Classification)],
    },
    Transfer {
        line: &'a StatementLine,
        classification: &'a Classification,
    },
    Reconcile {
        line: &'a StatementLine,
        classification: &'a Classification,
    },
    /// A payroll line and the payroll run it disburses.
    Payroll {
        line: &'a StatementLine,
        record: &'a PayrollRecord,
    },
    /// A tax or social security line and its declaration.
    Tax {
        line: &'a StatementLine,
        payment: &'a TaxPayment,
    },
}

// ============================================================================
// Group and ledger builders
// ============================================================================

#[derive(Debug, Default)]
struct GroupBuilder {
    operations: Vec<Operation>,
    next_slot: u8,
}

impl GroupBuilder {
    fn allocate(&mut self, counter: CounterName) -> SlotId {
        let slot = SlotId(self.next_slot);
        self.next_slot += 1;
        self.operations
            .push(Operation::AllocateSequence { slot, counter });
        slot
    }

    fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    fn ledger(&mut self, block: LedgerBlock) {
        self.operations
            .extend(block.lines.into_iter().map(Operation::CreateLedgerLine));
    }
}

struct LedgerBlock {
    entry: SlotId,
    movement: SlotId,
    entry_type: EntryType,
    width: usize,
    lines: Vec<LedgerLineDraft>,
}

impl LedgerBlock {
    fn new(entry: SlotId, movement: SlotId, entry_type: EntryType, width: usize) -> Self {
        Self {
            entry,
            movement,
            entry_type,
            width,
            lines: Vec::new(),
        }
    }

    /// Debit `debit` and credit `credit` for the same amount.
    fn transfer(&mut self, debit: &LedgerAccount, credit: &LedgerAccount, amount: Decimal, concept: &str) {
        self.line(debit, Direction::Debit, amount, concept);
        self.line(credit, Direction::Credit, amount, concept);
    }

    /// Debit every line of `debits` and credit every line of `credits`.
    /// Nothing is emitted unless both sides add up to the same total.
    fn compound(&mut self, debits: &[DocumentLine], credits: &[DocumentLine]) -> Result<(), BuildIssue> {
        let side = |lines: &[DocumentLine]| {
            lines
                .iter()
                .map(|l| l.amount)
                .filter(|a| *a > Decimal::ZERO)
                .sum::<Decimal>()
        };
        let (debit_total, credit_total) = (side(debits), side(credits));
        if debit_total != credit_total {
            return Err(BuildIssue::DocumentMismatch {
                documented: debit_total,
                expected: credit_total,
            });
        }
        for (lines, direction) in [(debits, Direction::Debit), (credits, Direction::Credit)] {
            for l in lines.iter().filter(|l| l.amount > Decimal::ZERO) {
                self.line(&l.account, direction, l.amount, &l.concept);
            }
        }
        Ok(())
    }

    fn line(&mut self, account: &LedgerAccount, direction: Direction, amount: Decimal, concept: &str) {
        let line_number = self.lines.len() as u16 + 1;
        self.lines.push(LedgerLineDraft {
            entry: self.entry,
            movement: self.movement,
            entry_type: self.entry_type,
            line_number,
            account: account.clone(),
            direction,
            amount,
            concept: truncate_concept(concept, self.width),
        });
    }
}

// ============================================================================
// Plan builder
// ============================================================================

#[derive(Debug, Clone)]
pub struct PlanBuilder {
    accounts: AccountBook,
    chart: Chart,
    concept_width: usize,
}

impl PlanBuilder {
    pub fn new(accounts: AccountBook, chart: Chart, concept_width: usize) -> Self {
        Self {
            accounts,
            chart,
            concept_width,
        }
    }

    pub fn build(
        &self,
        id: u32,
        input: PlanInput<'_>,
        existing: Option<&ExistingMovement>,
    ) -> Result<PlanGroup, BuildIssue> {
        match input {
            PlanInput::Sale {
                assignment,
                members,
            } => self.sale(id, assignment, members),
            PlanInput::Fees {
                account,
                date,
                lines,
            } => self.fees(id, account, date, lines),
            PlanInput::Transfer {
                line,
                classification,
            } => self.transfer(id, line, classification),
            PlanInput::Reconcile {
                line,
                classification,
            } => self.reconcile(id, line, classification, existing),
            PlanInput::Payroll { line, record } => self.payroll(id, line, record),
            PlanInput::Tax { line, payment } => self.tax(id, line, payment),
        }
    }

    /// Key under which an existing record for a reconciliation-only line is
    /// looked up. The concept is left open because such records are captured
    /// by hand.
    pub fn reconciliation_key(line: &StatementLine, classification: &Classification) -> BusinessKey {
        BusinessKey {
            account: line.account.clone(),
            date: line.date,
            category: classification.category,
            amount: line.magnitude(),
            concept: None,
        }
    }

    fn bank(&self, account: &str) -> Result<&BankAccount, BuildIssue> {
        self.accounts
            .find(account)
            .ok_or_else(|| BuildIssue::UnknownAccount(account.to_string()))
    }

    fn concept(&self, text: String) -> String {
        truncate_concept(&text, self.concept_width)
    }

    fn sale(
        &self,
        id: u32,
        assignment: &MatchAssignment,
        members: &[&StatementLine],
    ) -> Result<PlanGroup, BuildIssue> {
        let target = &assignment.target;
        let account = members
            .first()
            .map(|l| l.account.as_str())
            .unwrap_or_default();
        let bank = self.bank(account)?;
        let date = members.iter().map(|l| l.date).max().unwrap_or(target.date);

        let individual_total = target.individual_total();
        let global_share = assignment.member_total - individual_total;
        if global_share.is_sign_negative() && !global_share.is_zero() {
            return Err(BuildIssue::GlobalShareNegative {
                individual_total,
                deposited: assignment.member_total,
            });
        }

        let (category, payment_form) = match target.channel {
            Channel::Card => (Category::CardSale, PaymentForm::Card),
            Channel::Cash => (Category::CashDeposit, PaymentForm::Cash),
        };
        let concept = self.concept(format!("DAILY SALES {}", target.date.format("%d/%m/%Y")));

        let mut group = GroupBuilder::default();
        let folio = group.allocate(CounterName::MovementFolio);
        group.push(Operation::CreateMovement(MovementDraft {
            folio,
            account: account.to_string(),
            date,
            category,
            direction: Direction::Credit,
            kind: MovementKind::SaleIncome,
            amount: assignment.member_total,
            concept: concept.clone(),
            class: "DAILY SALES".to_string(),
            payment_form,
        }));

        for invoice in &target.individual_invoices {
            group.push(Operation::LinkInvoice(InvoiceLinkDraft {
                movement: folio,
                invoice_id: invoice.id.clone(),
                kind: InvoiceKind::Individual,
                applied: invoice.amount,
                invoice_total: invoice.amount,
            }));
        }
        group.push(Operation::LinkInvoice(InvoiceLinkDraft {
            movement: folio,
            invoice_id: target.global_invoice.id.clone(),
            kind: InvoiceKind::Global,
            applied: global_share,
            invoice_total: target.global_invoice.amount,
        }));

        let entry = group.allocate(CounterName::LedgerEntry);
        let mut ledger = LedgerBlock::new(entry, folio, EntryType::Income, self.concept_width);
        let chart = &self.chart;

        for invoice in &target.individual_invoices {
            let line_concept = format!("{} {} INV {}", bank.bank, concept, invoice.id);
            ledger.transfer(&bank.ledger, &chart.customers, invoice.amount, &line_concept);
            if invoice.vat > Decimal::ZERO {
                ledger.transfer(&chart.vat_pending_collection, &chart.vat_collected, invoice.vat, &line_concept);
            }
            if invoice.ieps > Decimal::ZERO {
                ledger.transfer(&chart.ieps_pending_collection, &chart.ieps_collected, invoice.ieps, &line_concept);
            }
        }

        let global = &target.global_invoice;
        let line_concept = format!("{} {} INV {}", bank.bank, concept, global.id);
        ledger.transfer(&bank.ledger, &chart.customers, global_share, &line_concept);
        ledger.transfer(&chart.vat_pending_collection, &chart.vat_collected, global.vat, &line_concept);
        ledger.transfer(&chart.ieps_pending_collection, &chart.ieps_collected, global.ieps, &line_concept);
        group.ledger(ledger);

        group.push(Operation::SetReconciled {
            movement: MovementRef::Slot(folio),
        });

        let mut source_lines: Vec<u32> = members.iter().map(|l| l.line_no).collect();
        source_lines.sort_unstable();

        Ok(PlanGroup {
            id,
            category,
            source_lines,
            business_key: BusinessKey {
                account: account.to_string(),
                date,
                category,
                amount: assignment.member_total,
                concept: Some(concept),
            },
            operations: group.operations,
            tolerance_level: Some(assignment.tolerance_level),
        })
    }

    fn fees(
        &self,
        id: u32,
        account: &str,
        date: NaiveDate,
        lines: &[(&StatementLine, &Classification)],
    ) -> Result<PlanGroup, BuildIssue> {
        if lines.is_empty() {
            return Err(BuildIssue::EmptyGroup {
                category: Category::BankFee,
                date,
            });
        }
        let bank = self.bank(account)?;

        let (base, vat) = lines.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(base, vat), (line, classification)| match classification.category {
                Category::BankFeeVat => (base, vat + line.magnitude()),
                _ => (base + line.magnitude(), vat),
            },
        );
        let total = base + vat;
        let concept = self.concept(format!("BANK FEES {}", date.format("%d/%m/%Y")));

        let mut group = GroupBuilder::default();
        let folio = group.allocate(CounterName::MovementFolio);
        group.push(Operation::CreateMovement(MovementDraft {
            folio,
            account: account.to_string(),
            date,
            category: Category::BankFee,
            direction: Direction::Debit,
            kind: MovementKind::InvoicedExpense,
            amount: total,
            concept: concept.clone(),
            class: "BANK FEES".to_string(),
            payment_form: PaymentForm::Transfer,
        }));

        let entry = group.allocate(CounterName::LedgerEntry);
        let mut ledger = LedgerBlock::new(entry, folio, EntryType::Expense, self.concept_width);
        let line_concept = format!("{} {}", bank.bank, concept);
        ledger.transfer(&self.chart.suppliers, &bank.ledger, total, &line_concept);
        ledger.transfer(
            &self.chart.vat_creditable_paid,
            &self.chart.vat_creditable_pending,
            vat,
            &line_concept,
        );
        group.ledger(ledger);

        group.push(Operation::SetReconciled {
            movement: MovementRef::Slot(folio),
        });

        let mut source_lines: Vec<u32> = lines.iter().map(|(l, _)| l.line_no).collect();
        source_lines.sort_unstable();

        Ok(PlanGroup {
            id,
            category: Category::BankFee,
            source_lines,
            business_key: BusinessKey {
                account: account.to_string(),
                date,
                category: Category::BankFee,
                amount: total,
                concept: Some(concept),
            },
            operations: group.operations,
            tolerance_level: None,
        })
    }

    fn transfer(
        &self,
        id: u32,
        line: &StatementLine,
        classification: &Classification,
    ) -> Result<PlanGroup, BuildIssue> {
        let origin = self.bank(&line.account)?;
        let counterparty = classification
            .metadata
            .counterparty_account
            .as_deref()
            .unwrap_or_default();
        let destination = self
            .accounts
            .resolve_own(counterparty)
            .ok_or_else(|| BuildIssue::UnknownAccount(counterparty.to_string()))?;

        let amount = line.magnitude();
        let outgoing = self.concept(format!(
            "TRANSFER TO {} ACCOUNT {}",
            destination.bank, destination.number
        ));
        let incoming = self.concept(format!(
            "TRANSFER FROM {} ACCOUNT {}",
            origin.bank, origin.number
        ));

        let mut group = GroupBuilder::default();
        let out_folio = group.allocate(CounterName::MovementFolio);
        group.push(Operation::CreateMovement(MovementDraft {
            folio: out_folio,
            account: origin.number.clone(),
            date: line.date,
            category: Category::TransferOut,
            direction: Direction::Debit,
            kind: MovementKind::ManualExpense,
            amount,
            concept: outgoing.clone(),
            class: "OWN ACCOUNTS".to_string(),
            payment_form: PaymentForm::Transfer,
        }));
        let in_folio = group.allocate(CounterName::MovementFolio);
        group.push(Operation::CreateMovement(MovementDraft {
            folio: in_folio,
            account: destination.number.clone(),
            date: line.date,
            category: Category::TransferIn,
            direction: Direction::Credit,
            kind: MovementKind::GeneralIncome,
            amount,
            concept: incoming,
            class: "OWN ACCOUNTS".to_string(),
            payment_form: PaymentForm::Transfer,
        }));

        let entry = group.allocate(CounterName::LedgerEntry);
        let mut ledger = LedgerBlock::new(entry, out_folio, EntryType::Journal, self.concept_width);
        ledger.transfer(&destination.ledger, &origin.ledger, amount, &outgoing);
        group.ledger(ledger);

        group.push(Operation::SetReconciled {
            movement: MovementRef::Slot(out_folio),
        });
        group.push(Operation::SetReconciled {
            movement: MovementRef::Slot(in_folio),
        });

        Ok(PlanGroup {
            id,
            category: Category::TransferOut,
            source_lines: vec![line.line_no],
            business_key: BusinessKey {
                account: origin.number.clone(),
                date: line.date,
                category: Category::TransferOut,
                amount,
                concept: Some(outgoing),
            },
            operations: group.operations,
            tolerance_level: None,
        })
    }

    fn reconcile(
        &self,
        id: u32,
        line: &StatementLine,
        classification: &Classification,
        existing: Option<&ExistingMovement>,
    ) -> Result<PlanGroup, BuildIssue> {
        let business_key = Self::reconciliation_key(line, classification);
        let Some(existing) = existing else {
            return Err(BuildIssue::NoMatchingRecord(business_key));
        };

        Ok(PlanGroup {
            id,
            category: classification.category,
            source_lines: vec![line.line_no],
            business_key,
            operations: vec![Operation::SetReconciled {
                movement: MovementRef::Existing(existing.folio),
            }],
            tolerance_level: None,
        })
    }

    /// One movement per payroll payment. The principal one carries the full
    /// entry (perceptions against deductions, bank and payroll creditors);
    /// each other payment settles creditors against the bank.
    fn payroll(
        &self,
        id: u32,
        line: &StatementLine,
        record: &PayrollRecord,
    ) -> Result<PlanGroup, BuildIssue> {
        let bank = self.bank(&line.account)?;
        let principal = record.principal().ok_or(BuildIssue::EmptyGroup {
            category: Category::Payroll,
            date: line.date,
        })?;
        if principal.amount != line.magnitude() {
            return Err(BuildIssue::DocumentMismatch {
                documented: principal.amount,
                expected: line.magnitude(),
            });
        }

        let base = format!("PAYROLL {:02}", record.number);
        let principal_concept = self.concept(format!("{} {}", base, principal.kind));
        let mut group = GroupBuilder::default();

        for payment in record.payments.iter().filter(|p| p.amount > Decimal::ZERO) {
            let concept = self.concept(format!("{} {}", base, payment.kind));
            let folio = group.allocate(CounterName::MovementFolio);
            group.push(Operation::CreateMovement(MovementDraft {
                folio,
                account: line.account.clone(),
                date: line.date,
                category: Category::Payroll,
                direction: Direction::Debit,
                kind: MovementKind::ManualExpense,
                amount: payment.amount,
                concept: concept.clone(),
                class: if payment.severance { "SEVERANCE" } else { "PAYROLL" }.to_string(),
                payment_form: if payment.by_check {
                    PaymentForm::Check
                } else {
                    PaymentForm::Transfer
                },
            }));

            let entry = group.allocate(CounterName::LedgerEntry);
            let mut ledger = LedgerBlock::new(entry, folio, EntryType::Expense, self.concept_width);
            let bank_concept = format!("{} {}", bank.bank, concept);
            if std::ptr::eq(payment, principal) {
                let (debits, credits) = self.payroll_sides(record, principal.amount, bank, &base)?;
                ledger.compound(&debits, &credits)?;
            } else {
                ledger.transfer(&self.chart.payroll_creditors, &bank.ledger, payment.amount, &bank_concept);
            }
            group.ledger(ledger);
            group.push(Operation::SetReconciled {
                movement: MovementRef::Slot(folio),
            });
        }

        Ok(PlanGroup {
            id,
            category: Category::Payroll,
            source_lines: vec![line.line_no],
            business_key: BusinessKey {
                account: line.account.clone(),
                date: line.date,
                category: Category::Payroll,
                amount: principal.amount,
                concept: Some(principal_concept),
            },
            operations: group.operations,
            tolerance_level: None,
        })
    }

    /// Debit and credit sides of the principal payroll entry. Perceptions the
    /// document leaves out are debited to the general payroll expense.
    fn payroll_sides(
        &self,
        record: &PayrollRecord,
        principal: Decimal,
        bank: &BankAccount,
        base: &str,
    ) -> Result<(Vec<DocumentLine>, Vec<DocumentLine>), BuildIssue> {
        let expected = record.expected_perceptions();
        let shortfall = expected - record.perception_total();
        if shortfall.is_sign_negative() && !shortfall.is_zero() {
            return Err(BuildIssue::DocumentMismatch {
                documented: record.perception_total(),
                expected,
            });
        }

        let labelled = |l: &DocumentLine| {
            DocumentLine::new(l.account.clone(), format!("{} {}", base, l.concept), l.amount)
        };
        let mut debits: Vec<DocumentLine> = record.perceptions.iter().map(labelled).collect();
        if record.perceptions.is_empty() {
            debits.push(DocumentLine::new(
                self.chart.payroll_expense.clone(),
                format!("{} SALARIES", base),
                expected,
            ));
        } else if shortfall > Decimal::ZERO {
            debits.push(DocumentLine::new(
                self.chart.payroll_expense.clone(),
                format!("{} OTHER PERCEPTIONS", base),
                shortfall,
            ));
        }

        let mut credits: Vec<DocumentLine> = record.deductions.iter().map(labelled).collect();
        credits.push(DocumentLine::new(
            bank.ledger.clone(),
            format!("{} {}", bank.bank, base),
            principal,
        ));
        credits.push(DocumentLine::new(
            self.chart.payroll_creditors.clone(),
            format!("{} PAYROLL CREDITORS", base),
            record.secondary_total(),
        ));
        Ok((debits, credits))
    }

    /// Movement plus entry for one declaration payment: its charges against
    /// the bank, followed by the declaration's reclassifications.
    fn tax(&self, id: u32, line: &StatementLine, payment: &TaxPayment) -> Result<PlanGroup, BuildIssue> {
        let bank = self.bank(&line.account)?;
        let category = payment.kind.category();
        if payment.charges.is_empty() {
            return Err(BuildIssue::EmptyGroup {
                category,
                date: line.date,
            });
        }
        if payment.amount != line.magnitude() {
            return Err(BuildIssue::DocumentMismatch {
                documented: payment.amount,
                expected: line.magnitude(),
            });
        }

        let concept = self.concept(format!("{} {}", payment.kind.label(), payment.period));
        let class = match payment.kind {
            TaxKind::SocialSecurity => "SOCIAL SECURITY",
            TaxKind::Federal | TaxKind::State => "TAXES",
        };

        let mut group = GroupBuilder::default();
        let folio = group.allocate(CounterName::MovementFolio);
        group.push(Operation::CreateMovement(MovementDraft {
            folio,
            account: line.account.clone(),
            date: line.date,
            category,
            direction: Direction::Debit,
            kind: MovementKind::ManualExpense,
            amount: payment.amount,
            concept: concept.clone(),
            class: class.to_string(),
            payment_form: PaymentForm::Transfer,
        }));

        let entry = group.allocate(CounterName::LedgerEntry);
        let mut ledger = LedgerBlock::new(entry, folio, EntryType::Expense, self.concept_width);
        let bank_side = [DocumentLine::new(
            bank.ledger.clone(),
            format!("{} {}", bank.bank, concept),
            payment.amount,
        )];
        ledger.compound(&payment.charges, &bank_side)?;
        for r in &payment.reclassifications {
            ledger.transfer(&r.debit, &r.credit, r.amount, &r.concept);
        }
        group.ledger(ledger);
        group.push(Operation::SetReconciled {
            movement: MovementRef::Slot(folio),
        });

        Ok(PlanGroup {
            id,
            category,
            source_lines: vec![line.line_no],
            business_key: BusinessKey {
                account: line.account.clone(),
                date: line.date,
                category,
                amount: payment.amount,
                concept: Some(concept),
            },
            operations: group.operations,
            tolerance_level: None,
        })
    }
}
