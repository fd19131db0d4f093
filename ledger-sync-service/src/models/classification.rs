//! Classification results attached to statement lines.

use super::statement::Direction;
use super::target::Channel;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    CardSale,
    DebitCardSale,
    CashDeposit,
    TransferOut,
    TransferIn,
    BankFee,
    BankFeeVat,
    Payroll,
    SupplierPayment,
    ClientCollection,
    FederalTax,
    StateTax,
    SocialSecurity,
    Unclassified,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardSale => "CARD_SALE",
            Self::DebitCardSale => "DEBIT_CARD_SALE",
            Self::CashDeposit => "CASH_DEPOSIT",
            Self::TransferOut => "TRANSFER_OUT",
            Self::TransferIn => "TRANSFER_IN",
            Self::BankFee => "BANK_FEE",
            Self::BankFeeVat => "BANK_FEE_VAT",
            Self::Payroll => "PAYROLL",
            Self::SupplierPayment => "SUPPLIER_PAYMENT",
            Self::ClientCollection => "CLIENT_COLLECTION",
            Self::FederalTax => "FEDERAL_TAX",
            Self::StateTax => "STATE_TAX",
            Self::SocialSecurity => "SOCIAL_SECURITY",
            Self::Unclassified => "UNCLASSIFIED",
        }
    }

    /// Settlement channel for sale categories.
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Self::CardSale | Self::DebitCardSale => Some(Channel::Card),
            Self::CashDeposit => Some(Channel::Cash),
            _ => None,
        }
    }

    /// Categories that only mark an existing store record as reconciled.
    pub fn is_reconciliation_only(&self) -> bool {
        matches!(
            self,
            Self::SupplierPayment | Self::ClientCollection | Self::TransferIn
        )
    }

    /// Categories whose ledger entry depends on documents outside the statement.
    pub fn needs_supporting_document(&self) -> bool {
        matches!(
            self,
            Self::Payroll | Self::FederalTax | Self::StateTax | Self::SocialSecurity
        )
    }

    pub fn is_bank_fee(&self) -> bool {
        matches!(self, Self::BankFee | Self::BankFeeVat)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a bank fee line charges for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    /// Interbank transfer (SPEI) commission.
    Transfer,
    /// Merchant discount rate applied to card sales.
    CardDiscount,
}

/// Whether a fee line is the commission itself or its VAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeComponent {
    Base,
    Vat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationMetadata {
    /// Description after mojibake repair and accent folding.
    pub normalized_description: String,
    /// Repair could not fully recover the original text.
    #[serde(default)]
    pub lossy_text: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_kind: Option<FeeKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_component: Option<FeeComponent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_unit_amount: Option<Decimal>,
}

/// Result of classifying one statement line. Replaced, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub line_no: u32,
    pub category: Category,
    pub direction: Direction,
    /// Name of the rule that fired; `None` for unclassified lines.
    pub rule: Option<String>,
    pub metadata: ClassificationMetadata,
}

impl Classification {
    pub fn is_classified(&self) -> bool {
        self.category != Category::Unclassified
    }
}
