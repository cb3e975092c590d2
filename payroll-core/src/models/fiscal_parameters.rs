use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Company-level charges applied on top of the bracket computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompanyFeeKind {
    AdministrativeFee,
    ServiceTax,
    IncomeTax,
    SocialContribution,
}

impl CompanyFeeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdministrativeFee => "administrative_fee",
            Self::ServiceTax => "service_tax",
            Self::IncomeTax => "income_tax",
            Self::SocialContribution => "social_contribution",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "administrative_fee" => Some(Self::AdministrativeFee),
            "service_tax" => Some(Self::ServiceTax),
            "income_tax" => Some(Self::IncomeTax),
            "social_contribution" => Some(Self::SocialContribution),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalParameters {
    pub id: i64,
    pub company_id: i64,
    pub tax_regime: String,
    pub validity_start: NaiveDate,
    /// Exclusive end of validity.
    pub validity_end: Option<NaiveDate>,
    pub rates: BTreeMap<CompanyFeeKind, Decimal>,
}

impl FiscalParameters {
    pub fn covers(
        &self,
        date: NaiveDate,
    ) -> bool {
        date >= self.validity_start && self.validity_end.is_none_or(|end| date < end)
    }
}
