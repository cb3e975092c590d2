use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Competencia;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentKind {
    Debit,
    Credit,
}

impl AdjustmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" | "desconto" => Some(Self::Debit),
            "credit" | "credito" => Some(Self::Credit),
            _ => None,
        }
    }
}

/// A debit or credit posted against a physician for one competencia.
///
/// Recurring entries are already materialized per competencia by the
/// scheduling layer; `recurring` is informational here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentEntry {
    pub id: i64,
    pub physician_id: i64,
    pub company_id: i64,
    pub hospital_id: Option<i64>,
    pub kind: AdjustmentKind,
    pub taxable: bool,
    pub recurring: bool,
    pub competencia: Competencia,
    pub value: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
