use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Competencia;

/// A pro-labore payment to a managing physician.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementCompensationEntry {
    pub id: i64,
    pub physician_id: i64,
    pub company_id: i64,
    pub competencia: Competencia,
    pub date: NaiveDate,
    pub description: String,
    pub gross_value: Decimal,
    pub taxable: bool,
    pub confirmed: bool,
}

impl ManagementCompensationEntry {
    /// Unconfirmed or non-taxable entries never enter a result.
    pub fn is_computable(&self) -> bool {
        self.confirmed && self.taxable
    }
}
