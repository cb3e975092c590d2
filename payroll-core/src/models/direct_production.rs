//! Production valued directly rather than through a contract rate.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Competencia;

/// A privately paid procedure. Enters production gross at its net transfer
/// value, after materials and the paying company's own charges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateProcedure {
    pub id: i64,
    pub physician_id: i64,
    /// The paying company.
    pub company_id: i64,
    pub competencia: Competencia,
    pub procedure_date: NaiveDate,
    pub patient_name: String,
    pub procedure_type: String,
    pub gross_value: Decimal,
    pub net_transfer_value: Decimal,
    pub confirmed: bool,
    pub active: bool,
}

impl PrivateProcedure {
    pub fn is_computable(&self) -> bool {
        self.confirmed && self.active
    }
}

/// Administrative work paid as production. Enters gross at its total value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministrativeProduction {
    pub id: i64,
    pub physician_id: i64,
    pub company_id: i64,
    pub competencia: Competencia,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub total_value: Decimal,
    pub confirmed: bool,
    pub active: bool,
}

impl AdministrativeProduction {
    pub fn is_computable(&self) -> bool {
        self.confirmed && self.active
    }
}
