use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Competencia;

/// Whether `date` lies in `[start, end]` and before an optional deactivation date.
fn active_between(
    start: NaiveDate,
    end: Option<NaiveDate>,
    deactivated_on: Option<NaiveDate>,
    date: NaiveDate,
) -> bool {
    date >= start
        && end.is_none_or(|end| date <= end)
        && deactivated_on.is_none_or(|off| date < off)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub company_id: i64,
    pub hospital_id: i64,
    pub number: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub deactivated_on: Option<NaiveDate>,
}

impl Contract {
    pub fn is_active_on(
        &self,
        date: NaiveDate,
    ) -> bool {
        active_between(self.start_date, self.end_date, self.deactivated_on, date)
    }

    /// Whether the contract is active on any day of the competencia.
    pub fn overlaps(
        &self,
        competencia: Competencia,
    ) -> bool {
        let last_active = [self.end_date, self.deactivated_on.and_then(|d| d.pred_opt())]
            .into_iter()
            .flatten()
            .min();
        self.start_date <= competencia.last_day()
            && last_active.is_none_or(|last| last >= competencia.first_day())
    }
}

/// Rate a contract pays for one shift type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractShiftRate {
    pub id: i64,
    pub contract_id: i64,
    pub shift_type_id: i64,
    pub rate: Decimal,
    pub valid_from: NaiveDate,
    pub valid_until: Option<NaiveDate>,
}

impl ContractShiftRate {
    pub fn is_active_on(
        &self,
        date: NaiveDate,
    ) -> bool {
        active_between(self.valid_from, self.valid_until, None, date)
    }
}

/// An executed shift (plantão).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftRecord {
    pub id: i64,
    pub physician_id: i64,
    pub contract_id: i64,
    pub shift_type_id: i64,
    pub date: NaiveDate,
    pub competencia: Competencia,
    pub quantity: Decimal,
    pub confirmed: bool,
}
