use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Physician {
    pub id: i64,
    pub name: String,
    /// Dependents declared for income withholding.
    pub dependents: u32,
}

/// Link between a physician and a company the physician produces for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyLink {
    pub id: i64,
    pub physician_id: i64,
    pub company_id: i64,
    pub linked_on: NaiveDate,
    pub unlinked_on: Option<NaiveDate>,
}

impl CompanyLink {
    pub fn is_active_on(
        &self,
        date: NaiveDate,
    ) -> bool {
        date >= self.linked_on && self.unlinked_on.is_none_or(|off| date < off)
    }
}
