use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Competencia;

/// Tax already withheld for the physician by another paying entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalFiscalBond {
    pub id: i64,
    pub physician_id: i64,
    pub competencia_start: Competencia,
    /// Inclusive; `None` while the bond is ongoing.
    pub competencia_end: Option<Competencia>,
    /// Tax id of the paying entity.
    pub responsible_tax_id: String,
    pub contribution_base: Decimal,
    pub contribution_withheld: Decimal,
    pub withholding_base: Decimal,
    pub withholding_amount: Decimal,
    pub bond_kind: String,
    pub active: bool,
}

impl ExternalFiscalBond {
    pub fn applies_to(
        &self,
        competencia: Competencia,
    ) -> bool {
        self.active
            && self.competencia_start <= competencia
            && self.competencia_end.is_none_or(|end| competencia <= end)
    }
}
