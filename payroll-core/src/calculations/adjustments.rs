//! Adjustment ledger.
//!
//! Entries are taken as already materialized for the competencia; the
//! `recurring` flag is carried through but never expanded here.

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{AdjustmentEntry, AdjustmentKind, Competencia};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjustmentLedger {
    pub credits_total: Decimal,
    pub debits_total: Decimal,
    pub taxable_credits: Decimal,
    pub taxable_debits: Decimal,
    /// In creation order `(created_at, id)`.
    pub entries: Vec<AdjustmentEntry>,
}

impl AdjustmentLedger {
    /// Folds the entries of `physician_id` for `competencia`; others are ignored.
    pub fn fold(
        physician_id: i64,
        competencia: Competencia,
        entries: &[AdjustmentEntry],
    ) -> Self {
        let mut entries: Vec<AdjustmentEntry> = entries
            .iter()
            .filter(|e| e.physician_id == physician_id && e.competencia == competencia)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.created_at, e.id));

        let mut ledger = Self::default();
        for entry in &entries {
            match (entry.kind, entry.taxable) {
                (AdjustmentKind::Credit, true) => {
                    ledger.credits_total += entry.value;
                    ledger.taxable_credits += entry.value;
                }
                (AdjustmentKind::Credit, false) => ledger.credits_total += entry.value,
                (AdjustmentKind::Debit, true) => {
                    ledger.debits_total += entry.value;
                    ledger.taxable_debits += entry.value;
                }
                (AdjustmentKind::Debit, false) => ledger.debits_total += entry.value,
            }
        }
        ledger.entries = entries;

        debug!(
            physician_id,
            %competencia,
            credits = %ledger.credits_total,
            debits = %ledger.debits_total,
            "folded adjustments"
        );
        ledger
    }

    /// Net effect on the value paid out: credits minus debits.
    pub fn net_effect(&self) -> Decimal {
        self.credits_total - self.debits_total
    }
}
