use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calculations::common::round_half_up;

/// The three families of bracket tables the engine resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContributorKind {
    /// Progressive social contribution for production income.
    Employee,
    /// Single-rate social contribution for management compensation.
    FlatRate,
    /// Progressive income withholding.
    Withholding,
}

impl ContributorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::FlatRate => "flat_rate",
            Self::Withholding => "withholding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "employee" => Some(Self::Employee),
            "flat_rate" => Some(Self::FlatRate),
            "withholding" => Some(Self::Withholding),
            _ => None,
        }
    }
}

/// One tier of a bracket table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub index: u32,
    pub base_from: Decimal,
    /// Exclusive upper bound. Ignored on the last bracket.
    pub base_to: Option<Decimal>,
    pub rate: Decimal,
    pub deduction: Decimal,
    pub contribution_ceiling: Option<Decimal>,
}

impl Bracket {
    fn raw_tax(
        &self,
        base: Decimal,
    ) -> Decimal {
        round_half_up(base * self.rate - self.deduction)
    }
}

/// A bracket table together with its validity interval (vigência).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketTable {
    pub id: i64,
    pub kind: ContributorKind,
    pub validity_start: NaiveDate,
    /// Exclusive end of validity; `None` while the table is open.
    pub validity_end: Option<NaiveDate>,
    /// Amount subtracted from a withholding base per declared dependent.
    pub dependent_deduction: Decimal,
    pub brackets: Vec<Bracket>,
}

/// For creating new tables (no id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBracketTable {
    pub kind: ContributorKind,
    pub validity_start: NaiveDate,
    pub validity_end: Option<NaiveDate>,
    pub dependent_deduction: Decimal,
    pub brackets: Vec<Bracket>,
}

/// Structural problems detected in a bracket set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BracketSetError {
    #[error("table has no brackets")]
    Empty,

    #[error("bracket index {0} is not strictly ascending")]
    IndexOrder(u32),

    #[error("first bracket must start at 0, starts at {0}")]
    FirstBracketNotZero(Decimal),

    #[error("bracket {index} starts at {found}, expected {expected}")]
    Discontiguous {
        index: u32,
        expected: Decimal,
        found: Decimal,
    },

    #[error("bracket {0} has an open upper bound but is not the last bracket")]
    OpenBracketNotLast(u32),

    #[error("bracket {index} has an empty or inverted range")]
    EmptyRange { index: u32 },

    #[error("bracket {index} rate {rate} is outside [0, 1]")]
    RateOutOfRange { index: u32, rate: Decimal },

    #[error("bracket {index} deduction {deduction} is negative")]
    NegativeDeduction { index: u32, deduction: Decimal },

    #[error("bracket {0} contribution ceiling differs from the rest of the table")]
    InconsistentCeiling(u32),

    #[error("contribution ceiling must be positive, got {0}")]
    NonPositiveCeiling(Decimal),

    #[error("tax drops at the lower bound {boundary} of bracket {index}")]
    NonMonotonic { index: u32, boundary: Decimal },

    #[error("validity end {end} is not after validity start {start}")]
    InvalidValidity { start: NaiveDate, end: NaiveDate },

    #[error("flat-rate table must have exactly one bracket with zero deduction")]
    FlatRateShape,

    #[error("dependent deduction must be non-negative, got {0}")]
    NegativeDependentDeduction(Decimal),
}

const MONOTONIC_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

impl BracketTable {
    /// Whether `date` falls in `[validity_start, validity_end)`.
    pub fn covers(
        &self,
        date: NaiveDate,
    ) -> bool {
        date >= self.validity_start && self.validity_end.is_none_or(|end| date < end)
    }

    pub fn is_open(&self) -> bool {
        self.validity_end.is_none()
    }

    /// The ceiling shared by every bracket, if the table has one.
    pub fn contribution_ceiling(&self) -> Option<Decimal> {
        self.brackets.first().and_then(|b| b.contribution_ceiling)
    }

    /// Finds the bracket whose `[base_from, base_to)` contains `base`.
    /// The last bracket is unbounded above.
    pub fn bracket_for(
        &self,
        base: Decimal,
    ) -> Option<&Bracket> {
        let last = self.brackets.len().checked_sub(1)?;
        self.brackets.iter().enumerate().find_map(|(pos, bracket)| {
            let below_upper = pos == last || bracket.base_to.is_none_or(|to| base < to);
            (base >= bracket.base_from && below_upper).then_some(bracket)
        })
    }

    /// Checks the structural invariants of the table.
    pub fn validate(&self) -> Result<(), BracketSetError> {
        validate_parts(
            self.kind,
            self.validity_start,
            self.validity_end,
            self.dependent_deduction,
            &self.brackets,
        )
    }
}

impl NewBracketTable {
    pub fn validate(&self) -> Result<(), BracketSetError> {
        validate_parts(
            self.kind,
            self.validity_start,
            self.validity_end,
            self.dependent_deduction,
            &self.brackets,
        )
    }
}

fn validate_parts(
    kind: ContributorKind,
    validity_start: NaiveDate,
    validity_end: Option<NaiveDate>,
    dependent_deduction: Decimal,
    brackets: &[Bracket],
) -> Result<(), BracketSetError> {
    if let Some(end) = validity_end {
        if end <= validity_start {
            return Err(BracketSetError::InvalidValidity {
                start: validity_start,
                end,
            });
        }
    }
    if dependent_deduction < Decimal::ZERO {
        return Err(BracketSetError::NegativeDependentDeduction(
            dependent_deduction,
        ));
    }

    let first = brackets.first().ok_or(BracketSetError::Empty)?;
    if !first.base_from.is_zero() {
        return Err(BracketSetError::FirstBracketNotZero(first.base_from));
    }

    if kind == ContributorKind::FlatRate
        && (brackets.len() != 1 || !first.deduction.is_zero())
    {
        return Err(BracketSetError::FlatRateShape);
    }

    let ceiling = first.contribution_ceiling;
    if let Some(c) = ceiling {
        if c <= Decimal::ZERO {
            return Err(BracketSetError::NonPositiveCeiling(c));
        }
    }

    let last = brackets.len() - 1;
    for (pos, bracket) in brackets.iter().enumerate() {
        let index = bracket.index;
        if bracket.rate < Decimal::ZERO || bracket.rate > Decimal::ONE {
            return Err(BracketSetError::RateOutOfRange {
                index,
                rate: bracket.rate,
            });
        }
        if bracket.deduction < Decimal::ZERO {
            return Err(BracketSetError::NegativeDeduction {
                index,
                deduction: bracket.deduction,
            });
        }
        if bracket.contribution_ceiling != ceiling {
            return Err(BracketSetError::InconsistentCeiling(index));
        }
        match bracket.base_to {
            None if pos != last => return Err(BracketSetError::OpenBracketNotLast(index)),
            Some(to) if to <= bracket.base_from => {
                return Err(BracketSetError::EmptyRange { index });
            }
            _ => {}
        }

        if pos == 0 {
            continue;
        }
        let previous = &brackets[pos - 1];
        if index <= previous.index {
            return Err(BracketSetError::IndexOrder(index));
        }
        // checked above: only the last bracket may be open
        let expected = previous.base_to.unwrap_or(bracket.base_from);
        if bracket.base_from != expected {
            return Err(BracketSetError::Discontiguous {
                index,
                expected,
                found: bracket.base_from,
            });
        }
        let boundary = bracket.base_from;
        if bracket.raw_tax(boundary) < previous.raw_tax(boundary) - MONOTONIC_TOLERANCE {
            return Err(BracketSetError::NonMonotonic { index, boundary });
        }
    }

    Ok(())
}
