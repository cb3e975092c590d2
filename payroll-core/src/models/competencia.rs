use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a `YYYY-MM` string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid competencia '{0}', expected YYYY-MM")]
pub struct ParseCompetenciaError(pub String);

/// Monthly accounting period a computation applies to.
///
/// Ordered chronologically; the textual form is `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Competencia {
    year: i32,
    month: u32,
}

impl Competencia {
    pub fn new(
        year: i32,
        month: u32,
    ) -> Result<Self, ParseCompetenciaError> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(ParseCompetenciaError(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    /// The competencia a calendar date falls into.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // year/month are range-checked on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day().pred_opt().unwrap_or(NaiveDate::MAX)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn contains(
        &self,
        date: NaiveDate,
    ) -> bool {
        Self::of(date) == *self
    }
}

impl fmt::Display for Competencia {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Competencia {
    type Err = ParseCompetenciaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let err = || ParseCompetenciaError(s.to_string());

        let (year, month) = trimmed.split_once('-').ok_or_else(err)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(err());
        }
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;

        Self::new(year, month).map_err(|_| err())
    }
}

impl TryFrom<String> for Competencia {
    type Error = ParseCompetenciaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Competencia> for String {
    fn from(value: Competencia) -> Self {
        value.to_string()
    }
}
