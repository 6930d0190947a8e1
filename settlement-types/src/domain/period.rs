//! Billing period (`YYYY-MM`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::DomainError;

/// A calendar month bills are issued for, kept in its canonical `YYYY-MM` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(example = "2024-03")]
pub struct Period(String);

impl Period {
    /// Parses a `YYYY-MM` string.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let invalid = || DomainError::ValidationError("Period must be in YYYY-MM format".into());

        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if year.len() != 4 || month.len() != 2 || !digits(year) || !digits(month) {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;

        Ok(Self(format!("{year:04}-{month:02}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Period {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_period() {
        assert_eq!(Period::parse("2024-03").unwrap().as_str(), "2024-03");
        assert_eq!(Period::parse("1999-12").unwrap().as_str(), "1999-12");
    }

    #[test]
    fn test_invalid_periods() {
        for bad in ["2024-13", "2024-00", "2024-3", "24-03", "2024/03", "2024-03-01", "abcd-ef", ""] {
            assert!(Period::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
