//! Account reference.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::DomainError;

/// Ten-digit utility account number, the key bills are filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(example = "1234567890")]
pub struct AccountNumber(String);

impl AccountNumber {
    pub const LEN: usize = 10;

    /// Validates and wraps an account number.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        if s.len() != Self::LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::ValidationError(
                "Account number must be exactly 10 digits".into(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AccountNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_account_number() {
        let account = AccountNumber::parse("1234567890").unwrap();
        assert_eq!(account.as_str(), "1234567890");
    }

    #[test]
    fn test_invalid_account_numbers() {
        for bad in ["", "123456789", "12345678901", "12345abcde", "１２３４５６７８９０"] {
            assert!(
                matches!(AccountNumber::parse(bad), Err(DomainError::ValidationError(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
