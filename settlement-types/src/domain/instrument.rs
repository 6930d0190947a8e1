//! Card payment instrument.
//!
//! Instrument data is forwarded to the gateway verbatim and is never
//! persisted. `Debug` masks the card number and hides the CVV so the value
//! can travel through instrumented code without leaking.

use chrono::NaiveDate;

use crate::error::DomainError;

/// Validated card details for a single charge.
#[derive(Clone, PartialEq, Eq)]
pub struct Instrument {
    card_number: String,
    card_holder: String,
    card_expiration_date: String,
    card_cvv: String,
    inn_receiver: String,
}

impl Instrument {
    /// Validates the raw fields of a card instrument.
    ///
    /// # Validation
    /// - card number: exactly 16 digits
    /// - holder: 1..=255 characters, not blank
    /// - expiration date: a calendar date in `YYYY-MM-DD` form
    /// - CVV: 3 or 4 digits
    /// - receiver tax id (INN): exactly 12 digits
    pub fn new(
        card_number: impl Into<String>,
        card_holder: impl Into<String>,
        card_expiration_date: impl Into<String>,
        card_cvv: impl Into<String>,
        inn_receiver: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let instrument = Self {
            card_number: card_number.into(),
            card_holder: card_holder.into(),
            card_expiration_date: card_expiration_date.into(),
            card_cvv: card_cvv.into(),
            inn_receiver: inn_receiver.into(),
        };
        instrument.validate()?;
        Ok(instrument)
    }

    fn validate(&self) -> Result<(), DomainError> {
        if !is_digits(&self.card_number, 16..=16) {
            return Err(invalid("Card number must be exactly 16 digits"));
        }
        let holder_len = self.card_holder.chars().count();
        if self.card_holder.trim().is_empty() || holder_len > 255 {
            return Err(invalid("Card holder must be 1 to 255 characters"));
        }
        if self.card_expiration_date.len() != 10
            || NaiveDate::parse_from_str(&self.card_expiration_date, "%Y-%m-%d").is_err()
        {
            return Err(invalid("Card expiration date must be a valid YYYY-MM-DD date"));
        }
        if !is_digits(&self.card_cvv, 3..=4) {
            return Err(invalid("Card CVV must be 3 or 4 digits"));
        }
        if !is_digits(&self.inn_receiver, 12..=12) {
            return Err(invalid("Receiver INN must be exactly 12 digits"));
        }
        Ok(())
    }

    pub fn card_number(&self) -> &str {
        &self.card_number
    }

    pub fn card_holder(&self) -> &str {
        &self.card_holder
    }

    pub fn card_expiration_date(&self) -> &str {
        &self.card_expiration_date
    }

    pub fn card_cvv(&self) -> &str {
        &self.card_cvv
    }

    pub fn inn_receiver(&self) -> &str {
        &self.inn_receiver
    }

    /// Last four digits of the card, safe to log.
    pub fn last4(&self) -> &str {
        &self.card_number[self.card_number.len().saturating_sub(4)..]
    }
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("card_number", &mask_card(&self.card_number))
            .field("card_holder", &self.card_holder)
            .field("card_expiration_date", &self.card_expiration_date)
            .field("card_cvv", &"***")
            .field("inn_receiver", &self.inn_receiver)
            .finish()
    }
}

/// Masks all but the last four characters of a card number.
pub fn mask_card(card_number: &str) -> String {
    let keep = card_number.len().min(4);
    let split = card_number.len() - keep;
    match card_number.get(split..) {
        Some(tail) => format!("{}{}", "*".repeat(split), tail),
        None => "*".repeat(card_number.chars().count()),
    }
}

fn is_digits(s: &str, len: std::ops::RangeInclusive<usize>) -> bool {
    len.contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

fn invalid(msg: &str) -> DomainError {
    DomainError::ValidationError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Instrument {
        Instrument::new(
            "4111111111111111",
            "IVAN PETROV",
            "2027-12-31",
            "123",
            "770123456789",
        )
        .unwrap()
    }

    #[test]
    fn test_valid_instrument() {
        let instrument = valid();
        assert_eq!(instrument.last4(), "1111");
        assert_eq!(instrument.card_cvv(), "123");
    }

    #[test]
    fn test_debug_masks_secrets() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("4111111111111111"));
        assert!(rendered.contains("************1111"));
        assert!(!rendered.contains("\"123\""));
    }

    #[test]
    fn test_invalid_fields() {
        let cases = [
            ("411111111111111", "IVAN", "2027-12-31", "123", "770123456789"),
            ("4111111111111111", "   ", "2027-12-31", "123", "770123456789"),
            ("4111111111111111", "IVAN", "2027-02-30", "123", "770123456789"),
            ("4111111111111111", "IVAN", "2027-2-3", "123", "770123456789"),
            ("4111111111111111", "IVAN", "2027-12-31", "12", "770123456789"),
            ("4111111111111111", "IVAN", "2027-12-31", "12a", "770123456789"),
            ("4111111111111111", "IVAN", "2027-12-31", "123", "7701234567"),
        ];
        for (card, holder, exp, cvv, inn) in cases {
            let result = Instrument::new(card, holder, exp, cvv, inn);
            assert!(matches!(result, Err(DomainError::ValidationError(_))));
        }
    }

    #[test]
    fn test_holder_too_long() {
        let result = Instrument::new(
            "4111111111111111",
            "A".repeat(256),
            "2027-12-31",
            "1234",
            "770123456789",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_mask_card() {
        assert_eq!(mask_card("4111111111111111"), "************1111");
        assert_eq!(mask_card("12"), "12");
    }
}
