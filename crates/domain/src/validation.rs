//! Field validation rules shared by the services.

use common::{Decimal, Money};

use crate::DomainError;

pub const NAME_MAX_LEN: usize = 50;
pub const PHONE_MAX_LEN: usize = 15;
pub const EMAIL_MAX_LEN: usize = 254;
pub const PRODUCT_NAME_MAX_LEN: usize = 150;
pub const CATEGORY_NAME_MAX_LEN: usize = 150;
pub const DESCRIPTION_MAX_LEN: usize = 5000;

/// Digits allowed before the decimal point in a price.
const PRICE_INTEGER_DIGITS: u32 = 8;

const PASSWORD_MIN_LEN: usize = 8;
const PASSWORD_SPECIALS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Checks the password strength rule.
pub fn validate_password(password: &str) -> Result<(), DomainError> {
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(DomainError::validation(
            "password",
            "Password should be 8 characters at least",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(DomainError::validation(
            "password",
            "Password should include one letter (A-Z or a-z) at least",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(DomainError::validation(
            "password",
            "Password should include one number at least",
        ));
    }
    if !password.chars().any(|c| PASSWORD_SPECIALS.contains(c)) {
        return Err(DomainError::validation(
            "password",
            "Password should include one specific character(!@#$ etc) at least",
        ));
    }
    Ok(())
}

/// Trims an email address, checks its shape and lowercases the domain part.
pub fn normalize_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim();
    if email.is_empty() {
        return Err(DomainError::validation("email", "This field may not be blank."));
    }
    let invalid = || DomainError::validation("email", "Enter a valid email address.");

    if email.chars().count() > EMAIL_MAX_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.rsplit_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(format!("{local}@{}", domain.to_lowercase()))
}

pub fn validate_required(field: &'static str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(field, "This field may not be blank."));
    }
    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max: usize) -> Result<(), DomainError> {
    if value.chars().count() > max {
        return Err(DomainError::validation(
            field,
            format!("Ensure this field has no more than {max} characters."),
        ));
    }
    Ok(())
}

/// Checks a price fits `NUMERIC(10, 2)` and is non-negative.
///
/// Extra decimal places are rejected rather than rounded away.
pub fn validate_price(price: Decimal) -> Result<Money, DomainError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(DomainError::validation(
            "price",
            "Ensure this value is greater than or equal to 0.",
        ));
    }
    if price.normalize().scale() > Money::SCALE {
        return Err(DomainError::validation(
            "price",
            "Ensure that there are no more than 2 decimal places.",
        ));
    }
    if price >= Decimal::from(10u64.pow(PRICE_INTEGER_DIGITS)) {
        return Err(DomainError::validation(
            "price",
            "Ensure that there are no more than 8 digits before the decimal point.",
        ));
    }
    Ok(Money::new(price))
}

pub fn validate_quantity(field: &'static str, quantity: u32) -> Result<(), DomainError> {
    if quantity < 1 {
        return Err(DomainError::validation(
            field,
            "Ensure this value is greater than or equal to 1.",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_needs_a_special_character() {
        assert!(validate_password("abcdefg1").is_err());
        assert!(validate_password("abcdefg1!").is_ok());
    }

    #[test]
    fn password_rules_each_report_on_password_field() {
        for weak in ["a1!", "12345678!", "abcdefgh!", "abcdefgh1"] {
            let err = validate_password(weak).unwrap_err();
            assert_eq!(err.field(), Some("password"), "{weak}");
        }
    }

    #[test]
    fn email_is_trimmed_and_domain_lowercased() {
        assert_eq!(
            normalize_email("  Jane.Doe@Example.COM ").unwrap(),
            "Jane.Doe@example.com"
        );
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("a@b").is_err());
        assert!(normalize_email("a b@example.com").is_err());
        assert!(normalize_email("").is_err());
    }

    #[test]
    fn price_bounds() {
        let ok: Decimal = "99.99".parse().unwrap();
        assert_eq!(validate_price(ok).unwrap().to_string(), "99.99");

        let trailing_zeros: Decimal = "5.500".parse().unwrap();
        assert_eq!(validate_price(trailing_zeros).unwrap().to_string(), "5.50");

        let too_precise: Decimal = "1.005".parse().unwrap();
        assert!(validate_price(too_precise).is_err());

        let negative: Decimal = "-0.01".parse().unwrap();
        assert!(validate_price(negative).is_err());

        let too_large: Decimal = "100000000.00".parse().unwrap();
        assert!(validate_price(too_large).is_err());

        let largest: Decimal = "99999999.99".parse().unwrap();
        assert!(validate_price(largest).is_ok());
    }

    #[test]
    fn length_limits_count_characters() {
        assert!(validate_max_len("first_name", &"é".repeat(50), NAME_MAX_LEN).is_ok());
        assert!(validate_max_len("first_name", &"é".repeat(51), NAME_MAX_LEN).is_err());
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert!(validate_quantity("quantity", 0).is_err());
        assert!(validate_quantity("quantity", 1).is_ok());
    }
}
