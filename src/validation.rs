//! Card form validation.
//!
//! Every field is validated independently into a [`ValidatedField`]. The
//! `instant` flag passed by the caller says whether errors should be shown
//! right away (field lost focus, or the whole form is being submitted) or only
//! tracked while the user is still typing. Errors that no further typing can
//! fix, such as a non-digit in the card number, are always instant.

use crate::types::CardBrand;
use crate::utils::luhn_check;
use chrono::{Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Maximum number of characters in a card holder name.
pub const CARD_HOLDER_MAX_LENGTH: usize = 45;

static CARD_HOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z .,'\-]+$").expect("CARD_HOLDER_REGEX: invalid regex pattern")
});

// E.164: leading +, country code without a leading zero, at most 15 digits.
static PHONE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[1-9][0-9]{1,14}$").expect("PHONE_REGEX: invalid regex pattern"));

/// Raw card form values, created per submission attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardFormInput {
    /// Card number, possibly with spaces or hyphens
    pub card_number: String,
    /// Expiration month (`"1"`..`"12"`, zero padding allowed)
    pub expiration_month: String,
    /// Expiration year, two or four digits
    pub expiration_year: String,
    /// Security code
    pub cvc: String,
    /// Card holder name
    pub card_holder: String,
    /// Contact email
    pub email: Option<String>,
    /// Contact phone number (E.164)
    pub phone: Option<String>,
    /// Tenant for platform merchants
    pub tenant_id: Option<String>,
}

impl CardFormInput {
    /// Creates input from the four mandatory card fields and the holder name.
    pub fn new(
        card_number: impl Into<String>,
        expiration_month: impl Into<String>,
        expiration_year: impl Into<String>,
        cvc: impl Into<String>,
        card_holder: impl Into<String>,
    ) -> Self {
        Self {
            card_number: card_number.into(),
            expiration_month: expiration_month.into(),
            expiration_year: expiration_year.into(),
            cvc: cvc.into(),
            card_holder: card_holder.into(),
            ..Default::default()
        }
    }

    /// Sets the contact email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the contact phone number.
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Sets the tenant.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Card number with formatting separators removed.
    pub fn normalized_card_number(&self) -> String {
        strip_separators(&self.card_number)
    }
}

/// Validation error tags, one per failure stage and field.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormError {
    /// Card number is empty
    #[error("Enter a card number.")]
    CardNumberEmpty,
    /// Card number is malformed, incomplete or fails the checksum
    #[error("The card number is invalid.")]
    CardNumberInvalid,
    /// Card brand is unknown or not accepted
    #[error("This card brand is not supported.")]
    CardNumberInvalidBrand,
    /// Expiration month or year is empty
    #[error("Enter an expiration date.")]
    ExpirationEmpty,
    /// Expiration is malformed or already elapsed
    #[error("The expiration date is invalid.")]
    ExpirationInvalid,
    /// Security code is empty
    #[error("Enter a security code.")]
    CvcEmpty,
    /// Security code has the wrong length or characters
    #[error("The security code is invalid.")]
    CvcInvalid,
    /// Holder name is empty
    #[error("Enter the card holder name.")]
    CardHolderEmpty,
    /// Holder name contains characters outside the allowed set
    #[error("The card holder name may only contain latin letters.")]
    CardHolderInvalid,
    /// Holder name is too long
    #[error("The card holder name is too long.")]
    CardHolderInvalidLength,
    /// Email is empty
    #[error("Enter an email address.")]
    EmailEmpty,
    /// Phone number is empty
    #[error("Enter a phone number.")]
    PhoneNumberEmpty,
    /// Phone number is not in international format
    #[error("The phone number is invalid.")]
    PhoneNumberInvalid,
}

/// Outcome of validating one field.
///
/// A field is either valid or carries exactly one error; `instant` says
/// whether that error should be displayed now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedField<T> {
    /// The typed value
    Valid(T),
    /// The failure
    Invalid {
        /// Error tag
        error: FormError,
        /// Display immediately
        instant: bool,
    },
}

impl<T> ValidatedField<T> {
    fn invalid(error: FormError, instant: bool) -> Self {
        ValidatedField::Invalid { error, instant }
    }

    /// True when the field holds a value.
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidatedField::Valid(_))
    }

    /// The validated value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            ValidatedField::Valid(value) => Some(value),
            ValidatedField::Invalid { .. } => None,
        }
    }

    /// The error tag, displayable or not.
    pub fn error(&self) -> Option<FormError> {
        match self {
            ValidatedField::Valid(_) => None,
            ValidatedField::Invalid { error, .. } => Some(*error),
        }
    }

    /// The error tag, only when it should be shown now.
    pub fn displayable_error(&self) -> Option<FormError> {
        match self {
            ValidatedField::Invalid {
                error,
                instant: true,
            } => Some(*error),
            _ => None,
        }
    }
}

/// A checksum-valid card number of an accepted brand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardNumber {
    /// Digits only
    pub value: String,
    /// Detected brand
    pub brand: CardBrand,
}

impl CardNumber {
    /// Last four digits.
    pub fn last4(&self) -> &str {
        let start = self.value.len().saturating_sub(4);
        &self.value[start..]
    }
}

/// A not-yet-elapsed expiration date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    /// Month, 1-12
    pub month: u8,
    /// Four-digit year
    pub year: u16,
}

/// Result of validating a whole form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormValidation {
    /// Card number
    pub card_number: ValidatedField<CardNumber>,
    /// Expiration
    pub expiration: ValidatedField<Expiration>,
    /// Security code
    pub cvc: ValidatedField<String>,
    /// Holder name; `None` when not collected
    pub card_holder: Option<ValidatedField<String>>,
    /// Email; `None` when not collected
    pub email: Option<ValidatedField<String>>,
    /// Phone; `None` when not collected
    pub phone: Option<ValidatedField<String>>,
}

impl FormValidation {
    fn collect_errors(&self, displayable_only: bool) -> Vec<FormError> {
        let pick = |error: Option<FormError>, shown: Option<FormError>| {
            if displayable_only {
                shown
            } else {
                error
            }
        };
        let optional = |field: &Option<ValidatedField<String>>| {
            field
                .as_ref()
                .and_then(|f| pick(f.error(), f.displayable_error()))
        };

        [
            pick(self.card_number.error(), self.card_number.displayable_error()),
            pick(self.expiration.error(), self.expiration.displayable_error()),
            pick(self.cvc.error(), self.cvc.displayable_error()),
            optional(&self.card_holder),
            optional(&self.email),
            optional(&self.phone),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Logical AND over every collected field.
    pub fn is_valid(&self) -> bool {
        self.errors().is_empty()
    }

    /// Every error, in form order.
    pub fn errors(&self) -> Vec<FormError> {
        self.collect_errors(false)
    }

    /// Errors that should be displayed now.
    pub fn displayable_errors(&self) -> Vec<FormError> {
        self.collect_errors(true)
    }
}

/// Field validator for the card form.
///
/// # Examples
///
/// ```
/// use payjp_rs::validation::{CardFormInput, CardFormValidator};
///
/// let validator = CardFormValidator::new();
/// let input = CardFormInput::new("4242424242424242", "12", "2030", "123", "TARO YAMADA");
/// assert!(validator.validate_form(&input, true).is_valid());
/// ```
#[derive(Debug, Clone)]
pub struct CardFormValidator {
    accepted_brands: Vec<CardBrand>,
    today: Option<NaiveDate>,
    card_holder_required: bool,
    email_required: bool,
    phone_required: bool,
}

impl CardFormValidator {
    /// Validator accepting every brand, requiring the holder name.
    pub fn new() -> Self {
        Self {
            accepted_brands: CardBrand::ALL.to_vec(),
            today: None,
            card_holder_required: true,
            email_required: false,
            phone_required: false,
        }
    }

    /// Restricts accepted brands.
    pub fn with_accepted_brands(mut self, brands: Vec<CardBrand>) -> Self {
        self.accepted_brands = brands;
        self
    }

    /// Pins the date expirations are compared against.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Sets which optional fields are mandatory.
    pub fn with_required_fields(mut self, card_holder: bool, email: bool, phone: bool) -> Self {
        self.card_holder_required = card_holder;
        self.email_required = email;
        self.phone_required = phone;
        self
    }

    /// Replaces accepted brands, e.g. after fetching them from the server.
    pub fn set_accepted_brands(&mut self, brands: Vec<CardBrand>) {
        self.accepted_brands = brands;
    }

    /// Currently accepted brands.
    pub fn accepted_brands(&self) -> &[CardBrand] {
        &self.accepted_brands
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Validates the card number: digits, length for the brand, Luhn, then brand acceptance.
    pub fn validate_card_number(&self, raw: &str, instant: bool) -> ValidatedField<CardNumber> {
        let digits = strip_separators(raw);
        if digits.is_empty() {
            return ValidatedField::invalid(FormError::CardNumberEmpty, instant);
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return ValidatedField::invalid(FormError::CardNumberInvalid, true);
        }

        let brand = CardBrand::detect(&digits);
        let expected = brand.map(|b| b.number_length()).unwrap_or(16);
        if digits.len() < expected {
            return ValidatedField::invalid(FormError::CardNumberInvalid, instant);
        }
        if digits.len() > expected || !luhn_check(&digits) {
            return ValidatedField::invalid(FormError::CardNumberInvalid, true);
        }

        match brand {
            Some(brand) if self.accepted_brands.contains(&brand) => {
                ValidatedField::Valid(CardNumber { value: digits, brand })
            }
            _ => ValidatedField::invalid(FormError::CardNumberInvalidBrand, true),
        }
    }

    /// Validates month and year. Two-digit years are taken as 20xx.
    pub fn validate_expiration(
        &self,
        month: &str,
        year: &str,
        instant: bool,
    ) -> ValidatedField<Expiration> {
        let month = month.trim();
        let year = year.trim();
        if month.is_empty() || year.is_empty() {
            return ValidatedField::invalid(FormError::ExpirationEmpty, instant);
        }
        if !month.chars().chain(year.chars()).all(|c| c.is_ascii_digit()) || month.len() > 2 {
            return ValidatedField::invalid(FormError::ExpirationInvalid, true);
        }

        let month_value: u8 = match month.parse() {
            Ok(m @ 1..=12) => m,
            _ => return ValidatedField::invalid(FormError::ExpirationInvalid, true),
        };
        let year_value: u16 = match (year.len(), year.parse::<u16>()) {
            (2, Ok(yy)) => 2000 + yy,
            (4, Ok(yyyy)) => yyyy,
            (1 | 3, _) => return ValidatedField::invalid(FormError::ExpirationInvalid, instant),
            _ => return ValidatedField::invalid(FormError::ExpirationInvalid, true),
        };

        let today = self.today();
        let elapsed = (i32::from(year_value), u32::from(month_value)) < (today.year(), today.month());
        if elapsed {
            return ValidatedField::invalid(FormError::ExpirationInvalid, true);
        }

        ValidatedField::Valid(Expiration {
            month: month_value,
            year: year_value,
        })
    }

    /// Validates the security code against the detected brand's length.
    ///
    /// With no brand detected yet both three and four digits are accepted.
    pub fn validate_cvc(
        &self,
        raw: &str,
        brand: Option<CardBrand>,
        instant: bool,
    ) -> ValidatedField<String> {
        let cvc = raw.trim();
        if cvc.is_empty() {
            return ValidatedField::invalid(FormError::CvcEmpty, instant);
        }
        if !cvc.chars().all(|c| c.is_ascii_digit()) {
            return ValidatedField::invalid(FormError::CvcInvalid, true);
        }

        let (min, max) = match brand {
            Some(brand) => (brand.cvc_length(), brand.cvc_length()),
            None => (3, 4),
        };
        if cvc.len() < min {
            ValidatedField::invalid(FormError::CvcInvalid, instant)
        } else if cvc.len() > max {
            ValidatedField::invalid(FormError::CvcInvalid, true)
        } else {
            ValidatedField::Valid(cvc.to_string())
        }
    }

    /// Validates the holder name: latin letters, spaces and `.,'-`, bounded length.
    pub fn validate_card_holder(&self, raw: &str, instant: bool) -> ValidatedField<String> {
        let name = raw.trim();
        if name.is_empty() {
            return ValidatedField::invalid(FormError::CardHolderEmpty, instant);
        }
        if !CARD_HOLDER_REGEX.is_match(name) {
            return ValidatedField::invalid(FormError::CardHolderInvalid, true);
        }
        if name.chars().count() > CARD_HOLDER_MAX_LENGTH {
            return ValidatedField::invalid(FormError::CardHolderInvalidLength, true);
        }
        ValidatedField::Valid(name.to_string())
    }

    /// Validates the email. Only emptiness is checked; the server checks the format.
    pub fn validate_email(&self, raw: &str, instant: bool) -> ValidatedField<String> {
        let email = raw.trim();
        if email.is_empty() {
            ValidatedField::invalid(FormError::EmailEmpty, instant)
        } else {
            ValidatedField::Valid(email.to_string())
        }
    }

    /// Validates the phone number against the E.164 format.
    pub fn validate_phone(&self, raw: &str, instant: bool) -> ValidatedField<String> {
        let phone: String = raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
        if phone.is_empty() {
            return ValidatedField::invalid(FormError::PhoneNumberEmpty, instant);
        }
        if PHONE_REGEX.is_match(&phone) {
            ValidatedField::Valid(phone)
        } else {
            ValidatedField::invalid(FormError::PhoneNumberInvalid, instant)
        }
    }

    /// Validates every field of the form.
    ///
    /// Optional fields are validated when required or when the user filled them in.
    pub fn validate_form(&self, input: &CardFormInput, instant: bool) -> FormValidation {
        let card_number = self.validate_card_number(&input.card_number, instant);
        let brand = CardBrand::detect(&input.normalized_card_number());

        let optional = |required: bool, value: Option<&str>| -> Option<String> {
            match value.map(str::trim) {
                Some(v) if !v.is_empty() => Some(v.to_string()),
                _ if required => Some(String::new()),
                _ => None,
            }
        };

        FormValidation {
            card_number,
            expiration: self.validate_expiration(
                &input.expiration_month,
                &input.expiration_year,
                instant,
            ),
            cvc: self.validate_cvc(&input.cvc, brand, instant),
            card_holder: optional(self.card_holder_required, Some(&input.card_holder))
                .map(|v| self.validate_card_holder(&v, instant)),
            email: optional(self.email_required, input.email.as_deref())
                .map(|v| self.validate_email(&v, instant)),
            phone: optional(self.phone_required, input.phone.as_deref())
                .map(|v| self.validate_phone(&v, instant)),
        }
    }
}

impl Default for CardFormValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_separators(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect()
}
