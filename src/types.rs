//! Core type definitions for PAY.JP tokenization.
//!
//! This module contains the server-confirmed records ([`Card`], [`Token`]),
//! the transient step-up handle ([`ThreeDSecureToken`]), brand metadata and
//! the shared [`TokenOperationStatus`].

use crate::utils::tds_entry_url;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Card network inferred from the card number prefix.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardBrand {
    /// Visa
    #[serde(rename = "Visa")]
    Visa,
    /// Mastercard
    #[serde(rename = "MasterCard")]
    Mastercard,
    /// JCB
    #[serde(rename = "JCB")]
    Jcb,
    /// American Express
    #[serde(rename = "American Express")]
    AmericanExpress,
    /// Diners Club
    #[serde(rename = "Diners Club")]
    DinersClub,
    /// Discover
    #[serde(rename = "Discover")]
    Discover,
}

impl CardBrand {
    /// Every brand the API knows about.
    pub const ALL: [CardBrand; 6] = [
        CardBrand::Visa,
        CardBrand::Mastercard,
        CardBrand::Jcb,
        CardBrand::AmericanExpress,
        CardBrand::DinersClub,
        CardBrand::Discover,
    ];

    /// Detects the brand from the leading digits of a card number.
    ///
    /// # Examples
    ///
    /// ```
    /// use payjp_rs::types::CardBrand;
    ///
    /// assert_eq!(CardBrand::detect("4242424242424242"), Some(CardBrand::Visa));
    /// assert_eq!(CardBrand::detect("378282246310005"), Some(CardBrand::AmericanExpress));
    /// assert_eq!(CardBrand::detect("9999"), None);
    /// ```
    pub fn detect(digits: &str) -> Option<CardBrand> {
        let prefix = |len: usize| -> Option<u32> {
            digits.get(..len).and_then(|p| p.parse::<u32>().ok())
        };

        match (prefix(1), prefix(2), prefix(3), prefix(4)) {
            (Some(4), _, _, _) => Some(CardBrand::Visa),
            (_, Some(51..=55), _, _) | (_, _, _, Some(2221..=2720)) => Some(CardBrand::Mastercard),
            (_, Some(35), _, _) => Some(CardBrand::Jcb),
            (_, Some(34 | 37), _, _) => Some(CardBrand::AmericanExpress),
            (_, Some(36 | 38 | 39), _, _) | (_, _, Some(300..=305), _) => {
                Some(CardBrand::DinersClub)
            }
            (_, Some(65), _, _) | (_, _, _, Some(6011)) => Some(CardBrand::Discover),
            _ => None,
        }
    }

    /// Number of digits a complete card number of this brand has.
    pub fn number_length(&self) -> usize {
        match self {
            CardBrand::AmericanExpress => 15,
            CardBrand::DinersClub => 14,
            _ => 16,
        }
    }

    /// Number of digits the security code of this brand has.
    pub fn cvc_length(&self) -> usize {
        match self {
            CardBrand::AmericanExpress => 4,
            _ => 3,
        }
    }

    /// Display name as used by the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            CardBrand::Visa => "Visa",
            CardBrand::Mastercard => "MasterCard",
            CardBrand::Jcb => "JCB",
            CardBrand::AmericanExpress => "American Express",
            CardBrand::DinersClub => "Diners Club",
            CardBrand::Discover => "Discover",
        }
    }
}

impl fmt::Display for CardBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardBrand {
    type Err = String;

    /// Case-insensitive, so both `"Visa"` and `"visa"` parse.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CardBrand::ALL
            .iter()
            .find(|brand| brand.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown card brand: {}", s))
    }
}

/// 3-D Secure state of a card as reported by the server.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThreeDSecureStatus {
    /// 3-D Secure was not requested
    None,
    /// Verification is required but has not happened yet
    Unverified,
    /// Verification succeeded
    Verified,
    /// Verification was attempted (issuer not enrolled)
    Attempted,
    /// Verification failed
    Failed,
}

fn lenient_tds_status<'de, D>(deserializer: D) -> std::result::Result<Option<ThreeDSecureStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| serde_json::from_value(serde_json::Value::String(s)).ok()))
}

/// Server-confirmed card record.
///
/// For security reasons the card number is masked and only the last four digits are available.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Card {
    /// Card identifier (`car_...`)
    pub id: String,

    /// Card holder name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Last four digits of the card number
    #[serde(rename = "last4")]
    pub last4_number: String,

    /// Brand name as returned by the server
    pub brand: String,

    /// Expiration month (1-12)
    pub exp_month: u8,

    /// Expiration year (four digits)
    pub exp_year: u16,

    /// Fingerprint identifying the card number across tokens
    pub fingerprint: String,

    /// Whether the card was created with a live key
    #[serde(rename = "livemode")]
    pub live_mode: bool,

    /// Creation time
    #[serde(rename = "created", with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,

    /// 3-D Secure status; unknown values are treated as absent
    #[serde(
        default,
        deserialize_with = "lenient_tds_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub three_d_secure_status: Option<ThreeDSecureStatus>,

    /// Contact email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Contact phone number (E.164)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Card {
    /// Parses [`Card::brand`] into a [`CardBrand`].
    pub fn card_brand(&self) -> Option<CardBrand> {
        self.brand.parse().ok()
    }

    /// True when the card was tokenized but still has to pass 3-D Secure.
    pub fn requires_verification(&self) -> bool {
        self.three_d_secure_status == Some(ThreeDSecureStatus::Unverified)
    }
}

/// Single-use token returned to the caller.
///
/// # Examples
///
/// ```
/// use payjp_rs::types::Token;
///
/// let json = r#"{
///     "id": "tok_5ca06b51685e001723a2c3b4aeb4",
///     "livemode": false,
///     "used": false,
///     "created": 1442290383,
///     "card": {
///         "id": "car_e3ccd4e0959f45e7c75bacc4be90",
///         "last4": "4242",
///         "brand": "Visa",
///         "exp_month": 12,
///         "exp_year": 2030,
///         "fingerprint": "e1d8225886e3a7211127df751c86787f",
///         "livemode": false,
///         "created": 1442290383
///     }
/// }"#;
///
/// let token: Token = serde_json::from_str(json).unwrap();
/// assert_eq!(token.card.last4_number, "4242");
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Token {
    /// Token identifier (`tok_...`)
    pub id: String,

    /// Whether the token was created with a live key
    #[serde(rename = "livemode")]
    pub live_mode: bool,

    /// Whether the token has already been consumed
    pub used: bool,

    /// The tokenized card
    pub card: Card,

    /// Creation time
    #[serde(rename = "created", with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Step-up handle issued when token creation requires 3-D Secure.
///
/// Lives only between the step-up signal and the completion call. The server
/// sends only the id; the verification page is derived from it with
/// [`ThreeDSecureToken::entry_url`], since it depends on the client's endpoint,
/// public key and redirect key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ThreeDSecureToken {
    /// Identifier (`tds_...`)
    pub id: String,
}

impl ThreeDSecureToken {
    /// Creates a handle from its identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Verification page for this token.
    ///
    /// # Examples
    ///
    /// ```
    /// use payjp_rs::types::ThreeDSecureToken;
    /// use url::Url;
    ///
    /// let base = Url::parse("https://api.pay.jp/v1/").unwrap();
    /// let tds = ThreeDSecureToken::new("tds_123");
    /// let url = tds.entry_url(&base, "pk_test_123", Some("app")).unwrap();
    /// assert_eq!(url.path(), "/v1/tds/tds_123/start");
    /// ```
    pub fn entry_url(
        &self,
        base_url: &Url,
        public_key: &str,
        redirect_key: Option<&str>,
    ) -> crate::errors::Result<Url> {
        tds_entry_url(base_url, &self.id, public_key, redirect_key)
    }
}

/// Error body returned by the server for non-200 responses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceErrorResponse {
    /// Machine-readable error code (e.g. `card_declined`)
    pub code: String,

    /// Human-readable, server-localized message
    pub message: String,

    /// Offending request parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,

    /// HTTP status echoed by the server
    pub status: u16,

    /// Error category (`card_error`, `client_error`, ...)
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Envelope wrapping [`ServiceErrorResponse`] on the wire.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServiceErrorResult {
    /// The error body
    pub error: ServiceErrorResponse,
}

/// Response of the accepted-brands endpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AcceptedBrandsResponse {
    /// Brand names accepted by the merchant (unknown names are skipped on conversion)
    pub card_types_supported: Vec<String>,

    /// Whether the account is in live mode
    #[serde(default)]
    pub livemode: bool,
}

impl AcceptedBrandsResponse {
    /// Known brands from the response, in server order.
    pub fn brands(&self) -> Vec<CardBrand> {
        self.card_types_supported
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect()
    }
}

/// Whether new token requests may currently be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TokenOperationStatus {
    /// A new request may be submitted
    #[default]
    Acceptable,
    /// A request is in flight
    Running,
    /// The server rate-limited us; wait for a reset
    Throttled,
}

impl TokenOperationStatus {
    /// Submission is permitted only in [`TokenOperationStatus::Acceptable`].
    pub fn is_acceptable(&self) -> bool {
        matches!(self, TokenOperationStatus::Acceptable)
    }
}
