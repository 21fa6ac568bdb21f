//! Utility functions for payjp-rs.
//!
//! This module provides helpers for header encoding, verification URL
//! construction and the card number checksum.

use crate::errors::{ApiError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use url::Url;

/// Builds the `Authorization` header value for a public key.
///
/// The API authenticates with HTTP Basic, the key as user name and an empty password.
///
/// # Examples
///
/// ```
/// use payjp_rs::utils::basic_auth_header;
///
/// assert_eq!(basic_auth_header("pk_test_123"), "Basic cGtfdGVzdF8xMjM6");
/// ```
pub fn basic_auth_header(public_key: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{}:", public_key).as_bytes()))
}

/// Builds the URL the verification surface must open for a token or 3DS token id.
///
/// # Arguments
///
/// * `base_url` - API base, ending with a slash (e.g. `https://api.pay.jp/v1/`)
/// * `resource_id` - `tok_...` or `tds_...` identifier
/// * `public_key` - Public key the verification page authenticates with
/// * `redirect_key` - Key of the registered redirect URL, passed as `back`
///
/// # Examples
///
/// ```
/// use payjp_rs::utils::tds_entry_url;
/// use url::Url;
///
/// let base = Url::parse("https://api.pay.jp/v1/").unwrap();
/// let url = tds_entry_url(&base, "tds_123", "pk_test_123", Some("app")).unwrap();
/// assert_eq!(
///     url.as_str(),
///     "https://api.pay.jp/v1/tds/tds_123/start?publickey=pk_test_123&back=app"
/// );
/// ```
pub fn tds_entry_url(
    base_url: &Url,
    resource_id: &str,
    public_key: &str,
    redirect_key: Option<&str>,
) -> Result<Url> {
    let mut url = base_url
        .join(&format!("tds/{}/start", resource_id))
        .map_err(|e| ApiError::InvalidPayload {
            raw: resource_id.as_bytes().to_vec(),
            cause: format!("Cannot build verification URL: {}", e),
        })?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("publickey", public_key);
        if let Some(key) = redirect_key {
            query.append_pair("back", key);
        }
    }

    Ok(url)
}

/// Luhn (mod 10) checksum over an all-digit string.
///
/// Returns false for empty input or any non-digit character.
///
/// # Examples
///
/// ```
/// use payjp_rs::utils::luhn_check;
///
/// assert!(luhn_check("4242424242424242"));
/// assert!(!luhn_check("4242424242424241"));
/// ```
pub fn luhn_check(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }

    sum % 10 == 0
}
