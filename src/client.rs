//! Tokenization client.
//!
//! This module sends token-creation requests, classifies the HTTP result into a
//! [`Token`] or an [`ApiError`], and brackets every token request with the shared
//! [`TokenOperationObserver`] status. It never retries: resubmission is the
//! caller's decision.

use crate::config::PayjpConfig;
use crate::errors::{ApiError, Result};
use crate::status::{StatusGuard, TokenOperationObserver, TokenOperationObserverType};
use crate::types::{
    AcceptedBrandsResponse, CardBrand, ServiceErrorResult, ThreeDSecureToken, Token,
    TokenOperationStatus,
};
use crate::utils::{basic_auth_header, tds_entry_url};
use crate::validation::CardFormInput;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// HTTP status used by the server to signal a 3-D Secure step-up.
pub const STEP_UP_STATUS: u16 = 303;

/// Operations the card form needs from the API.
///
/// Implemented by [`PayjpClient`]; tests and alternative transports provide their own.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Creates a token from card input.
    async fn create_token(&self, input: &CardFormInput, tenant_id: Option<&str>) -> Result<Token>;

    /// Creates a token once the verification for a 3DS token has completed.
    async fn create_token_for_three_d_secure(&self, tds_id: &str) -> Result<Token>;

    /// Finishes verification of a token whose card was `unverified`.
    async fn finish_token_three_d_secure(&self, token_id: &str) -> Result<Token>;

    /// Fetches an existing token.
    async fn get_token(&self, token_id: &str) -> Result<Token>;

    /// Fetches the brands accepted by the merchant (or tenant).
    async fn get_accepted_brands(&self, tenant_id: Option<&str>) -> Result<Vec<CardBrand>>;

    /// Status shared by every request issued through this service.
    fn token_operation_observer(&self) -> Arc<dyn TokenOperationObserverType>;

    /// URL the verification surface opens for a `tds_...` or `tok_...` id.
    fn verification_entry_url(&self, resource_id: &str) -> Result<Url>;
}

/// reqwest-backed [`TokenService`].
#[derive(Clone)]
pub struct PayjpClient {
    config: PayjpConfig,
    observer: Arc<TokenOperationObserver>,
    request_three_d_secure: bool,
}

impl PayjpClient {
    /// Creates a client reporting to the process-wide status.
    ///
    /// # Examples
    ///
    /// ```
    /// use payjp_rs::client::PayjpClient;
    /// use payjp_rs::config::PayjpConfig;
    ///
    /// let config = PayjpConfig::new("pk_test_0383a1b8f91e8a6e3ea0e2a9").unwrap();
    /// let client = PayjpClient::new(config);
    /// ```
    pub fn new(config: PayjpConfig) -> Self {
        Self::with_observer(config, TokenOperationObserver::shared())
    }

    /// Creates a client reporting to an injected status broadcaster.
    pub fn with_observer(config: PayjpConfig, observer: Arc<TokenOperationObserver>) -> Self {
        Self {
            config,
            observer,
            request_three_d_secure: false,
        }
    }

    /// Asks the server to run 3-D Secure for every card this client tokenizes.
    pub fn with_three_d_secure(mut self, enabled: bool) -> Self {
        self.request_three_d_secure = enabled;
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &PayjpConfig {
        &self.config
    }

    /// The concrete status broadcaster, for issuing manual throttle resets.
    pub fn observer(&self) -> Arc<TokenOperationObserver> {
        Arc::clone(&self.observer)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| ApiError::SystemError(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let info = &self.config.client_info;
        let mut request = request
            .header(AUTHORIZATION, basic_auth_header(&self.config.public_key))
            .header(USER_AGENT, info.user_agent());

        if let Some(json) = info.json() {
            request = request.header("X-Payjp-Client-User-Agent", json);
        }
        if let Some(locale) = &self.config.locale {
            request = request.header("Locale", locale);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<(u16, Vec<u8>)> {
        let response = self.authorized(request).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok((status, body.to_vec()))
    }

    /// Runs one token request inside a status bracket.
    async fn token_request(&self, request: RequestBuilder, operation: &str) -> Result<Token> {
        if self.observer.status() == TokenOperationStatus::Throttled {
            warn!(operation, "token request refused while throttled");
            return Err(ApiError::RateLimitExceeded);
        }

        let mut guard = StatusGuard::begin(Arc::clone(&self.observer));
        debug!(operation, "dispatching token request");

        let result = match self.send(request).await {
            Ok((status, body)) => interpret_response::<Token>(status, &body),
            Err(e) => Err(e),
        };

        let throttled = matches!(result, Err(ApiError::RateLimitExceeded));
        if throttled {
            guard.throttle();
        }
        let generation = guard.finish();

        match &result {
            Ok(token) => info!(operation, token_id = %token.id, last4 = %token.card.last4_number, "token issued"),
            Err(ApiError::RequiresThreeDSecure(tds)) => {
                info!(operation, tds_id = %tds.id, "3-D Secure step-up required")
            }
            Err(e) => warn!(operation, error = %e, "token request failed"),
        }

        if throttled {
            self.schedule_throttle_reset(generation);
        }
        result
    }

    fn schedule_throttle_reset(&self, generation: u64) {
        let Some(cooldown) = self.config.throttle_cooldown else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let observer = Arc::downgrade(&self.observer);
        handle.spawn(async move {
            tokio::time::sleep(cooldown).await;
            if let Some(observer) = observer.upgrade() {
                if observer.reset_throttle_if_current(generation) {
                    debug!("throttle cool-down elapsed");
                }
            }
        });
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(ApiError::InvalidInput(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

#[async_trait]
impl TokenService for PayjpClient {
    async fn create_token(&self, input: &CardFormInput, tenant_id: Option<&str>) -> Result<Token> {
        let number = input.normalized_card_number();
        require(&number, "card[number]")?;
        require(&input.cvc, "card[cvc]")?;
        require(&input.expiration_month, "card[exp_month]")?;
        require(&input.expiration_year, "card[exp_year]")?;

        let mut form: Vec<(&str, String)> = vec![
            ("card[number]", number),
            ("card[cvc]", input.cvc.trim().to_string()),
            ("card[exp_month]", input.expiration_month.trim().to_string()),
            ("card[exp_year]", input.expiration_year.trim().to_string()),
        ];

        let optional = [
            ("card[name]", Some(input.card_holder.as_str())),
            ("card[email]", input.email.as_deref()),
            ("card[phone]", input.phone.as_deref()),
            ("tenant", tenant_id.or(input.tenant_id.as_deref())),
        ];
        for (key, value) in optional {
            if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
                form.push((key, value.to_string()));
            }
        }
        if self.request_three_d_secure {
            form.push(("three_d_secure", "true".to_string()));
        }

        let request = self.config.http_client.post(self.endpoint("tokens")?).form(&form);
        self.token_request(request, "create_token").await
    }

    async fn create_token_for_three_d_secure(&self, tds_id: &str) -> Result<Token> {
        require(tds_id, "three_d_secure_token")?;

        let form = [("three_d_secure_token", tds_id)];
        let request = self.config.http_client.post(self.endpoint("tokens")?).form(&form);
        self.token_request(request, "create_token_for_three_d_secure").await
    }

    async fn finish_token_three_d_secure(&self, token_id: &str) -> Result<Token> {
        require(token_id, "token id")?;

        let url = self.endpoint(&format!("tokens/{}/tds_finish", token_id))?;
        let request = self.config.http_client.post(url);
        self.token_request(request, "finish_token_three_d_secure").await
    }

    async fn get_token(&self, token_id: &str) -> Result<Token> {
        require(token_id, "token id")?;

        let url = self.endpoint(&format!("tokens/{}", token_id))?;
        let (status, body) = self.send(self.config.http_client.get(url)).await?;
        interpret_response(status, &body)
    }

    async fn get_accepted_brands(&self, tenant_id: Option<&str>) -> Result<Vec<CardBrand>> {
        let mut request = self.config.http_client.get(self.endpoint("accounts/brands")?);
        if let Some(tenant) = tenant_id {
            request = request.query(&[("tenant", tenant)]);
        }

        let (status, body) = self.send(request).await?;
        let response: AcceptedBrandsResponse = interpret_response(status, &body)?;
        Ok(response.brands())
    }

    fn token_operation_observer(&self) -> Arc<dyn TokenOperationObserverType> {
        self.observer.clone()
    }

    fn verification_entry_url(&self, resource_id: &str) -> Result<Url> {
        tds_entry_url(
            &self.config.base_url,
            resource_id,
            &self.config.public_key,
            self.config.redirect_url_key(),
        )
    }
}

/// Classifies a raw HTTP result.
///
/// * 200 decodes `T`
/// * 303 is the 3-D Secure step-up signal carrying a [`ThreeDSecureToken`]
/// * 429 is rate limiting
/// * anything else decodes the server's error envelope
///
/// An empty body is an [`ApiError::InvalidResponse`]; a body of the wrong shape
/// is an [`ApiError::InvalidPayload`].
///
/// # Examples
///
/// ```
/// use payjp_rs::client::interpret_response;
/// use payjp_rs::errors::ApiError;
/// use payjp_rs::types::Token;
///
/// let result = interpret_response::<Token>(303, br#"{"id": "tds_123"}"#);
/// assert!(matches!(result, Err(ApiError::RequiresThreeDSecure(tds)) if tds.id == "tds_123"));
/// ```
pub fn interpret_response<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T> {
    if status == 429 {
        return Err(ApiError::RateLimitExceeded);
    }
    if body.is_empty() {
        return Err(ApiError::InvalidResponse(Some(status)));
    }

    let invalid_payload = |e: serde_json::Error| ApiError::InvalidPayload {
        raw: body.to_vec(),
        cause: e.to_string(),
    };

    match status {
        200 => serde_json::from_slice(body).map_err(invalid_payload),
        STEP_UP_STATUS => {
            let tds: ThreeDSecureToken = serde_json::from_slice(body).map_err(invalid_payload)?;
            Err(ApiError::RequiresThreeDSecure(tds))
        }
        _ => {
            let result: ServiceErrorResult =
                serde_json::from_slice(body).map_err(invalid_payload)?;
            Err(ApiError::ServiceError(result.error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "tok_123",
            "livemode": false,
            "used": false,
            "created": 1700000000,
            "card": {
                "id": "car_123",
                "last4": "4242",
                "brand": "Visa",
                "exp_month": 12,
                "exp_year": 2030,
                "fingerprint": "abcdefg",
                "livemode": false,
                "created": 1700000000
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_interpret_success() {
        let token: Token = interpret_response(200, &token_body()).unwrap();
        assert_eq!(token.id, "tok_123");
        assert_eq!(token.card.card_brand(), Some(CardBrand::Visa));
    }

    #[test]
    fn test_interpret_step_up() {
        let result = interpret_response::<Token>(303, br#"{"object":"three_d_secure_token","id":"tds_abc"}"#);
        match result {
            Err(ApiError::RequiresThreeDSecure(tds)) => assert_eq!(tds.id, "tds_abc"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_interpret_rate_limit_ignores_body() {
        assert!(matches!(
            interpret_response::<Token>(429, b""),
            Err(ApiError::RateLimitExceeded)
        ));
    }

    #[test]
    fn test_interpret_service_error() {
        let body = br#"{"error":{"code":"card_declined","message":"Card declined","status":402,"type":"card_error"}}"#;
        match interpret_response::<Token>(402, body) {
            Err(ApiError::ServiceError(e)) => {
                assert_eq!(e.code, "card_declined");
                assert_eq!(e.message, "Card declined");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_interpret_undecodable_bodies() {
        for status in [200, 303, 400, 500] {
            match interpret_response::<Token>(status, b"<html>oops</html>") {
                Err(ApiError::InvalidPayload { raw, .. }) => assert_eq!(raw, b"<html>oops</html>"),
                other => panic!("status {}: unexpected result: {:?}", status, other),
            }
        }
    }

    #[test]
    fn test_interpret_empty_body() {
        assert!(matches!(
            interpret_response::<Token>(200, b""),
            Err(ApiError::InvalidResponse(Some(200)))
        ));
        assert!(matches!(
            interpret_response::<Token>(502, b""),
            Err(ApiError::InvalidResponse(Some(502)))
        ));
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected_without_status_change() {
        let observer = Arc::new(TokenOperationObserver::new());
        let config = PayjpConfig::new("pk_test_123").unwrap();
        let client = PayjpClient::with_observer(config, Arc::clone(&observer));

        let input = CardFormInput::new("", "12", "2030", "123", "TARO YAMADA");
        let result = client.create_token(&input, None).await;
        assert!(matches!(result, Err(ApiError::InvalidInput(ref f)) if f.contains("card[number]")));

        let result = client.create_token_for_three_d_secure(" ").await;
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
        assert_eq!(observer.status(), TokenOperationStatus::Acceptable);
    }

    #[tokio::test]
    async fn test_throttled_client_refuses_locally() {
        let observer = Arc::new(TokenOperationObserver::new());
        observer.set_status(TokenOperationStatus::Throttled);
        let config = PayjpConfig::new("pk_test_123")
            .unwrap()
            .with_base_url("http://127.0.0.1:9")
            .unwrap();
        let client = PayjpClient::with_observer(config, Arc::clone(&observer));

        let result = client.create_token_for_three_d_secure("tds_123").await;
        assert!(matches!(result, Err(ApiError::RateLimitExceeded)));
        assert_eq!(observer.status(), TokenOperationStatus::Throttled);
    }

    #[test]
    fn test_verification_entry_url_uses_redirect_key() {
        let tds = crate::config::ThreeDSecureUrlConfiguration::new("myapp://tds/finish", "myapp")
            .unwrap();
        let config = PayjpConfig::new("pk_test_123")
            .unwrap()
            .with_three_d_secure_url_configuration(tds);
        let client = PayjpClient::with_observer(config, Arc::new(TokenOperationObserver::new()));

        let url = client.verification_entry_url("tds_123").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.pay.jp/v1/tds/tds_123/start?publickey=pk_test_123&back=myapp"
        );
    }
}
