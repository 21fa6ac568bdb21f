//! Card form orchestration.
//!
//! [`TokenizationOrchestrator`] is the single surface a card form talks to. It
//! validates input, creates the token, runs the 3-D Secure branch when the
//! server asks for it, and returns exactly one [`CardFormResult`] per submit.
//!
//! UI signals go to a [`CardFormScreenDelegate`] held weakly: a form torn down
//! mid-request is simply not called back.

use crate::client::TokenService;
use crate::errors::ApiError;
use crate::status::{SubscriptionId, TokenOperationObserverType};
use crate::three_d_secure::{ThreeDSecureProcessHandler, ThreeDSecureProcessStatus};
use crate::types::{CardBrand, ThreeDSecureToken, Token, TokenOperationStatus};
use crate::validation::{CardFormInput, CardFormValidator, FormError, FormValidation};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Terminal outcome of one submit.
#[derive(Debug, Clone, PartialEq)]
pub enum CardFormResult {
    /// A token was produced and accepted by the delegate
    Success(Token),
    /// The user abandoned 3-D Secure verification
    Cancelled,
    /// Human-readable failure; the form can be submitted again
    Failed(String),
}

impl CardFormResult {
    /// The produced token, if any.
    pub fn token(&self) -> Option<&Token> {
        match self {
            CardFormResult::Success(token) => Some(token),
            _ => None,
        }
    }
}

/// UI layer driven by the orchestrator.
///
/// Every method except [`CardFormScreenDelegate::did_produce`] is a plain
/// notification and defaults to doing nothing.
#[async_trait]
pub trait CardFormScreenDelegate: Send + Sync {
    /// Replaces the brands shown in the form.
    fn reload_brands(&self, _brands: &[CardBrand]) {}

    /// Shows a progress indicator.
    fn show_indicator(&self) {}

    /// Hides the progress indicator.
    fn dismiss_indicator(&self) {}

    /// Enables the submit control.
    fn enable_submit_button(&self) {}

    /// Disables the submit control.
    fn disable_submit_button(&self) {}

    /// Replaces the form with an error; `button_hidden` hides the retry button.
    fn show_error_view(&self, _message: &str, _button_hidden: bool) {}

    /// Removes the error view.
    fn dismiss_error_view(&self) {}

    /// Shows a transient error.
    fn show_error_alert(&self, _message: &str) {}

    /// Shows per-field validation errors.
    fn show_field_errors(&self, _errors: &[FormError]) {}

    /// Hands the produced token to the app, typically to send it to its backend.
    ///
    /// An `Err` turns the submit into [`CardFormResult::Failed`] with that message.
    async fn did_produce(&self, _token: &Token) -> Result<(), String> {
        Ok(())
    }
}

/// Resets the in-flight flag on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// State machine behind a single card form.
pub struct TokenizationOrchestrator {
    service: Arc<dyn TokenService>,
    observer: Arc<dyn TokenOperationObserverType>,
    verification: Arc<ThreeDSecureProcessHandler>,
    validator: Mutex<CardFormValidator>,
    delegate: Weak<dyn CardFormScreenDelegate>,
    in_flight: AtomicBool,
    result_produced: AtomicBool,
    tds_token: Mutex<Option<ThreeDSecureToken>>,
    subscription: SubscriptionId,
}

impl TokenizationOrchestrator {
    /// Creates an orchestrator subscribed to the service's operation status.
    ///
    /// The subscription holds only a weak reference and is removed on drop.
    pub fn new(
        service: Arc<dyn TokenService>,
        verification: Arc<ThreeDSecureProcessHandler>,
        validator: CardFormValidator,
        delegate: Weak<dyn CardFormScreenDelegate>,
    ) -> Arc<Self> {
        let observer = service.token_operation_observer();

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let subscription = observer.subscribe(Arc::new(move |status: TokenOperationStatus| {
                if let Some(orchestrator) = weak.upgrade() {
                    orchestrator.status_did_update(status);
                }
            }));

            Self {
                service,
                observer,
                verification,
                validator: Mutex::new(validator),
                delegate,
                in_flight: AtomicBool::new(false),
                result_produced: AtomicBool::new(false),
                tds_token: Mutex::new(None),
                subscription,
            }
        })
    }

    /// Whether the submit control should be enabled right now.
    pub fn submit_enabled(&self) -> bool {
        self.enabled_for(self.observer.status())
    }

    /// Whether a submit has already produced a token.
    pub fn result_produced(&self) -> bool {
        self.result_produced.load(Ordering::SeqCst)
    }

    /// The 3-D Secure token retained from the last step-up, if any.
    pub fn tds_token(&self) -> Option<ThreeDSecureToken> {
        self.tds_token.lock().clone()
    }

    /// Validates the form without submitting it.
    pub fn validate(&self, input: &CardFormInput, instant: bool) -> FormValidation {
        self.validator.lock().validate_form(input, instant)
    }

    /// Reacts to a status change by refreshing the submit control.
    pub fn status_did_update(&self, status: TokenOperationStatus) {
        self.update_indicating_ui(status);
    }

    /// Fetches the accepted brands and applies them to validation.
    ///
    /// On failure the error view offers a retry button only for transport errors.
    pub async fn fetch_brands(&self, tenant_id: Option<&str>) -> crate::Result<Vec<CardBrand>> {
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.show_indicator();
            delegate.dismiss_error_view();
        }

        let result = self.service.get_accepted_brands(tenant_id).await;

        match &result {
            Ok(brands) => {
                debug!(count = brands.len(), "accepted brands fetched");
                self.validator.lock().set_accepted_brands(brands.clone());
                if let Some(delegate) = self.delegate.upgrade() {
                    delegate.dismiss_indicator();
                    delegate.dismiss_error_view();
                    delegate.reload_brands(brands);
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch accepted brands");
                if let Some(delegate) = self.delegate.upgrade() {
                    delegate.dismiss_indicator();
                    let retryable = matches!(e, ApiError::SystemError(_));
                    delegate.show_error_view(&e.localized_message(), !retryable);
                }
            }
        }
        result
    }

    /// Submits the card form.
    ///
    /// `tenant_id` takes precedence over the tenant carried by `input`.
    pub async fn submit(&self, input: &CardFormInput, tenant_id: Option<&str>) -> CardFormResult {
        if self.result_produced() {
            return CardFormResult::Failed("A token has already been created.".to_string());
        }

        let validation = self.validate(input, true);
        if !validation.is_valid() {
            let errors = validation.errors();
            if let Some(delegate) = self.delegate.upgrade() {
                delegate.show_field_errors(&errors);
            }
            let message = errors
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "Please check your card details.".to_string());
            return CardFormResult::Failed(message);
        }

        match self.observer.status() {
            TokenOperationStatus::Acceptable => {}
            TokenOperationStatus::Throttled => {
                return CardFormResult::Failed(ApiError::RateLimitExceeded.localized_message())
            }
            TokenOperationStatus::Running => {
                return CardFormResult::Failed("Another request is in progress.".to_string())
            }
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return CardFormResult::Failed("Another request is in progress.".to_string());
        }

        let result = {
            let _in_flight = InFlight(&self.in_flight);
            self.refresh();
            self.tokenize(input, tenant_id.or(input.tenant_id.as_deref())).await
        };

        self.refresh();
        result
    }

    async fn tokenize(&self, input: &CardFormInput, tenant_id: Option<&str>) -> CardFormResult {
        match self.service.create_token(input, tenant_id).await {
            Ok(token) if token.card.requires_verification() => {
                info!(token_id = %token.id, "card requires 3-D Secure verification");
                self.verify_token(token).await
            }
            Ok(token) => self.produced(token).await,
            Err(ApiError::RequiresThreeDSecure(tds)) => {
                *self.tds_token.lock() = Some(tds.clone());
                self.verify_tds_token(tds).await
            }
            Err(e) => self.failed(&e),
        }
    }

    async fn verify_token(&self, token: Token) -> CardFormResult {
        match self.run_verification(&token.id).await {
            Ok(true) => {}
            Ok(false) => return CardFormResult::Cancelled,
            Err(result) => return result,
        }
        match self.service.finish_token_three_d_secure(&token.id).await {
            Ok(token) => self.produced(token).await,
            Err(e) => self.failed(&e),
        }
    }

    async fn verify_tds_token(&self, tds: ThreeDSecureToken) -> CardFormResult {
        match self.run_verification(&tds.id).await {
            Ok(true) => {}
            Ok(false) => return CardFormResult::Cancelled,
            Err(result) => return result,
        }
        match self.service.create_token_for_three_d_secure(&tds.id).await {
            Ok(token) => {
                self.tds_token.lock().take();
                self.produced(token).await
            }
            Err(e) => self.failed(&e),
        }
    }

    /// Presents verification for `resource_id`; true when it completed.
    async fn run_verification(&self, resource_id: &str) -> Result<bool, CardFormResult> {
        let url = self
            .service
            .verification_entry_url(resource_id)
            .map_err(|e| self.failed(&e))?;

        match self.verification.verify(&url).await {
            ThreeDSecureProcessStatus::Completed => Ok(true),
            ThreeDSecureProcessStatus::Canceled => {
                info!(resource_id, "verification canceled by user");
                Ok(false)
            }
        }
    }

    async fn produced(&self, token: Token) -> CardFormResult {
        let accepted = match self.delegate.upgrade() {
            Some(delegate) => delegate.did_produce(&token).await,
            None => Ok(()),
        };

        match accepted {
            Ok(()) => {
                self.result_produced.store(true, Ordering::SeqCst);
                CardFormResult::Success(token)
            }
            Err(message) => {
                warn!(token_id = %token.id, "produced token rejected by delegate");
                self.alert(message)
            }
        }
    }

    fn failed(&self, error: &ApiError) -> CardFormResult {
        self.alert(error.localized_message())
    }

    fn alert(&self, message: String) -> CardFormResult {
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.show_error_alert(&message);
        }
        CardFormResult::Failed(message)
    }

    fn enabled_for(&self, status: TokenOperationStatus) -> bool {
        status.is_acceptable()
            && !self.result_produced.load(Ordering::SeqCst)
            && !self.in_flight.load(Ordering::SeqCst)
    }

    fn refresh(&self) {
        self.update_indicating_ui(self.observer.status());
    }

    fn update_indicating_ui(&self, status: TokenOperationStatus) {
        let Some(delegate) = self.delegate.upgrade() else {
            return;
        };
        if self.enabled_for(status) {
            delegate.dismiss_indicator();
            delegate.enable_submit_button();
        } else {
            delegate.show_indicator();
            delegate.disable_submit_button();
        }
    }
}

impl Drop for TokenizationOrchestrator {
    fn drop(&mut self) {
        self.observer.unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreeDSecureUrlConfiguration;
    use crate::errors::Result;
    use crate::status::TokenOperationObserver;
    use crate::three_d_secure::WebDriver;
    use crate::types::{Card, ThreeDSecureStatus};
    use chrono::{NaiveDate, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use url::Url;

    fn token(id: &str, tds: Option<ThreeDSecureStatus>) -> Token {
        Token {
            id: id.to_string(),
            live_mode: false,
            used: false,
            created_at: Utc::now(),
            card: Card {
                id: "car_123".to_string(),
                name: Some("TARO YAMADA".to_string()),
                last4_number: "4242".to_string(),
                brand: "Visa".to_string(),
                exp_month: 12,
                exp_year: 2030,
                fingerprint: "fp".to_string(),
                live_mode: false,
                created_at: Utc::now(),
                three_d_secure_status: tds,
                email: None,
                phone: None,
            },
        }
    }

    #[derive(Default)]
    struct MockTokenService {
        observer: Arc<TokenOperationObserver>,
        create: Mutex<VecDeque<Result<Token>>>,
        create_for_tds: Mutex<VecDeque<Result<Token>>>,
        finish: Mutex<VecDeque<Result<Token>>>,
        brands: Mutex<Option<Result<Vec<CardBrand>>>>,
        create_calls: AtomicUsize,
        tds_calls: AtomicUsize,
        finish_calls: AtomicUsize,
        tenants: Mutex<Vec<Option<String>>>,
    }

    impl MockTokenService {
        fn next(queue: &Mutex<VecDeque<Result<Token>>>) -> Result<Token> {
            queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::SystemError("unexpected call".to_string())))
        }
    }

    #[async_trait]
    impl TokenService for MockTokenService {
        async fn create_token(&self, _input: &CardFormInput, tenant_id: Option<&str>) -> Result<Token> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.tenants.lock().push(tenant_id.map(str::to_string));
            Self::next(&self.create)
        }

        async fn create_token_for_three_d_secure(&self, _tds_id: &str) -> Result<Token> {
            self.tds_calls.fetch_add(1, Ordering::SeqCst);
            Self::next(&self.create_for_tds)
        }

        async fn finish_token_three_d_secure(&self, _token_id: &str) -> Result<Token> {
            self.finish_calls.fetch_add(1, Ordering::SeqCst);
            Self::next(&self.finish)
        }

        async fn get_token(&self, token_id: &str) -> Result<Token> {
            Ok(token(token_id, None))
        }

        async fn get_accepted_brands(&self, _tenant_id: Option<&str>) -> Result<Vec<CardBrand>> {
            self.brands
                .lock()
                .take()
                .unwrap_or_else(|| Ok(CardBrand::ALL.to_vec()))
        }

        fn token_operation_observer(&self) -> Arc<dyn TokenOperationObserverType> {
            self.observer.clone()
        }

        fn verification_entry_url(&self, resource_id: &str) -> Result<Url> {
            Url::parse(&format!("https://example.test/tds/{}/start", resource_id))
                .map_err(|e| ApiError::SystemError(e.to_string()))
        }
    }

    /// Ends every verification as soon as it is presented.
    struct ScriptedDriver {
        handler: Mutex<Weak<ThreeDSecureProcessHandler>>,
        complete: bool,
        presented: Mutex<Vec<String>>,
    }

    impl WebDriver for ScriptedDriver {
        fn present(&self, url: &Url) {
            self.presented.lock().push(url.to_string());
            let Some(handler) = self.handler.lock().upgrade() else {
                return;
            };
            if self.complete {
                handler.complete_verification("myapp://tds/finish");
            } else {
                handler.web_browser_did_finish();
            }
        }

        fn dismiss(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        events: Mutex<Vec<String>>,
        reject_with: Option<String>,
    }

    #[async_trait]
    impl CardFormScreenDelegate for RecordingDelegate {
        fn reload_brands(&self, brands: &[CardBrand]) {
            self.events.lock().push(format!("brands:{}", brands.len()));
        }

        fn enable_submit_button(&self) {
            self.events.lock().push("enable".to_string());
        }

        fn disable_submit_button(&self) {
            self.events.lock().push("disable".to_string());
        }

        fn show_error_view(&self, _message: &str, button_hidden: bool) {
            self.events.lock().push(format!("error_view:{}", button_hidden));
        }

        fn show_error_alert(&self, message: &str) {
            self.events.lock().push(format!("alert:{}", message));
        }

        fn show_field_errors(&self, errors: &[FormError]) {
            self.events.lock().push(format!("fields:{}", errors.len()));
        }

        async fn did_produce(&self, _token: &Token) -> std::result::Result<(), String> {
            match &self.reject_with {
                Some(message) => Err(message.clone()),
                None => Ok(()),
            }
        }
    }

    struct Fixture {
        service: Arc<MockTokenService>,
        driver: Arc<ScriptedDriver>,
        delegate: Arc<RecordingDelegate>,
        orchestrator: Arc<TokenizationOrchestrator>,
    }

    fn fixture(service: MockTokenService, delegate: RecordingDelegate, complete: bool) -> Fixture {
        let service = Arc::new(service);
        let driver = Arc::new(ScriptedDriver {
            handler: Mutex::new(Weak::new()),
            complete,
            presented: Mutex::new(Vec::new()),
        });
        let redirect = ThreeDSecureUrlConfiguration::new("myapp://tds/finish", "myapp").ok();
        let handler = Arc::new(ThreeDSecureProcessHandler::new(driver.clone(), redirect));
        *driver.handler.lock() = Arc::downgrade(&handler);

        let delegate = Arc::new(delegate);
        let weak: Weak<dyn CardFormScreenDelegate> = Arc::downgrade(&delegate) as Weak<dyn CardFormScreenDelegate>;
        let validator =
            CardFormValidator::new().with_today(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        let orchestrator = TokenizationOrchestrator::new(service.clone(), handler, validator, weak);

        Fixture {
            service,
            driver,
            delegate,
            orchestrator,
        }
    }

    fn input() -> CardFormInput {
        CardFormInput::new("4242424242424242", "12", "2030", "123", "TARO YAMADA")
    }

    #[tokio::test]
    async fn test_submit_success() {
        let service = MockTokenService::default();
        service.create.lock().push_back(Ok(token("tok_1", None)));
        let f = fixture(service, RecordingDelegate::default(), true);

        let result = f.orchestrator.submit(&input(), None).await;
        assert_eq!(result.token().map(|t| t.id.as_str()), Some("tok_1"));
        assert!(f.orchestrator.result_produced());
        assert!(!f.orchestrator.submit_enabled());

        let again = f.orchestrator.submit(&input(), None).await;
        assert!(matches!(again, CardFormResult::Failed(_)));
        assert_eq!(f.service.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_form_makes_no_request() {
        let f = fixture(MockTokenService::default(), RecordingDelegate::default(), true);
        let bad = CardFormInput::new("4242424242424241", "13", "2030", "", "TARO YAMADA");

        let result = f.orchestrator.submit(&bad, None).await;
        assert_eq!(result, CardFormResult::Failed(FormError::CardNumberInvalid.to_string()));
        assert_eq!(f.service.create_calls.load(Ordering::SeqCst), 0);
        assert!(f.delegate.events.lock().contains(&"fields:3".to_string()));
    }

    #[tokio::test]
    async fn test_step_up_creates_token_once() {
        let service = MockTokenService::default();
        service
            .create
            .lock()
            .push_back(Err(ApiError::RequiresThreeDSecure(ThreeDSecureToken::new("tds_1"))));
        service.create_for_tds.lock().push_back(Ok(token("tok_tds", None)));
        let f = fixture(service, RecordingDelegate::default(), true);

        let result = f.orchestrator.submit(&input(), None).await;
        assert_eq!(result.token().map(|t| t.id.as_str()), Some("tok_tds"));
        assert_eq!(f.service.tds_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.service.finish_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            *f.driver.presented.lock(),
            vec!["https://example.test/tds/tds_1/start".to_string()]
        );
        assert!(f.orchestrator.tds_token().is_none());
    }

    #[tokio::test]
    async fn test_unverified_card_finishes_verification() {
        let service = MockTokenService::default();
        service
            .create
            .lock()
            .push_back(Ok(token("tok_2", Some(ThreeDSecureStatus::Unverified))));
        service
            .finish
            .lock()
            .push_back(Ok(token("tok_2", Some(ThreeDSecureStatus::Verified))));
        let f = fixture(service, RecordingDelegate::default(), true);

        let result = f.orchestrator.submit(&input(), None).await;
        assert_eq!(result.token().map(|t| t.id.as_str()), Some("tok_2"));
        assert_eq!(f.service.finish_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.service.tds_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_verification_is_resubmittable() {
        let service = MockTokenService::default();
        service
            .create
            .lock()
            .push_back(Err(ApiError::RequiresThreeDSecure(ThreeDSecureToken::new("tds_1"))));
        let f = fixture(service, RecordingDelegate::default(), false);

        let result = f.orchestrator.submit(&input(), None).await;
        assert_eq!(result, CardFormResult::Cancelled);
        assert_eq!(f.service.tds_calls.load(Ordering::SeqCst), 0);
        assert!(f.orchestrator.submit_enabled());
        assert_eq!(f.orchestrator.tds_token().map(|t| t.id), Some("tds_1".to_string()));
        assert!(!f.delegate.events.lock().iter().any(|e| e.starts_with("alert:")));
    }

    #[tokio::test]
    async fn test_service_error_surfaces_message() {
        let service = MockTokenService::default();
        service.create.lock().push_back(Err(ApiError::ServiceError(
            crate::types::ServiceErrorResponse {
                code: "card_declined".to_string(),
                message: "Card declined".to_string(),
                param: None,
                status: 402,
                error_type: "card_error".to_string(),
            },
        )));
        let f = fixture(service, RecordingDelegate::default(), true);

        let result = f.orchestrator.submit(&input(), None).await;
        assert_eq!(result, CardFormResult::Failed("Card declined".to_string()));
        assert!(f.orchestrator.submit_enabled());
        assert!(f
            .delegate
            .events
            .lock()
            .contains(&"alert:Card declined".to_string()));
    }

    #[tokio::test]
    async fn test_delegate_rejection_keeps_form_open() {
        let service = MockTokenService::default();
        service.create.lock().push_back(Ok(token("tok_1", None)));
        let delegate = RecordingDelegate {
            reject_with: Some("backend unavailable".to_string()),
            ..Default::default()
        };
        let f = fixture(service, delegate, true);

        let result = f.orchestrator.submit(&input(), None).await;
        assert_eq!(result, CardFormResult::Failed("backend unavailable".to_string()));
        assert!(!f.orchestrator.result_produced());
        assert!(f.orchestrator.submit_enabled());
    }

    #[tokio::test]
    async fn test_throttled_status_rejects_locally() {
        let service = MockTokenService::default();
        service.observer.set_status(TokenOperationStatus::Throttled);
        let f = fixture(service, RecordingDelegate::default(), true);

        assert!(!f.orchestrator.submit_enabled());
        let result = f.orchestrator.submit(&input(), None).await;
        assert!(matches!(result, CardFormResult::Failed(_)));
        assert_eq!(f.service.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_status_updates_drive_submit_button() {
        let f = fixture(MockTokenService::default(), RecordingDelegate::default(), true);

        f.service.observer.set_status(TokenOperationStatus::Running);
        f.service.observer.set_status(TokenOperationStatus::Acceptable);
        assert_eq!(*f.delegate.events.lock(), vec!["disable", "enable"]);
    }

    #[tokio::test]
    async fn test_tenant_argument_takes_precedence() {
        let service = MockTokenService::default();
        service.create.lock().push_back(Err(ApiError::RateLimitExceeded));
        service.create.lock().push_back(Err(ApiError::RateLimitExceeded));
        let f = fixture(service, RecordingDelegate::default(), true);
        let with_tenant = input().with_tenant_id("ten_form");

        f.orchestrator.submit(&with_tenant, Some("ten_arg")).await;
        f.orchestrator.submit(&with_tenant, None).await;
        assert_eq!(
            *f.service.tenants.lock(),
            vec![Some("ten_arg".to_string()), Some("ten_form".to_string())]
        );
    }

    #[tokio::test]
    async fn test_fetch_brands_applies_to_validation() {
        let service = MockTokenService::default();
        *service.brands.lock() = Some(Ok(vec![CardBrand::Jcb]));
        let f = fixture(service, RecordingDelegate::default(), true);

        let brands = f.orchestrator.fetch_brands(None).await.unwrap();
        assert_eq!(brands, vec![CardBrand::Jcb]);
        assert!(f.delegate.events.lock().contains(&"brands:1".to_string()));

        let result = f.orchestrator.submit(&input(), None).await;
        assert_eq!(
            result,
            CardFormResult::Failed(FormError::CardNumberInvalidBrand.to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_brands_retry_only_for_transport_errors() {
        let service = MockTokenService::default();
        *service.brands.lock() = Some(Err(ApiError::SystemError("offline".to_string())));
        let f = fixture(service, RecordingDelegate::default(), true);
        assert!(f.orchestrator.fetch_brands(None).await.is_err());

        *f.service.brands.lock() = Some(Err(ApiError::InvalidResponse(Some(500))));
        assert!(f.orchestrator.fetch_brands(None).await.is_err());

        let events = f.delegate.events.lock();
        assert!(events.contains(&"error_view:false".to_string()));
        assert!(events.contains(&"error_view:true".to_string()));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let f = fixture(MockTokenService::default(), RecordingDelegate::default(), true);
        assert_eq!(f.service.observer.observer_count(), 1);
        drop(f.orchestrator);
        assert_eq!(f.service.observer.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_delegate_is_not_called() {
        let service = MockTokenService::default();
        service.create.lock().push_back(Ok(token("tok_1", None)));
        let f = fixture(service, RecordingDelegate::default(), true);
        let orchestrator = Arc::clone(&f.orchestrator);
        drop(f.delegate);

        let result = orchestrator.submit(&input(), None).await;
        assert!(matches!(result, CardFormResult::Success(_)));
    }
}
