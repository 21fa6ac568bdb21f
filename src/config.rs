//! SDK configuration.
//!
//! [`PayjpConfig`] carries the public key, the API endpoint, the registered
//! 3-D Secure redirect and the HTTP client shared by every request.

use crate::client_info::ClientInfo;
use crate::errors::ConfigError;
use crate::types::CardBrand;
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use url::Url;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.pay.jp/v1/";

/// Default time a throttled status is kept before it is reset.
pub const DEFAULT_THROTTLE_COOLDOWN: Duration = Duration::from_secs(10);

/// Redirect registered for 3-D Secure completion.
///
/// The verification page navigates to `redirect_url` when the challenge ends;
/// `redirect_url_key` is the name it was registered under on the dashboard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreeDSecureUrlConfiguration {
    /// Parsed redirect; matching uses [`ThreeDSecureUrlConfiguration::redirect_prefix`]
    pub redirect_url: Url,

    /// Registered key, sent as `back` when opening the verification page
    pub redirect_url_key: String,

    registered: String,
}

impl ThreeDSecureUrlConfiguration {
    /// Creates a redirect configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use payjp_rs::config::ThreeDSecureUrlConfiguration;
    ///
    /// let tds = ThreeDSecureUrlConfiguration::new("myapp://tds/finish", "myapp").unwrap();
    /// assert_eq!(tds.redirect_url_key, "myapp");
    /// ```
    pub fn new(
        redirect_url: &str,
        redirect_url_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            redirect_url: Url::parse(redirect_url)?,
            redirect_url_key: redirect_url_key.into(),
            registered: redirect_url.to_string(),
        })
    }

    /// The redirect exactly as registered, unnormalized.
    ///
    /// Completion URLs are matched against this prefix.
    pub fn redirect_prefix(&self) -> &str {
        &self.registered
    }
}

/// Configuration for the tokenization client.
#[derive(Clone, Debug)]
pub struct PayjpConfig {
    /// Public key (`pk_test_...` / `pk_live_...`)
    pub public_key: String,

    /// API base URL, always ending with `/`
    pub base_url: Url,

    /// Value of the `Locale` header, if any
    pub locale: Option<String>,

    /// HTTP client; must not follow redirects
    pub http_client: Client,

    /// Registered 3-D Secure redirect
    pub three_d_secure: Option<ThreeDSecureUrlConfiguration>,

    /// Client identification headers
    pub client_info: ClientInfo,

    /// Automatic reset delay after a 429; `None` waits for a manual reset
    pub throttle_cooldown: Option<Duration>,

    /// Brands accepted by the card form until the server says otherwise
    pub accepted_brands: Vec<CardBrand>,
}

impl PayjpConfig {
    /// Creates a new configuration for a public key.
    ///
    /// # Examples
    ///
    /// ```
    /// use payjp_rs::config::PayjpConfig;
    ///
    /// let config = PayjpConfig::new("pk_test_0383a1b8f91e8a6e3ea0e2a9").unwrap();
    /// assert_eq!(config.base_url.as_str(), "https://api.pay.jp/v1/");
    /// ```
    pub fn new(public_key: impl Into<String>) -> Result<Self, ConfigError> {
        let public_key = public_key.into();
        if public_key.trim().is_empty() {
            return Err(ConfigError::MissingPublicKey);
        }

        Ok(Self {
            public_key,
            base_url: Url::parse(DEFAULT_BASE_URL)?,
            locale: None,
            http_client: default_http_client()?,
            three_d_secure: None,
            client_info: ClientInfo::default(),
            throttle_cooldown: Some(DEFAULT_THROTTLE_COOLDOWN),
            accepted_brands: CardBrand::ALL.to_vec(),
        })
    }

    /// Loads configuration from the environment.
    ///
    /// Reads `PAYJP_PUBLIC_KEY` (required), `PAYJP_API_BASE`,
    /// `PAYJP_TDS_REDIRECT_URL` and `PAYJP_TDS_REDIRECT_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let public_key =
            std::env::var("PAYJP_PUBLIC_KEY").map_err(|_| ConfigError::MissingPublicKey)?;
        let mut config = Self::new(public_key)?;

        if let Ok(base) = std::env::var("PAYJP_API_BASE") {
            config = config.with_base_url(&base)?;
        }

        if let Ok(redirect_url) = std::env::var("PAYJP_TDS_REDIRECT_URL") {
            let key = std::env::var("PAYJP_TDS_REDIRECT_KEY").unwrap_or_default();
            config = config
                .with_three_d_secure_url_configuration(ThreeDSecureUrlConfiguration::new(
                    &redirect_url,
                    key,
                )?);
        }

        Ok(config)
    }

    /// Sets the API base URL. A trailing slash is added when missing.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        self.base_url = Url::parse(&normalized)?;
        Ok(self)
    }

    /// Sets the `Locale` header.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Sets a custom HTTP client.
    ///
    /// The client must be built with `redirect(Policy::none())`, otherwise the
    /// 3-D Secure step-up response is followed instead of reported.
    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// Registers the 3-D Secure redirect.
    pub fn with_three_d_secure_url_configuration(
        mut self,
        configuration: ThreeDSecureUrlConfiguration,
    ) -> Self {
        self.three_d_secure = Some(configuration);
        self
    }

    /// Sets the client identification.
    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    /// Sets the throttle cool-down. `None` disables the automatic reset.
    pub fn with_throttle_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.throttle_cooldown = cooldown;
        self
    }

    /// Sets the initially accepted brands.
    pub fn with_accepted_brands(mut self, brands: Vec<CardBrand>) -> Self {
        self.accepted_brands = brands;
        self
    }

    /// Redirect key of the registered 3-D Secure redirect, if any.
    pub fn redirect_url_key(&self) -> Option<&str> {
        self.three_d_secure
            .as_ref()
            .map(|tds| tds.redirect_url_key.as_str())
    }
}

fn default_http_client() -> Result<Client, ConfigError> {
    Ok(Client::builder()
        .redirect(Policy::none())
        .timeout(Duration::from_secs(30))
        .build()?)
}
