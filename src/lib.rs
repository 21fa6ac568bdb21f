//! # payjp-rs
//!
//! Card tokenization for PAY.JP: validate card input, exchange it for a
//! single-use token, and run the 3-D Secure step-up when the issuer asks for it.
//!
//! Raw card data only ever travels to the tokenization endpoint. What the
//! application receives and forwards to its own backend is a [`types::Token`].
//!
//! ## Features
//!
//! - **Validation**: per-field card form rules with deferred or instant error display
//! - **Tokenization client**: reqwest-based client with 3-D Secure and rate-limit handling
//! - **Operation status**: a shared `acceptable` / `running` / `throttled` gate for submit controls
//! - **3-D Secure**: verification flow driven through any [`three_d_secure::WebDriver`]
//! - **Orchestration**: one call per form submit, exactly one result
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use payjp_rs::client::{PayjpClient, TokenService};
//! use payjp_rs::config::PayjpConfig;
//! use payjp_rs::validation::CardFormInput;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PayjpConfig::new("pk_test_0383a1b8f91e8a6e3ea0e2a9")?;
//! let client = PayjpClient::new(config);
//!
//! let input = CardFormInput::new("4242424242424242", "12", "2030", "123", "TARO YAMADA");
//! let token = client.create_token(&input, None).await?;
//! println!("token: {}", token.id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Tokenization Flow
//!
//! 1. **Validate**: the form is checked locally; nothing is sent while it is invalid
//! 2. **Create token**: `POST /tokens` with the card fields
//! 3. **Step-up**: a `303` response carries a `tds_...` id; the verification page is opened
//! 4. **Redirect**: the app hands the redirect URL back, closing the page
//! 5. **Finish**: the token is created from the verified `tds_...` id
//!
//! A token whose card comes back `unverified` goes through the same verification and is
//! finished with `POST /tokens/{id}/tds_finish`.
//!
//! ## Rate Limiting
//!
//! A `429` leaves the shared status `throttled`. Further submissions are refused
//! locally until the configured cool-down elapses or the status is reset.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod client_info;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod status;
pub mod three_d_secure;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export commonly used items
pub use client::{PayjpClient, TokenService};
pub use config::{PayjpConfig, ThreeDSecureUrlConfiguration};
pub use errors::{ApiError, ConfigError, Result};
pub use orchestrator::{CardFormResult, CardFormScreenDelegate, TokenizationOrchestrator};
pub use status::{TokenOperationObserver, TokenOperationObserverType};
pub use three_d_secure::{ThreeDSecureProcessHandler, ThreeDSecureProcessStatus, WebDriver};
pub use types::{Card, CardBrand, ThreeDSecureStatus, ThreeDSecureToken, Token, TokenOperationStatus};
pub use validation::{CardFormInput, CardFormValidator, FormError};
