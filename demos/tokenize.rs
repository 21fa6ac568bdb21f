//! Example card tokenization.
//!
//! Submits a test card through the orchestrator. When the issuer requires
//! 3-D Secure, the verification URL is printed; open it in a browser, then
//! paste the URL you were redirected to (or type `cancel`).
//!
//! Run with:
//! ```bash
//! cargo run --example tokenize
//! ```
//!
//! Environment variables (a `.env` file is read if present):
//! - PAYJP_PUBLIC_KEY: your public key (`pk_test_...`)
//! - PAYJP_API_BASE: API endpoint override
//! - PAYJP_TDS_REDIRECT_URL / PAYJP_TDS_REDIRECT_KEY: registered 3-D Secure redirect
//! - CARD_NUMBER: card to tokenize (defaults to a Visa test card)

use async_trait::async_trait;
use payjp_rs::{
    CardFormInput, CardFormResult, CardFormScreenDelegate, CardFormValidator, FormError,
    PayjpClient, PayjpConfig, ThreeDSecureProcessHandler, Token, TokenizationOrchestrator,
    WebDriver,
};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

struct ConsoleDriver;

impl WebDriver for ConsoleDriver {
    fn present(&self, url: &Url) {
        println!("🔐 Open this URL to verify the card:\n   {}", url);
        println!("   Paste the redirect URL here, or type `cancel`:");
    }

    fn dismiss(&self) -> bool {
        println!("✅ Verification page closed");
        true
    }
}

struct ConsoleForm;

#[async_trait]
impl CardFormScreenDelegate for ConsoleForm {
    fn show_error_alert(&self, message: &str) {
        eprintln!("❌ {}", message);
    }

    fn show_field_errors(&self, errors: &[FormError]) {
        for error in errors {
            eprintln!("   - {}", error);
        }
    }

    async fn did_produce(&self, token: &Token) -> Result<(), String> {
        println!("📦 Token {} would now be sent to your backend", token.id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let config = PayjpConfig::from_env()?;
    let card_number =
        std::env::var("CARD_NUMBER").unwrap_or_else(|_| "4242424242424242".to_string());

    println!("💳 payjp-rs Example");
    println!("   API: {}", config.base_url);
    println!();

    let redirect = config.three_d_secure.clone();
    let validator = CardFormValidator::new().with_accepted_brands(config.accepted_brands.clone());
    let client = Arc::new(PayjpClient::new(config));
    let handler = Arc::new(ThreeDSecureProcessHandler::new(Arc::new(ConsoleDriver), redirect));

    let form = Arc::new(ConsoleForm);
    let delegate: Weak<dyn CardFormScreenDelegate> = Arc::downgrade(&form) as Weak<dyn CardFormScreenDelegate>;
    let orchestrator =
        TokenizationOrchestrator::new(client, Arc::clone(&handler), validator, delegate);

    // Feed redirect URLs typed on stdin to the verification handler.
    let stdin_handler = Arc::clone(&handler);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.eq_ignore_ascii_case("cancel") {
                stdin_handler.web_browser_did_finish();
            } else if !stdin_handler.complete_verification(line) {
                println!("⚠️  Not a redirect for this verification: {}", line);
            }
        }
    });

    let input = CardFormInput::new(card_number, "12", "2030", "123", "TARO YAMADA");
    println!("📡 Creating token...");

    match orchestrator.submit(&input, None).await {
        CardFormResult::Success(token) => {
            println!("✅ Token created: {}", token.id);
            println!("{}", serde_json::to_string_pretty(&token)?);
        }
        CardFormResult::Cancelled => println!("↩️  Verification canceled"),
        CardFormResult::Failed(message) => {
            eprintln!("❌ Error: {}", message);
            return Err(message.into());
        }
    }

    Ok(())
}
