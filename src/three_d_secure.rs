//! 3-D Secure verification flow.
//!
//! [`ThreeDSecureProcessHandler`] opens the issuer's verification page through a
//! [`WebDriver`], then waits for one of two signals:
//!
//! - the host app receives a URL that starts with the registered redirect and
//!   passes it to [`ThreeDSecureProcessHandler::complete_verification`]
//! - the user closes the surface, reported through
//!   [`ThreeDSecureProcessHandler::web_browser_did_finish`]
//!
//! The outcome is delivered exactly once over a oneshot channel.

use crate::config::ThreeDSecureUrlConfiguration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};
use url::Url;

/// Terminal outcome of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreeDSecureProcessStatus {
    /// The redirect URL was reached
    Completed,
    /// The user closed the verification surface
    Canceled,
}

/// Lifecycle of the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationState {
    /// Nothing presented yet
    #[default]
    Idle,
    /// The verification surface is being opened
    Presenting,
    /// Surface is open, waiting for the redirect or a dismissal
    AwaitingRedirect,
    /// Verification ended with the redirect
    Completed,
    /// Verification ended by the user
    Canceled,
}

/// Surface able to show a web page to the card holder.
pub trait WebDriver: Send + Sync {
    /// Opens `url`.
    fn present(&self, url: &Url);

    /// Closes the surface. Returns false when there was nothing to close.
    fn dismiss(&self) -> bool;
}

struct HandlerState {
    state: VerificationState,
    sender: Option<oneshot::Sender<ThreeDSecureProcessStatus>>,
}

/// Drives one verification at a time.
pub struct ThreeDSecureProcessHandler {
    driver: Arc<dyn WebDriver>,
    redirect: Option<ThreeDSecureUrlConfiguration>,
    inner: Mutex<HandlerState>,
}

impl ThreeDSecureProcessHandler {
    /// Creates a handler.
    ///
    /// Without a redirect configuration no URL is ever accepted as completion,
    /// so a verification can only end by cancellation.
    pub fn new(driver: Arc<dyn WebDriver>, redirect: Option<ThreeDSecureUrlConfiguration>) -> Self {
        Self {
            driver,
            redirect,
            inner: Mutex::new(HandlerState {
                state: VerificationState::Idle,
                sender: None,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> VerificationState {
        self.inner.lock().state
    }

    /// Presents `entry_url` and returns the receiver for the outcome.
    ///
    /// A verification still pending is abandoned; its receiver observes a closed
    /// channel, which [`ThreeDSecureProcessHandler::verify`] reports as canceled.
    pub fn start_verification(&self, entry_url: &Url) -> oneshot::Receiver<ThreeDSecureProcessStatus> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if inner.sender.take().is_some() {
                debug!("abandoning pending verification");
            }
            inner.sender = Some(tx);
            inner.state = VerificationState::Presenting;
        }

        info!(url = %entry_url, "presenting 3-D Secure verification");
        self.driver.present(entry_url);

        let mut inner = self.inner.lock();
        if inner.state == VerificationState::Presenting {
            inner.state = VerificationState::AwaitingRedirect;
        }
        rx
    }

    /// Presents `entry_url` and waits for the outcome.
    pub async fn verify(&self, entry_url: &Url) -> ThreeDSecureProcessStatus {
        self.start_verification(entry_url)
            .await
            .unwrap_or(ThreeDSecureProcessStatus::Canceled)
    }

    /// Offers a URL received by the host app.
    ///
    /// Returns true when the URL completed the pending verification. Any other
    /// URL, or a URL arriving with nothing pending, is left to the host app.
    pub fn complete_verification(&self, url: &str) -> bool {
        debug!(url, "3-D Secure redirect candidate");

        let Some(redirect) = &self.redirect else {
            return false;
        };
        if !url.starts_with(redirect.redirect_prefix()) {
            return false;
        }

        // Claim the completion first so a close reported while dismissing
        // cannot turn it into a cancellation.
        let (previous, sender) = {
            let mut inner = self.inner.lock();
            if !matches!(
                inner.state,
                VerificationState::Presenting | VerificationState::AwaitingRedirect
            ) {
                return false;
            }
            let previous = inner.state;
            inner.state = VerificationState::Completed;
            (previous, inner.sender.take())
        };

        if !self.driver.dismiss() {
            let mut inner = self.inner.lock();
            if inner.state == VerificationState::Completed && inner.sender.is_none() {
                inner.state = previous;
                inner.sender = sender;
            }
            return false;
        }

        if let Some(sender) = sender {
            let _ = sender.send(ThreeDSecureProcessStatus::Completed);
        }
        true
    }

    /// Reports that the user closed the verification surface.
    ///
    /// Ignored unless a verification is pending, including while a matching
    /// redirect is being completed.
    pub fn web_browser_did_finish(&self) {
        let sender = {
            let mut inner = self.inner.lock();
            if !matches!(
                inner.state,
                VerificationState::Presenting | VerificationState::AwaitingRedirect
            ) {
                return;
            }
            inner.state = VerificationState::Canceled;
            inner.sender.take()
        };

        info!("3-D Secure verification canceled");
        if let Some(sender) = sender {
            let _ = sender.send(ThreeDSecureProcessStatus::Canceled);
        }
    }
}
