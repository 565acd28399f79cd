//! Sign-in gate: OAuth2 authorization code flow with PKCE against the
//! configured identity provider, using a loopback redirect.

pub mod callback;
pub mod client;
pub mod pkce;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

pub use callback::CallbackListener;
pub use client::{Credential, OAuthClient};
pub use pkce::PkcePair;

use crate::tui::AppEvent;

/// How long the user has to finish the consent screen
const CONSENT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity provider returned an error: {0}")]
    Denied(String),
    #[error("redirect state did not match the request")]
    StateMismatch,
    #[error("timed out waiting for the browser redirect")]
    TimedOut,
    #[error("token endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("token response has no access_token")]
    MissingAccessToken,
    #[error("credential has no refresh_token")]
    NoRefreshToken,
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid token response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

/// Run one full sign-in attempt, reporting progress as app events tagged
/// with `attempt`.
///
/// Sends `AuthUrl` once the listener is up and the browser has been asked to
/// open the consent page, then exactly one `AuthFinished`.
pub async fn sign_in(client: OAuthClient, attempt: u64, events: UnboundedSender<AppEvent>) {
    let result = authorize(&client, attempt, &events).await;
    if let Err(e) = &result {
        warn!("Sign-in did not complete: {}", e);
    }
    let _ = events.send(AppEvent::AuthFinished(attempt, result));
}

async fn authorize(
    client: &OAuthClient,
    attempt: u64,
    events: &UnboundedSender<AppEvent>,
) -> Result<Credential, AuthError> {
    let pkce = PkcePair::generate();
    let state = pkce::random_state();

    let listener = CallbackListener::bind(&client.provider().redirect_uri).await?;
    let url = client.authorize_url(&pkce, &state)?;

    info!("Opening browser for sign-in, redirect expected on {}", listener.local_addr()?);
    if let Err(e) = open::that_detached(url.as_str()) {
        warn!("Could not open a browser: {}", e);
    }
    let _ = events.send(AppEvent::AuthUrl(attempt, url.to_string()));

    let code = listener.wait_for_code(&state, CONSENT_TIMEOUT).await?;
    info!("Received authorization code");

    client.exchange_code(&code, &pkce.verifier).await
}
