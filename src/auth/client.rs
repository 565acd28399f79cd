use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::pkce::PkcePair;
use super::AuthError;
use crate::config::IdentityProvider;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Token response from the identity provider, kept as-is.
///
/// Only the presence of a credential gates the chat; the two accessors exist
/// for the explicit refresh and sign-out actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(Value);

impl Credential {
    pub fn from_token_response(value: Value) -> Result<Self, AuthError> {
        match value.get("access_token").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => Ok(Self(value)),
            _ => Err(AuthError::MissingAccessToken),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.0.get("access_token").and_then(Value::as_str)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.0.get("refresh_token").and_then(Value::as_str)
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }

    /// Fold a refresh response into this credential. Providers that do not
    /// rotate refresh tokens omit it from the response, so old fields survive
    /// unless overwritten.
    fn merged_with(&self, refreshed: Value) -> Result<Self, AuthError> {
        let refreshed = Self::from_token_response(refreshed)?;
        let mut merged = self.0.clone();
        if let (Some(base), Value::Object(update)) = (merged.as_object_mut(), refreshed.0) {
            for (key, value) in update {
                base.insert(key, value);
            }
        }
        Ok(Self(merged))
    }
}

#[derive(Clone)]
pub struct OAuthClient {
    client: Client,
    provider: IdentityProvider,
}

impl OAuthClient {
    pub fn new(provider: IdentityProvider) -> Self {
        Self {
            client: Client::new(),
            provider,
        }
    }

    #[cfg(test)]
    fn with_http_client(client: Client, provider: IdentityProvider) -> Self {
        Self { client, provider }
    }

    pub fn provider(&self) -> &IdentityProvider {
        &self.provider
    }

    pub fn authorize_url(&self, pkce: &PkcePair, state: &str) -> Result<Url, AuthError> {
        let url = Url::parse_with_params(
            &self.provider.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.provider.client_id.as_str()),
                ("redirect_uri", self.provider.redirect_uri.as_str()),
                ("scope", self.provider.scope.as_str()),
                ("state", state),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", pkce.method()),
            ],
        )?;
        Ok(url)
    }

    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Credential, AuthError> {
        debug!("Exchanging authorization code at {}", self.provider.token_url);
        let body = self
            .post_form(
                &self.provider.token_url,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.provider.redirect_uri.as_str()),
                    ("client_id", self.provider.client_id.as_str()),
                    ("code_verifier", verifier),
                ],
            )
            .await?;

        let credential = Credential::from_token_response(serde_json::from_str(&body)?)?;
        info!("Authorization code exchanged for a token");
        Ok(credential)
    }

    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let refresh_token = credential.refresh_token().ok_or(AuthError::NoRefreshToken)?;
        let body = self
            .post_form(
                &self.provider.refresh_url,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", self.provider.client_id.as_str()),
                ],
            )
            .await?;

        let refreshed = credential.merged_with(serde_json::from_str(&body)?)?;
        info!("Access token refreshed");
        Ok(refreshed)
    }

    /// Revoke the longest-lived token the credential carries.
    pub async fn revoke(&self, credential: &Credential) -> Result<(), AuthError> {
        let (token, hint) = match (credential.refresh_token(), credential.access_token()) {
            (Some(refresh), _) => (refresh, "refresh_token"),
            (None, Some(access)) => (access, "access_token"),
            (None, None) => return Err(AuthError::MissingAccessToken),
        };

        self.post_form(
            &self.provider.revoke_url,
            &[
                ("token", token),
                ("token_type_hint", hint),
                ("client_id", self.provider.client_id.as_str()),
            ],
        )
        .await?;
        info!("Token revoked");
        Ok(())
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, AuthError> {
        let response = self
            .client
            .post(url)
            .form(form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
