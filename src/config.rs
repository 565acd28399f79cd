use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8501";
pub const DEFAULT_REPLICATE_URL: &str = "https://api.replicate.com";
pub const DEFAULT_SCOPE: &str = "openid email profile descope.claims descope.custom_claims";

const APP_DIR: &str = "ask-llama";

/// Contents of the secrets file. Read-only: nothing typed into the UI is
/// written back.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Secrets {
    pub replicate_api_token: Option<String>,
}

impl Secrets {
    /// Load from `path`, or the default location when `None`. A missing file
    /// is an empty secrets store.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read secrets file {}", path.display()))?;
        let secrets: Secrets = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse secrets file {}", path.display()))?;
        Ok(secrets)
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join(APP_DIR).join("secrets.json"))
    }
}

pub fn default_log_path() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| anyhow!("Could not determine cache directory"))?;

    Ok(cache_dir.join(APP_DIR).join("ask-llama.log"))
}

/// Everything needed to talk to the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProvider {
    pub client_id: String,
    pub authorize_url: String,
    pub token_url: String,
    pub refresh_url: String,
    pub revoke_url: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl IdentityProvider {
    /// Descope endpoints for `domain` (bare host, e.g. `api.descope.com`)
    pub fn descope(client_id: &str, domain: &str, redirect_uri: &str) -> Result<Self> {
        let client_id = client_id.trim();
        let domain = domain
            .trim()
            .trim_start_matches("https://")
            .trim_end_matches('/');

        if client_id.is_empty() {
            bail!("CLIENT_ID is not set");
        }
        if domain.is_empty() {
            bail!("DESCOPE_DOMAIN is not set");
        }

        let token_url = format!("https://{}/oauth2/v1/token", domain);
        Ok(Self {
            client_id: client_id.to_string(),
            authorize_url: format!("https://{}/oauth2/v1/authorize", domain),
            refresh_url: token_url.clone(),
            token_url,
            revoke_url: format!("https://{}/v1/oauth2/revoke", domain),
            redirect_uri: redirect_uri.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
        })
    }
}

/// Start-up configuration, built once in `main` and handed to the app
#[derive(Debug, Clone)]
pub struct Settings {
    pub identity: IdentityProvider,
    pub replicate_url: String,
    /// Token from `REPLICATE_API_TOKEN` or the secrets file
    pub replicate_api_token: Option<String>,
}

impl Settings {
    pub fn new(
        identity: IdentityProvider,
        replicate_url: &str,
        env_token: Option<String>,
        secrets: Secrets,
    ) -> Self {
        let non_blank = |t: String| Some(t.trim().to_string()).filter(|t| !t.is_empty());
        let replicate_api_token = env_token
            .and_then(non_blank)
            .or_else(|| secrets.replicate_api_token.and_then(non_blank));

        Self {
            identity,
            replicate_url: replicate_url.trim_end_matches('/').to_string(),
            replicate_api_token,
        }
    }
}
