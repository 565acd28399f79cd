//! Replicate API token handling.
//!
//! The token either comes from the secrets store (env var or secrets file), in
//! which case it is trusted as-is, or is typed into the sidebar prompt, in
//! which case it has to look like a Replicate token before chat input unlocks.
//! The check is a shape check only; Replicate is the one that accepts or
//! rejects the token.

use thiserror::Error;

const TOKEN_PREFIX: &str = "r8_";
const TOKEN_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("no API token entered")]
    Empty,
    #[error("API token must start with r8_")]
    MissingPrefix,
    #[error("API token must be 40 characters, got {0}")]
    WrongLength(usize),
}

/// Check that `token` has the shape of a Replicate API token.
pub fn check_format(token: &str) -> Result<(), CredentialError> {
    if token.is_empty() {
        return Err(CredentialError::Empty);
    }
    if !token.starts_with(TOKEN_PREFIX) {
        return Err(CredentialError::MissingPrefix);
    }
    let len = token.chars().count();
    if len != TOKEN_LEN {
        return Err(CredentialError::WrongLength(len));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// `REPLICATE_API_TOKEN` or the secrets file
    Secrets,
    /// Typed into the sidebar for this run only
    Entered,
}

#[derive(Debug, Clone)]
pub struct ApiToken {
    value: String,
    source: TokenSource,
}

impl ApiToken {
    pub fn from_secrets(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: TokenSource::Secrets,
        }
    }

    pub fn entered(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: TokenSource::Entered,
        }
    }

    pub fn source(&self) -> TokenSource {
        self.source
    }

    /// The token, if chat may use it
    pub fn usable(&self) -> Result<&str, CredentialError> {
        match self.source {
            TokenSource::Secrets => Ok(&self.value),
            TokenSource::Entered => check_format(&self.value).map(|_| self.value.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_formed() -> String {
        format!("r8_{}", "a".repeat(37))
    }

    #[test]
    fn test_well_formed_token_passes() {
        assert_eq!(check_format(&well_formed()), Ok(()));
    }

    #[test]
    fn test_rejects_missing_prefix() {
        let token = format!("r9_{}", "a".repeat(37));
        assert_eq!(check_format(&token), Err(CredentialError::MissingPrefix));
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert_eq!(check_format("r8_short"), Err(CredentialError::WrongLength(8)));
        let long = format!("{}x", well_formed());
        assert_eq!(check_format(&long), Err(CredentialError::WrongLength(41)));
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(check_format(""), Err(CredentialError::Empty));
    }

    #[test]
    fn test_entered_token_is_gated_on_format() {
        assert!(ApiToken::entered("r8_nope").usable().is_err());
        assert_eq!(ApiToken::entered(well_formed()).usable(), Ok(well_formed().as_str()));
    }

    #[test]
    fn test_secrets_token_is_trusted() {
        let token = ApiToken::from_secrets("legacy-token");
        assert_eq!(token.source(), TokenSource::Secrets);
        assert_eq!(token.usable(), Ok("legacy-token"));
    }
}
