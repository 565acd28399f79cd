//! Per-run conversation state.

use crate::auth::Credential;
use crate::models::{ChatMessage, DecodingParams, LlamaModel};

/// Seeded assistant message; the history always starts with it
pub const GREETING: &str = "How may I assist you today?";

#[derive(Debug, Clone)]
pub struct Session {
    credential: Option<Credential>,
    messages: Vec<ChatMessage>,
    pub model: LlamaModel,
    pub params: DecodingParams,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            credential: None,
            messages: vec![ChatMessage::assistant(GREETING)],
            model: LlamaModel::default(),
            params: DecodingParams::default(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// Back to the lone greeting. The credential, model and sliders stay.
    pub fn clear_history(&mut self) {
        self.messages.clear();
        self.messages.push(ChatMessage::assistant(GREETING));
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn set_credential(&mut self, credential: Credential) {
        self.credential = Some(credential);
    }

    pub fn take_credential(&mut self) -> Option<Credential> {
        self.credential.take()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }
}
