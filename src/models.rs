//! UI-agnostic chat types
//!
//! Messages, the fixed model catalogue and the decoding parameters the sidebar
//! sliders edit. Nothing in here knows about the terminal.

use serde::{Deserialize, Serialize};

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    /// Label used when the history is replayed into the prompt
    pub fn label(&self) -> &'static str {
        match self {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlamaModel {
    #[default]
    Llama2_7B,
    Llama2_13B,
    Llama2_70B,
}

impl LlamaModel {
    pub fn all() -> Vec<LlamaModel> {
        vec![LlamaModel::Llama2_7B, LlamaModel::Llama2_13B, LlamaModel::Llama2_70B]
    }

    pub fn label(&self) -> &'static str {
        match self {
            LlamaModel::Llama2_7B => "Llama2-7B",
            LlamaModel::Llama2_13B => "Llama2-13B",
            LlamaModel::Llama2_70B => "Llama2-70B",
        }
    }

    /// Replicate model reference, `owner/name:version`
    pub fn identifier(&self) -> &'static str {
        match self {
            LlamaModel::Llama2_7B => "a16z-infra/llama7b-v2-chat:4f0a4744c7295c024a1de15e1a63c880d3da035fa1f49bfd344fe076074c8eea",
            LlamaModel::Llama2_13B => "a16z-infra/llama13b-v2-chat:df7690f1994d94e96ad9d568eac121aecf50684a0b0963b25a41cc40061269e5",
            LlamaModel::Llama2_70B => "replicate/llama70b-v2-chat:e951f18578850b652510200860fc4ea62b3b16fac280f83ff32282f87bbd2e48",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|m| m.label().eq_ignore_ascii_case(s))
    }

    pub fn next(&self) -> Self {
        match self {
            LlamaModel::Llama2_7B => LlamaModel::Llama2_13B,
            LlamaModel::Llama2_13B => LlamaModel::Llama2_70B,
            LlamaModel::Llama2_70B => LlamaModel::Llama2_7B,
        }
    }

    pub fn prev(&self) -> Self {
        match self {
            LlamaModel::Llama2_7B => LlamaModel::Llama2_70B,
            LlamaModel::Llama2_13B => LlamaModel::Llama2_7B,
            LlamaModel::Llama2_70B => LlamaModel::Llama2_13B,
        }
    }
}

pub const TEMPERATURE_RANGE: (f64, f64) = (0.01, 5.0);
pub const TOP_P_RANGE: (f64, f64) = (0.01, 1.0);
pub const MAX_LENGTH_RANGE: (u32, u32) = (64, 4096);

const PROBABILITY_STEP: f64 = 0.01;
const MAX_LENGTH_STEP: u32 = 8;

/// Sampling settings sent with every generation request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_length: u32,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.9,
            max_length: 512,
        }
    }
}

impl DecodingParams {
    /// Fixed; the sidebar does not expose it
    pub const REPETITION_PENALTY: f64 = 1.0;

    pub fn step_temperature(&mut self, steps: i32) {
        self.temperature = step_float(self.temperature, steps, TEMPERATURE_RANGE);
    }

    pub fn step_top_p(&mut self, steps: i32) {
        self.top_p = step_float(self.top_p, steps, TOP_P_RANGE);
    }

    pub fn step_max_length(&mut self, steps: i32) {
        let (min, max) = MAX_LENGTH_RANGE;
        let next = self.max_length as i64 + steps as i64 * MAX_LENGTH_STEP as i64;
        self.max_length = next.clamp(min as i64, max as i64) as u32;
    }
}

// Work in hundredths so repeated stepping never drifts off the 0.01 grid
fn step_float(value: f64, steps: i32, (min, max): (f64, f64)) -> f64 {
    let hundredths = (value / PROBABILITY_STEP).round() as i64 + steps as i64;
    let stepped = hundredths as f64 * PROBABILITY_STEP;
    (stepped.clamp(min, max) * 100.0).round() / 100.0
}
