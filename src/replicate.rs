use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::models::DecodingParams;
use crate::sse::SseParser;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Generated text, one fragment at a time. Finite and not restartable.
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationInput {
    pub prompt: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_length: u32,
    pub repetition_penalty: f64,
}

impl GenerationInput {
    pub fn new(prompt: String, params: &DecodingParams) -> Self {
        Self {
            prompt,
            temperature: params.temperature,
            top_p: params.top_p,
            max_length: params.max_length,
            repetition_penalty: DecodingParams::REPETITION_PENALTY,
        }
    }
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: &'a GenerationInput,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
    stream: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    urls: Option<PredictionUrls>,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
}

#[derive(Clone)]
pub struct ReplicateClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl ReplicateClient {
    pub fn new(base_url: &str, api_token: &str) -> Self {
        Self::with_http_client(Client::new(), base_url, api_token)
    }

    pub fn with_http_client(client: Client, base_url: &str, api_token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        }
    }

    /// Start a prediction for `model` (`owner/name:version`) and return its
    /// output as it is produced.
    pub async fn generate(&self, model: &str, input: &GenerationInput) -> Result<FragmentStream> {
        let version = model
            .rsplit_once(':')
            .map(|(_, version)| version)
            .ok_or_else(|| anyhow!("Model reference {} has no version", model))?;

        let url = format!("{}/v1/predictions", self.base_url);
        let request = PredictionRequest {
            version,
            input,
            stream: true,
        };

        debug!("Creating prediction for {} ({} prompt chars)", model, input.prompt.len());
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Replicate API error {}: {}", status, text));
        }

        let prediction: Prediction = response.json().await.context("Invalid prediction response")?;
        info!("Prediction {} created ({})", prediction.id, prediction.status);

        let urls = prediction.urls.ok_or_else(|| anyhow!("Prediction {} has no URLs", prediction.id))?;
        match (urls.stream, urls.get) {
            (Some(stream_url), _) => self.stream_output(&stream_url).await,
            (None, Some(get_url)) => self.poll_output(&get_url).await,
            (None, None) => Err(anyhow!("Prediction {} has neither a stream nor a get URL", prediction.id)),
        }
    }

    async fn stream_output(&self, stream_url: &str) -> Result<FragmentStream> {
        let response = self
            .client
            .get(stream_url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-store")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Replicate stream request failed: {}", response.status()));
        }

        Ok(sse_fragments(response.bytes_stream().boxed()))
    }

    /// For models without streaming support: wait for the prediction to settle
    /// and replay its output list.
    async fn poll_output(&self, get_url: &str) -> Result<FragmentStream> {
        loop {
            let response = self
                .client
                .get(get_url)
                .bearer_auth(&self.api_token)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(anyhow!("Replicate poll failed: {}", response.status()));
            }

            let prediction: Prediction = response.json().await.context("Invalid prediction response")?;
            match prediction.status.as_str() {
                "succeeded" => {
                    let fragments = output_fragments(prediction.output);
                    return Ok(stream::iter(fragments.into_iter().map(Ok)).boxed());
                }
                "failed" | "canceled" => {
                    return Err(anyhow!(
                        "Prediction {} {}: {}",
                        prediction.id,
                        prediction.status,
                        error_text(&prediction.error)
                    ));
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }
}

fn output_fragments(output: Value) -> Vec<String> {
    match output {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) => vec![s],
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Null => "unknown error".to_string(),
        other => other
            .get("detail")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// `done` carries `{"reason": "canceled"}` or `{"reason": "error"}` when the
/// prediction did not succeed; an empty object means it did.
fn done_reason(data: &str) -> Option<String> {
    serde_json::from_str::<Value>(data)
        .ok()?
        .get("reason")
        .and_then(Value::as_str)
        .filter(|reason| !reason.is_empty())
        .map(str::to_string)
}

struct SseState<S> {
    bytes: S,
    parser: SseParser,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn a Replicate event stream into output fragments: `output` events carry
/// text, `done` ends the stream and `error` fails it.
pub fn sse_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = SseState {
        bytes,
        parser: SseParser::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::try_unfold(state, next_fragment::<S, B, E>).boxed()
}

async fn next_fragment<S, B, E>(mut state: SseState<S>) -> Result<Option<(String, SseState<S>)>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    loop {
        if let Some(fragment) = state.pending.pop_front() {
            return Ok(Some((fragment, state)));
        }
        if state.finished {
            return Ok(None);
        }

        let events = match state.bytes.next().await {
            Some(chunk) => {
                let chunk = chunk.context("Replicate stream interrupted")?;
                state.parser.feed(chunk.as_ref())
            }
            None => {
                state.finished = true;
                state.parser.finish().into_iter().collect()
            }
        };

        for event in events {
            match event.event.as_str() {
                "output" => state.pending.push_back(event.data),
                "done" => {
                    if let Some(reason) = done_reason(&event.data) {
                        return Err(anyhow!("Prediction ended early: {}", reason));
                    }
                    state.finished = true;
                    break;
                }
                "error" => {
                    let detail = serde_json::from_str::<Value>(&event.data)
                        .map(|v| error_text(&v))
                        .unwrap_or(event.data);
                    return Err(anyhow!("Replicate reported an error: {}", detail));
                }
                _ => {}
            }
        }
    }
}
