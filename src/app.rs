use anyhow::Result;
use futures_util::StreamExt;
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api_token::{ApiToken, CredentialError, TokenSource};
use crate::auth::{self, AuthError, Credential, OAuthClient};
use crate::config::Settings;
use crate::models::LlamaModel;
use crate::prompt::build_prompt;
use crate::replicate::{GenerationInput, ReplicateClient};
use crate::session::Session;
use crate::tui::AppEvent;

/// Where the user is in the sign-in flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    /// Waiting for the browser redirect. `url` is known once the listener is up.
    Authorizing { url: Option<String> },
    Chatting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Sidebar,
    Transcript,
    Input,
}

/// Rows of the settings sidebar, top to bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarItem {
    ApiToken,
    Model,
    Temperature,
    TopP,
    MaxLength,
    ClearHistory,
}

impl SidebarItem {
    pub fn all() -> [SidebarItem; 6] {
        [
            SidebarItem::ApiToken,
            SidebarItem::Model,
            SidebarItem::Temperature,
            SidebarItem::TopP,
            SidebarItem::MaxLength,
            SidebarItem::ClearHistory,
        ]
    }
}

/// Sidebar notice under the API token row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenNotice {
    Provided,
    Missing,
    Accepted,
}

impl TokenNotice {
    pub fn message(&self) -> &'static str {
        match self {
            TokenNotice::Provided => "API key already provided!",
            TokenNotice::Missing => "Please enter your credentials!",
            TokenNotice::Accepted => "Proceed to entering your prompt message!",
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, TokenNotice::Missing)
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub phase: Phase,
    pub input_mode: InputMode,
    pub focus: FocusPane,
    pub session: Session,

    // Sidebar
    pub sidebar_state: ListState,
    pub api_token: Option<ApiToken>,

    // API key input popup
    pub show_api_key_input: bool,
    pub api_key_input: String,
    pub api_key_input_cursor: usize,

    pub show_token_panel: bool,

    // Prompt input
    pub prompt_input: String,
    pub prompt_cursor: usize,

    // In-flight response; `Some` while a generation is streaming
    pub pending: Option<String>,
    pub generation_task: Option<JoinHandle<()>>,
    pub auth_task: Option<JoinHandle<()>>,
    /// Bumped per sign-in; events from older attempts are dropped
    pub auth_attempt: u64,
    /// One-line message under the transcript (errors, refused actions)
    pub status: Option<String>,

    // Transcript scroll
    pub transcript_scroll: u16,
    pub transcript_height: u16,
    pub transcript_width: u16,

    // Animation state
    pub animation_frame: u8,

    // Panel areas for mouse hit-testing (updated during render)
    pub sidebar_area: Option<Rect>,
    pub transcript_area: Option<Rect>,

    pub settings: Settings,
    oauth: OAuthClient,
    events: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(settings: Settings, events: UnboundedSender<AppEvent>) -> Self {
        let api_token = settings
            .replicate_api_token
            .as_deref()
            .map(ApiToken::from_secrets);
        let oauth = OAuthClient::new(settings.identity.clone());

        let mut sidebar_state = ListState::default();
        sidebar_state.select(Some(0));

        Self {
            should_quit: false,
            phase: Phase::Unauthenticated,
            input_mode: InputMode::Normal,
            focus: FocusPane::Input,
            session: Session::new(),

            sidebar_state,
            api_token,

            show_api_key_input: false,
            api_key_input: String::new(),
            api_key_input_cursor: 0,

            show_token_panel: false,

            prompt_input: String::new(),
            prompt_cursor: 0,

            pending: None,
            generation_task: None,
            auth_task: None,
            auth_attempt: 0,
            status: None,

            transcript_scroll: 0,
            transcript_height: 0,
            transcript_width: 0,

            animation_frame: 0,

            sidebar_area: None,
            transcript_area: None,

            settings,
            oauth,
            events,
        }
    }

    // Sign-in

    pub fn start_sign_in(&mut self) {
        if self.phase != Phase::Unauthenticated {
            return;
        }
        info!("Starting sign-in");
        self.phase = Phase::Authorizing { url: None };
        self.auth_attempt += 1;
        self.auth_task = Some(tokio::spawn(auth::sign_in(
            self.oauth.clone(),
            self.auth_attempt,
            self.events.clone(),
        )));
    }

    /// Abort a sign-in in progress. Dropping the task closes the loopback
    /// listener.
    pub fn cancel_sign_in(&mut self) {
        if let Some(task) = self.auth_task.take() {
            task.abort();
        }
        if matches!(self.phase, Phase::Authorizing { .. }) {
            info!("Sign-in cancelled");
            self.phase = Phase::Unauthenticated;
        }
    }

    pub fn on_auth_url(&mut self, attempt: u64, url: String) {
        if attempt != self.auth_attempt {
            return;
        }
        if let Phase::Authorizing { url: slot } = &mut self.phase {
            *slot = Some(url);
        }
    }

    pub fn on_auth_finished(&mut self, attempt: u64, result: Result<Credential, AuthError>) {
        if attempt != self.auth_attempt {
            debug!("Ignoring result of sign-in attempt {}", attempt);
            return;
        }
        self.auth_task = None;
        if !matches!(self.phase, Phase::Authorizing { .. }) {
            return;
        }
        match result {
            Ok(credential) => {
                info!("Signed in");
                self.session.set_credential(credential);
                self.phase = Phase::Chatting;
                self.focus = FocusPane::Input;
            }
            // Already logged by the sign-in task; the gate just reappears
            Err(_) => self.phase = Phase::Unauthenticated,
        }
    }

    pub fn refresh_credential(&mut self) {
        let Some(credential) = self.session.credential().cloned() else {
            return;
        };
        if credential.refresh_token().is_none() {
            self.status = Some("Session has no refresh token".to_string());
            return;
        }

        self.status = Some("Refreshing session...".to_string());
        let oauth = self.oauth.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = oauth.refresh(&credential).await;
            let _ = events.send(AppEvent::CredentialRefreshed(result));
        });
    }

    pub fn on_credential_refreshed(&mut self, result: Result<Credential, AuthError>) {
        match result {
            Ok(credential) => {
                info!("Session refreshed");
                if self.session.is_authenticated() {
                    self.session.set_credential(credential);
                    self.status = Some("Session refreshed".to_string());
                }
            }
            Err(e) => {
                warn!("Refresh failed: {}", e);
                self.status = Some(format!("Refresh failed: {}", e));
            }
        }
    }

    /// Drop the credential and go back to the sign-in screen. Revocation at
    /// the provider runs in the background; chat history is untouched.
    pub fn sign_out(&mut self) {
        let Some(credential) = self.session.take_credential() else {
            return;
        };
        info!("Signing out");
        self.phase = Phase::Unauthenticated;
        self.input_mode = InputMode::Normal;
        self.show_token_panel = false;
        self.show_api_key_input = false;

        let oauth = self.oauth.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = oauth.revoke(&credential).await;
            let _ = events.send(AppEvent::SignedOut(result));
        });
    }

    pub fn on_signed_out(&mut self, result: Result<(), AuthError>) {
        if let Err(e) = result {
            warn!("Token revocation failed: {}", e);
        }
    }

    // API token

    pub fn usable_token(&self) -> Result<&str, CredentialError> {
        match &self.api_token {
            Some(token) => token.usable(),
            None => Err(CredentialError::Empty),
        }
    }

    pub fn token_notice(&self) -> TokenNotice {
        match &self.api_token {
            Some(token) if token.source() == TokenSource::Secrets => TokenNotice::Provided,
            Some(token) if token.usable().is_ok() => TokenNotice::Accepted,
            _ => TokenNotice::Missing,
        }
    }

    /// Secrets-provided tokens are fixed; the prompt only opens otherwise.
    pub fn open_api_key_input(&mut self) {
        if matches!(&self.api_token, Some(t) if t.source() == TokenSource::Secrets) {
            return;
        }
        self.show_api_key_input = true;
        self.api_key_input.clear();
        self.api_key_input_cursor = 0;
    }

    pub fn submit_api_key(&mut self) {
        let entered = std::mem::take(&mut self.api_key_input);
        self.api_key_input_cursor = 0;
        self.show_api_key_input = false;
        if entered.is_empty() {
            return;
        }
        let token = ApiToken::entered(entered);
        if let Err(e) = token.usable() {
            warn!("Entered API token rejected: {}", e);
        }
        self.api_token = Some(token);
    }

    // Chat

    pub fn is_generating(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the prompt line accepts input
    pub fn input_enabled(&self) -> bool {
        self.phase == Phase::Chatting && self.usable_token().is_ok() && !self.is_generating()
    }

    /// Send the prompt line. Returns `false` when nothing was sent.
    pub fn submit_prompt(&mut self) -> bool {
        if !self.input_enabled() || self.prompt_input.trim().is_empty() {
            return false;
        }
        let token = match self.usable_token() {
            Ok(token) => token.to_string(),
            Err(_) => return false,
        };

        let text = std::mem::take(&mut self.prompt_input);
        self.prompt_cursor = 0;

        // History as it stood before this turn
        let prompt = build_prompt(self.session.messages(), &text);
        self.session.push_user(text);

        let model = self.session.model.identifier();
        let input = GenerationInput::new(prompt, &self.session.params);
        let client = ReplicateClient::new(&self.settings.replicate_url, &token);
        let events = self.events.clone();

        info!("Submitting prompt to {}", self.session.model.label());
        self.pending = Some(String::new());
        self.status = None;
        self.generation_task = Some(tokio::spawn(run_generation(client, model, input, events)));
        self.scroll_transcript_to_bottom();
        true
    }

    pub fn on_fragment(&mut self, fragment: String) {
        if let Some(pending) = &mut self.pending {
            pending.push_str(&fragment);
            self.scroll_transcript_to_bottom();
        }
    }

    pub fn on_response_finished(&mut self) {
        self.generation_task = None;
        if let Some(text) = self.pending.take() {
            self.session.push_assistant(text);
            self.scroll_transcript_to_bottom();
        }
    }

    /// The partial text is dropped; only the error remains visible.
    pub fn on_response_failed(&mut self, message: String) {
        self.generation_task = None;
        self.pending = None;
        self.status = Some(format!("Error: {}", message));
    }

    /// Reset the conversation. Refused while a response is streaming.
    pub fn clear_history(&mut self) -> bool {
        if self.is_generating() {
            self.status = Some("Wait for the response to finish before clearing".to_string());
            return false;
        }
        self.session.clear_history();
        self.transcript_scroll = 0;
        self.status = None;
        true
    }

    pub fn select_model(&mut self, model: LlamaModel) {
        self.session.model = model;
    }

    // Sidebar

    pub fn selected_sidebar_item(&self) -> Option<SidebarItem> {
        self.sidebar_state
            .selected()
            .and_then(|i| SidebarItem::all().get(i).copied())
    }

    pub fn sidebar_nav_down(&mut self) {
        let len = SidebarItem::all().len();
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn sidebar_nav_up(&mut self) {
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some(i.saturating_sub(1)));
    }

    /// Move the selected slider or model choice by `steps`.
    pub fn adjust_selected(&mut self, steps: i32) {
        match self.selected_sidebar_item() {
            Some(SidebarItem::Model) => {
                let model = if steps >= 0 {
                    self.session.model.next()
                } else {
                    self.session.model.prev()
                };
                self.select_model(model);
            }
            Some(SidebarItem::Temperature) => self.session.params.step_temperature(steps),
            Some(SidebarItem::TopP) => self.session.params.step_top_p(steps),
            Some(SidebarItem::MaxLength) => self.session.params.step_max_length(steps),
            _ => {}
        }
    }

    pub fn activate_selected(&mut self) {
        match self.selected_sidebar_item() {
            Some(SidebarItem::ApiToken) => self.open_api_key_input(),
            Some(SidebarItem::Model) => self.adjust_selected(1),
            Some(SidebarItem::ClearHistory) => {
                self.clear_history();
            }
            _ => {}
        }
    }

    // Transcript

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_generating() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.transcript_scroll = self.transcript_scroll.saturating_add(lines);
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.transcript_scroll = self.transcript_scroll.saturating_sub(lines);
    }

    /// Scroll so the newest text (or the busy indicator) is visible
    pub fn scroll_transcript_to_bottom(&mut self) {
        let wrap_width = if self.transcript_width > 0 {
            self.transcript_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for msg in self.session.messages() {
            // Role line, content, blank line
            total_lines = total_lines.saturating_add(wrapped_height(&msg.content, wrap_width).saturating_add(2));
        }
        if let Some(pending) = &self.pending {
            total_lines = total_lines.saturating_add(wrapped_height(pending, wrap_width).saturating_add(2));
        }

        let visible_height = if self.transcript_height > 0 {
            self.transcript_height
        } else {
            20
        };

        self.transcript_scroll = total_lines.saturating_sub(visible_height);
    }

    /// Abort background work on exit
    pub fn shutdown(&mut self) {
        if let Some(task) = self.auth_task.take() {
            task.abort();
        }
        if let Some(task) = self.generation_task.take() {
            task.abort();
        }
    }
}

/// Rows `text` takes when wrapped at `width` columns, saturating at `u16::MAX`.
fn wrapped_height(text: &str, width: usize) -> u16 {
    text.lines()
        .map(|line| u16::try_from(line.chars().count() / width + 1).unwrap_or(u16::MAX))
        .fold(0u16, u16::saturating_add)
        .max(1)
}

async fn run_generation(
    client: ReplicateClient,
    model: &'static str,
    input: GenerationInput,
    events: UnboundedSender<AppEvent>,
) {
    let event = match stream_generation(&client, model, &input, &events).await {
        Ok(()) => AppEvent::ResponseFinished,
        Err(e) => {
            error!("Generation failed: {:#}", e);
            AppEvent::ResponseFailed(format!("{:#}", e))
        }
    };
    let _ = events.send(event);
}

async fn stream_generation(
    client: &ReplicateClient,
    model: &str,
    input: &GenerationInput,
    events: &UnboundedSender<AppEvent>,
) -> Result<()> {
    let mut fragments = client.generate(model, input).await?;
    while let Some(fragment) = fragments.next().await {
        if events.send(AppEvent::Fragment(fragment?)).is_err() {
            break;
        }
    }
    info!("Generation complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdentityProvider, Secrets};
    use crate::models::{ChatMessage, ChatRole};
    use crate::session::GREETING;
    use crate::stub_http::{request_body, StubResponse, StubServer};
    use serde_json::json;
    use tokio::sync::mpsc;

    const VALID_TOKEN: &str = "r8_0123456789abcdefghijklmnopqrstuvwxyzA";

    fn settings(secret_token: Option<&str>) -> Settings {
        let identity = IdentityProvider::descope("client", "auth.example.com", "http://127.0.0.1:0").unwrap();
        let secrets = Secrets {
            replicate_api_token: secret_token.map(str::to_string),
        };
        // Generations are aborted before they run; nothing listens here
        Settings::new(identity, "http://127.0.0.1:9", None, secrets)
    }

    fn signed_in_app(secret_token: Option<&str>) -> (App, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut app = App::new(settings(secret_token), tx);
        app.session
            .set_credential(Credential::from_token_response(json!({"access_token": "at"})).unwrap());
        app.phase = Phase::Chatting;
        (app, rx)
    }

    #[test]
    fn test_secrets_token_is_trusted() {
        let (app, _rx) = signed_in_app(Some("anything"));
        assert_eq!(app.token_notice(), TokenNotice::Provided);
        assert!(app.input_enabled());
    }

    #[test]
    fn test_malformed_entered_token_keeps_input_disabled() {
        let (mut app, _rx) = signed_in_app(None);
        assert_eq!(app.token_notice(), TokenNotice::Missing);
        assert!(!app.input_enabled());

        app.open_api_key_input();
        app.api_key_input = "r8_short".to_string();
        app.submit_api_key();
        assert_eq!(app.token_notice(), TokenNotice::Missing);
        assert!(!app.input_enabled());

        app.open_api_key_input();
        app.api_key_input = VALID_TOKEN.to_string();
        app.submit_api_key();
        assert_eq!(app.token_notice(), TokenNotice::Accepted);
        assert!(app.input_enabled());
    }

    #[test]
    fn test_secrets_token_cannot_be_replaced() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.open_api_key_input();
        assert!(!app.show_api_key_input);
    }

    #[test]
    fn test_input_disabled_before_sign_in() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = App::new(settings(Some(VALID_TOKEN)), tx);
        app.prompt_input = "hello".to_string();
        assert!(!app.input_enabled());
        assert!(!app.submit_prompt());
        assert_eq!(app.session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_appends_user_turn_then_one_assistant_message() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.prompt_input = "Tell me a joke".to_string();
        app.prompt_cursor = 14;

        assert!(app.submit_prompt());
        app.shutdown();

        assert!(app.prompt_input.is_empty());
        assert_eq!(app.prompt_cursor, 0);
        assert!(app.is_generating());
        assert!(!app.input_enabled());
        let last = app.session.messages().last().unwrap();
        assert_eq!((last.role, last.content.as_str()), (ChatRole::User, "Tell me a joke"));

        app.on_fragment("Why did".to_string());
        app.on_fragment(" the llama cross the road?".to_string());
        assert_eq!(app.pending.as_deref(), Some("Why did the llama cross the road?"));
        assert_eq!(app.session.messages().len(), 2);

        app.on_response_finished();
        let messages = app.session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, ChatRole::Assistant);
        assert_eq!(messages[2].content, "Why did the llama cross the road?");
        assert!(!app.is_generating());
    }

    #[tokio::test]
    async fn test_prompt_sent_to_replicate_excludes_new_turn_from_history() {
        let server = StubServer::bind().await;
        let base = server.base_url.clone();
        let created = json!({"id": "p1", "status": "starting", "urls": {"stream": format!("{}/stream/p1", base)}});
        let requests = server.serve(vec![
            StubResponse::json("201 Created", created.to_string()),
            StubResponse::event_stream("event: output\ndata: Why not?\n\nevent: done\ndata: {}\n\n"),
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let identity = IdentityProvider::descope("client", "auth.example.com", "http://127.0.0.1:0").unwrap();
        let secrets = Secrets { replicate_api_token: Some(VALID_TOKEN.to_string()) };
        let mut app = App::new(Settings::new(identity, &base, None, secrets), tx);
        app.session
            .set_credential(Credential::from_token_response(json!({"access_token": "at"})).unwrap());
        app.phase = Phase::Chatting;

        app.prompt_input = "Tell me a joke".to_string();
        assert!(app.submit_prompt());

        let drain = async {
            while let Some(event) = rx.recv().await {
                match event {
                    AppEvent::Fragment(text) => app.on_fragment(text),
                    AppEvent::ResponseFinished => {
                        app.on_response_finished();
                        break;
                    }
                    AppEvent::ResponseFailed(message) => panic!("generation failed: {}", message),
                    _ => {}
                }
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(10), drain).await.unwrap();

        let requests = requests.await.unwrap();
        let body: serde_json::Value = serde_json::from_str(request_body(&requests[0])).unwrap();
        let history = vec![ChatMessage::assistant(GREETING)];
        assert_eq!(body["input"]["prompt"], build_prompt(&history, "Tell me a joke"));
        assert!(!body["input"]["prompt"].as_str().unwrap().contains("User: Tell me a joke"));

        let messages = app.session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "Tell me a joke");
        assert_eq!(messages[2].content, "Why not?");
    }

    #[tokio::test]
    async fn test_empty_prompt_is_ignored() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.prompt_input = "   ".to_string();
        assert!(!app.submit_prompt());
        assert!(!app.is_generating());
    }

    #[tokio::test]
    async fn test_only_one_generation_in_flight() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.prompt_input = "first".to_string();
        assert!(app.submit_prompt());
        app.prompt_input = "second".to_string();
        assert!(!app.submit_prompt());
        app.shutdown();
        assert_eq!(app.session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_discards_partial_text() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.prompt_input = "hi".to_string();
        assert!(app.submit_prompt());
        app.shutdown();

        app.on_fragment("partial".to_string());
        app.on_response_failed("boom".to_string());

        assert!(!app.is_generating());
        assert_eq!(app.session.messages().len(), 2);
        assert_eq!(app.status.as_deref(), Some("Error: boom"));
        assert!(app.input_enabled());
    }

    #[tokio::test]
    async fn test_clear_refused_while_streaming() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.prompt_input = "hi".to_string();
        assert!(app.submit_prompt());
        app.shutdown();

        assert!(!app.clear_history());
        assert_eq!(app.session.messages().len(), 2);

        app.on_response_finished();
        assert!(app.clear_history());
        assert_eq!(app.session.messages().len(), 1);
        assert_eq!(app.session.messages()[0].content, GREETING);
        assert!(app.session.is_authenticated());
    }

    #[test]
    fn test_model_selection_changes_identifier() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.sidebar_state.select(Some(1));
        assert_eq!(app.selected_sidebar_item(), Some(SidebarItem::Model));

        app.adjust_selected(1);
        assert_eq!(app.session.model, LlamaModel::Llama2_13B);
        assert!(app.session.model.identifier().starts_with("a16z-infra/llama13b-v2-chat:"));

        app.adjust_selected(-1);
        app.adjust_selected(-1);
        assert_eq!(app.session.model, LlamaModel::Llama2_70B);
    }

    #[test]
    fn test_sliders_clamp() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.sidebar_state.select(Some(4));
        app.adjust_selected(-1000);
        assert_eq!(app.session.params.max_length, 64);

        app.sidebar_state.select(Some(3));
        app.adjust_selected(500);
        assert!((app.session.params.top_p - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrapped_height() {
        assert_eq!(wrapped_height("", 10), 1);
        assert_eq!(wrapped_height("short", 10), 1);
        assert_eq!(wrapped_height("0123456789abc\nnext", 10), 3);
        assert_eq!(wrapped_height(&"x".repeat(200_000), 1), u16::MAX);
    }

    #[test]
    fn test_scroll_saturates_on_huge_transcript() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.transcript_width = 1;
        app.transcript_height = 10;
        let long_line = "y".repeat(70_000);
        for _ in 0..3 {
            app.session.push_user(long_line.clone());
        }
        app.pending = Some(long_line);

        app.scroll_transcript_to_bottom();
        assert_eq!(app.transcript_scroll, u16::MAX - 10);
    }

    #[test]
    fn test_sidebar_navigation_stays_in_bounds() {
        let (mut app, _rx) = signed_in_app(None);
        app.sidebar_nav_up();
        assert_eq!(app.selected_sidebar_item(), Some(SidebarItem::ApiToken));
        for _ in 0..10 {
            app.sidebar_nav_down();
        }
        assert_eq!(app.selected_sidebar_item(), Some(SidebarItem::ClearHistory));
    }

    #[test]
    fn test_auth_failure_returns_to_gate() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = App::new(settings(None), tx);
        app.phase = Phase::Authorizing { url: None };

        app.on_auth_url(0, "https://auth.example.com/oauth2/v1/authorize?x=1".to_string());
        assert_eq!(
            app.phase,
            Phase::Authorizing { url: Some("https://auth.example.com/oauth2/v1/authorize?x=1".to_string()) }
        );

        app.on_auth_finished(0, Err(AuthError::TimedOut));
        assert_eq!(app.phase, Phase::Unauthenticated);
        assert!(!app.session.is_authenticated());
    }

    #[test]
    fn test_auth_success_enters_chat() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = App::new(settings(None), tx);
        app.phase = Phase::Authorizing { url: None };

        let credential = Credential::from_token_response(json!({"access_token": "at"})).unwrap();
        app.on_auth_finished(0, Ok(credential));

        assert_eq!(app.phase, Phase::Chatting);
        assert!(app.session.is_authenticated());
    }

    #[test]
    fn test_result_of_cancelled_attempt_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = App::new(settings(None), tx);
        // Attempt 1 was cancelled; attempt 2 is waiting for the browser
        app.auth_attempt = 2;
        app.phase = Phase::Authorizing { url: None };

        app.on_auth_url(1, "https://stale.example.com".to_string());
        let credential = Credential::from_token_response(json!({"access_token": "stale"})).unwrap();
        app.on_auth_finished(1, Ok(credential));
        assert_eq!(app.phase, Phase::Authorizing { url: None });
        assert!(!app.session.is_authenticated());

        let credential = Credential::from_token_response(json!({"access_token": "fresh"})).unwrap();
        app.on_auth_finished(2, Ok(credential));
        assert_eq!(app.phase, Phase::Chatting);
        assert_eq!(app.session.credential().and_then(|c| c.access_token()), Some("fresh"));
    }

    #[tokio::test]
    async fn test_sign_out_keeps_history() {
        let (mut app, _rx) = signed_in_app(Some(VALID_TOKEN));
        app.session.push_user("remember me");

        app.sign_out();

        assert_eq!(app.phase, Phase::Unauthenticated);
        assert!(!app.session.is_authenticated());
        assert_eq!(app.session.messages().len(), 2);
    }
}
