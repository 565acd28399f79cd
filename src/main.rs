use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api_token;
mod app;
mod auth;
mod config;
mod handler;
mod models;
mod prompt;
mod replicate;
mod session;
mod sse;
#[cfg(test)]
mod stub_http;
mod tui;
mod ui;

use app::App;
use config::{IdentityProvider, Secrets, Settings};
use models::LlamaModel;
use tui::{EventHandler, Tui};

#[derive(Parser, Debug)]
#[command(name = "ask-llama")]
#[command(version, about = "Chat with Llama 2 on Replicate from the terminal, behind a Descope sign-in")]
struct Args {
    /// Descope project / OAuth client ID
    #[arg(long, env = "CLIENT_ID")]
    client_id: String,

    /// Descope API host, e.g. api.descope.com
    #[arg(long, env = "DESCOPE_DOMAIN")]
    domain: String,

    /// Loopback redirect registered with the identity provider
    #[arg(long, env = "REDIRECT_URI", default_value = config::DEFAULT_REDIRECT_URI)]
    redirect_uri: String,

    /// Replicate API base URL
    #[arg(long, env = "REPLICATE_API_URL", default_value = config::DEFAULT_REPLICATE_URL)]
    replicate_url: String,

    /// Model selected at start-up (Llama2-7B, Llama2-13B or Llama2-70B)
    #[arg(short, long, default_value = "Llama2-7B", value_parser = parse_model)]
    model: LlamaModel,

    /// Replicate API token; takes precedence over the secrets file
    #[arg(long, env = "REPLICATE_API_TOKEN", hide_env_values = true)]
    replicate_api_token: Option<String>,

    /// Secrets file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file (the terminal is taken by the UI)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn parse_model(label: &str) -> Result<LlamaModel, String> {
    LlamaModel::from_label(label).ok_or_else(|| {
        let labels: Vec<&str> = LlamaModel::all().iter().map(|m| m.label()).collect();
        format!("unknown model '{}', expected one of: {}", label, labels.join(", "))
    })
}

fn init_logging(path: &Path, debug: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let filter = if debug {
        "ask_llama=debug,info"
    } else {
        "ask_llama=info,warn"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = match args.log_file {
        Some(path) => path,
        None => config::default_log_path()?,
    };
    init_logging(&log_path, args.debug)?;

    let identity = IdentityProvider::descope(&args.client_id, &args.domain, &args.redirect_uri)?;
    let secrets = Secrets::load(args.config.as_deref())?;
    let settings = Settings::new(identity, &args.replicate_url, args.replicate_api_token, secrets);

    info!(
        "Starting ask-llama (redirect {}, Replicate token {})",
        settings.identity.redirect_uri,
        if settings.replicate_api_token.is_some() { "provided" } else { "not provided" }
    );

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(settings, events.sender());
    app.select_model(args.model);

    let result = run(&mut terminal, &mut app, &mut events).await;

    app.shutdown();
    tui::restore()?;
    info!("Exiting");
    result
}

async fn run(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event).await?,
            None => break,
        }
    }
    Ok(())
}
