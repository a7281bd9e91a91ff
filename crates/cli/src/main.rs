mod chat_commands;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use {
    anyhow::Context,
    clap::Parser,
    conduit_agents::{ChatSession, LlmClient, SessionOptions, build_provider},
    conduit_config::{DEFAULT_CONFIG_FILE, SessionConfig},
    conduit_mcp::{ManagerOptions, McpManager, build_transports},
    conduit_sigv4::{EnvCredentialsProvider, SharedCredentialsProvider},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

/// Dependency targets that are too chatty below `warn`.
const NOISY_TARGETS: &[&str] = &["hyper", "reqwest", "h2", "rustls"];

#[derive(Parser)]
#[command(name = "conduit", about = "Conduit: chat with tools from MCP servers")]
struct Cli {
    /// Server configuration file.
    #[arg(long, env = "CONDUIT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Send a single message and exit instead of starting an interactive chat.
    #[arg(short, long, env = "CONDUIT_MESSAGE")]
    message: Option<String>,

    /// Model to converse with (overrides config value).
    #[arg(long, env = "CONDUIT_MODEL_ID")]
    model_id: Option<String>,

    /// Region of the model endpoint (overrides config value).
    #[arg(long, env = "CONDUIT_REGION")]
    region: Option<String>,

    /// LLM calls allowed per message (overrides config value).
    #[arg(long, env = "CONDUIT_MAX_TURNS")]
    max_turns: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, env = "CONDUIT_JSON_LOGS", default_value_t = false)]
    json_logs: bool,
}

impl Cli {
    fn apply_overrides(&self, session: &mut SessionConfig) {
        if let Some(model_id) = &self.model_id {
            session.model_id = model_id.clone();
        }
        if let Some(region) = &self.region {
            session.region = region.clone();
        }
        if let Some(max_turns) = self.max_turns {
            session.max_turns = max_turns;
        }
    }
}

/// `RUST_LOG` wins, then `LOG_LEVEL`, then `--log-level`.
fn log_filter(cli: &Cli) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL")
            .ok()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| cli.log_level.clone());
        EnvFilter::new(level)
    });
    NOISY_TARGETS
        .iter()
        .filter_map(|target| format!("{target}=warn").parse().ok())
        .fold(filter, EnvFilter::add_directive)
}

/// Logs go to stderr; stdout only carries answers.
fn init_telemetry(cli: &Cli) {
    let registry = tracing_subscriber::registry().with(log_filter(cli));

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "conduit starting");

    let mut config = conduit_config::load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    cli.apply_overrides(&mut config.session);

    let credentials: SharedCredentialsProvider = Arc::new(EnvCredentialsProvider::new());
    let servers = build_transports(&config.servers, &credentials);
    let manager = McpManager::new(servers, ManagerOptions::from_session(&config.session));
    let provider = build_provider(&config.session, Arc::clone(&credentials))
        .context("failed to set up the LLM provider")?;

    let mut session = ChatSession::new(
        manager,
        LlmClient::new(provider),
        SessionOptions::from_config(&config.session),
    );

    let report = session.start().await;
    for (server, error) in &report.failed {
        warn!(server = %server, error = %error, "continuing without server");
    }

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let succeeded = match &cli.message {
        Some(message) => chat_commands::run_once(&mut session, message).await,
        None => chat_commands::run_interactive(&mut session).await,
    };

    session.shutdown().await;

    let succeeded = succeeded?;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
