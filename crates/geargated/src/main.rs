//! geargated — the Geargate daemon.
//!
//! Assembles the job gateway:
//! - Configuration (TOML file, CLI flags, environment)
//! - Queue dispatcher + worker pool
//! - Tokenized job API
//!
//! # Usage
//!
//! ```text
//! geargated serve --config /etc/geargate.toml --listen 127.0.0.1:43273
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use geargate_api::{GatewayState, build_router};
use geargate_core::GatewayConfig;
use geargate_dispatch::{AcknowledgeExecutor, QueueDispatcher};
use tracing::{info, warn};

/// Environment variable that supplies the token signing key.
const TOKEN_KEY_ENV: &str = "GEARGATE_TOKEN_KEY";

#[derive(Parser)]
#[command(name = "geargated", about = "Geargate job gateway daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the job API.
    Serve {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on; overrides the config file.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Accept `__test__` tokens read from the query string.
        #[arg(long)]
        allow_test_tokens: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            listen,
            allow_test_tokens,
        } => {
            let config = load_config(
                config.as_deref(),
                listen,
                allow_test_tokens,
                std::env::var(TOKEN_KEY_ENV).ok(),
            )?;
            serve(config).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,geargate=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolve the effective configuration. Flags and the environment win over
/// the file.
fn load_config(
    path: Option<&Path>,
    listen: Option<SocketAddr>,
    allow_test_tokens: bool,
    token_key: Option<String>,
) -> anyhow::Result<GatewayConfig> {
    let mut config = match path {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    if let Some(listen) = listen {
        config.listen = listen;
    }
    if allow_test_tokens {
        config.allow_test_tokens = true;
    }
    if let Some(key) = token_key.filter(|k| !k.is_empty()) {
        config.token_key = Some(key);
    }

    config.validate()?;
    Ok(config)
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    info!("Geargate daemon starting");

    if config.allow_test_tokens {
        warn!("test tokens are enabled; do not use this in production");
    }
    if config.token_key.is_none() {
        warn!("no token key configured; unsigned tokens will be accepted");
    }

    // ── Dispatcher ─────────────────────────────────────────────

    let dispatcher = Arc::new(QueueDispatcher::start(
        Arc::new(AcknowledgeExecutor),
        &config.dispatcher,
    ));

    // ── API server ─────────────────────────────────────────────

    let router = build_router(GatewayState::new(dispatcher.clone(), &config));
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;

    info!(addr = %config.listen, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown().await;

    info!("Geargate daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let config = load_config(None, None, false, None).unwrap();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen = \"127.0.0.1:9000\"\nclone_source = \"example/seed\"").unwrap();

        let listen: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        let config = load_config(Some(file.path()), Some(listen), true, None).unwrap();

        assert_eq!(config.listen, listen);
        assert!(config.allow_test_tokens);
        assert_eq!(config.clone_source, "example/seed");
    }

    #[test]
    fn env_token_key_wins() {
        let config = load_config(None, None, false, Some("secret".into())).unwrap();
        assert_eq!(config.token_key.as_deref(), Some("secret"));

        let config = load_config(None, None, false, Some(String::new())).unwrap();
        assert!(config.token_key.is_none());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/geargate.toml")), None, false, None)
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/geargate.toml"));
    }

    #[test]
    fn cli_parses_serve() {
        let cli = Cli::try_parse_from([
            "geargated",
            "serve",
            "--listen",
            "127.0.0.1:8080",
            "--allow-test-tokens",
        ])
        .unwrap();
        assert!(!cli.log_json);
        let Command::Serve {
            listen,
            allow_test_tokens,
            config,
        } = cli.command;
        assert_eq!(listen, Some("127.0.0.1:8080".parse().unwrap()));
        assert!(allow_test_tokens);
        assert!(config.is_none());
    }
}
