//! # slidesync
//!
//! Server binary: resolves settings, installs logging and metrics, and runs
//! the HTTP/WebSocket server until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use slidesync_server::auth::{CredentialVerifier, DenyAllVerifier, SharedSecretVerifier};
use slidesync_server::config::ServerConfig;
use slidesync_server::documents::LocalDocumentStore;
use slidesync_server::server::SlideSyncServer;
use slidesync_settings::SlideSyncSettings;

/// How long sessions and the hub get to wind down after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time presentation sync server.
#[derive(Parser, Debug)]
#[command(name = "slidesync", about = "Real-time presentation sync server")]
struct Cli {
    /// Settings file (JSON). Falls back to `SLIDESYNC_CONFIG`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent participants (overrides settings).
    #[arg(long)]
    max_connections: Option<usize>,
}

impl Cli {
    /// Apply CLI flags on top of the resolved settings.
    fn apply(&self, settings: &mut SlideSyncSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_connections {
            settings.server.max_connections = max;
        }
    }
}

fn server_config(settings: &SlideSyncSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        max_connections: server.max_connections,
        outbox_capacity: server.outbox_capacity,
        event_queue_capacity: server.event_queue_capacity,
        send_timeout_ms: server.send_timeout_ms,
        max_dropped_messages: server.max_dropped_messages,
        max_message_size: server.max_message_size,
        max_upload_bytes: settings.documents.max_upload_bytes,
        upload_dir: PathBuf::from(&settings.documents.upload_dir),
        allowed_origins: server.allowed_origins.clone(),
    }
}

fn credential_verifier(settings: &SlideSyncSettings) -> Arc<dyn CredentialVerifier> {
    if let Some(secret) = settings.auth.secret() {
        Arc::new(SharedSecretVerifier::new(secret))
    } else {
        tracing::warn!("no controller secret configured; nobody can take control");
        Arc::new(DenyAllVerifier)
    }
}

/// Settings from file and env, then CLI flags, validated last.
fn resolve_settings(args: &Cli, path: Option<&Path>) -> Result<SlideSyncSettings> {
    let mut settings =
        slidesync_settings::load_settings(path).context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .or_else(slidesync_settings::settings_path_from_env);
    let settings = resolve_settings(&args, settings_path.as_deref())?;

    slidesync_logging::init_subscriber(&settings.logging.level, settings.logging.json);
    if let Some(path) = &settings_path {
        tracing::info!(path = %path.display(), "settings loaded");
    }

    let metrics = slidesync_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = server_config(&settings);
    let documents = Arc::new(LocalDocumentStore::new(config.upload_dir.clone()));
    let server = SlideSyncServer::new(config, credential_verifier(&settings), documents, metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("slidesync listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let mut tasks = vec![handle];
    tasks.extend(server.take_hub_task());
    server
        .shutdown()
        .graceful_shutdown(tasks, Some(SHUTDOWN_TIMEOUT))
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["slidesync"]);
        assert!(cli.config.is_none());
        let mut settings = SlideSyncSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.max_connections, 100);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "slidesync",
            "--config",
            "/etc/slidesync.json",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--max-connections",
            "3",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/slidesync.json")));
        let mut settings = SlideSyncSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.max_connections, 3);
    }

    #[test]
    fn cli_flag_fixes_invalid_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slidesync.json");
        std::fs::write(&path, r#"{"server": {"maxConnections": 0}}"#).unwrap();

        let bare = Cli::parse_from(["slidesync"]);
        assert!(resolve_settings(&bare, Some(&path)).is_err());

        let cli = Cli::parse_from(["slidesync", "--max-connections", "5"]);
        let settings = resolve_settings(&cli, Some(&path)).unwrap();
        assert_eq!(settings.server.max_connections, 5);
    }

    #[test]
    fn server_config_maps_every_section() {
        let mut settings = SlideSyncSettings::default();
        settings.server.send_timeout_ms = 2500;
        settings.documents.upload_dir = "/srv/decks".into();
        settings.documents.max_upload_bytes = 1024;
        settings.server.allowed_origins = vec!["http://a.example".into()];

        let config = server_config(&settings);
        assert_eq!(config.send_timeout(), Duration::from_millis(2500));
        assert_eq!(config.upload_dir, PathBuf::from("/srv/decks"));
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.allowed_origins, vec!["http://a.example".to_string()]);
        assert_eq!(config.outbox_capacity, settings.server.outbox_capacity);
    }

    #[test]
    fn verifier_follows_configured_secret() {
        let mut settings = SlideSyncSettings::default();
        assert!(!credential_verifier(&settings).verify(""));

        settings.auth.controller_secret = Some("s3cret".into());
        let verifier = credential_verifier(&settings);
        assert!(verifier.verify("s3cret"));
        assert!(!verifier.verify("other"));
    }

    #[tokio::test]
    async fn server_boots_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = SlideSyncSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        settings.documents.upload_dir = dir.path().to_string_lossy().into_owned();

        let config = server_config(&settings);
        let documents = Arc::new(LocalDocumentStore::new(config.upload_dir.clone()));
        let server = SlideSyncServer::new(
            config,
            credential_verifier(&settings),
            documents,
            PrometheusBuilder::new().build_recorder().handle(),
        );
        let (addr, handle) = server.listen().await.unwrap();

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        server.shutdown().shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
