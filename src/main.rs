use std::{env, path::PathBuf, sync::Arc};

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod routes;
mod services;
mod settings;
mod sync;

use services::{lifecycle::ServerState, CommandBridge, ServerLifecycleController, StateStore};
use settings::{FatalNotifier, LogNotifier, Settings};

#[derive(Clone, Debug)]
struct BridgeConfig {
    host: String,
    settings_path: PathBuf,
    presenter_command: Option<Vec<String>>,
    autostart: bool,
}

impl BridgeConfig {
    fn from_env() -> Result<Self, String> {
        let host = env::var("PASSAGE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let settings_path = env::var("PASSAGE_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("settings.json"));

        let presenter_command = match env::var("PASSAGE_PRESENTER_CMD") {
            Ok(raw) => Some(parse_presenter_command(&raw)?),
            Err(_) => None,
        };

        let autostart = parse_bool_env("PASSAGE_AUTOSTART", true);

        Ok(Self {
            host,
            settings_path,
            presenter_command,
            autostart,
        })
    }
}

pub(crate) struct AppState {
    pub(crate) settings: Arc<Settings>,
    pub(crate) store: Arc<StateStore>,
    pub(crate) bridge: Arc<CommandBridge>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!("{error}");
            std::process::exit(1);
        }
    };

    let notifier: Arc<dyn FatalNotifier> = Arc::new(LogNotifier);
    let settings = Arc::new(settings::load(&config.settings_path, notifier.as_ref()));
    let store = Arc::new(StateStore::new());
    let bridge = Arc::new(CommandBridge::new(settings.file.clone()));

    let state = Arc::new(AppState {
        settings: settings.clone(),
        store: store.clone(),
        bridge: bridge.clone(),
    });
    let lifecycle = Arc::new(ServerLifecycleController::new(
        config.host.clone(),
        routes::router(state),
        notifier,
    ));

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    match &config.presenter_command {
        Some(command) => {
            if let Err(error) = bridge.spawn_presenter(command, &settings, inbound_tx).await {
                error!("{error}");
            }
        }
        None => drop(inbound_tx),
    }
    if !bridge.is_attached().await {
        warn!("no presenter attached; commands will be dropped");
    }

    tokio::spawn(sync::run_sync_loop(
        inbound_rx,
        store,
        lifecycle.clone(),
        settings.clone(),
    ));

    if config.autostart {
        autostart(&lifecycle, &settings).await;
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {error}");
    }
    info!("shutting down");
    if let ServerState::Running(addr) = lifecycle.state().await {
        info!("closing listener on {addr}");
    }
    if let Some(shutdown) = lifecycle.stop().await {
        if let Err(error) = shutdown.await {
            error!("listener shutdown failed: {error}");
        }
    }
}

/// Starts the listener at boot. A missing port was already reported by the
/// settings loader, so it is only logged here.
async fn autostart(lifecycle: &ServerLifecycleController, settings: &Settings) {
    if settings.port.is_none() {
        warn!("no usable port configured; listener not started");
        return;
    }
    // Bind failures are logged inside start.
    let _ = lifecycle.start(settings).await;
}

fn parse_presenter_command(raw: &str) -> Result<Vec<String>, String> {
    let tokens = shlex::split(raw)
        .ok_or_else(|| "PASSAGE_PRESENTER_CMD has invalid quoting".to_string())?;
    if tokens.is_empty() {
        return Err("PASSAGE_PRESENTER_CMD must not be empty".to_string());
    }
    Ok(tokens)
}

fn parse_bool_env(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => {
            let value = value.trim();
            value.eq_ignore_ascii_case("true") || value == "1"
        }
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::StateUpdate,
        settings::{tests::RecordingNotifier, ConfigError},
    };
    use serde_json::{json, Value};

    #[test]
    fn presenter_command_is_shell_split() {
        let tokens = parse_presenter_command(r#"node "renderer/main.js" --story 'my story.html'"#)
            .expect("split command");
        assert_eq!(
            tokens,
            vec!["node", "renderer/main.js", "--story", "my story.html"]
        );
    }

    #[test]
    fn presenter_command_rejects_bad_input() {
        assert!(parse_presenter_command("node 'unterminated").is_err());
        assert!(parse_presenter_command("   ").is_err());
    }

    #[tokio::test]
    async fn bad_port_is_reported_once_across_load_and_autostart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings_path = dir.path().join("settings.json");
        std::fs::write(&settings_path, r#"{"port": "abc"}"#).expect("write settings");

        let notifier = Arc::new(RecordingNotifier::default());
        let settings = settings::load(&settings_path, notifier.as_ref());
        let lifecycle = ServerLifecycleController::new(
            "127.0.0.1".to_string(),
            axum::Router::new(),
            notifier.clone(),
        );

        autostart(&lifecycle, &settings).await;

        assert_eq!(
            notifier.errors(),
            vec![ConfigError::InvalidPort {
                raw: r#""abc""#.to_string()
            }]
        );
        assert_eq!(lifecycle.state().await, ServerState::Stopped);
    }

    #[tokio::test]
    async fn scenario_load_start_push_and_query() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings_path = dir.path().join("settings.json");
        std::fs::write(&settings_path, r#"{"port": 0, "file": null}"#).expect("write settings");

        let notifier: Arc<dyn FatalNotifier> = Arc::new(LogNotifier);
        let settings = Arc::new(settings::load(&settings_path, notifier.as_ref()));
        assert!(settings.server_ready);

        let store = Arc::new(StateStore::new());
        let state = Arc::new(AppState {
            settings: settings.clone(),
            store: store.clone(),
            bridge: Arc::new(CommandBridge::new(None)),
        });
        let lifecycle =
            ServerLifecycleController::new("127.0.0.1".to_string(), routes::router(state), notifier);
        let addr = lifecycle.start(&settings).await.expect("start listener");

        let status: Value = reqwest::get(format!("http://{addr}/"))
            .await
            .expect("GET /")
            .json()
            .await
            .expect("status json");
        assert_eq!(status, json!({ "code": 0, "message": "", "description": "" }));

        store.apply_update(StateUpdate::Text("Welcome".into())).await;
        let text: Value = reqwest::get(format!("http://{addr}/text"))
            .await
            .expect("GET /text")
            .json()
            .await
            .expect("text json");
        assert_eq!(text, json!({ "text": "Welcome" }));

        let missing = reqwest::get(format!("http://{addr}/nonexistent"))
            .await
            .expect("GET /nonexistent");
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        assert!(lifecycle.stop().await.is_some());
    }
}
