use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    services::{ServerLifecycleController, StateStore, StateUpdate},
    settings::Settings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ServerControl {
    Run,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InboundMessage {
    State(StateUpdate),
    Server(ServerControl),
}

pub(crate) fn parse_inbound(line: &str) -> Result<InboundMessage, serde_json::Error> {
    let value = serde_json::from_str::<Value>(line)?;
    let kind = value.get("type").and_then(Value::as_str);

    if matches!(kind, Some("server" | "async-main-server")) {
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        return serde_json::from_value(payload).map(InboundMessage::Server);
    }

    serde_json::from_value(value).map(InboundMessage::State)
}

/// Sole writer of the story state. Runs until every inbound sender is gone.
pub(crate) async fn run_sync_loop(
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    store: Arc<StateStore>,
    lifecycle: Arc<ServerLifecycleController>,
    settings: Arc<Settings>,
) {
    while let Some(message) = inbound.recv().await {
        apply_inbound(message, &store, &lifecycle, &settings).await;
    }
    let last = store.snapshot().await;
    info!(
        status = last.status.code,
        links = last.links.len(),
        "presenter sync loop finished"
    );
}

async fn apply_inbound(
    message: InboundMessage,
    store: &StateStore,
    lifecycle: &ServerLifecycleController,
    settings: &Settings,
) {
    match message {
        InboundMessage::State(update) => {
            debug!(field = update.field(), "applying presenter push");
            store.apply_update(update).await;
        }
        InboundMessage::Server(ServerControl::Run) => {
            // Failures are logged and signalled inside start.
            let _ = lifecycle.start(settings).await;
        }
        InboundMessage::Server(ServerControl::Stop) => {
            // Shutdown drains in the background.
            drop(lifecycle.stop().await);
        }
    }
}
