use std::{net::SocketAddr, sync::Arc};

use axum::Router;
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info};

use crate::settings::{ConfigError, FatalNotifier, Settings};

#[derive(Debug, Error)]
pub(crate) enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerState {
    Stopped,
    Running(SocketAddr),
}

enum Listener {
    Stopped,
    Running(RunningServer),
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the HTTP listener. `start` and `stop` are both idempotent; the state
/// lock is held across the bind so concurrent starts cannot double-bind.
pub(crate) struct ServerLifecycleController {
    host: String,
    app: Router,
    notifier: Arc<dyn FatalNotifier>,
    listener: Mutex<Listener>,
}

impl ServerLifecycleController {
    pub(crate) fn new(host: String, app: Router, notifier: Arc<dyn FatalNotifier>) -> Self {
        Self {
            host,
            app,
            notifier,
            listener: Mutex::new(Listener::Stopped),
        }
    }

    pub(crate) async fn state(&self) -> ServerState {
        match &*self.listener.lock().await {
            Listener::Stopped => ServerState::Stopped,
            Listener::Running(server) => ServerState::Running(server.addr),
        }
    }

    pub(crate) async fn start(&self, settings: &Settings) -> Result<SocketAddr, LifecycleError> {
        let mut listener = self.listener.lock().await;
        if let Listener::Running(server) = &*listener {
            debug!("server already running on {}", server.addr);
            return Ok(server.addr);
        }

        let Some(port) = settings.port else {
            let error = ConfigError::InvalidPort {
                raw: "missing".to_string(),
            };
            self.notifier.notify(&error);
            return Err(error.into());
        };

        let bind_addr = format!("{}:{port}", self.host);
        let tcp = match TcpListener::bind(&bind_addr).await {
            Ok(tcp) => tcp,
            Err(source) => {
                error!("failed to bind {bind_addr}: {source}");
                return Err(LifecycleError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };
        let addr = tcp.local_addr().map_err(|source| LifecycleError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = self.app.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(tcp, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(error) = served {
                error!("server error: {error}");
            }
        });

        info!("server started on http://{addr}");
        *listener = Listener::Running(RunningServer {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Asks a running listener to close. The returned handle resolves once
    /// in-flight requests have drained; `None` means nothing was running.
    pub(crate) async fn stop(&self) -> Option<JoinHandle<()>> {
        let previous = std::mem::replace(&mut *self.listener.lock().await, Listener::Stopped);
        let Listener::Running(server) = previous else {
            debug!("stop requested while already stopped");
            return None;
        };

        let _ = server.shutdown.send(());
        let addr = server.addr;
        Some(tokio::spawn(async move {
            if let Err(error) = server.task.await {
                error!("server task failed: {error}");
            }
            info!("server on {addr} shut down");
        }))
    }
}
