use std::{path::PathBuf, process::Stdio, sync::Arc};

use serde::Serialize;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{ChildStderr, ChildStdin, ChildStdout, Command as ProcessCommand},
    sync::{mpsc, RwLock},
};
use tracing::{debug, info, warn};

use crate::{
    settings::Settings,
    sync::{parse_inbound, InboundMessage},
};

/// Instruction triggered by an HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Click(i64),
    Mouseover(i64),
    Undo,
    Redo,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub(crate) enum OutboundFrame {
    Settings {
        port: Option<u16>,
        file: Option<PathBuf>,
    },
    Click(i64),
    Mouseover(i64),
    Undo(bool),
    Redo(bool),
    Reset {
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
pub(crate) enum PresenterError {
    #[error("presenter command is empty")]
    EmptyCommand,
    #[error("failed to start presenter `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("presenter {0} unavailable")]
    Pipe(&'static str),
}

/// Outbound half of the presenter channel.
///
/// Frames are queued on an unbounded channel and written by a single task,
/// so they reach the presenter in send order. Nothing is ever read back.
pub(crate) struct CommandBridge {
    outbound: RwLock<Option<mpsc::UnboundedSender<OutboundFrame>>>,
    target_file: Option<PathBuf>,
}

impl CommandBridge {
    pub(crate) fn new(target_file: Option<PathBuf>) -> Self {
        Self {
            outbound: RwLock::new(None),
            target_file,
        }
    }

    pub(crate) async fn attach(&self, tx: mpsc::UnboundedSender<OutboundFrame>) {
        *self.outbound.write().await = Some(tx);
    }

    pub(crate) async fn detach(&self) {
        self.outbound.write().await.take();
    }

    pub(crate) async fn is_attached(&self) -> bool {
        self.outbound
            .read()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Fire-and-forget. Silently drops the command when no presenter is attached.
    pub(crate) async fn send(&self, command: Command) {
        let frame = self.frame_for(command);
        self.send_frame(frame).await;
    }

    fn frame_for(&self, command: Command) -> OutboundFrame {
        match command {
            Command::Click(id) => OutboundFrame::Click(id),
            Command::Mouseover(id) => OutboundFrame::Mouseover(id),
            Command::Undo => OutboundFrame::Undo(true),
            Command::Redo => OutboundFrame::Redo(true),
            Command::Reset => OutboundFrame::Reset {
                file: self.target_file.clone(),
            },
        }
    }

    async fn send_frame(&self, frame: OutboundFrame) {
        let outbound = self.outbound.read().await;
        let Some(tx) = outbound.as_ref() else {
            debug!(?frame, "presenter unavailable, dropping frame");
            return;
        };

        if let Err(error) = tx.send(frame) {
            debug!(frame = ?error.0, "presenter channel closed, dropping frame");
        }
    }

    pub(crate) async fn spawn_presenter(
        self: &Arc<Self>,
        command_line: &[String],
        settings: &Settings,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<(), PresenterError> {
        let (program, args) = command_line
            .split_first()
            .ok_or(PresenterError::EmptyCommand)?;

        let mut child = ProcessCommand::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PresenterError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(PresenterError::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(PresenterError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(PresenterError::Pipe("stderr"))?;

        info!(pid = ?child.id(), "presenter `{program}` started");

        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(tx).await;
        self.send_frame(OutboundFrame::Settings {
            port: settings.port,
            file: self.target_file.clone(),
        })
        .await;

        self.spawn_writer_loop(stdin, rx);
        spawn_stdout_loop(stdout, inbound);
        spawn_stderr_loop(stderr);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => warn!("presenter exited with status: {status}"),
                Err(error) => warn!("failed waiting for presenter exit: {error}"),
            }
            this.detach().await;
        });

        Ok(())
    }

    fn spawn_writer_loop(
        self: &Arc<Self>,
        mut stdin: ChildStdin,
        mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(error) = write_frame(&mut stdin, &frame).await {
                    warn!("presenter write failed: {error}");
                    break;
                }
            }
            this.detach().await;
        });
    }
}

async fn write_frame(stdin: &mut ChildStdin, frame: &OutboundFrame) -> std::io::Result<()> {
    let line = encode_frame(frame)?;
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

pub(crate) fn encode_frame(frame: &OutboundFrame) -> std::io::Result<String> {
    serde_json::to_string(frame).map_err(std::io::Error::other)
}

fn spawn_stdout_loop(stdout: ChildStdout, inbound: mpsc::UnboundedSender<InboundMessage>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match parse_inbound(trimmed) {
                        Ok(message) => {
                            if inbound.send(message).is_err() {
                                break;
                            }
                        }
                        Err(error) => warn!("invalid presenter frame: {error} | line={trimmed}"),
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!("presenter stdout read error: {error}");
                    break;
                }
            }
        }
    });
}

fn spawn_stderr_loop(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(target: "presenter", "{line}"),
                Ok(None) => break,
                Err(error) => {
                    warn!("presenter stderr read error: {error}");
                    break;
                }
            }
        }
    });
}
