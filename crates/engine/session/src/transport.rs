// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Worker transport.
//!
//! A worker is anything that accepts command lines and produces output
//! lines. The session never touches a process handle directly; it holds a
//! [`WorkerLink`] of two channels and a [`WorkerTerminator`].

use async_trait::async_trait;
use engine_common::{AnalysisError, AnalysisResult};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Grace period between a termination request and a hard kill.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Channels to one running worker.
///
/// The output channel closing means the worker is gone.
#[derive(Debug)]
pub struct WorkerLink {
    pub commands: mpsc::UnboundedSender<String>,
    pub output: mpsc::UnboundedReceiver<String>,
    pub terminator: WorkerTerminator,
}

/// Ends the worker when asked or when dropped.
#[derive(Debug)]
pub struct WorkerTerminator {
    kill: Option<oneshot::Sender<()>>,
}

impl WorkerTerminator {
    pub fn new(kill: oneshot::Sender<()>) -> Self {
        Self { kill: Some(kill) }
    }

    pub fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

impl Drop for WorkerTerminator {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Starts workers for sessions.
#[async_trait]
pub trait WorkerSpawner: Send + Sync + fmt::Debug {
    async fn spawn(&self) -> AnalysisResult<WorkerLink>;
}

/// Runs an external engine binary speaking the protocol over stdio.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self) -> AnalysisResult<WorkerLink> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AnalysisError::WorkerFault(format!("Failed to spawn {}: {e}", self.program.display())))?;

        let mut stdin = child.stdin.take().ok_or_else(|| AnalysisError::WorkerFault("worker stdin unavailable".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| AnalysisError::WorkerFault("worker stdout unavailable".to_string()))?;
        let pid = child.id();

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<String>();
        let (output_tx, output_rx) = mpsc::unbounded_channel::<String>();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            while let Some(line) = command_rx.recv().await {
                let written = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                };
                if let Err(e) = written.await {
                    debug!(?pid, error = %e, "Worker stdin closed");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if output_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(?pid, error = %e, "Failed to read worker output");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    debug!(?pid, ?status, "Worker exited");
                }
                _ = kill_rx => {
                    if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
                        warn!(?pid, "Worker did not exit in time, killing");
                        let _ = child.kill().await;
                    }
                }
            }
        });

        debug!(?pid, program = %self.program.display(), "Spawned worker process");

        Ok(WorkerLink {
            commands: command_tx,
            output: output_rx,
            terminator: WorkerTerminator::new(kill_tx),
        })
    }
}
