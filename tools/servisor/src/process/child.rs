// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// How a child process ended, as reported by its wait task.
#[derive(Debug, Clone)]
pub(crate) enum ExitOutcome {
    Status(ExitStatus),
    WaitFailure(String),
}

impl ExitOutcome {
    pub(crate) fn success(&self) -> bool {
        matches!(self, ExitOutcome::Status(status) if status.success())
    }
}

impl Display for ExitOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Status(status) => write!(f, "{status}"),
            ExitOutcome::WaitFailure(reason) => write!(f, "unknown exit status ({reason})"),
        }
    }
}

#[derive(Debug)]
enum ChildCommand {
    Interrupt(oneshot::Sender<io::Result<()>>),
    Kill,
}

/// Handle to a spawned child whose [Child] is exclusively owned by a dedicated wait task.
///
/// Every interaction with the process goes through that task, so it is never signalled
/// after it has been reaped.
#[derive(Debug)]
pub(crate) struct MonitoredChild {
    pid: u32,
    commands: mpsc::UnboundedSender<ChildCommand>,
    completion: watch::Receiver<Option<ExitOutcome>>,
}

impl MonitoredChild {
    /// Takes ownership of the child, returning the handle alongside the wait task
    /// that has to be spawned for the handle to make any progress.
    pub(crate) fn new(child: Child) -> (Self, impl Future<Output = ()> + Send + 'static) {
        let pid = child.id().unwrap_or_default();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = watch::channel(None);

        let handle = MonitoredChild {
            pid,
            commands: commands_tx,
            completion: completion_rx,
        };
        (handle, wait_for_exit(child, commands_rx, completion_tx))
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Sends the platform's graceful interrupt to the process.
    /// Succeeds trivially if the process has already exited.
    pub(crate) async fn interrupt(&self) -> io::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(ChildCommand::Interrupt(reply_tx)).is_err() {
            // the wait task is gone, so is the process
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }

    /// Requests the process to be forcefully killed. Does not wait for it to go away.
    pub(crate) fn kill(&self) {
        if self.commands.send(ChildCommand::Kill).is_err() {
            debug!("process {} has already exited", self.pid)
        }
    }

    /// Resolves once the process has exited. Can be awaited any number of times.
    pub(crate) async fn exited(&self) -> ExitOutcome {
        let mut completion = self.completion.clone();
        let outcome = completion
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone());

        outcome.unwrap_or_else(|| {
            ExitOutcome::WaitFailure("the wait task has been terminated".to_string())
        })
    }

    pub(crate) fn try_outcome(&self) -> Option<ExitOutcome> {
        self.completion.borrow().clone()
    }
}

#[cfg(unix)]
fn interrupt(child: &Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // no id means the process has already been reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    kill(Pid::from_raw(pid), Signal::SIGINT).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful interrupts are not supported on this platform",
    ))
}

async fn wait_for_exit(
    mut child: Child,
    mut commands: mpsc::UnboundedReceiver<ChildCommand>,
    completion: watch::Sender<Option<ExitOutcome>>,
) {
    let outcome = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => ExitOutcome::Status(status),
                    Err(err) => ExitOutcome::WaitFailure(err.to_string()),
                }
            }
            Some(command) = commands.recv() => match command {
                ChildCommand::Interrupt(reply) => {
                    let _ = reply.send(interrupt(&child));
                }
                ChildCommand::Kill => {
                    if let Err(err) = child.start_kill() {
                        warn!("failed to kill the process: {err}")
                    }
                }
            }
        }
    };

    completion.send_replace(Some(outcome));
}
