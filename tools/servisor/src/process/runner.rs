// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::ServiceConfig;
use crate::context::RuntimeContext;
use crate::error::SupervisorError;
use crate::logs::{AttemptSinks, LogSink, PROC_END_MARKER, PROC_START_MARKER};
use crate::process::child::{ExitOutcome, MonitoredChild};
use crate::process::resolver::{ExecutableResolver, ResolutionMode};
use crate::process::terminate::TerminationEscalator;
use crate::updater::Updater;
use parking_lot::Mutex;
use servisor_task::{RestartListener, ShutdownToken};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How a single execution attempt has ended.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// The child has exited on its own.
    Exited(ExitOutcome),

    /// The child got terminated because of a shutdown.
    Stopped,

    /// The child got terminated because a restart has been requested.
    Restarted,
}

enum Trigger {
    Shutdown,
    Restart,
    Exited(ExitOutcome),
}

/// Pid of the child of the currently live attempt.
pub(crate) type ActiveChild = Arc<Mutex<Option<u32>>>;

/// Runs the configured executable once, from spawn to exit or termination.
pub(crate) struct ProcessRunner {
    context: Arc<RuntimeContext>,
    config: Arc<ServiceConfig>,
    updater: Option<Arc<dyn Updater>>,
    escalator: TerminationEscalator,
    output_drain_timeout: Duration,
    active_child: ActiveChild,
}

/// Size of the buffer each output pump reads the child's stream with.
const PUMP_BUFFER_SIZE: usize = 8 * 1024;

/// Copies the stream into the sink chunk by chunk until EOF.
async fn pump_output<R>(mut source: R, sink: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut write_failed = false;

    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                // keep draining the pipe regardless so the child never blocks on a full buffer
                if let Err(err) = sink.write_all(&buf[..n]) {
                    if !write_failed {
                        warn!("failed to write the child output: {err}");
                        write_failed = true;
                    }
                }
            }
            Err(err) => {
                warn!("failed to read the child output: {err}");
                break;
            }
        }
    }
}

impl ProcessRunner {
    pub(crate) fn new(
        context: Arc<RuntimeContext>,
        config: Arc<ServiceConfig>,
        updater: Option<Arc<dyn Updater>>,
    ) -> Self {
        ProcessRunner {
            escalator: TerminationEscalator::from(&config.debug),
            output_drain_timeout: config.debug.output_drain_timeout,
            context,
            config,
            updater,
            active_child: ActiveChild::default(),
        }
    }

    pub(crate) fn active_child(&self) -> ActiveChild {
        self.active_child.clone()
    }

    /// Escalates the termination of the child. Returns `true` if the child had to be abandoned.
    async fn terminate(&self, child: &MonitoredChild) -> bool {
        let termination = self.escalator.terminate(child).await;
        match termination.exit() {
            Some(exit) => {
                debug!("process {} has been terminated with {exit}", child.pid());
                false
            }
            None => true,
        }
    }

    fn build_command(&self, sinks: &AttemptSinks, executable: &std::path::Path) -> Command {
        let stdio = |sink: Option<&LogSink>| match sink {
            Some(_) => Stdio::piped(),
            None => Stdio::null(),
        };

        let mut command = Command::new(executable);
        command
            .args(&self.config.args)
            .envs(self.config.env_vars())
            .stdin(Stdio::null())
            .stdout(stdio(sinks.stdout()))
            .stderr(stdio(sinks.stderr()))
            .kill_on_drop(true);

        if let Some(dir) = self.config.working_dir() {
            command.current_dir(dir);
        }
        command
    }

    /// Waits for the output pumps and the wait task to finish, up to the drain timeout.
    async fn drain(&self, mut tasks: JoinSet<()>, abandoned: bool) {
        if abandoned {
            tasks.abort_all();
            return;
        }

        let drained = tokio::time::timeout(self.output_drain_timeout, async {
            while let Some(res) = tasks.join_next().await {
                if let Err(err) = res {
                    error!("an attempt task has failed: {err}")
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "the child output has not been drained within {}",
                humantime::format_duration(self.output_drain_timeout)
            );
            tasks.abort_all();
        }
    }

    /// Runs a single execution attempt.
    pub(crate) async fn run_once(
        &self,
        shutdown: &ShutdownToken,
        restart: &mut RestartListener,
    ) -> Result<AttemptOutcome, SupervisorError> {
        // the executable is re-resolved from scratch every time as an update might have replaced it
        let resolver =
            ExecutableResolver::new(&self.context, &self.config, self.updater.as_deref());
        let Some(executable) = shutdown
            .run_until_cancelled(resolver.resolve(ResolutionMode::Run))
            .await
            .transpose()?
        else {
            return Ok(AttemptOutcome::Stopped);
        };

        let sinks = AttemptSinks::open(&self.config)?;
        let mut child = match self.build_command(&sinks, &executable).spawn() {
            Ok(child) => child,
            Err(source) => {
                sinks.close();
                return Err(SupervisorError::SpawnFailed {
                    path: executable,
                    source,
                });
            }
        };
        sinks.write_marker(PROC_START_MARKER);

        let mut tasks = JoinSet::new();
        if let (Some(stdout), Some(sink)) = (child.stdout.take(), sinks.stdout()) {
            tasks.spawn(pump_output(stdout, sink.clone()));
        }
        if let (Some(stderr), Some(sink)) = (child.stderr.take(), sinks.stderr()) {
            tasks.spawn(pump_output(stderr, sink.clone()));
        }

        let (child, wait_task) = MonitoredChild::new(child);
        tasks.spawn(wait_task);

        let pid = child.pid();
        *self.active_child.lock() = Some(pid);
        info!("started {} (pid {pid})", executable.display());

        let trigger = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Trigger::Shutdown,
            _ = restart.recv() => Trigger::Restart,
            outcome = child.exited() => Trigger::Exited(outcome),
        };

        let (outcome, abandoned) = match trigger {
            Trigger::Exited(exit) => {
                if exit.success() {
                    info!("process {pid} has exited with {exit}");
                } else {
                    warn!("process {pid} has exited with {exit}");
                }
                (AttemptOutcome::Exited(exit), false)
            }
            Trigger::Shutdown => {
                info!("shutting down process {pid}");
                (AttemptOutcome::Stopped, self.terminate(&child).await)
            }
            Trigger::Restart => {
                info!("restarting process {pid}");
                (AttemptOutcome::Restarted, self.terminate(&child).await)
            }
        };
        *self.active_child.lock() = None;

        self.drain(tasks, abandoned).await;
        sinks.write_marker(PROC_END_MARKER);
        sinks.close();

        debug!("attempt finished: {outcome:?}");
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::updater::mock::{MockResult, MockUpdater};
    use servisor_task::restart_signal;
    use servisor_test_utils::traits::Timeboxed;
    use std::fs;
    use std::path::Path;

    const DEADLINE: Duration = Duration::from_secs(10);

    fn config(dir: &Path, exec: &str, args: &[&str]) -> ServiceConfig {
        let mut config = ServiceConfig {
            name: "test".to_string(),
            exec: exec.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            dir: dir.to_path_buf(),
            ..Default::default()
        };
        config.debug.graceful_shutdown_timeout = Duration::from_millis(500);
        config.debug.kill_timeout = Duration::from_secs(5);
        config
    }

    fn runner(dir: &Path, config: ServiceConfig) -> ProcessRunner {
        let context = RuntimeContext::new(dir.join("servisor"), dir.join("servisor.json"));
        ProcessRunner::new(Arc::new(context), Arc::new(config), None)
    }

    #[tokio::test]
    async fn natural_exit_without_sinks() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = runner(dir.path(), config(dir.path(), "/bin/true", &[]));
        let (_requester, mut restart) = restart_signal();

        let outcome = runner
            .run_once(&ShutdownToken::new(), &mut restart)
            .execute_with_deadline(DEADLINE)
            .await??;
        assert!(matches!(outcome, AttemptOutcome::Exited(exit) if exit.success()));
        assert!(runner.active_child().lock().is_none());

        // nothing has been written anywhere
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn output_is_framed_by_markers() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config(dir.path(), "/bin/sh", &["-c", "echo out; echo err >&2; exit 1"]);
        config.env = vec!["UNUSED=1".to_string()];
        config.stdout = "out.log".to_string();
        config.stderr = "&stdout".to_string();

        let runner = runner(dir.path(), config);
        let (_requester, mut restart) = restart_signal();
        let outcome = runner
            .run_once(&ShutdownToken::new(), &mut restart)
            .execute_with_deadline(DEADLINE)
            .await??;
        assert!(matches!(outcome, AttemptOutcome::Exited(exit) if !exit.success()));

        let output = fs::read_to_string(dir.path().join("out.log"))?;
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines.first(), Some(&PROC_START_MARKER));
        assert_eq!(lines.last(), Some(&PROC_END_MARKER));
        assert!(lines.contains(&"out"));
        assert!(lines.contains(&"err"));
        Ok(())
    }

    #[tokio::test]
    async fn partial_lines_reach_the_sink_while_child_runs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config(dir.path(), "/bin/sh", &["-c", "printf 'progress 99%%'; exec sleep 30"]);
        config.stdout = "out.log".to_string();

        let runner = runner(dir.path(), config);
        let (_requester, mut restart) = restart_signal();
        let shutdown = ShutdownToken::new();
        let log = dir.path().join("out.log");

        let observe = async {
            loop {
                let content = fs::read_to_string(&log).unwrap_or_default();
                if content.contains("progress") {
                    shutdown.cancel();
                    return content;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        let (outcome, while_running) = async { tokio::join!(runner.run_once(&shutdown, &mut restart), observe) }
            .execute_with_deadline(DEADLINE)
            .await?;
        assert!(matches!(outcome?, AttemptOutcome::Stopped));

        assert_eq!(while_running, format!("{PROC_START_MARKER}\nprogress 99%"));
        assert_eq!(
            fs::read_to_string(&log)?,
            format!("{PROC_START_MARKER}\nprogress 99%\n{PROC_END_MARKER}\n")
        );
        Ok(())
    }

    #[tokio::test]
    async fn environment_and_working_directory_are_applied() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config(dir.path(), "/bin/sh", &["-c", "echo \"$GREETING\" > greeting"]);
        config.env = vec!["GREETING=hello".to_string()];

        let runner = runner(dir.path(), config);
        let (_requester, mut restart) = restart_signal();
        runner
            .run_once(&ShutdownToken::new(), &mut restart)
            .execute_with_deadline(DEADLINE)
            .await??;

        assert_eq!(fs::read_to_string(dir.path().join("greeting"))?, "hello\n");
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_terminates_the_child() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = runner(dir.path(), config(dir.path(), "/bin/sh", &["-c", "exec sleep 30"]));
        let (_requester, mut restart) = restart_signal();
        let shutdown = ShutdownToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let outcome = runner
            .run_once(&shutdown, &mut restart)
            .execute_with_deadline(DEADLINE)
            .await??;
        assert!(matches!(outcome, AttemptOutcome::Stopped));
        assert!(runner.active_child().lock().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn restart_terminates_stubborn_child() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let script = "trap '' INT; exec sleep 30";
        let runner = runner(dir.path(), config(dir.path(), "/bin/sh", &["-c", script]));
        let (requester, mut restart) = restart_signal();

        let trigger = requester.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.request();
        });

        let outcome = runner
            .run_once(&ShutdownToken::new(), &mut restart)
            .execute_with_deadline(DEADLINE)
            .await??;
        assert!(matches!(outcome, AttemptOutcome::Restarted));
        Ok(())
    }

    #[tokio::test]
    async fn unspawnable_executable() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_requester, mut restart) = restart_signal();

        let runner = runner(dir.path(), config(dir.path(), "missing-binary-name", &[]));
        let res = runner.run_once(&ShutdownToken::new(), &mut restart).await;
        assert!(matches!(res, Err(SupervisorError::ExecutableNotFound { .. })));

        // executable, but not something the OS can run
        let script = dir.path().join("broken");
        fs::write(&script, [0u8; 16])?;
        crate::helpers::make_executable(&script)?;

        let runner = self::runner(dir.path(), config(dir.path(), "broken", &[]));
        let res = runner.run_once(&ShutdownToken::new(), &mut restart).await;
        assert!(matches!(res, Err(SupervisorError::SpawnFailed { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_interrupts_resolution_update() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let context = RuntimeContext::new(dir.path().join("servisor"), dir.path().join("servisor.json"));
        let updater = Arc::new(MockUpdater::new(MockResult::Updated).with_delay(DEADLINE * 10));
        let runner = ProcessRunner::new(
            Arc::new(context),
            Arc::new(config(dir.path(), "missing-binary-name", &[])),
            Some(updater.clone()),
        );
        let (_requester, mut restart) = restart_signal();
        let shutdown = ShutdownToken::new();
        shutdown.cancel();

        let outcome = runner.run_once(&shutdown, &mut restart).timeboxed().await??;
        assert!(matches!(outcome, AttemptOutcome::Stopped));
        Ok(())
    }
}
