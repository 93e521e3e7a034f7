// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::ServiceConfig;
use crate::context::RuntimeContext;
use crate::error::SupervisorError;
use crate::process::{AttemptOutcome, ProcessRunner};
use crate::updater::{UpdateScheduler, Updater};
use futures::FutureExt;
use parking_lot::Mutex;
use servisor_task::{restart_signal, RestartListener, RestartRequester, ShutdownToken, ShutdownTracker};
use std::any::Any;
use std::fmt::{self, Display, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

pub(crate) mod handle;

pub(crate) use handle::ServiceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecyclePhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl Display for LifecyclePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Stopped => f.write_str("stopped"),
            LifecyclePhase::Starting => f.write_str("starting"),
            LifecyclePhase::Running => f.write_str("running"),
            LifecyclePhase::Stopping => f.write_str("stopping"),
        }
    }
}

/// Per Start/Stop cycle state. Every signal is created anew on `start` and dropped at the end of `stop`.
#[derive(Default)]
struct SupervisorState {
    shutdown: Option<ShutdownToken>,
    restart: Option<RestartRequester>,
    tracker: Option<ShutdownTracker>,
}

struct SupervisorInner {
    config: Arc<ServiceConfig>,
    updater: Option<Arc<dyn Updater>>,
    runner: ProcessRunner,

    // only ever modified while holding the state lock
    phase: watch::Sender<LifecyclePhase>,
    state: Mutex<SupervisorState>,

    attempts: AtomicU64,
}

/// Keeps the configured executable running until stopped.
#[derive(Clone)]
pub(crate) struct Supervisor {
    inner: Arc<SupervisorInner>,
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown fault"
    }
}

impl Supervisor {
    pub(crate) fn new(
        context: Arc<RuntimeContext>,
        config: Arc<ServiceConfig>,
        updater: Option<Arc<dyn Updater>>,
    ) -> Self {
        let runner = ProcessRunner::new(context, config.clone(), updater.clone());
        let (phase, _) = watch::channel(LifecyclePhase::Stopped);

        Supervisor {
            inner: Arc::new(SupervisorInner {
                config,
                updater,
                runner,
                phase,
                state: Mutex::new(SupervisorState::default()),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn phase(&self) -> LifecyclePhase {
        *self.inner.phase.borrow()
    }

    #[cfg(test)]
    /// Pid of the currently running child, if any.
    pub(crate) fn active_child(&self) -> Option<u32> {
        *self.inner.runner.active_child().lock()
    }

    #[cfg(test)]
    /// Number of execution attempts started so far.
    pub(crate) fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Raises the restart signal. Returns `false` if it got coalesced or the supervisor isn't running.
    pub(crate) fn request_restart(&self) -> bool {
        match &self.inner.state.lock().restart {
            Some(restart) => restart.request(),
            None => false,
        }
    }

    pub(crate) async fn wait_for_phase(&self, phase: LifecyclePhase) {
        let mut receiver = self.inner.phase.subscribe();
        // the sender lives as long as `self`, so this can't fail
        let _ = receiver.wait_for(|current| *current == phase).await;
    }

    #[cfg(test)]
    /// Join group of the current run. `None` while stopped.
    pub(crate) fn task_tracker(&self) -> Option<ShutdownTracker> {
        self.inner.state.lock().tracker.clone()
    }

    #[cfg(test)]
    pub(crate) fn tracked_tasks(&self) -> usize {
        self.task_tracker()
            .map(|tracker| tracker.tracked_tasks())
            .unwrap_or_default()
    }

    fn set_phase(&self, _state: &mut SupervisorState, phase: LifecyclePhase) {
        let previous = self.inner.phase.send_replace(phase);
        debug!("supervisor: {previous} -> {phase}");
    }

    fn scheduler(&self, restart: RestartRequester) -> Option<UpdateScheduler> {
        let updater = self.inner.updater.clone()?;
        if !self.inner.config.update.has_endpoint() {
            return None;
        }
        Some(UpdateScheduler::new(
            updater,
            self.inner.config.debug.update_poll_interval,
            restart,
        ))
    }

    /// Launches the run loop (and the update scheduler, if enabled) and returns immediately.
    /// Must be called within a tokio runtime.
    pub(crate) fn start(&self, handle: Arc<dyn ServiceHandle>) -> Result<(), SupervisorError> {
        let mut state = self.inner.state.lock();
        if self.phase() != LifecyclePhase::Stopped {
            return Err(SupervisorError::AlreadyRunning);
        }
        info!("starting {}", self.inner.config.display_name);
        self.set_phase(&mut state, LifecyclePhase::Starting);

        let tracker = ShutdownTracker::new();
        let shutdown = tracker.clone_shutdown_token();
        let (restart, listener) = restart_signal();

        if let Some(scheduler) = self.scheduler(restart.clone()) {
            tracker.spawn(scheduler.run(shutdown.clone()));
        }
        tracker.spawn(self.clone().run(shutdown.clone(), listener, handle));

        state.shutdown = Some(shutdown);
        state.restart = Some(restart);
        state.tracker = Some(tracker);
        self.set_phase(&mut state, LifecyclePhase::Running);
        Ok(())
    }

    /// Shuts the child down and waits until every background task has finished.
    ///
    /// Calling it while another stop is already in progress is a no-op.
    pub(crate) async fn stop(&self) -> Result<(), SupervisorError> {
        let tracker = {
            let mut state = self.inner.state.lock();
            match self.phase() {
                LifecyclePhase::Stopped => return Err(SupervisorError::NotRunning),
                LifecyclePhase::Stopping => {
                    debug!("the supervisor is already stopping");
                    return Ok(());
                }
                LifecyclePhase::Starting | LifecyclePhase::Running => {}
            }
            info!("stopping {}", self.inner.config.display_name);
            self.set_phase(&mut state, LifecyclePhase::Stopping);
            state.tracker.clone()
        };

        if let Some(tracker) = tracker {
            tracker.shutdown().await;
        }

        let mut state = self.inner.state.lock();
        state.shutdown = None;
        state.restart = None;
        state.tracker = None;
        self.set_phase(&mut state, LifecyclePhase::Stopped);
        info!("{} has been stopped", self.inner.config.display_name);
        Ok(())
    }

    async fn run_attempts(&self, shutdown: &ShutdownToken, restart: &mut RestartListener) {
        let idle_interval = self.inner.config.debug.idle_interval;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    trace!("run loop: received shutdown");
                    break;
                }
                _ = tokio::time::sleep(idle_interval) => {}
            }

            // a restart requested while no child was running must not kill the next one
            let stale = restart.drain();
            if stale > 0 {
                debug!("dropping {stale} stale restart request(s)");
            }

            let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            debug!("starting attempt {attempt}");
            match self.inner.runner.run_once(shutdown, restart).await {
                Ok(AttemptOutcome::Stopped) => break,
                Ok(AttemptOutcome::Exited(exit)) => {
                    debug!("attempt {attempt} has finished: the process has exited with {exit}")
                }
                Ok(AttemptOutcome::Restarted) => debug!("attempt {attempt} has been restarted"),
                Err(err) => error!("attempt {attempt} has failed: {err}"),
            }
        }
    }

    async fn run(
        self,
        shutdown: ShutdownToken,
        mut restart: RestartListener,
        handle: Arc<dyn ServiceHandle>,
    ) {
        let attempts = AssertUnwindSafe(self.run_attempts(&shutdown, &mut restart));
        if let Err(panic) = attempts.catch_unwind().await {
            error!(
                "the run loop has encountered an unrecoverable fault: {}",
                panic_message(panic.as_ref())
            );
            self.handle_fault(handle.as_ref());
        }
        debug!("run loop: exiting");
    }

    fn handle_fault(&self, handle: &dyn ServiceHandle) {
        // the unwind has dropped the attempt, killing its child on the way
        if let Some(pid) = self.inner.runner.active_child().lock().take() {
            warn!("process {pid} has been killed as a result of the fault");
        }

        if handle.is_interactive() {
            // can't wait for our own task to finish from within it
            let supervisor = self.clone();
            tokio::spawn(async move {
                if let Err(err) = supervisor.stop().await {
                    warn!("failed to stop after the fault: {err}")
                }
            });
        } else {
            handle.request_stop();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::supervisor::handle::mock::MockHandle;
    use crate::updater::mock::{MockResult, MockUpdater};
    use servisor_test_utils::traits::Timeboxed;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    const IDLE: Duration = Duration::from_millis(50);
    const DEADLINE: Duration = Duration::from_secs(10);

    fn config(dir: &Path, exec: &str, args: &[&str]) -> ServiceConfig {
        let mut config = ServiceConfig {
            name: "test".to_string(),
            display_name: "test".to_string(),
            exec: exec.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            dir: dir.to_path_buf(),
            ..Default::default()
        };
        config.debug.idle_interval = IDLE;
        config.debug.update_poll_interval = Duration::from_millis(100);
        config.debug.graceful_shutdown_timeout = Duration::from_millis(500);
        config.debug.kill_timeout = Duration::from_secs(5);
        config
    }

    fn supervisor(dir: &Path, config: ServiceConfig, updater: Option<Arc<dyn Updater>>) -> Supervisor {
        let context = RuntimeContext::new(dir.join("servisor"), dir.join("servisor.json"));
        Supervisor::new(Arc::new(context), Arc::new(config), updater)
    }

    fn interactive() -> Arc<dyn ServiceHandle> {
        Arc::new(MockHandle::new(true))
    }

    /// Shell script appending a line to the file every time it starts.
    fn counting_script(counter: &Path) -> String {
        format!("echo started >> '{}'; exec sleep 30", counter.display())
    }

    fn started(counter: &Path) -> usize {
        fs::read_to_string(counter)
            .map(|content| content.lines().count())
            .unwrap_or_default()
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) -> anyhow::Result<()> {
        async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        .execute_with_deadline(DEADLINE)
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn lifecycle_misuse() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let supervisor = supervisor(dir.path(), config(dir.path(), "/bin/true", &[]), None);

        assert!(matches!(supervisor.stop().await, Err(SupervisorError::NotRunning)));
        assert_eq!(supervisor.phase(), LifecyclePhase::Stopped);

        supervisor.start(interactive())?;
        assert_eq!(supervisor.phase(), LifecyclePhase::Running);
        assert!(matches!(
            supervisor.start(interactive()),
            Err(SupervisorError::AlreadyRunning)
        ));

        supervisor.stop().await?;
        assert_eq!(supervisor.phase(), LifecyclePhase::Stopped);
        assert!(matches!(supervisor.stop().await, Err(SupervisorError::NotRunning)));

        // a fresh cycle is possible afterwards
        supervisor.start(interactive())?;
        supervisor.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn second_start_leaves_running_child_untouched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let counter = dir.path().join("started");
        let config = config(dir.path(), "/bin/sh", &["-c", &counting_script(&counter)]);
        let supervisor = supervisor(dir.path(), config, None);

        supervisor.start(interactive())?;
        wait_until(|| supervisor.active_child().is_some()).await?;
        let pid = supervisor.active_child();

        assert!(matches!(
            supervisor.start(interactive()),
            Err(SupervisorError::AlreadyRunning)
        ));
        tokio::time::sleep(IDLE * 3).await;
        assert_eq!(supervisor.active_child(), pid);
        assert_eq!(supervisor.attempts(), 1);

        supervisor.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn stop_waits_for_full_quiescence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let counter = dir.path().join("started");
        let mut config = config(dir.path(), "/bin/sh", &["-c", &counting_script(&counter)]);
        config.update.base_url = "https://updates.example.com".to_string();
        let updater: Arc<dyn Updater> = Arc::new(MockUpdater::new(MockResult::UpToDate));
        let supervisor = supervisor(dir.path(), config, Some(updater));

        supervisor.start(interactive())?;
        wait_until(|| supervisor.active_child().is_some()).await?;

        // run loop and update scheduler
        let tracker = supervisor.task_tracker().ok_or_else(|| anyhow::anyhow!("no tracker"))?;
        assert_eq!(tracker.tracked_tasks(), 2);

        supervisor.stop().execute_with_deadline(DEADLINE).await??;
        assert_eq!(tracker.tracked_tasks(), 0);
        assert_eq!(supervisor.tracked_tasks(), 0);
        assert!(supervisor.active_child().is_none());

        // and no further attempt is ever made
        let attempts = supervisor.attempts();
        tokio::time::sleep(IDLE * 4).await;
        assert_eq!(supervisor.attempts(), attempts);
        assert_eq!(started(&counter), 1);
        Ok(())
    }

    #[tokio::test]
    async fn natural_exits_get_retried() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let supervisor = supervisor(dir.path(), config(dir.path(), "/bin/true", &[]), None);

        supervisor.start(interactive())?;
        wait_until(|| supervisor.attempts() >= 3).await?;
        assert_eq!(supervisor.phase(), LifecyclePhase::Running);

        supervisor.stop().await?;
        // no sink was configured, so nothing got written
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_executable_keeps_retrying() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), "definitely-not-an-existing-binary", &[]);
        let supervisor = supervisor(dir.path(), config, None);

        supervisor.start(interactive())?;
        wait_until(|| supervisor.attempts() >= 3).await?;
        assert_eq!(supervisor.phase(), LifecyclePhase::Running);

        supervisor.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn restart_replaces_the_child() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let counter = dir.path().join("started");
        let config = config(dir.path(), "/bin/sh", &["-c", &counting_script(&counter)]);
        let supervisor = supervisor(dir.path(), config, None);

        supervisor.start(interactive())?;
        wait_until(|| started(&counter) == 1 && supervisor.active_child().is_some()).await?;
        let first = supervisor.active_child();

        assert!(supervisor.request_restart());
        // coalesced with the pending one
        assert!(!supervisor.request_restart());

        wait_until(|| started(&counter) == 2 && supervisor.active_child().is_some()).await?;
        assert_ne!(supervisor.active_child(), first);

        // the duplicate request did not cause another restart
        tokio::time::sleep(IDLE * 4).await;
        assert_eq!(started(&counter), 2);

        supervisor.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn restart_while_idle_is_dropped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let counter = dir.path().join("started");
        let mut config = config(dir.path(), "/bin/sh", &["-c", &counting_script(&counter)]);
        config.debug.idle_interval = Duration::from_millis(300);
        let supervisor = supervisor(dir.path(), config, None);

        supervisor.start(interactive())?;
        // still within the initial idle wait
        assert!(supervisor.request_restart());

        wait_until(|| started(&counter) == 1 && supervisor.active_child().is_some()).await?;
        let child = supervisor.active_child();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(supervisor.active_child(), child);
        assert_eq!(supervisor.attempts(), 1);

        supervisor.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn update_triggers_restart() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let counter = dir.path().join("started");
        let mut config = config(dir.path(), "/bin/sh", &["-c", &counting_script(&counter)]);
        config.update.base_url = "https://updates.example.com".to_string();
        let updater: Arc<MockUpdater> = Arc::new(
            MockUpdater::new(MockResult::UpToDate).with_results(vec![
                MockResult::UpToDate,
                MockResult::UpToDate,
                MockResult::Updated,
            ]),
        );
        let supervisor = supervisor(dir.path(), config, Some(updater.clone() as Arc<dyn Updater>));

        supervisor.start(interactive())?;
        wait_until(|| started(&counter) >= 2).await?;
        assert!(updater.calls() >= 3);

        supervisor.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn executable_is_resolved_again_after_update() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let bin_dir = dir.path().join("bin");
        let work_dir = dir.path().join("work");
        fs::create_dir_all(&bin_dir)?;
        fs::create_dir_all(&work_dir)?;

        let marker = dir.path().join("versions");
        let script = |version: &str| {
            format!("#!/bin/sh\necho {version} >> '{}'\nexec sleep 30\n", marker.display())
        };

        // only present in the working directory to begin with
        let installed = work_dir.join("my-node");
        fs::write(&installed, script("old"))?;
        crate::helpers::make_executable(&installed)?;

        let mut config = config(&work_dir, "my-node", &[]);
        config.update.base_url = "https://updates.example.com".to_string();

        // the update lands next to servisor, which takes precedence over the working directory
        let updater: Arc<dyn Updater> = Arc::new(
            MockUpdater::new(MockResult::UpToDate)
                .with_results(vec![MockResult::UpToDate, MockResult::Updated])
                .staging(bin_dir.join("my-node"), &script("new")),
        );
        let context = RuntimeContext::new(bin_dir.join("servisor"), dir.path().join("servisor.json"));
        let supervisor = Supervisor::new(Arc::new(context), Arc::new(config), Some(updater));

        supervisor.start(interactive())?;
        wait_until(|| fs::read_to_string(&marker).unwrap_or_default() == "old\nnew\n").await?;
        assert!(supervisor.active_child().is_some());

        supervisor.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn fault_in_interactive_mode_stops_supervisor() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), "definitely-not-an-existing-binary", &[]);
        let updater: Arc<dyn Updater> = Arc::new(MockUpdater::new(MockResult::Panic));
        let supervisor = supervisor(dir.path(), config, Some(updater));

        supervisor.start(interactive())?;
        supervisor
            .wait_for_phase(LifecyclePhase::Stopped)
            .execute_with_deadline(DEADLINE)
            .await?;
        assert_eq!(supervisor.tracked_tasks(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn fault_under_service_manager_requests_stop() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), "definitely-not-an-existing-binary", &[]);
        let updater: Arc<dyn Updater> = Arc::new(MockUpdater::new(MockResult::Panic));
        let supervisor = supervisor(dir.path(), config, Some(updater));
        let handle = Arc::new(MockHandle::new(false));

        supervisor.start(handle.clone())?;
        wait_until(|| handle.stop_requests() == 1).await?;

        // the service manager is responsible for stopping us
        assert_eq!(supervisor.phase(), LifecyclePhase::Running);
        supervisor.stop().timeboxed().await??;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_stops() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), "/bin/sh", &["-c", "trap '' INT; exec sleep 30"]);
        let supervisor = supervisor(dir.path(), config, None);

        supervisor.start(interactive())?;
        wait_until(|| supervisor.active_child().is_some()).await?;

        let (first, second) = tokio::join!(supervisor.stop(), async {
            supervisor.wait_for_phase(LifecyclePhase::Stopping).await;
            supervisor.stop().await
        });
        first?;
        second?;
        assert_eq!(supervisor.phase(), LifecyclePhase::Stopped);
        Ok(())
    }
}
