// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::ServiceConfig;
use crate::context::RuntimeContext;
use crate::error::{ServisorError, SupervisorError};
use crate::service_manager::platform_service_manager;
use crate::supervisor::handle::{launched_by_service_manager, ServiceProcessHandle};
use crate::supervisor::{LifecyclePhase, Supervisor};
use crate::updater::{HttpUpdater, Updater};
use servisor_bin_common::logging::{maybe_print_banner, setup_tracing_logger};
use servisor_task::{wait_for_signal, ReloadSignal, ShutdownToken};
use std::sync::Arc;
use tokio::runtime;
use tracing::{error, info, warn};

pub(crate) fn execute(context: RuntimeContext, no_banner: bool) -> Result<(), ServisorError> {
    let config = ServiceConfig::read_from_file(context.config_path())?;
    if !config.debug.disable_logs {
        setup_tracing_logger();
    }

    let interactive = !launched_by_service_manager();
    if interactive && !no_banner {
        maybe_print_banner(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    }

    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| ServisorError::RuntimeCreationFailure { source })?;

    rt.block_on(run(context, config, interactive))
}

async fn run(
    context: RuntimeContext,
    config: ServiceConfig,
    interactive: bool,
) -> Result<(), ServisorError> {
    let updater: Option<Arc<dyn Updater>> = if config.update.has_endpoint() {
        Some(Arc::new(HttpUpdater::new(&config)?))
    } else {
        None
    };

    let manager = if interactive {
        None
    } else {
        platform_service_manager()
            .inspect_err(|err| warn!("self-stop will not go through the service manager: {err}"))
            .ok()
    };

    let handle = Arc::new(ServiceProcessHandle::new(&config.name, interactive, manager));
    let stop_requested = handle.stop_requested();
    let mut reload =
        ReloadSignal::new().map_err(|source| ServisorError::SignalListenerFailure { source })?;

    info!("supervising {} ({})", config.display_name, config.exec);
    let supervisor = Supervisor::new(Arc::new(context), Arc::new(config), updater);
    supervisor.start(handle)?;

    let res = wait_for_shutdown(&supervisor, &stop_requested, &mut reload).await;

    match supervisor.stop().await {
        Ok(()) | Err(SupervisorError::NotRunning) => {}
        Err(err) => error!("failed to stop the supervisor: {err}"),
    }
    res
}

/// Waits for whatever ends the foreground run first: a process signal or a self-stop after a fault.
/// Reload requests restart the child in the meantime.
async fn wait_for_shutdown(
    supervisor: &Supervisor,
    stop_requested: &ShutdownToken,
    reload: &mut ReloadSignal,
) -> Result<(), ServisorError> {
    let shutdown_signal = wait_for_signal();
    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            signal = &mut shutdown_signal => {
                let signal = signal.map_err(|source| ServisorError::SignalListenerFailure { source })?;
                info!("shutting down after receiving {signal}");
                return Ok(());
            }
            _ = stop_requested.cancelled() => return Err(ServisorError::FaultedShutdown),
            _ = supervisor.wait_for_phase(LifecyclePhase::Stopped) => return Err(ServisorError::FaultedShutdown),
            _ = reload.recv() => {
                if supervisor.request_restart() {
                    info!("restarting the process on request");
                } else {
                    info!("a restart is already pending");
                }
            }
        }
    }
}
