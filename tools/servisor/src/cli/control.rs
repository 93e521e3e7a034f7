// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::ServiceConfig;
use crate::context::RuntimeContext;
use crate::error::ServisorError;
use crate::process::{ExecutableResolver, ResolutionMode};
use crate::service_manager::{
    platform_service_manager, ControlAction, ServiceDefinition, ServiceManager,
};
use servisor_bin_common::logging::setup_tracing_logger;
use tracing::{info, warn};

pub(crate) fn execute(action: ControlAction, context: &RuntimeContext) -> Result<(), ServisorError> {
    let config = ServiceConfig::read_from_file(context.config_path())?;
    if !config.debug.disable_logs {
        setup_tracing_logger();
    }

    let manager = platform_service_manager()?;
    if let Some(message) = run_action(manager.as_ref(), action, context, &config)? {
        println!("{message}");
    }
    Ok(())
}

/// Performs the action and returns the message to present to the user, if any.
fn run_action(
    manager: &dyn ServiceManager,
    action: ControlAction,
    context: &RuntimeContext,
    config: &ServiceConfig,
) -> Result<Option<String>, ServisorError> {
    let name = config.name.as_str();
    info!("executing '{action}' for {name}");

    match action {
        ControlAction::Install => {
            // the program might only get delivered by the first update, so a miss is not fatal
            let resolver = ExecutableResolver::new(context, config, None);
            let executable =
                futures::executor::block_on(resolver.resolve(ResolutionMode::Control))?;
            if !executable.is_absolute() {
                warn!(
                    "'{}' will have to be present by the time the service starts",
                    executable.display()
                );
            }

            manager.install(&ServiceDefinition::new(context, config))?;
            Ok(Some(format!("{name} has been installed")))
        }
        ControlAction::Uninstall => {
            manager.uninstall(name)?;
            Ok(Some(format!("{name} has been uninstalled")))
        }
        ControlAction::Start => {
            manager.start(name)?;
            Ok(None)
        }
        ControlAction::Stop => {
            manager.stop(name)?;
            Ok(None)
        }
        ControlAction::Restart => {
            manager.restart(name)?;
            Ok(None)
        }
        ControlAction::Status => {
            let status = manager.status(name)?;
            Ok(Some(format!("{name}: {status}")))
        }
    }
}
