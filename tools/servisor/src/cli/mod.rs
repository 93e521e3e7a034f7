// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::context::RuntimeContext;
use crate::error::ServisorError;
use crate::service_manager::ControlAction;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod control;
mod service;

#[derive(Parser, Debug)]
#[clap(author = "Nymtech", version, about)]
pub(crate) struct Cli {
    /// Path pointing to the service configuration file.
    /// Defaults to `<binary name>.json` located next to the servisor binary.
    #[clap(short, long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Flag used for disabling the printed banner in tty.
    #[clap(long, global = true)]
    pub(crate) no_banner: bool,

    #[clap(subcommand)]
    command: Commands,
}

impl Cli {
    /// Control action corresponding to the chosen command, if it is one.
    pub(crate) fn control_action(&self) -> Option<ControlAction> {
        self.command.control_action()
    }

    pub(crate) fn execute(self) -> Result<(), ServisorError> {
        let context = RuntimeContext::for_current_process(self.config)?;

        match self.command.control_action() {
            Some(action) => control::execute(action, &context),
            None => service::execute(context, self.no_banner),
        }
    }
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Register servisor with the platform service manager
    Install,

    /// Remove the servisor service from the platform service manager
    Uninstall,

    /// Start the installed service
    Start,

    /// Stop the installed service
    Stop,

    /// Restart the installed service
    Restart,

    /// Show the state of the installed service
    Status,

    /// Supervise the configured program in the foreground.
    /// This is what the service manager runs.
    Service,
}

impl Commands {
    fn control_action(&self) -> Option<ControlAction> {
        match self {
            Commands::Install => Some(ControlAction::Install),
            Commands::Uninstall => Some(ControlAction::Uninstall),
            Commands::Start => Some(ControlAction::Start),
            Commands::Stop => Some(ControlAction::Stop),
            Commands::Restart => Some(ControlAction::Restart),
            Commands::Status => Some(ControlAction::Status),
            Commands::Service => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn every_control_action_has_a_verb() {
        for action in ControlAction::ALL {
            let cli = Cli::try_parse_from(["servisor", action.as_str()]).unwrap();
            assert_eq!(cli.control_action(), Some(action));
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["servisor", "service", "--config", "/etc/my-node.json"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/my-node.json")));
        assert_eq!(cli.command, Commands::Service);
        assert!(cli.control_action().is_none());

        assert!(Cli::try_parse_from(["servisor", "reinstall"]).is_err());
    }
}
