// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

#![warn(clippy::expect_used)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::dbg_macro)]

use crate::service_manager::ControlAction;
use clap::Parser;
use std::process::ExitCode;

pub(crate) mod cli;
pub(crate) mod config;
pub(crate) mod context;
pub(crate) mod error;
pub(crate) mod helpers;
pub(crate) mod logs;
pub(crate) mod process;
pub(crate) mod service_manager;
pub(crate) mod supervisor;
pub(crate) mod updater;

fn main() -> ExitCode {
    let args = cli::Cli::parse();
    let control_action = args.control_action();

    match args.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("FATAL: {err}");
            if let Some(action) = control_action {
                eprintln!(
                    "failed to execute '{action}'. Valid actions: {}",
                    ControlAction::valid_actions()
                );
            }
            err.exit_code()
        }
    }
}
