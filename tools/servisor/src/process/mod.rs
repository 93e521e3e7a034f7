// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod child;
pub(crate) mod resolver;
pub(crate) mod runner;
pub(crate) mod terminate;

pub(crate) use resolver::{ExecutableResolver, ResolutionMode};
pub(crate) use runner::{AttemptOutcome, ProcessRunner};
