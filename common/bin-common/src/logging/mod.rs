// Copyright 2022-2023 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use std::io::IsTerminal;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

// don't call init so that we could attach additional layers
pub fn build_tracing_logger() -> impl tracing_subscriber::layer::SubscriberExt {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(default_tracing_fmt_layer(std::io::stderr))
        .with(default_tracing_env_filter())
}

pub fn default_tracing_env_filter() -> EnvFilter {
    if ::std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        // if the env value was not found, default to `INFO` level rather than `ERROR`
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy("")
    }
}

pub fn default_tracing_fmt_layer<S, W>(
    writer: W,
) -> impl tracing_subscriber::Layer<S> + Sync + Send + 'static
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Sync + Send + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        // service managers such as journald capture stderr, colour codes would only get in the way
        .with_ansi(std::io::stderr().is_terminal())
}

/// Installs the default subscriber. Does nothing if a global subscriber has already been set.
pub fn setup_tracing_logger() {
    use tracing_subscriber::util::SubscriberInitExt;
    if build_tracing_logger().try_init().is_err() {
        tracing::debug!("a global tracing subscriber has already been installed");
    }
}

pub fn banner(crate_name: &str, crate_version: &str) -> String {
    format!(
        r#"
      ___  ___ _ ____   _(_)___  ___  _ __
     / __|/ _ \ '__\ \ / / / __|/ _ \| '__|
     \__ \  __/ |   \ V /| \__ \ (_) | |
     |___/\___|_|    \_/ |_|___/\___/|_|

             ({crate_name} - version {crate_version})

    "#
    )
}

pub fn maybe_print_banner(crate_name: &str, crate_version: &str) {
    if std::io::stdout().is_terminal() {
        println!("{}", banner(crate_name, crate_version))
    }
}
