// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Quit,
}

impl Display for ShutdownSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Quit => write!(f, "SIGQUIT"),
        }
    }
}

/// Waits for any of the process-level shutdown signals:
/// SIGINT, SIGTERM or SIGQUIT on unix and ctrl-c elsewhere.
pub async fn wait_for_signal() -> std::io::Result<ShutdownSignal> {
    #[cfg(unix)]
    let received = {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigquit = signal(SignalKind::quit())?;

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                ShutdownSignal::Interrupt
            },
            _ = sigterm.recv() => ShutdownSignal::Terminate,
            _ = sigquit.recv() => ShutdownSignal::Quit,
        }
    };

    #[cfg(not(unix))]
    let received = {
        tokio::signal::ctrl_c().await?;
        ShutdownSignal::Interrupt
    };

    info!("received {received}");
    Ok(received)
}

/// Listener of reload requests, delivered as SIGHUP on unix.
/// Never fires on other platforms.
#[derive(Debug)]
pub struct ReloadSignal {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    /// Starts listening. Must be called within a tokio runtime.
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(ReloadSignal {
                hangup: signal(SignalKind::hangup())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(ReloadSignal {})
        }
    }

    /// Waits for the next reload request.
    pub async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if self.hangup.recv().await.is_some() {
                info!("received SIGHUP");
                return;
            }
        }

        std::future::pending::<()>().await
    }
}
