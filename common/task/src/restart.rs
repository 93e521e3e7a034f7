// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

//! Coalescing restart notification.
//!
//! At most one restart request is ever buffered. Raising the signal never blocks:
//! if a request is already pending, the new one is dropped.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Creates a connected requester/listener pair.
pub fn restart_signal() -> (RestartRequester, RestartListener) {
    let (tx, rx) = mpsc::channel(1);
    (RestartRequester { tx }, RestartListener { rx })
}

#[derive(Debug, Clone)]
pub struct RestartRequester {
    tx: mpsc::Sender<()>,
}

impl RestartRequester {
    /// Raises the restart signal.
    ///
    /// Returns `true` if the request got buffered and `false` if it was coalesced
    /// with an already pending one (or nobody is listening anymore).
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("a restart is already pending - dropping the request");
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!("the restart listener is gone - dropping the request");
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct RestartListener {
    rx: mpsc::Receiver<()>,
}

impl RestartListener {
    /// Waits for the next restart request.
    ///
    /// If every requester has been dropped this never resolves, since no restart could ever arrive.
    pub async fn recv(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await
        }
    }

    /// Discards any pending request, returning how many got dropped.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}
