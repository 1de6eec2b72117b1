//! Cooperative shutdown signalling
//!
//! `main` holds the [`ShutdownTrigger`]; the dispatch loop and the executor
//! hold [`Shutdown`] receivers and check them between cycles and while a
//! command is running.

use tokio::sync::watch;

/// Create a linked trigger/receiver pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Sending side, fired once on Ctrl-C / SIGTERM
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving side, observed by long-running loops
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Has shutdown been requested
    #[cfg(test)]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested
    ///
    /// Never completes if the trigger is dropped without firing.
    pub async fn recv(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
