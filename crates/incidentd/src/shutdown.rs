//! Process-wide shutdown signal for background tasks.

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            sender: watch::channel(false).0,
        }
    }

    pub fn trigger(&self) {
        // send_replace works with no listeners subscribed
        self.sender.send_replace(true);
        debug!("Shutdown signalled");
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown is signalled or the signal is dropped.
    ///
    /// Safe to race against other futures in `select!`.
    pub async fn wait(&mut self) {
        loop {
            if self.is_shutdown() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
