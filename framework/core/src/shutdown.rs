use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{Receiver, Sender};
use tokio::sync::Mutex;

/// Shared trigger for a graceful shutdown.
///
/// Only the first call to [ShutdownHandle::shutdown] broadcasts the signal, so an interrupt that
/// arrives while a shutdown is already in progress does not restart it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
    requested: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request a shutdown. Returns `true` if this call initiated it and `false` if a shutdown had
    /// already been requested.
    pub fn shutdown(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            log::debug!("Shutdown already in progress");
            return false;
        }

        if let Err(e) = self.sender.send(()) {
            // Will fail if nobody is listening for a shutdown signal, in which case the log message
            // can be ignored.
            log::warn!("Failed to send shutdown signal: {e:?}");
        }

        true
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe(), self.requested.clone())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: Arc<Mutex<Receiver<()>>>,
    requested: Arc<AtomicBool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<()>, requested: Arc<AtomicBool>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            requested,
        }
    }

    /// Point in time check if the shutdown signal has been received. If this returns true then
    /// work should be stopped so that the worker can report and exit.
    pub fn should_shutdown(&mut self) -> bool {
        if self.requested.load(Ordering::SeqCst) {
            return true;
        }

        match self.receiver.try_lock() {
            Ok(mut guard) => match guard.try_recv() {
                Ok(_) => true,
                Err(TryRecvError::Closed) => true,
                // If the receiver is empty or lagged then we should not shutdown.
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Wait for the shutdown signal to be received. It is safe to race this with another future so
    /// that the shutdown signal can be used to cancel other work in progress.
    ///
    /// Listeners created after the signal was sent still observe it.
    pub async fn wait_for_shutdown(&mut self) {
        if self.requested.load(Ordering::SeqCst) {
            return;
        }

        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await {
                Ok(()) | Err(RecvError::Closed) => return,
                Err(RecvError::Lagged(_)) => {
                    if self.requested.load(Ordering::SeqCst) {
                        return;
                    }
                }
            }
        }
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Execution cancelled by shutdown signal".to_string(),
        }
    }
}
