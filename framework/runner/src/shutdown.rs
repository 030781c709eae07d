use tokio::signal;

pub use swarm_core::prelude::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};

/// Turn Ctrl-C into a graceful shutdown. Pressing it again while shutting down has no further effect.
pub(crate) fn start_shutdown_listener(
    runtime: &tokio::runtime::Runtime,
) -> anyhow::Result<ShutdownHandle> {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        loop {
            if let Err(e) = signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {e:?}");
                return;
            }

            if listener_handle.shutdown() {
                println!("Received shutdown signal, stopping workers...");
            } else {
                println!("Already shutting down, waiting for workers to report");
            }
        }
    });

    Ok(handle)
}
