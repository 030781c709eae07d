use std::future::Future;
use std::time::Duration;

use crate::shutdown::{ShutdownHandle, ShutdownSignalError};

/// Runs async work for the global hooks on the coordinator's runtime.
///
/// Virtual users run on their worker's own runtime and never see this executor.
#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    shutdown_handle: ShutdownHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, shutdown_handle: ShutdownHandle) -> Self {
        Self {
            runtime,
            shutdown_handle,
        }
    }

    /// Block the calling hook until `fut` completes.
    ///
    /// An interrupt cancels the future and returns a [ShutdownSignalError].
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut shutdown_listener = self.shutdown_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = shutdown_listener.wait_for_shutdown() => {
                    Err(anyhow::anyhow!(ShutdownSignalError::default()))
                },
            }
        })
    }

    /// Like [Executor::execute_in_place] but gives up once `timeout` has passed.
    pub fn execute_with_timeout<T>(
        &self,
        timeout: Duration,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        self.execute_in_place(async move {
            tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| anyhow::anyhow!("Timed out after {timeout:?}"))?
        })
    }

    /// Drive the coordinator, which watches for shutdown on its own.
    pub(crate) fn block_on<T>(&self, fut: impl Future<Output = T>) -> T {
        self.runtime.block_on(fut)
    }
}
