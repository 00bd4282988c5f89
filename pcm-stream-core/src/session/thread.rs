use std::thread;

use crate::models::error::StreamError;
use crate::signal::StopHandle;

/// A streaming loop running on its own named thread.
pub struct StreamThread<T> {
    stop: StopHandle,
    handle: thread::JoinHandle<T>,
}

impl<T: Send + 'static> StreamThread<T> {
    pub(crate) fn spawn<F>(name: &str, stop: StopHandle, body: F) -> Result<Self, StreamError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|e| StreamError::AllocationFailure(format!("failed to spawn {} thread: {}", name, e)))?;
        Ok(Self { stop, handle })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask the loop to end at its next wait. Does not block.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to return.
    pub fn join(self) -> Result<T, StreamError> {
        self.handle
            .join()
            .map_err(|_| StreamError::InvalidState("streaming thread panicked".into()))
    }
}
