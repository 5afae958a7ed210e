//! Async bridge for blocking callers.
//!
//! The management API exposes a handful of synchronous-from-the-caller's-view
//! entry points (ad-hoc object sourcing, lifecycle teardown) that internally
//! await a future. This module provides the single place where that bridge
//! happens, reusing the caller's Tokio runtime when one is active.

use anyhow::anyhow;
use std::future::Future;
use tokio::{runtime::Handle, task};

/// Run an async future to completion from synchronous code.
///
/// # Arguments
/// - `future`: The future to drive.
///
/// # Returns
/// Returns the future's output, or an error when no runtime is active and a
/// fallback runtime cannot be created.
///
/// # Notes
/// - Inside a Tokio runtime the current worker is moved to a blocking slot so
///   sibling tasks keep making progress.
/// - Outside a runtime a throwaway current-thread runtime drives the future.
pub fn block_on_future<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        task::block_in_place(|| handle.block_on(future))
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| anyhow!(error))?
            .block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drives_future_without_a_runtime() {
        let value = block_on_future(async { Ok(41 + 1) }).expect("future completes");
        assert_eq!(value, 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reuses_the_current_runtime() {
        let value = block_on_future(async { Ok("ok") }).expect("future completes");
        assert_eq!(value, "ok");
    }
}
