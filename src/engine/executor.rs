use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{Error, Result};

/// Runs `op` against the locked state on tokio's blocking pool.
///
/// The owned guard travels into the blocking closure, so the lock is held
/// for the whole of `op` and released only when it returns or panics. If the
/// caller's future is dropped while `op` is still running, the lock stays held
/// until `op` finishes.
pub(crate) async fn run_locked<S, R, F>(state: &Arc<Mutex<S>>, op: F) -> Result<R>
where
    S: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut S) -> Result<R> + Send + 'static,
{
    let mut guard = state.clone().lock_owned().await;
    tokio::task::spawn_blocking(move || op(&mut *guard))
        .await
        .map_err(|e| Error::Internal(format!("blocking store task failed: {}", e)))?
}
