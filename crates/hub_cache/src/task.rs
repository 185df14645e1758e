//! Running blocking filesystem work from async context.

use crate::content_cache::CacheError;

/// Runs `task` on the blocking thread pool.
///
/// Panics inside the task are resumed on the calling task; an aborted task is
/// mapped to an I/O error.
pub(crate) async fn run_blocking<T>(
    task: impl FnOnce() -> Result<T, CacheError> + Send + 'static,
) -> Result<T, CacheError>
where
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result,
        Err(err) => match err.try_into_panic() {
            Ok(panic) => std::panic::resume_unwind(panic),
            Err(err) => Err(CacheError::Io(
                "blocking task was aborted".to_string(),
                std::io::Error::other(err),
            )),
        },
    }
}
