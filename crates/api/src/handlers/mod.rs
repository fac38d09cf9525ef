pub mod prompts;
pub mod queue;
pub mod runs;

use std::future::Future;

use crate::error::{AppError, AppResult};

/// Run `work` on its own task and wait for it.
///
/// The task keeps going if the request is dropped (client disconnect or
/// request timeout), so an invocation that already started is always
/// recorded by the process that started it.
pub(crate) async fn detached<F, T>(work: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work).await.map_err(|e| {
        tracing::error!(error = %e, "Detached queue task did not finish");
        AppError::InternalError(e.to_string())
    })?
}
