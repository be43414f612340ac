//! Usage: Run blocking token-cache work on the async runtime with a stable label.

use crate::shared::error::{AppError, AppResult};

pub async fn run<T, E>(
    label: &'static str,
    f: impl FnOnce() -> Result<T, E> + Send + 'static,
) -> AppResult<T>
where
    T: Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(Into::into),
        Err(join_err) => {
            // Panic payloads may carry user content; log only the label.
            if join_err.is_panic() {
                tracing::error!(label, "blocking task panicked");
                return Err(AppError::new("TASK_JOIN", format!("{label}: task panicked")));
            }
            tracing::warn!(label, "blocking task cancelled");
            Err(AppError::new("TASK_JOIN", format!("{label}: task cancelled")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::run;
    use crate::shared::error::AppResult;

    #[tokio::test]
    async fn run_returns_closure_result() {
        let value = run("test_ok", || -> AppResult<i64> { Ok(42) })
            .await
            .expect("ok result");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn run_maps_panics_to_task_join() {
        let err = run("test_panic", || -> AppResult<()> { panic!("boom") })
            .await
            .expect_err("panic should surface as error");
        assert_eq!(err.code(), "TASK_JOIN");
    }
}
