use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::RequestConfig;
use crate::error::{BackendError, BackendResult};

/// Run `op` with exponential backoff between attempts.
///
/// Gives up after `max_retries` retries and reports the last error as
/// [`BackendError::Unavailable`].
pub(crate) async fn call_with_retries<T, F, Fut>(
    backend: &str,
    request_config: &RequestConfig,
    mut op: F,
) -> BackendResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendResult<T>>,
{
    let mut last_error = None;
    let mut retries = 0;

    while retries <= request_config.max_retries {
        if retries > 0 {
            let delay =
                Duration::from_millis(request_config.retry_delay_ms * (2_u64.pow(retries - 1)));
            warn!(
                backend = %backend,
                retry = retries,
                delay_ms = delay.as_millis(),
                "Retrying backend request"
            );
            tokio::time::sleep(delay).await;
        }

        let start = Instant::now();

        match op().await {
            Ok(value) => {
                info!(
                    backend = %backend,
                    latency_ms = start.elapsed().as_millis(),
                    "Backend call succeeded"
                );
                return Ok(value);
            }
            Err(e) => {
                error!(
                    backend = %backend,
                    error = %e,
                    latency_ms = start.elapsed().as_millis(),
                    retry = retries,
                    "Backend call failed"
                );
                last_error = Some(e);
                retries += 1;
            }
        }
    }

    Err(BackendError::Unavailable {
        backend: backend.to_string(),
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string()),
        retries,
    })
}

/// Map a transport error, distinguishing timeouts.
pub(crate) fn transport_error(e: reqwest::Error, timeout_ms: u64) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout { timeout_ms }
    } else {
        BackendError::Http(e)
    }
}

/// Turn a non-success response into [`BackendError::Api`].
pub(crate) async fn ensure_success(response: reqwest::Response) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_body = response.text().await.unwrap_or_default();
    Err(BackendError::Api {
        status: status.as_u16(),
        message: error_body,
    })
}
