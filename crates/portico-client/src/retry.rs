//! Timeout and retry driver for outbound calls.
//!
//! [`run_with_retries`] runs one logical call as up to `max_attempts`
//! attempts. Each attempt gets a context whose deadline is the earlier of
//! its per-attempt budget and the overall budget, so the transport can
//! propagate the remaining time downstream. Only timeouts and channel
//! system errors are retried; any other failure is returned as is.
//!
//! Retries never re-run the inbound pipeline. The caller's closure is the
//! only thing invoked again.

use std::future::Future;

use portico_core::{BoxError, GatewayError, RequestContext, SystemError, TimeoutAndRetryOptions};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Runs `attempt` under `options`, retrying timeouts and system errors.
///
/// Options carried on `ctx` take precedence over `options`. The closure
/// receives the per-attempt context and the one-based attempt number.
///
/// # Errors
///
/// Returns [`ClientError::Timeout`] when the overall budget (or the
/// inbound deadline) runs out, [`ClientError::AttemptTimeout`] when the
/// last attempt timed out, and [`ClientError::Call`] with the last
/// attempt's error otherwise.
pub async fn run_with_retries<T, F, Fut>(
    ctx: &RequestContext,
    options: &TimeoutAndRetryOptions,
    mut attempt: F,
) -> ClientResult<T>
where
    F: FnMut(RequestContext, u32) -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
{
    let options = ctx.timeout_and_retry_options().unwrap_or(options);
    let mut overall = Instant::now() + options.overall_timeout;
    if let Some(deadline) = ctx.deadline() {
        overall = overall.min(deadline);
    }
    let max_attempts = options.max_attempts.max(1);

    let mut number = 0;
    loop {
        number += 1;
        if Instant::now() >= overall {
            return Err(ClientError::Timeout { attempts: number - 1 });
        }

        let attempt_deadline = (Instant::now() + options.per_attempt_timeout).min(overall);
        let attempt_ctx = ctx.with_deadline(attempt_deadline);

        let failure = match timeout_at(attempt_deadline, attempt(attempt_ctx, number)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if !is_retryable(err.as_ref()) => return Err(ClientError::Call(err)),
            Ok(Err(err)) => ClientError::Call(err),
            Err(_) if attempt_deadline >= overall => {
                return Err(ClientError::Timeout { attempts: number });
            }
            Err(_) => ClientError::AttemptTimeout { attempt: number },
        };

        if number >= max_attempts || Instant::now() + options.back_off >= overall {
            return Err(failure);
        }
        debug!(attempt = number, error = %failure, "retrying outbound call");
        sleep(options.back_off).await;
    }
}

/// Returns true for failures worth another attempt.
#[must_use]
pub fn is_retryable(err: &(dyn std::error::Error + 'static)) -> bool {
    err.downcast_ref::<GatewayError>()
        .is_some_and(GatewayError::is_channel_system)
        || SystemError::find(err).is_some()
}
