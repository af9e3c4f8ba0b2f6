use std::collections::HashSet;
use std::future::Future;

use tracing::{debug, warn};

use crate::collector_core::Page;
use crate::config::RetryPolicy;
use crate::error::{ApiError, ApiResult};

/// Runs `call` under the policy's per-call timeout, retrying transient
/// failures with exponential backoff. Non-transient failures return at once.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(Ok(v)) => return Ok(v),
            Ok(Err(e)) => e,
            Err(_) => ApiError::timeout(operation),
        };
        if !err.is_retryable() || attempt >= max_attempts {
            return Err(err);
        }
        let delay = policy.backoff(attempt);
        debug!(operation, attempt, ?delay, error = %err, "retrying transient failure");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Follows continuation tokens until the listing is exhausted.
///
/// Each page goes through [`with_retry`]. A token that comes back twice, or
/// more than `max_pages` pages, ends the listing. If a page fails the items
/// gathered so far are kept and the error is returned alongside them.
pub async fn drain_pages<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    max_pages: usize,
    mut fetch: F,
) -> (Vec<T>, Option<ApiError>)
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut token: Option<String> = None;
    for _ in 0..max_pages.max(1) {
        let page = match with_retry(policy, operation, || fetch(token.clone())).await {
            Ok(page) => page,
            Err(e) => return (items, Some(e)),
        };
        items.extend(page.items);
        match page.next_token.filter(|t| !t.is_empty()) {
            None => return (items, None),
            Some(next) => {
                if !seen.insert(next.clone()) {
                    warn!(operation, token = %next, "pagination token repeated; stopping");
                    return (items, None);
                }
                token = Some(next);
            }
        }
    }
    warn!(operation, max_pages, "page limit reached; listing truncated");
    (items, None)
}
