use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

/// Requests allowed per minute across the whole API
pub const REQUESTS_PER_MINUTE: u32 = 120;

/// Tighter budget for mutating task endpoints
pub const TASK_REQUESTS_PER_MINUTE: u32 = 30;

#[derive(Clone)]
pub struct RateLimitState {
    pub general: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    pub tasks: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitState {
    pub fn new() -> Self {
        let general_quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap());
        let task_quota = Quota::per_minute(NonZeroU32::new(TASK_REQUESTS_PER_MINUTE).unwrap());
        Self {
            general: Arc::new(RateLimiter::direct(general_quota)),
            tasks: Arc::new(RateLimiter::direct(task_quota)),
        }
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimitState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path();
    let is_task_write = path.starts_with("/tasks") && request.method() == "POST";

    let limiter = if is_task_write { &state.tasks } else { &state.general };
    if limiter.check().is_err() {
        warn!("rate limit exceeded for {path}");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_limiters_admit_requests() {
        let state = RateLimitState::new();
        assert!(state.general.check().is_ok());
        assert!(state.tasks.check().is_ok());
    }

    #[test]
    fn task_quota_exhausts_before_general() {
        let state = RateLimitState::new();
        let mut admitted = 0;
        while state.tasks.check().is_ok() {
            admitted += 1;
            if admitted > TASK_REQUESTS_PER_MINUTE {
                break;
            }
        }
        assert_eq!(admitted, TASK_REQUESTS_PER_MINUTE);
    }
}
