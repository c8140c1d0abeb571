//! Per-request context threaded explicitly through every service call.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::UserId;

/// Bound applied to every outbound call when the caller supplies no deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Returned when a bounded call does not finish before the request deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineExceeded;

impl std::fmt::Display for DeadlineExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("deadline exceeded")
    }
}

impl std::error::Error for DeadlineExceeded {}

/// Identity and deadline of the request being served.
///
/// Built once at the edge (HTTP handler, consumer loop) and passed down by
/// reference. Every downstream call is wrapped with [`RequestContext::bound`],
/// so a slow dependency fails the request instead of blocking it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    caller: Option<UserId>,
    deadline: Instant,
    per_call_timeout: Duration,
}

impl RequestContext {
    /// Context for a request with the default timeout and no authenticated caller.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CALL_TIMEOUT)
    }

    /// Context whose overall deadline and per-call bound are both `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            caller: None,
            deadline: Instant::now() + timeout,
            per_call_timeout: timeout,
        }
    }

    /// Attaches the authenticated caller.
    pub fn for_caller(mut self, user_id: UserId) -> Self {
        self.caller = Some(user_id);
        self
    }

    /// Tightens the overall deadline. A later deadline than the current one is ignored.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        if deadline < self.deadline {
            self.deadline = deadline;
        }
        self
    }

    pub fn caller(&self) -> Option<UserId> {
        self.caller
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the request deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Runs `fut`, failing with [`DeadlineExceeded`] once the per-call timeout
    /// or the request deadline (whichever is sooner) passes.
    pub async fn bound<F>(&self, fut: F) -> Result<F::Output, DeadlineExceeded>
    where
        F: Future,
    {
        let call_deadline = Instant::now() + self.per_call_timeout;
        let deadline = call_deadline.min(self.deadline);
        tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| DeadlineExceeded)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
