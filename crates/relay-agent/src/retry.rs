//! Retry with context shrinking.
//!
//! Each failed attempt drops the oldest entries from the window before the
//! next one, on the theory that an oversized prompt is the most likely cause.
//! When the budget is spent the window is cleared outright.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relay_core::config::{DEFAULT_RETRY_BUDGET, DEFAULT_SHRINK_STEP, MAX_SHRINK_STEP};

use crate::completion::{CompletionClient, CompletionError};
use crate::provider::CompletionRequest;
use crate::window::ContextWindow;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    budget: u32,
    shrink_step: usize,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BUDGET, DEFAULT_SHRINK_STEP, Duration::ZERO)
    }
}

/// How a retry run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// An attempt succeeded. `attempts` counts the successful one.
    Done { response: String, attempts: u32 },
    /// Every attempt failed and the window was reset.
    Exhausted { attempts: u32 },
}

impl RetryPolicy {
    /// `budget` is at least one attempt; `shrink_step` is clamped to `1..=2`.
    pub fn new(budget: u32, shrink_step: usize, delay: Duration) -> Self {
        Self {
            budget: budget.max(1),
            shrink_step: shrink_step.clamp(1, MAX_SHRINK_STEP),
            delay,
        }
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn shrink_step(&self) -> usize {
        self.shrink_step
    }

    /// Drive attempts until one succeeds or the budget runs out.
    ///
    /// `build` is called before every attempt with the current window, so a
    /// shrunk window yields a smaller prompt. Only cancellation is returned as
    /// an error; provider failures are consumed here.
    pub async fn run<F>(
        &self,
        client: &CompletionClient,
        window: &mut ContextWindow,
        build: F,
        cancel: &CancellationToken,
    ) -> Result<RetryOutcome, CompletionError>
    where
        F: Fn(&ContextWindow) -> CompletionRequest,
    {
        for attempt in 1..=self.budget {
            let req = build(window);
            match client.complete(&req, cancel).await {
                Ok(response) => {
                    debug!(attempt, "completion succeeded");
                    return Ok(RetryOutcome::Done {
                        response,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    let removed = window.truncate_oldest(self.shrink_step);
                    warn!(
                        attempt, budget = self.budget, removed, remaining = window.len(),
                        error = %e, "completion attempt failed"
                    );
                }
            }

            if attempt < self.budget && !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }

        window.reset();
        Ok(RetryOutcome::Exhausted {
            attempts: self.budget,
        })
    }
}
