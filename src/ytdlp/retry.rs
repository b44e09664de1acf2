use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::ytdlp::errors::{DownloadFailure, ErrorCategory, classify_error};
use crate::ytdlp::process::{CommandOutput, RunBudget, RunError, run_command};
use crate::ytdlp::progress::ProgressFn;
use crate::ytdlp::updater::ToolUpdater;

/// Tuning knobs for one retry loop. Defaults follow long-observed behavior
/// of the remote service: generous per-attempt time, a hard half-hour
/// ceiling per logical download.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
    pub max_total_time: Duration,
    pub stall_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(600),
            max_total_time: Duration::from_secs(1800),
            stall_timeout: Duration::from_secs(60),
        }
    }
}

/// Runs one command repeatedly until it succeeds, the error is hopeless,
/// retries run out, or the wall-clock budget does. The only component that
/// ever decides whether to retry.
pub struct RetryHandler {
    policy: RetryPolicy,
    updater: Arc<ToolUpdater>,
}

impl RetryHandler {
    pub fn new(policy: RetryPolicy, updater: Arc<ToolUpdater>) -> Self {
        RetryHandler { policy, updater }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Exponential backoff capped at `max_delay`, then raised to the
    /// category's floor. No jitter yet.
    pub fn backoff_delay(&self, attempt: u32, category: ErrorCategory) -> Duration {
        let exponential = self.policy.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let mut delay = exponential.min(self.policy.max_delay.as_secs_f64());
        if let Some(floor) = category.backoff_floor() {
            delay = delay.max(floor.as_secs_f64());
        }
        Duration::from_secs_f64(delay)
    }

    /// Additive jitter in `[0, 20%]` of the delay. Only ever lengthens the
    /// wait, so concurrent downloads desynchronize without under-waiting.
    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = rand::rng().random_range(0.0..=delay.as_secs_f64() * 0.2);
        delay + Duration::from_secs_f64(jitter)
    }

    /// Run `program` with retry, escalating delays and classification.
    ///
    /// The budget is supplied by the caller so several strategies can share
    /// one wall-clock ceiling; it is checked before every attempt, never
    /// only after one fails.
    pub async fn run_with_retry(
        &self,
        program: &Path,
        args: &[String],
        operation: &str,
        budget: &RunBudget,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<CommandOutput, DownloadFailure> {
        let mut last_diagnostic: Option<String> = None;
        let mut last_category: Option<ErrorCategory> = None;
        let mut signature_seen = false;
        let mut attempts = 0u32;

        for attempt in 0..self.policy.max_retries {
            if budget.exhausted() {
                return Err(self.budget_failure(attempts, budget, last_diagnostic.as_deref()));
            }

            if attempt > 0 {
                if let Some(category) = last_category {
                    let delay = self.jittered(self.backoff_delay(attempt - 1, category));
                    log::warn!(
                        "{} failed ({}), retrying in {:.1}s (attempt {}/{})",
                        operation,
                        category,
                        delay.as_secs_f64(),
                        attempt + 1,
                        self.policy.max_retries
                    );
                    sleep(delay).await;
                }
                // One shot per process; the updater enforces the once-ness.
                if signature_seen && !self.updater.update_attempted() {
                    self.updater.update_if_needed().await;
                }
            }

            attempts += 1;
            let result = run_command(
                program,
                args,
                self.policy.attempt_timeout,
                budget,
                self.policy.stall_timeout,
                progress.as_deref_mut(),
            )
            .await;

            match result {
                Ok(output) if output.success() => {
                    log::info!("{} succeeded on attempt {}", operation, attempts);
                    return Ok(output);
                }
                Ok(output) => {
                    let diagnostic = output.diagnostic();
                    let (retryable, category) = classify_error(&diagnostic);
                    log::warn!("{} failed ({}): {}", operation, category, preview(&diagnostic));
                    if category == ErrorCategory::Signature {
                        signature_seen = true;
                    }
                    if !retryable {
                        return Err(DownloadFailure::new(
                            category,
                            attempts,
                            budget.elapsed(),
                            diagnostic,
                        ));
                    }
                    last_diagnostic = Some(diagnostic);
                    last_category = Some(category);
                }
                Err(RunError::BudgetExhausted { .. }) => {
                    return Err(self.budget_failure(attempts, budget, last_diagnostic.as_deref()));
                }
                Err(error @ RunError::Spawn(_)) => {
                    // A missing binary does not heal by retrying.
                    return Err(DownloadFailure::new(
                        ErrorCategory::Unknown,
                        attempts,
                        budget.elapsed(),
                        error.to_string(),
                    ));
                }
                Err(error) => {
                    log::warn!("{}: {}", operation, error);
                    last_diagnostic = Some(error.to_string());
                    last_category = Some(ErrorCategory::Timeout);
                    // Another full attempt plus its backoff cannot fit in
                    // what remains of the budget.
                    if self.policy.attempt_timeout + self.policy.max_delay > budget.remaining() {
                        return Err(self.budget_failure(
                            attempts,
                            budget,
                            last_diagnostic.as_deref(),
                        ));
                    }
                }
            }
        }

        Err(DownloadFailure::new(
            last_category.unwrap_or(ErrorCategory::Unknown),
            attempts,
            budget.elapsed(),
            last_diagnostic.unwrap_or_else(|| "all retry attempts failed".to_string()),
        ))
    }

    fn budget_failure(
        &self,
        attempts: u32,
        budget: &RunBudget,
        last_diagnostic: Option<&str>,
    ) -> DownloadFailure {
        let mut diagnostic = format!(
            "maximum total time ({}s) exceeded after {} attempts",
            budget.max_total.as_secs(),
            attempts
        );
        if let Some(last) = last_diagnostic {
            diagnostic.push_str("; last error: ");
            diagnostic.push_str(&preview(last));
        }
        DownloadFailure::budget_exhausted(attempts, budget.elapsed(), diagnostic)
    }
}

fn preview(text: &str) -> String {
    let flat = text.trim().replace('\n', " ");
    flat.chars().take(150).collect()
}
