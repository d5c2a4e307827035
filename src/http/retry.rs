//! Attempt budgeting and backoff for downstream calls.

// crates.io
use tokio::time;
// self
use crate::{_prelude::*, registry::RetryPolicy};

/// Outcome of asking the executor for another attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptBudget {
	/// Another attempt may run for at most `timeout`.
	Granted {
		/// Time allotted to the upcoming attempt.
		timeout: Duration,
	},
	/// The overall deadline has passed.
	Exhausted,
}

/// Tracks retries consumed and the remaining deadline for one logical call.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	deadline: Instant,
	retries_used: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Start a retry window for `policy`.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, deadline: Instant::now() + policy.deadline, retries_used: 0 }
	}

	/// Time allotted to the next attempt, clamped to the remaining deadline.
	pub fn attempt_budget(&self) -> AttemptBudget {
		let timeout = self.remaining_budget().min(self.policy.attempt_timeout);

		if timeout.is_zero() { AttemptBudget::Exhausted } else { AttemptBudget::Granted { timeout } }
	}

	/// Whether `error` should be retried given the retries still available.
	pub fn should_retry(&self, error: &Error) -> bool {
		let transient = match error {
			Error::Transport(failure) => failure.is_transient(),
			_ => false,
		};

		transient && self.retries_used < self.policy.max_retries
	}

	/// Remaining time before the overall deadline.
	pub fn remaining_budget(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}

	/// Retries consumed so far.
	pub fn retries_used(&self) -> u32 {
		self.retries_used
	}

	/// Consume one retry and compute its delay; `None` once retries are spent.
	pub fn next_backoff(&mut self) -> Option<Duration> {
		if self.retries_used >= self.policy.max_retries {
			return None;
		}

		let attempt = self.retries_used;

		self.retries_used += 1;

		let delay = self.policy.compute_backoff(attempt).min(self.remaining_budget());

		tracing::debug!(retry = attempt + 1, ?delay, "downstream retry scheduled");

		Some(delay)
	}

	/// Wait out the next backoff, returning [`Error::Cancelled`] if `cancel` fires first.
	pub async fn sleep_backoff(&mut self, cancel: &CancellationToken) -> Result<()> {
		let Some(delay) = self.next_backoff() else { return Ok(()) };

		if delay.is_zero() {
			return Ok(());
		}

		tokio::select! {
			_ = cancel.cancelled() => Err(Error::Cancelled),
			_ = time::sleep(delay) => Ok(()),
		}
	}
}
