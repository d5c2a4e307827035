//! One credential fetch shared by every caller that needs its outcome.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	credential::{RenewalTrigger, state::{FlightState, Issued}},
	error::CredentialFetchFailure,
};

/// Spawned fetch whose outcome is published once to any number of waiters.
///
/// Waiting never drives the fetch itself, so a waiter that gives up does not affect the others.
pub struct Flight {
	id: u64,
	trigger: RenewalTrigger,
	launched_at: Instant,
	previous: Option<Issued>,
	outcome: watch::Receiver<FlightState>,
	renewal_requested: AtomicBool,
}
impl Flight {
	/// Spawn `task` and track its outcome.
	///
	/// `previous` is the credential the flight replaces; it keeps being served while the fetch
	/// runs.
	pub fn spawn<F>(id: u64, trigger: RenewalTrigger, previous: Option<Issued>, task: F) -> Arc<Self>
	where
		F: 'static + Send + Future<Output = FlightState>,
	{
		let (tx, outcome) = watch::channel(FlightState::Pending);

		tokio::spawn(async move {
			let _ = tx.send(task.await);
		});

		Arc::new(Self {
			id,
			trigger,
			launched_at: Instant::now(),
			previous,
			outcome,
			renewal_requested: AtomicBool::new(false),
		})
	}

	/// Flight sequence number.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// What launched the flight.
	pub fn trigger(&self) -> RenewalTrigger {
		self.trigger
	}

	/// When the flight was launched.
	pub fn launched_at(&self) -> Instant {
		self.launched_at
	}

	/// Credential being replaced, if it was still valid at launch.
	pub fn previous(&self) -> Option<&Issued> {
		self.previous.as_ref()
	}

	/// Current state without waiting.
	pub fn state(&self) -> FlightState {
		reconcile(&self.outcome, self.outcome.borrow().clone())
	}

	/// Whether the flight ended without a usable credential.
	pub fn has_failed(&self) -> bool {
		matches!(self.state(), FlightState::Failed(_))
	}

	/// Wait until the flight settles; never returns [`FlightState::Pending`].
	pub async fn settled(&self) -> FlightState {
		let mut outcome = self.outcome.clone();

		loop {
			{
				let state = outcome.borrow_and_update();

				if !state.is_pending() {
					return state.clone();
				}
			}

			if outcome.changed().await.is_err() {
				let state = outcome.borrow().clone();

				return if state.is_pending() { abandoned() } else { state };
			}
		}
	}

	/// Wait for the issued credential, giving up when `cancel` fires.
	pub async fn wait(&self, cancel: &CancellationToken) -> Result<Issued> {
		let state = tokio::select! {
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			state = self.settled() => state,
		};

		match state {
			FlightState::Ready(issued) => Ok(issued),
			FlightState::Failed(err) => Err(err),
			FlightState::Pending => Err(CredentialFetchFailure::Abandoned.into()),
		}
	}

	/// Claim the right to start a proactive renewal; only the first caller gets `true`.
	pub fn request_renewal(&self) -> bool {
		!self.renewal_requested.swap(true, Ordering::AcqRel)
	}

	/// Whether the flight's credential is due for renewal at `now`.
	pub fn is_stale(&self, now: Instant) -> bool {
		self.state().issued().is_some_and(|issued| issued.is_due(now))
	}
}
impl Debug for Flight {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Flight")
			.field("id", &self.id)
			.field("trigger", &self.trigger)
			.field("state", &self.state())
			.finish()
	}
}

/// Settle an `observed` read of `outcome` against the sender's liveness.
fn reconcile(outcome: &watch::Receiver<FlightState>, observed: FlightState) -> FlightState {
	if !observed.is_pending() || outcome.has_changed().is_ok() {
		return observed;
	}

	// The sender may have published and dropped after `observed` was read.
	let state = outcome.borrow().clone();

	if state.is_pending() { abandoned() } else { state }
}

fn abandoned() -> FlightState {
	FlightState::Failed(CredentialFetchFailure::Abandoned.into())
}
