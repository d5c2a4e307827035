//! Observable states of a credential flight.

// self
use crate::{_prelude::*, credential::Credential};

/// Credential accepted into the cache with its monotonic deadlines.
#[derive(Clone, Debug)]
pub struct Issued {
	/// Credential handed to callers.
	pub credential: Credential,
	/// Monotonic instant at which the credential stops being served.
	pub expires_at: Instant,
	/// Monotonic instant at which renewal becomes due.
	///
	/// After a failed renewal this is pushed back by the retry backoff instead.
	pub refresh_at: Instant,
	/// Consecutive renewal failures absorbed by this credential.
	pub error_count: u32,
}
impl Issued {
	/// Map `credential` onto the monotonic clock.
	///
	/// Renewal is due `lead_time` before expiry, but never sooner than `min_interval` after
	/// issuance (or expiry itself when the credential is shorter lived than that).
	pub fn new(credential: Credential, ttl: Duration, lead_time: Duration, min_interval: Duration) -> Self {
		let now = Instant::now();
		let expires_at = now + ttl;
		let refresh_at = expires_at.checked_sub(lead_time).unwrap_or(now).max(now + min_interval.min(ttl));

		Self { credential, expires_at, refresh_at, error_count: 0 }
	}

	/// Whether the credential can no longer be served.
	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.expires_at
	}

	/// Whether renewal is due.
	pub fn is_due(&self, now: Instant) -> bool {
		now >= self.refresh_at
	}

	/// Carry the credential forward after a failed renewal, retrying after `backoff`.
	pub fn bump_error(mut self, backoff: Duration) -> Self {
		let now = Instant::now();

		self.error_count = self.error_count.saturating_add(1);
		self.refresh_at = (now + backoff).min(self.expires_at);

		self
	}
}

/// Snapshot of a flight.
#[derive(Clone, Debug)]
pub enum FlightState {
	/// Fetch still running.
	Pending,
	/// A credential is available.
	Ready(Issued),
	/// The fetch failed and nothing usable was left to fall back on.
	Failed(Error),
}
impl FlightState {
	/// Issued credential, if any.
	pub fn issued(&self) -> Option<&Issued> {
		match self {
			Self::Ready(issued) => Some(issued),
			_ => None,
		}
	}

	/// Whether the fetch is still running.
	pub fn is_pending(&self) -> bool {
		matches!(self, Self::Pending)
	}
}
