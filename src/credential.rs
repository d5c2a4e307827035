//! Bearer credentials, the source contract, and renewal policy.

pub mod flight;
pub mod manager;
pub mod source;
pub mod state;

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, error::CredentialFetchFailure, security};

/// Boxed future returned by [`CredentialSource::fetch`].
pub type CredentialFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential>> + 'a + Send>>;

/// Produces fresh credentials on demand.
pub trait CredentialSource: Send + Sync {
	/// Fetch a new credential, abandoning the attempt when `cancel` fires.
	fn fetch<'a>(&'a self, cancel: &'a CancellationToken) -> CredentialFuture<'a>;
}

/// Time-bounded bearer secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	value: Arc<str>,
	expires_at: DateTime<Utc>,
}
impl Credential {
	/// Credential holding `value` until `expires_at`.
	pub fn new(value: impl Into<Arc<str>>, expires_at: DateTime<Utc>) -> Self {
		Self { value: value.into(), expires_at }
	}

	/// Secret value.
	pub fn value(&self) -> &str {
		&self.value
	}

	/// Absolute expiry.
	pub fn expires_at(&self) -> DateTime<Utc> {
		self.expires_at
	}

	/// Log-safe identifier of the value.
	pub fn fingerprint(&self) -> String {
		security::fingerprint(&self.value)
	}

	/// Time left before expiry as seen by the wall clock, `None` once expired.
	pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
		(self.expires_at - now).to_std().ok().filter(|remaining| !remaining.is_zero())
	}

	/// Reject a credential that is already expired at `now`.
	pub(crate) fn ensure_live(&self, now: DateTime<Utc>) -> Result<Duration> {
		self.remaining(now)
			.ok_or_else(|| CredentialFetchFailure::AlreadyExpired { expires_at: self.expires_at }.into())
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Credential")
			.field("fingerprint", &self.fingerprint())
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// When and how a credential cache renews.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalPolicy {
	/// Window before expiry in which renewal starts while the current value is still served.
	pub lead_time: Duration,
	/// Whether a background task renews ahead of expiry.
	pub background: bool,
	/// First delay after a failed renewal; also the shortest renewal interval.
	pub min_backoff: Duration,
	/// Upper bound for failure backoff.
	pub max_backoff: Duration,
}
impl RenewalPolicy {
	/// Validate invariants.
	pub fn validate(&self) -> Result<()> {
		if self.min_backoff.is_zero() {
			return Err(Error::Validation {
				field: "renewal.min_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.min_backoff {
			return Err(Error::Validation {
				field: "renewal.max_backoff",
				reason: "Must be greater than or equal to min_backoff.".into(),
			});
		}

		Ok(())
	}
}
impl Default for RenewalPolicy {
	fn default() -> Self {
		Self {
			lead_time: Duration::from_secs(20),
			background: true,
			min_backoff: Duration::from_secs(1),
			max_backoff: Duration::from_secs(60),
		}
	}
}

/// What caused a renewal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenewalTrigger {
	/// First demand with nothing cached.
	Initial,
	/// Demand after the previous fetch failed.
	Demand,
	/// Demand found the cached credential expired.
	Expired,
	/// Demand inside the lead window.
	Proactive,
	/// Scheduled by the background loop.
	Background,
}
impl RenewalTrigger {
	/// Label value.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Initial => "initial",
			Self::Demand => "demand",
			Self::Expired => "expired",
			Self::Proactive => "proactive",
			Self::Background => "background",
		}
	}
}
