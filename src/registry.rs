//! Logical service registrations and retry configuration.
//!
//! The registry maps logical service names (for example `ordering`) onto the base address and
//! retry policy the transport applies when calling them. It is assembled once at startup and
//! shared read-only afterwards.

// std
use std::{cell::RefCell, collections::HashMap};
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, security};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default per-attempt and overall timeout for a downstream service.
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default retry count for transient downstream failures.
pub const DEFAULT_SERVICE_RETRIES: u32 = 5;
/// Default first backoff step for downstream retries.
pub const DEFAULT_SERVICE_BACKOFF: Duration = Duration::from_secs(1);
/// Default bound on a whole retry sequence.
pub const DEFAULT_SERVICE_DEADLINE: Duration = Duration::from_secs(60);

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; randomize delay between 0.8x and 1x of the current backoff.
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	#[default]
	Decorrelated,
}

/// Retry configuration for calls against one logical service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Maximum number of retry attempts to perform after the initial request.
	pub max_retries: u32,
	/// Timeout applied to each individual HTTP attempt.
	pub attempt_timeout: Duration,
	/// Initial delay before retrying after a failure.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Overall deadline that bounds the entire retry sequence.
	pub deadline: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// A policy that performs exactly one attempt.
	pub fn no_retry(timeout: Duration) -> Self {
		Self {
			max_retries: 0,
			attempt_timeout: timeout,
			initial_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_millis(100),
			deadline: timeout,
			jitter: JitterStrategy::None,
		}
	}

	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "retry_policy.attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}
		if self.deadline < self.attempt_timeout {
			return Err(Error::Validation {
				field: "retry_policy.deadline",
				reason: "Must be greater than or equal to attempt_timeout.".into(),
			});
		}

		Ok(())
	}

	/// Compute backoff for a retry attempt using the selected jitter strategy.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		compute_backoff(self.initial_backoff, self.max_backoff, self.jitter, attempt)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: DEFAULT_SERVICE_RETRIES,
			attempt_timeout: DEFAULT_SERVICE_TIMEOUT,
			initial_backoff: DEFAULT_SERVICE_BACKOFF,
			max_backoff: Duration::from_secs(8),
			deadline: DEFAULT_SERVICE_DEADLINE,
			jitter: JitterStrategy::Decorrelated,
		}
	}
}

/// Exponential backoff bounded to `[initial, max]`, randomized per `jitter`.
pub fn compute_backoff(
	initial: Duration,
	max: Duration,
	jitter: JitterStrategy,
	attempt: u32,
) -> Duration {
	let exponent = attempt.min(32);
	let base = initial.mul_f64(2f64.powi(exponent as i32));
	let bounded = base.min(max).max(initial);

	match jitter {
		JitterStrategy::None => bounded,
		JitterStrategy::Full => {
			let lower = bounded.mul_f64(0.8).max(initial);
			let upper = bounded.min(max);

			random_within(lower, upper)
		},
		JitterStrategy::Decorrelated => {
			let prev = if attempt == 0 { initial } else { bounded };
			let ceiling = max.min(prev.mul_f64(3.0));

			random_within(initial, ceiling.max(initial))
		},
	}
}

/// Registration describing how to reach one logical downstream service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceRegistration {
	/// Logical service name used by callers (for example `ordering`).
	pub name: String,
	/// Base address every request path is resolved against.
	pub base_url: Url,
	/// Whether HTTPS is required for this service.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Retry policy applied to transient failures.
	#[serde(default)]
	pub retry_policy: RetryPolicy,
}
impl ServiceRegistration {
	/// Construct a registration with the default retry policy.
	pub fn new(name: impl Into<String>, base_url: impl AsRef<str>) -> Result<Self> {
		let base_url = Url::parse(base_url.as_ref())?;

		Ok(Self {
			name: name.into(),
			base_url,
			require_https: true,
			retry_policy: RetryPolicy::default(),
		})
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Replace the retry policy.
	pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
		self.retry_policy = retry_policy;

		self
	}

	/// Ensure the base path ends with `/` so relative paths append instead of replacing the
	/// last segment.
	pub fn normalize_base_url(&mut self) {
		if !self.base_url.path().ends_with('/') {
			let path = format!("{}/", self.base_url.path());

			self.base_url.set_path(&path);
		}
	}

	/// Validate the registration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		validate_service_name(&self.name)?;

		if self.require_https {
			security::enforce_https(&self.base_url)?;
		}
		if self.base_url.host_str().is_none() {
			return Err(Error::Validation {
				field: "base_url",
				reason: "Must include a host component.".into(),
			});
		}
		if self.base_url.query().is_some() || self.base_url.fragment().is_some() {
			return Err(Error::Validation {
				field: "base_url",
				reason: "Must not carry a query or fragment.".into(),
			});
		}

		self.retry_policy.validate()
	}
}

/// Builder for [`ServiceRegistry`].
#[derive(Debug)]
pub struct ServiceRegistryBuilder {
	require_https: bool,
	services: HashMap<String, Arc<ServiceRegistration>>,
}
impl ServiceRegistryBuilder {
	/// Create a builder that enforces HTTPS.
	pub fn new() -> Self {
		Self { require_https: true, services: HashMap::new() }
	}

	/// Enforce HTTPS for registrations (enabled by default).
	pub fn require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Register a logical service; names must be unique.
	pub fn register(mut self, mut registration: ServiceRegistration) -> Result<Self> {
		if self.require_https {
			if !registration.require_https {
				return Err(Error::Validation {
					field: "require_https",
					reason: format!(
						"Registry requires HTTPS but service '{}' opted out.",
						registration.name
					),
				});
			}
		} else {
			registration.require_https = false;
		}

		registration.normalize_base_url();
		registration.validate()?;

		if self.services.contains_key(&registration.name) {
			return Err(Error::Validation {
				field: "name",
				reason: format!("Service '{}' is registered twice.", registration.name),
			});
		}

		tracing::debug!(
			service = %registration.name,
			base_url = %registration.base_url,
			"registered downstream service"
		);

		self.services.insert(registration.name.clone(), Arc::new(registration));

		Ok(self)
	}

	/// Finalise the registry.
	pub fn build(self) -> ServiceRegistry {
		ServiceRegistry { services: self.services }
	}
}
impl Default for ServiceRegistryBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Immutable set of logical services.
#[derive(Clone, Debug, Default)]
pub struct ServiceRegistry {
	services: HashMap<String, Arc<ServiceRegistration>>,
}
impl ServiceRegistry {
	/// Create a [`ServiceRegistryBuilder`].
	pub fn builder() -> ServiceRegistryBuilder {
		ServiceRegistryBuilder::new()
	}

	/// Look up a registered service.
	pub fn get(&self, service: &str) -> Result<Arc<ServiceRegistration>> {
		self.services
			.get(service)
			.cloned()
			.ok_or_else(|| Error::NotRegistered { service: service.to_owned() })
	}

	/// Registered service names, sorted.
	pub fn names(&self) -> Vec<&str> {
		let mut names: Vec<_> = self.services.keys().map(String::as_str).collect();

		names.sort_unstable();

		names
	}
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}
	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}

fn default_true() -> bool {
	true
}

fn validate_service_name(value: &str) -> Result<()> {
	if value.is_empty() {
		return Err(Error::Validation { field: "name", reason: "Must not be empty.".into() });
	}
	if value.len() > 64 {
		return Err(Error::Validation {
			field: "name",
			reason: "Must be 64 characters or fewer.".into(),
		});
	}
	if !value.as_bytes().iter().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_')) {
		return Err(Error::Validation {
			field: "name",
			reason: "May only contain ASCII letters, numbers, '-', or '_'.".into(),
		});
	}

	Ok(())
}
