//! Metrics helpers and credential telemetry bookkeeping.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 3]>;

const METRIC_RESPONSE_CACHE_TOTAL: &str = "gateway_response_cache_total";
const METRIC_RENEWAL_TOTAL: &str = "gateway_credential_renewal_total";
const METRIC_RENEWAL_DURATION: &str = "gateway_credential_renewal_duration_seconds";

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// How the response cache treated a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
	/// Served from a stored outcome.
	Hit,
	/// Forwarded and stored.
	Miss,
	/// Not cacheable (write call).
	Bypass,
}
impl CacheOutcome {
	/// Label value.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Hit => "hit",
			Self::Miss => "miss",
			Self::Bypass => "bypass",
		}
	}
}

/// Counters kept by a credential cache for status reporting.
#[derive(Debug, Default)]
pub struct CredentialMetrics {
	served: AtomicU64,
	renewals: AtomicU64,
	renewal_errors: AtomicU64,
	last_renewal_micros: AtomicU64,
}
impl CredentialMetrics {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Count a credential handed to a caller.
	pub fn record_served(&self) {
		self.served.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a completed renewal and its latency.
	pub fn record_renewal(&self, duration: Duration) {
		self.renewals.fetch_add(1, Ordering::Relaxed);
		self.last_renewal_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a failed renewal.
	pub fn record_renewal_error(&self) {
		self.renewal_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Point-in-time copy of the counters.
	pub fn snapshot(&self) -> CredentialMetricsSnapshot {
		CredentialMetricsSnapshot {
			served: self.served.load(Ordering::Relaxed),
			renewals: self.renewals.load(Ordering::Relaxed),
			renewal_errors: self.renewal_errors.load(Ordering::Relaxed),
			last_renewal_micros: match self.last_renewal_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only copy of [`CredentialMetrics`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialMetricsSnapshot {
	/// Credentials returned to callers.
	pub served: u64,
	/// Renewals that produced a new credential.
	pub renewals: u64,
	/// Renewals that failed.
	pub renewal_errors: u64,
	/// Latency of the most recent successful renewal in microseconds.
	pub last_renewal_micros: Option<u64>,
}
impl CredentialMetricsSnapshot {
	/// Share of renewal attempts that failed.
	pub fn error_rate(&self) -> f64 {
		let attempts = self.renewals + self.renewal_errors;

		if attempts == 0 { 0.0 } else { self.renewal_errors as f64 / attempts as f64 }
	}
}

/// Install the Prometheus recorder; later calls are no-ops.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Handle of the installed Prometheus recorder.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Count a response cache decision for `service`.
pub fn record_response_cache(service: &str, outcome: CacheOutcome) {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("service", service.to_owned()));
	labels.push(Label::new("outcome", outcome.as_str()));

	metrics::counter!(METRIC_RESPONSE_CACHE_TOTAL, labels.iter()).increment(1);
}

/// Record a successful credential renewal.
pub fn record_renewal_success(trigger: &'static str, duration: Duration) {
	metrics::counter!(METRIC_RENEWAL_TOTAL, renewal_labels(trigger, "success").iter()).increment(1);
	metrics::histogram!(METRIC_RENEWAL_DURATION, "trigger" => trigger).record(duration.as_secs_f64());
}

/// Record a failed credential renewal.
pub fn record_renewal_error(trigger: &'static str) {
	metrics::counter!(METRIC_RENEWAL_TOTAL, renewal_labels(trigger, "error").iter()).increment(1);
}

fn renewal_labels(trigger: &'static str, status: &'static str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("trigger", trigger));
	labels.push(Label::new("status", status));

	labels
}
