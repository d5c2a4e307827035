//! Credential cache coordinating single-flight fetches and renewal.

// std
use std::sync::{
	Weak,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use tokio::{
	sync::{Mutex, RwLock},
	time,
};
// self
use crate::{
	_prelude::*,
	credential::{
		Credential, CredentialSource, RenewalPolicy, RenewalTrigger,
		flight::Flight,
		state::{FlightState, Issued},
	},
	metrics::{self, CredentialMetrics, CredentialMetricsSnapshot},
	registry::{self, JitterStrategy},
};

/// Shared, lazily populated bearer credential.
///
/// The first caller starts a fetch and every concurrent caller waits on that same fetch. Once a
/// credential is cached it is served until it expires; inside the renewal lead window a single
/// renewal runs in the background while callers keep receiving the current value.
#[derive(Clone)]
pub struct CredentialCache {
	inner: Arc<Inner>,
}
impl CredentialCache {
	/// Build a cache over `source`.
	///
	/// Must be called inside a Tokio runtime when `policy.background` is set, since the renewal
	/// loop is spawned immediately.
	pub fn new(source: Arc<dyn CredentialSource>, policy: RenewalPolicy) -> Result<Self> {
		policy.validate()?;

		let background = policy.background;
		let inner = Arc::new(Inner {
			source,
			policy,
			cell: RwLock::new(None),
			single_flight: Mutex::new(()),
			shutdown: CancellationToken::new(),
			metrics: CredentialMetrics::new(),
			next_flight: AtomicU64::new(1),
		});

		if background {
			tokio::spawn(run_background(Arc::downgrade(&inner), inner.shutdown.clone()));
		}

		Ok(Self { inner })
	}

	/// Current credential, fetching or renewing when necessary.
	///
	/// Callers only block when nothing usable is cached. Inside the lead window, and while the
	/// renewal it starts is running, the current value is returned immediately.
	#[tracing::instrument(skip_all)]
	pub async fn get_credential(&self, cancel: &CancellationToken) -> Result<Credential> {
		let flight = self.acquire().await;
		let now = Instant::now();

		if flight.state().is_pending()
			&& let Some(previous) = flight.previous().filter(|previous| !previous.is_expired(now))
		{
			self.inner.metrics.record_served();

			return Ok(previous.credential.clone());
		}

		let issued = flight.wait(cancel).await?;
		let now = Instant::now();
		let issued = if issued.is_expired(now) {
			tracing::info!(
				fingerprint = %issued.credential.fingerprint(),
				"cached credential expired; renewing before serving"
			);

			self.renew(Some(&flight), RenewalTrigger::Expired).await.wait(cancel).await?
		} else {
			if flight.is_stale(now) && flight.request_renewal() {
				let cache = self.clone();

				tokio::spawn(async move {
					cache.renew(Some(&flight), RenewalTrigger::Proactive).await;
				});
			}

			issued
		};

		self.inner.metrics.record_served();

		Ok(issued.credential)
	}

	/// Snapshot of the cached credential for diagnostics; never exposes the value.
	pub async fn status(&self) -> CredentialStatus {
		let flight = self.current().await;
		let metrics = self.inner.metrics.snapshot();
		let now = Instant::now();
		let (state, issued) = match flight.as_ref().map(|flight| (flight.state(), flight)) {
			None => (CredentialState::Empty, None),
			Some((FlightState::Pending, flight)) => (CredentialState::Fetching, flight.previous().cloned()),
			Some((FlightState::Ready(issued), _)) => {
				let state = if issued.is_expired(now) {
					CredentialState::Expired
				} else if issued.is_due(now) {
					CredentialState::Expiring
				} else {
					CredentialState::Ready
				};

				(state, Some(issued))
			},
			Some((FlightState::Failed(_), _)) => (CredentialState::Failed, None),
		};

		CredentialStatus {
			state,
			expires_at: issued.as_ref().map(|issued| issued.credential.expires_at()),
			fingerprint: issued.as_ref().map(|issued| issued.credential.fingerprint()),
			error_count: issued.as_ref().map_or(0, |issued| issued.error_count),
			metrics,
		}
	}

	/// Stop the renewal loop and abandon in-flight fetches.
	pub fn shutdown(&self) {
		self.inner.shutdown.cancel();
	}

	/// Renewal policy in effect.
	pub fn policy(&self) -> &RenewalPolicy {
		&self.inner.policy
	}

	async fn current(&self) -> Option<Arc<Flight>> {
		self.inner.cell.read().await.clone()
	}

	/// Flight to wait on, replacing an empty or failed cell.
	async fn acquire(&self) -> Arc<Flight> {
		let observed = self.current().await;

		match observed {
			Some(flight) if !flight.has_failed() => flight,
			Some(failed) => self.renew(Some(&failed), RenewalTrigger::Demand).await,
			None => self.renew(None, RenewalTrigger::Initial).await,
		}
	}

	/// Replace `observed` with a new flight unless someone already did.
	///
	/// A no-op when the cell holds a different flight, or when the current flight is still
	/// pending or holds a credential that is not yet due. Returns the flight now in the cell.
	async fn renew(&self, observed: Option<&Arc<Flight>>, trigger: RenewalTrigger) -> Arc<Flight> {
		let _guard = self.inner.single_flight.lock().await;
		let current = self.current().await;
		let now = Instant::now();

		if let Some(current) = current.as_ref() {
			let unchanged = observed.is_some_and(|observed| Arc::ptr_eq(observed, current));
			let replaceable = match current.state() {
				FlightState::Pending => false,
				FlightState::Ready(issued) => issued.is_due(now),
				FlightState::Failed(_) => true,
			};

			if !unchanged || !replaceable {
				tracing::debug!(
					flight = current.id(),
					trigger = trigger.as_str(),
					"renewal skipped; cell already moved on"
				);

				return current.clone();
			}
		}

		let previous = current
			.as_ref()
			.and_then(|flight| flight.state().issued().cloned())
			.filter(|issued| !issued.is_expired(now));
		let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
		let task = Renewal {
			source: self.inner.source.clone(),
			policy: self.inner.policy.clone(),
			metrics: self.inner.metrics.clone(),
			trigger,
			previous: previous.clone(),
			cancel: self.inner.shutdown.child_token(),
		};
		let flight = Flight::spawn(id, trigger, previous, task.run());

		tracing::debug!(flight = id, trigger = trigger.as_str(), "credential flight launched");

		*self.inner.cell.write().await = Some(flight.clone());

		flight
	}
}
impl Debug for CredentialCache {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("CredentialCache")
			.field("policy", &self.inner.policy)
			.field("metrics", &self.inner.metrics)
			.finish()
	}
}

struct Inner {
	source: Arc<dyn CredentialSource>,
	policy: RenewalPolicy,
	cell: RwLock<Option<Arc<Flight>>>,
	single_flight: Mutex<()>,
	shutdown: CancellationToken,
	metrics: Arc<CredentialMetrics>,
	next_flight: AtomicU64,
}
impl Drop for Inner {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}

/// Lifecycle state reported by [`CredentialCache::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialState {
	/// Nothing fetched yet.
	Empty,
	/// A fetch is running.
	Fetching,
	/// A credential is cached and not yet due for renewal.
	Ready,
	/// The cached credential is inside its renewal window.
	Expiring,
	/// The cached credential has expired and will be renewed on next use.
	Expired,
	/// The last fetch failed with nothing to fall back on.
	Failed,
}

/// Diagnostic view of a [`CredentialCache`].
#[derive(Clone, Debug)]
pub struct CredentialStatus {
	/// Lifecycle state.
	pub state: CredentialState,
	/// Expiry of the cached credential.
	pub expires_at: Option<DateTime<Utc>>,
	/// Log-safe identifier of the cached credential.
	pub fingerprint: Option<String>,
	/// Consecutive renewal failures absorbed by the cached credential.
	pub error_count: u32,
	/// Counter snapshot.
	pub metrics: CredentialMetricsSnapshot,
}

struct Renewal {
	source: Arc<dyn CredentialSource>,
	policy: RenewalPolicy,
	metrics: Arc<CredentialMetrics>,
	trigger: RenewalTrigger,
	previous: Option<Issued>,
	cancel: CancellationToken,
}
impl Renewal {
	#[tracing::instrument(skip_all, fields(trigger = self.trigger.as_str()))]
	async fn run(self) -> FlightState {
		let started = Instant::now();
		let fetched = tokio::select! {
			_ = self.cancel.cancelled() => Err(Error::Cancelled),
			fetched = self.source.fetch(&self.cancel) => fetched,
		};
		let issued = fetched.and_then(|credential| {
			let ttl = credential.ensure_live(Utc::now())?;

			Ok(Issued::new(credential, ttl, self.policy.lead_time, self.policy.min_backoff))
		});

		match issued {
			Ok(issued) => {
				let elapsed = started.elapsed();

				self.metrics.record_renewal(elapsed);
				metrics::record_renewal_success(self.trigger.as_str(), elapsed);

				tracing::info!(
					fingerprint = %issued.credential.fingerprint(),
					expires_at = %issued.credential.expires_at(),
					"credential issued"
				);

				FlightState::Ready(issued)
			},
			Err(err) => {
				self.metrics.record_renewal_error();
				metrics::record_renewal_error(self.trigger.as_str());

				match self.previous {
					Some(previous) if !previous.is_expired(Instant::now()) => {
						let backoff = registry::compute_backoff(
							self.policy.min_backoff,
							self.policy.max_backoff,
							JitterStrategy::Full,
							previous.error_count,
						);

						tracing::warn!(
							error = %err,
							?backoff,
							fingerprint = %previous.credential.fingerprint(),
							"credential renewal failed; keeping current credential"
						);

						FlightState::Ready(previous.bump_error(backoff))
					},
					_ => {
						tracing::warn!(error = %err, "credential fetch failed");

						FlightState::Failed(err)
					},
				}
			},
		}
	}
}

/// Renew ahead of expiry until shutdown or until every cache handle is dropped.
async fn run_background(cache: Weak<Inner>, shutdown: CancellationToken) {
	let mut flight = match upgrade(&cache) {
		Some(cache) => cache.acquire().await,
		None => return,
	};
	let mut failures = 0_u32;

	loop {
		let state = tokio::select! {
			_ = shutdown.cancelled() => break,
			state = flight.settled() => state,
		};
		let Some(policy) = upgrade(&cache).map(|cache| cache.inner.policy.clone()) else { break };
		let wake_at = match state {
			FlightState::Ready(issued) => {
				failures = 0;

				issued.refresh_at
			},
			_ => {
				let backoff = registry::compute_backoff(
					policy.min_backoff,
					policy.max_backoff,
					JitterStrategy::Full,
					failures,
				);

				failures = failures.saturating_add(1);

				tracing::warn!(?backoff, failures, "background credential fetch failed; backing off");

				Instant::now() + backoff
			},
		};

		tokio::select! {
			_ = shutdown.cancelled() => break,
			_ = time::sleep_until(wake_at) => {},
		}

		let Some(cache) = upgrade(&cache) else { break };

		flight = cache.renew(Some(&flight), RenewalTrigger::Background).await;
	}

	tracing::debug!("credential renewal loop stopped");
}

fn upgrade(cache: &Weak<Inner>) -> Option<CredentialCache> {
	cache.upgrade().map(|inner| CredentialCache { inner })
}
