//! Short-lived response cache stage.
//!
//! Read calls (GET/HEAD) are keyed by method and absolute URL. Both successful and failed
//! outcomes are replayed for the configured time-to-live; writes always reach the inner handler.

// std
use std::collections::HashMap;
// crates.io
use tokio::sync::RwLock;
// self
use crate::{
	_prelude::*,
	http::request::{Call, Response},
	metrics,
	pipeline::{Capability, Handler, HandlerFuture, Stage},
};

/// Default time-to-live for cached outcomes.
pub const DEFAULT_RESPONSE_TTL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
struct CachedOutcome {
	outcome: Result<Response>,
	inserted_at: Instant,
}

/// Shared store of recent call outcomes.
#[derive(Debug)]
pub struct ResponseCache {
	ttl: Duration,
	entries: RwLock<HashMap<String, CachedOutcome>>,
}
impl ResponseCache {
	/// Empty cache whose entries live for `ttl`.
	pub fn new(ttl: Duration) -> Self {
		Self { ttl, entries: RwLock::new(HashMap::new()) }
	}

	/// Configured time-to-live.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Unexpired outcome stored under `key`.
	pub async fn lookup(&self, key: &str) -> Option<Result<Response>> {
		let entries = self.entries.read().await;
		let cached = entries.get(key)?;

		(cached.inserted_at.elapsed() < self.ttl).then(|| cached.outcome.clone())
	}

	/// Store `outcome` under `key`, replacing any previous entry.
	pub async fn store(&self, key: String, outcome: Result<Response>) {
		let mut entries = self.entries.write().await;

		entries.insert(key, CachedOutcome { outcome, inserted_at: Instant::now() });
	}

	/// Drop expired entries, returning how many were removed.
	pub async fn purge_expired(&self) -> usize {
		let mut entries = self.entries.write().await;
		let before = entries.len();

		entries.retain(|_, cached| cached.inserted_at.elapsed() < self.ttl);

		before - entries.len()
	}

	/// Number of stored entries, expired ones included.
	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	/// Whether nothing is stored.
	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}
}
impl Default for ResponseCache {
	fn default() -> Self {
		Self::new(DEFAULT_RESPONSE_TTL)
	}
}

/// Stage that serves repeated reads from a [`ResponseCache`].
#[derive(Clone, Debug)]
pub struct ResponseCacheStage {
	cache: Arc<ResponseCache>,
}
impl ResponseCacheStage {
	/// Stage backed by `cache`.
	pub fn new(cache: Arc<ResponseCache>) -> Self {
		Self { cache }
	}

	/// Underlying store.
	pub fn cache(&self) -> &Arc<ResponseCache> {
		&self.cache
	}
}
impl Stage for ResponseCacheStage {
	fn name(&self) -> &'static str {
		"response-cache"
	}

	fn supports(&self, capability: &Capability) -> bool {
		*capability == Capability::INTERNAL_HTTP
	}

	fn wrap(&self, inner: Arc<dyn Handler>) -> Arc<dyn Handler> {
		Arc::new(CachingHandler { cache: self.cache.clone(), inner })
	}
}

struct CachingHandler {
	cache: Arc<ResponseCache>,
	inner: Arc<dyn Handler>,
}
impl Handler for CachingHandler {
	fn call<'a>(&'a self, call: Call, cancel: &'a CancellationToken) -> HandlerFuture<'a> {
		Box::pin(async move {
			if !call.is_read() {
				metrics::record_response_cache(&call.service, metrics::CacheOutcome::Bypass);

				return self.inner.call(call, cancel).await;
			}

			let key = call.cache_key();

			if let Some(outcome) = self.cache.lookup(&key).await {
				tracing::info!(service = %call.service, key = %key, "served from response cache");
				metrics::record_response_cache(&call.service, metrics::CacheOutcome::Hit);

				return outcome;
			}

			metrics::record_response_cache(&call.service, metrics::CacheOutcome::Miss);

			let service = call.service.clone();
			let outcome = self.inner.call(call, cancel).await;

			if matches!(outcome, Err(Error::Cancelled)) {
				return outcome;
			}

			tracing::debug!(%service, key = %key, ok = outcome.is_ok(), "response cached");

			self.cache.store(key, outcome.clone()).await;

			outcome
		})
	}
}
