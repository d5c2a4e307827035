//! Integration tests for credential fetching, renewal and failure handling.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use chrono::{TimeDelta, Utc};
use gateway_outbound::{
	CancellationToken, Credential, CredentialCache, CredentialFetchFailure, CredentialSource,
	CredentialState, Error, RenewalPolicy, Result, credential::CredentialFuture,
};
use tokio::time;

struct ScriptedSource {
	calls: AtomicUsize,
	ttl: Duration,
	latency: Duration,
	failing: AtomicBool,
}
impl ScriptedSource {
	fn new(ttl: Duration) -> Arc<Self> {
		Self::with_latency(ttl, Duration::ZERO)
	}

	fn with_latency(ttl: Duration, latency: Duration) -> Arc<Self> {
		Arc::new(Self { calls: AtomicUsize::new(0), ttl, latency, failing: AtomicBool::new(false) })
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	fn fail(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}
}
impl CredentialSource for ScriptedSource {
	fn fetch<'a>(&'a self, _cancel: &'a CancellationToken) -> CredentialFuture<'a> {
		Box::pin(async move {
			let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

			if !self.latency.is_zero() {
				time::sleep(self.latency).await;
			}
			if self.failing.load(Ordering::SeqCst) {
				return Err(Error::from(CredentialFetchFailure::Status {
					status: http::StatusCode::SERVICE_UNAVAILABLE,
					body: None,
				}));
			}

			let ttl = TimeDelta::from_std(self.ttl).expect("ttl");

			Ok(Credential::new(format!("token-{n}"), Utc::now() + ttl))
		})
	}
}

fn foreground() -> RenewalPolicy {
	RenewalPolicy { background: false, ..Default::default() }
}

async fn settle() {
	time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_callers_share_one_fetch() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::with_latency(Duration::from_secs(300), Duration::from_millis(200));
	let cache = CredentialCache::new(source.clone(), foreground())?;
	let callers: Vec<_> = (0..16)
		.map(|_| {
			let cache = cache.clone();

			tokio::spawn(async move { cache.get_credential(&CancellationToken::new()).await })
		})
		.collect();

	for caller in callers {
		assert_eq!(caller.await.expect("join")?.value(), "token-1");
	}

	assert_eq!(source.calls(), 1);
	assert_eq!(cache.status().await.metrics.served, 16);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn lead_window_triggers_exactly_one_background_renewal() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::new(Duration::from_secs(60));
	let cache = CredentialCache::new(source.clone(), foreground())?;
	let cancel = CancellationToken::new();

	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-1");

	time::advance(Duration::from_secs(45)).await;

	for _ in 0..5 {
		assert_eq!(cache.get_credential(&cancel).await?.value(), "token-1");
	}

	settle().await;

	assert_eq!(source.calls(), 2);
	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-2");
	assert_eq!(cache.status().await.state, CredentialState::Ready);
	assert_eq!(source.calls(), 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_in_lead_window_share_one_renewal() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::with_latency(Duration::from_secs(60), Duration::from_millis(200));
	let cache = CredentialCache::new(source.clone(), foreground())?;

	assert_eq!(cache.get_credential(&CancellationToken::new()).await?.value(), "token-1");

	time::advance(Duration::from_secs(45)).await;

	let callers: Vec<_> = (0..16)
		.map(|_| {
			let cache = cache.clone();

			tokio::spawn(async move { cache.get_credential(&CancellationToken::new()).await })
		})
		.collect();

	for caller in callers {
		assert_eq!(caller.await.expect("join")?.value(), "token-1");
	}

	time::sleep(Duration::from_secs(1)).await;

	assert_eq!(source.calls(), 2);
	assert_eq!(cache.get_credential(&CancellationToken::new()).await?.value(), "token-2");
	assert_eq!(source.calls(), 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_renewal_does_not_block_callers_holding_a_valid_credential() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::with_latency(Duration::from_secs(60), Duration::from_secs(5));
	let cache = CredentialCache::new(source.clone(), foreground())?;
	let cancel = CancellationToken::new();

	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-1");

	time::advance(Duration::from_secs(45)).await;

	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-1");

	settle().await;

	assert_eq!(cache.status().await.state, CredentialState::Fetching);

	let during_renewal = time::timeout(Duration::from_secs(1), cache.get_credential(&cancel))
		.await
		.expect("served without waiting for the renewal")?;

	assert_eq!(during_renewal.value(), "token-1");

	time::sleep(Duration::from_secs(5)).await;

	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-2");
	assert_eq!(source.calls(), 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn expired_credential_is_renewed_before_serving() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::new(Duration::from_secs(60));
	let cache = CredentialCache::new(source.clone(), foreground())?;
	let cancel = CancellationToken::new();

	cache.get_credential(&cancel).await?;
	time::advance(Duration::from_secs(61)).await;

	assert_eq!(cache.status().await.state, CredentialState::Expired);
	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-2");
	assert_eq!(source.calls(), 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_reaches_the_caller_and_next_call_recovers() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::new(Duration::from_secs(60));
	let cache = CredentialCache::new(source.clone(), foreground())?;
	let cancel = CancellationToken::new();

	source.fail(true);

	let err = cache.get_credential(&cancel).await.expect_err("fetch failed");

	assert!(matches!(err, Error::CredentialFetch(CredentialFetchFailure::Status { .. })));
	assert_eq!(cache.status().await.state, CredentialState::Failed);

	source.fail(false);

	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-2");
	assert_eq!(source.calls(), 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_proactive_renewal_keeps_serving_the_valid_credential() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::new(Duration::from_secs(60));
	let cache = CredentialCache::new(source.clone(), foreground())?;
	let cancel = CancellationToken::new();

	cache.get_credential(&cancel).await?;
	source.fail(true);
	time::advance(Duration::from_secs(45)).await;

	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-1");

	settle().await;

	let status = cache.status().await;

	assert_eq!(source.calls(), 2);
	assert_eq!(status.error_count, 1);
	assert_eq!(status.metrics.renewal_errors, 1);
	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-1");
	assert_eq!(source.calls(), 2);

	source.fail(false);
	time::advance(Duration::from_secs(2)).await;

	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-1");

	settle().await;

	assert_eq!(cache.get_credential(&cancel).await?.value(), "token-3");
	assert_eq!(cache.status().await.error_count, 0);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_waiter_does_not_cancel_the_shared_fetch() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::with_latency(Duration::from_secs(300), Duration::from_secs(5));
	let cache = CredentialCache::new(source.clone(), foreground())?;
	let impatient = CancellationToken::new();
	let waiter = {
		let cache = cache.clone();
		let impatient = impatient.clone();

		tokio::spawn(async move { cache.get_credential(&impatient).await })
	};

	time::sleep(Duration::from_secs(1)).await;
	impatient.cancel();

	assert!(waiter.await.expect("join").expect_err("cancelled").is_cancelled());
	assert_eq!(cache.get_credential(&CancellationToken::new()).await?.value(), "token-1");
	assert_eq!(source.calls(), 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn background_loop_renews_ahead_of_expiry() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::new(Duration::from_secs(60));
	let cache = CredentialCache::new(source.clone(), RenewalPolicy::default())?;

	settle().await;

	assert_eq!(source.calls(), 1);

	time::sleep(Duration::from_secs(41)).await;

	assert_eq!(source.calls(), 2);
	assert_eq!(cache.get_credential(&CancellationToken::new()).await?.value(), "token-2");
	assert_eq!(source.calls(), 2);

	cache.shutdown();
	time::sleep(Duration::from_secs(600)).await;

	assert_eq!(source.calls(), 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn background_loop_backs_off_after_failures() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let source = ScriptedSource::new(Duration::from_secs(60));

	source.fail(true);

	let policy = RenewalPolicy {
		min_backoff: Duration::from_secs(1),
		max_backoff: Duration::from_secs(8),
		..Default::default()
	};
	let cache = CredentialCache::new(source.clone(), policy)?;

	time::sleep(Duration::from_secs(10)).await;

	let attempts = source.calls();

	assert!((2..=6).contains(&attempts), "attempts within 10s: {attempts}");

	source.fail(false);
	time::sleep(Duration::from_secs(10)).await;

	assert_eq!(cache.status().await.state, CredentialState::Ready);

	cache.shutdown();

	Ok(())
}
