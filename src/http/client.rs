//! reqwest-backed base handler for internal service calls.

// crates.io
use reqwest::{Client, redirect::Policy};
// self
use crate::{
	_prelude::*,
	error::TransportFailureKind,
	http::{
		request::{Call, Response},
		retry::{AttemptBudget, RetryExecutor},
	},
	pipeline::{Handler, HandlerFuture},
	registry::{ServiceRegistration, ServiceRegistry},
	security,
};

/// Sends calls over HTTP, retrying transient failures per the service's retry policy.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
	client: Client,
	registry: Arc<ServiceRegistry>,
}
impl ReqwestTransport {
	/// Transport with a default reqwest client.
	pub fn new(registry: Arc<ServiceRegistry>) -> Result<Self> {
		Ok(Self::with_client(registry, default_client()?))
	}

	/// Transport over a caller-supplied client.
	pub fn with_client(registry: Arc<ServiceRegistry>, client: Client) -> Self {
		Self { client, registry }
	}

	/// Services this transport can reach.
	pub fn registry(&self) -> &Arc<ServiceRegistry> {
		&self.registry
	}

	#[tracing::instrument(
		skip(self, call, cancel),
		fields(service = %call.service, method = %call.method, url = %call.url)
	)]
	async fn send(&self, call: Call, cancel: &CancellationToken) -> Result<Response> {
		let service = self.registry.get(&call.service)?;

		if service.require_https {
			security::enforce_https(&call.url)?;
		}

		let mut executor = RetryExecutor::new(&service.retry_policy);
		let mut last_error = None;

		while let AttemptBudget::Granted { timeout } = executor.attempt_budget() {
			let attempt = tokio::select! {
				_ = cancel.cancelled() => return Err(Error::Cancelled),
				attempt = self.attempt(&service, &call, timeout) => attempt,
			};

			match attempt {
				Ok(response) => return Ok(response),
				Err(err) if executor.should_retry(&err) => {
					tracing::debug!(error = %err, retries = executor.retries_used(), "transient failure");

					last_error = Some(err);

					executor.sleep_backoff(cancel).await?;
				},
				Err(err) => {
					last_error = Some(err);

					break;
				},
			}
		}

		let err = last_error.unwrap_or_else(|| call.failure(TransportFailureKind::Timeout));

		tracing::warn!(error = %err, retries = executor.retries_used(), "downstream call failed");

		Err(err)
	}

	async fn attempt(
		&self,
		service: &ServiceRegistration,
		call: &Call,
		timeout: Duration,
	) -> Result<Response> {
		let mut builder = self
			.client
			.request(call.method.clone(), call.url.clone())
			.headers(call.headers.clone())
			.timeout(timeout);

		if let Some(body) = call.body.as_ref() {
			builder = builder.body(body.to_vec());
		}

		let started = Instant::now();
		let response = builder
			.send()
			.await
			.map_err(|err| call.failure(TransportFailureKind::from_reqwest(&err)))?;
		let status = response.status();
		let headers = response.headers().clone();

		if !status.is_success() {
			let body = response.text().await.ok().filter(|body| !body.is_empty());

			return Err(call.failure(TransportFailureKind::Status { status, body }));
		}

		let body = response
			.bytes()
			.await
			.map_err(|err| call.failure(TransportFailureKind::from_reqwest(&err)))?;

		tracing::debug!(
			service = %service.name,
			%status,
			elapsed = ?started.elapsed(),
			bytes = body.len(),
			"downstream exchange complete"
		);

		Ok(Response { status, headers, body: Arc::from(body.as_ref()) })
	}
}
impl Handler for ReqwestTransport {
	fn call<'a>(&'a self, call: Call, cancel: &'a CancellationToken) -> HandlerFuture<'a> {
		Box::pin(self.send(call, cancel))
	}
}

/// reqwest client with the crate's user agent and redirect limits.
pub fn default_client() -> Result<Client> {
	Client::builder()
		.redirect(Policy::limited(10))
		.user_agent(format!("gateway-outbound/{}", env!("CARGO_PKG_VERSION")))
		.connect_timeout(Duration::from_secs(5))
		.build()
		.map_err(|err| Error::HttpClientBuild { reason: err.to_string() })
}
