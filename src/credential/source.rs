//! Credential sources: a renewal endpoint over HTTP and a fixed value.

// crates.io
use reqwest::Client;
use serde::Deserialize;
use url::Url;
// self
use crate::{
	_prelude::*,
	credential::{Credential, CredentialFuture, CredentialSource},
	error::CredentialFetchFailure,
};

/// Lifetime assumed when an issuer does not state an expiry.
pub const DEFAULT_CREDENTIAL_LIFETIME: Duration = Duration::from_secs(20 * 60);

#[derive(Deserialize)]
struct IssuedPayload {
	#[serde(alias = "token")]
	access_token: String,
	#[serde(default)]
	expires_in: Option<u64>,
	#[serde(default)]
	expires_at: Option<DateTime<Utc>>,
}

/// Fetches credentials by POSTing to a renewal endpoint.
///
/// The endpoint answers with `{"access_token": "...", "expires_in": 1200}`; `token` is accepted
/// in place of `access_token` and an RFC 3339 `expires_at` in place of `expires_in`.
#[derive(Clone, Debug)]
pub struct HttpCredentialSource {
	client: Client,
	renewal_url: Url,
	request_timeout: Duration,
	default_lifetime: Duration,
}
impl HttpCredentialSource {
	/// Source for `renewal_url` using `client`.
	pub fn new(client: Client, renewal_url: Url) -> Self {
		Self {
			client,
			renewal_url,
			request_timeout: Duration::from_secs(10),
			default_lifetime: DEFAULT_CREDENTIAL_LIFETIME,
		}
	}

	/// Bound each renewal request.
	pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
		self.request_timeout = request_timeout;

		self
	}

	/// Lifetime for credentials issued without an expiry.
	pub fn with_default_lifetime(mut self, default_lifetime: Duration) -> Self {
		self.default_lifetime = default_lifetime;

		self
	}

	/// Renewal endpoint.
	pub fn renewal_url(&self) -> &Url {
		&self.renewal_url
	}

	#[tracing::instrument(skip(self), fields(url = %self.renewal_url))]
	async fn request(&self) -> Result<Credential> {
		let response = self
			.client
			.post(self.renewal_url.clone())
			.timeout(self.request_timeout)
			.send()
			.await
			.map_err(|err| CredentialFetchFailure::Request { message: err.to_string() })?;
		let status = response.status();

		if !status.is_success() {
			let body = response.text().await.ok().filter(|body| !body.is_empty());

			return Err(CredentialFetchFailure::Status { status, body }.into());
		}

		let bytes = response
			.bytes()
			.await
			.map_err(|err| CredentialFetchFailure::Request { message: err.to_string() })?;
		let payload: IssuedPayload = serde_json::from_slice(&bytes)
			.map_err(|err| CredentialFetchFailure::Payload { message: err.to_string() })?;

		if payload.access_token.is_empty() {
			return Err(
				CredentialFetchFailure::Payload { message: "Issued token is empty.".into() }.into()
			);
		}

		let expires_at = match (payload.expires_at, payload.expires_in) {
			(Some(expires_at), _) => expires_at,
			(None, Some(seconds)) => expiry_after(Duration::from_secs(seconds))?,
			(None, None) => expiry_after(self.default_lifetime)?,
		};

		tracing::debug!(%status, %expires_at, "credential endpoint answered");

		Ok(Credential::new(payload.access_token, expires_at))
	}
}
impl CredentialSource for HttpCredentialSource {
	fn fetch<'a>(&'a self, cancel: &'a CancellationToken) -> CredentialFuture<'a> {
		Box::pin(async move {
			tokio::select! {
				_ = cancel.cancelled() => Err(Error::Cancelled),
				credential = self.request() => credential,
			}
		})
	}
}

/// Hands out the same value with a fresh expiry on every fetch.
#[derive(Clone)]
pub struct StaticCredentialSource {
	value: Arc<str>,
	lifetime: Duration,
}
impl StaticCredentialSource {
	/// Source issuing `value` for [`DEFAULT_CREDENTIAL_LIFETIME`].
	pub fn new(value: impl Into<Arc<str>>) -> Self {
		Self { value: value.into(), lifetime: DEFAULT_CREDENTIAL_LIFETIME }
	}

	/// Override the lifetime of each issued credential.
	pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
		self.lifetime = lifetime;

		self
	}
}
impl CredentialSource for StaticCredentialSource {
	fn fetch<'a>(&'a self, _cancel: &'a CancellationToken) -> CredentialFuture<'a> {
		Box::pin(async move {
			expiry_after(self.lifetime).map(|expires_at| Credential::new(self.value.clone(), expires_at))
		})
	}
}
impl Debug for StaticCredentialSource {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("StaticCredentialSource").field("lifetime", &self.lifetime).finish()
	}
}

fn expiry_after(lifetime: Duration) -> Result<DateTime<Utc>> {
	TimeDelta::from_std(lifetime)
		.ok()
		.and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
		.ok_or_else(|| {
			CredentialFetchFailure::Payload {
				message: format!("Credential lifetime {lifetime:?} is out of range."),
			}
			.into()
		})
}
