//! Crate-wide error types and `Result` alias.
//!
//! Every outcome that crosses the pipeline is a [`Result`] whose error side is [`Error`]. The
//! error is `Clone` so one credential fetch outcome can be handed to every waiter and one call
//! outcome can be replayed from the response cache.

// crates.io
use http::{Method, StatusCode};

/// Library-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for the outbound pipeline.
#[allow(missing_docs)]
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Transport(#[from] TransportFailure),
	#[error(transparent)]
	CredentialFetch(#[from] CredentialFetchFailure),
	#[error(transparent)]
	Pipeline(#[from] PipelineConfigurationError),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Call was cancelled before completion.")]
	Cancelled,
	#[error("Configuration error: {reason}")]
	Config { reason: String },
	#[error("HTTP client could not be constructed: {reason}")]
	HttpClientBuild { reason: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Service '{service}' is not registered.")]
	NotRegistered { service: String },
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Whether the error came from the caller abandoning the call.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}
impl From<serde_json::Error> for Error {
	fn from(value: serde_json::Error) -> Self {
		Self::Config { reason: value.to_string() }
	}
}

/// Failure of a call against a downstream service.
///
/// Network problems, timeouts, non-success statuses and undecodable bodies are all reported
/// through this one type; callers only ever see the flattened kind.
#[derive(Clone, Debug, thiserror::Error)]
#[error("Call to service '{service}' ({method} {url}) failed: {kind}")]
pub struct TransportFailure {
	/// Logical service the call was addressed to.
	pub service: String,
	/// HTTP method of the call.
	pub method: Method,
	/// Absolute URL of the call.
	pub url: String,
	/// What went wrong.
	pub kind: TransportFailureKind,
}
impl TransportFailure {
	/// Build a failure for the given call coordinates.
	pub fn new(
		service: impl Into<String>,
		method: Method,
		url: impl Into<String>,
		kind: TransportFailureKind,
	) -> Self {
		Self { service: service.into(), method, url: url.into(), kind }
	}

	/// Whether retrying the same call may succeed.
	pub fn is_transient(&self) -> bool {
		self.kind.is_transient()
	}
}

/// Classification of a [`TransportFailure`].
#[allow(missing_docs)]
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportFailureKind {
	#[error("request timed out")]
	Timeout,
	#[error("connection failed: {message}")]
	Connect { message: String },
	#[error("network error: {message}")]
	Network { message: String },
	#[error("upstream returned HTTP {status}")]
	Status { status: StatusCode, body: Option<String> },
	#[error("response body could not be decoded: {message}")]
	Deserialize { message: String },
	#[error("request could not be built: {message}")]
	Request { message: String },
}
impl TransportFailureKind {
	/// Map a reqwest error onto the flattened failure kinds.
	pub fn from_reqwest(err: &reqwest::Error) -> Self {
		if err.is_timeout() {
			Self::Timeout
		} else if err.is_connect() {
			Self::Connect { message: err.to_string() }
		} else if err.is_builder() {
			Self::Request { message: err.to_string() }
		} else if err.is_decode() {
			Self::Deserialize { message: err.to_string() }
		} else {
			Self::Network { message: err.to_string() }
		}
	}

	/// Timeouts, connection problems, 408, 429 and 5xx are considered transient.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Timeout | Self::Connect { .. } | Self::Network { .. } => true,
			Self::Status { status, .. } =>
				status.is_server_error()
					|| *status == StatusCode::REQUEST_TIMEOUT
					|| *status == StatusCode::TOO_MANY_REQUESTS,
			Self::Deserialize { .. } | Self::Request { .. } => false,
		}
	}
}

/// The credential source could not produce a usable credential.
#[allow(missing_docs)]
#[derive(Clone, Debug, thiserror::Error)]
pub enum CredentialFetchFailure {
	#[error("Credential endpoint request failed: {message}")]
	Request { message: String },
	#[error("Credential endpoint returned HTTP {status}: {body:?}")]
	Status { status: StatusCode, body: Option<String> },
	#[error("Credential endpoint returned a malformed payload: {message}")]
	Payload { message: String },
	#[error("Issued credential is already expired (expiry {expires_at}).")]
	AlreadyExpired { expires_at: chrono::DateTime<chrono::Utc> },
	#[error("Credential fetch ended without publishing an outcome.")]
	Abandoned,
}

/// Startup-time pipeline assembly errors.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PipelineConfigurationError {
	#[error("Capability '{capability}' already has a base handler.")]
	DuplicateBase { capability: String },
	#[error("No registered capability accepts stage '{stage}'.")]
	NoBaseForStage { stage: String },
	#[error("Stage '{stage}' is compatible with several capabilities: {candidates:?}.")]
	AmbiguousStage { stage: String, candidates: Vec<String> },
	#[error("Capability '{capability}' is not registered.")]
	UnknownCapability { capability: String },
}
