//! Gateway configuration and bootstrap.

// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{
	_prelude::*,
	client::InternalClient,
	credential::{
		CredentialSource, RenewalPolicy,
		manager::CredentialCache,
		source::{DEFAULT_CREDENTIAL_LIFETIME, HttpCredentialSource},
	},
	http::client::{ReqwestTransport, default_client},
	pipeline::{
		Capability, Pipeline,
		builder::PipelineBuilder,
		credential::CredentialStage,
		response_cache::{DEFAULT_RESPONSE_TTL, ResponseCache, ResponseCacheStage},
	},
	registry::{ServiceRegistration, ServiceRegistry},
	security,
};

/// Where and how the shared credential is renewed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialConfig {
	/// Endpoint answering renewal POSTs.
	pub renewal_url: Url,
	/// Bound on each renewal request.
	#[serde(default = "default_request_timeout")]
	pub request_timeout: Duration,
	/// Lifetime assumed when the endpoint states no expiry.
	#[serde(default = "default_lifetime")]
	pub default_lifetime: Duration,
	/// Renewal schedule.
	#[serde(default)]
	pub renewal: RenewalPolicy,
}
impl CredentialConfig {
	/// Config for `renewal_url` with default timings.
	pub fn new(renewal_url: Url) -> Self {
		Self {
			renewal_url,
			request_timeout: default_request_timeout(),
			default_lifetime: default_lifetime(),
			renewal: RenewalPolicy::default(),
		}
	}

	/// Validate timings and the renewal schedule.
	pub fn validate(&self) -> Result<()> {
		if self.request_timeout.is_zero() {
			return Err(Error::Validation {
				field: "credential.request_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.default_lifetime <= self.renewal.lead_time {
			return Err(Error::Validation {
				field: "credential.default_lifetime",
				reason: "Must exceed the renewal lead time.".into(),
			});
		}

		self.renewal.validate()
	}
}

/// Response cache settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
	/// How long an outcome is replayed.
	#[serde(default = "default_response_ttl")]
	pub ttl: Duration,
}
impl ResponseCacheConfig {
	/// Empty store with this configuration.
	pub fn build(&self) -> ResponseCache {
		ResponseCache::new(self.ttl)
	}
}
impl Default for ResponseCacheConfig {
	fn default() -> Self {
		Self { ttl: DEFAULT_RESPONSE_TTL }
	}
}

/// Full outbound configuration of a gateway process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
	/// Reject plain-HTTP service and renewal addresses.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Downstream services.
	#[serde(default)]
	pub services: Vec<ServiceRegistration>,
	/// Shared credential.
	pub credential: CredentialConfig,
	/// Response cache.
	#[serde(default)]
	pub response_cache: ResponseCacheConfig,
}
impl GatewayConfig {
	/// Parse from JSON.
	pub fn from_json(raw: &str) -> Result<Self> {
		Ok(serde_json::from_str(raw)?)
	}

	/// Build the service registry described by this config.
	pub fn registry(&self) -> Result<ServiceRegistry> {
		self.services
			.iter()
			.cloned()
			.try_fold(ServiceRegistry::builder().require_https(self.require_https), |builder, service| {
				builder.register(service)
			})
			.map(|builder| builder.build())
	}
}

/// Assembled outbound stack: registry, credential cache and the `internal-http` pipeline.
#[derive(Clone, Debug)]
pub struct Gateway {
	registry: Arc<ServiceRegistry>,
	credentials: CredentialCache,
	response_cache: Arc<ResponseCache>,
	pipeline: Pipeline,
	client: InternalClient,
}
impl Gateway {
	/// Assemble the stack with a renewal-endpoint credential source.
	///
	/// Must be called inside a Tokio runtime when background renewal is enabled.
	pub fn from_config(config: GatewayConfig) -> Result<Self> {
		config.credential.validate()?;

		if config.require_https {
			security::enforce_https(&config.credential.renewal_url)?;
		}

		let client = default_client()?;
		let source = HttpCredentialSource::new(client.clone(), config.credential.renewal_url.clone())
			.with_request_timeout(config.credential.request_timeout)
			.with_default_lifetime(config.credential.default_lifetime);

		Self::assemble(config, client, Arc::new(source))
	}

	/// Assemble the stack around a caller-supplied credential source.
	pub fn with_source(config: GatewayConfig, source: Arc<dyn CredentialSource>) -> Result<Self> {
		config.credential.validate()?;

		Self::assemble(config, default_client()?, source)
	}

	fn assemble(
		config: GatewayConfig,
		client: reqwest::Client,
		source: Arc<dyn CredentialSource>,
	) -> Result<Self> {
		let registry = Arc::new(config.registry()?);
		let credentials = CredentialCache::new(source, config.credential.renewal.clone())?;
		let response_cache = Arc::new(config.response_cache.build());
		let pipeline = PipelineBuilder::new()
			.register(
				Capability::INTERNAL_HTTP,
				Arc::new(ReqwestTransport::with_client(registry.clone(), client)),
			)?
			.add_stage(Arc::new(ResponseCacheStage::new(response_cache.clone())))?
			.add_stage(Arc::new(CredentialStage::new(credentials.clone())))?
			.build()?;
		let client = InternalClient::new(pipeline.chain(&Capability::INTERNAL_HTTP)?, registry.clone());

		tracing::info!(
			services = ?registry.names(),
			stages = ?client.stages(),
			"outbound gateway assembled"
		);

		Ok(Self { registry, credentials, response_cache, pipeline, client })
	}

	/// Typed client for internal services.
	pub fn client(&self) -> &InternalClient {
		&self.client
	}

	/// Shared credential cache.
	pub fn credentials(&self) -> &CredentialCache {
		&self.credentials
	}

	/// Response cache store.
	pub fn response_cache(&self) -> &Arc<ResponseCache> {
		&self.response_cache
	}

	/// Resolved pipeline.
	pub fn pipeline(&self) -> &Pipeline {
		&self.pipeline
	}

	/// Registered services.
	pub fn registry(&self) -> &Arc<ServiceRegistry> {
		&self.registry
	}

	/// Stop background renewal.
	pub fn shutdown(&self) {
		self.credentials.shutdown();
	}
}

fn default_true() -> bool {
	true
}

fn default_request_timeout() -> Duration {
	Duration::from_secs(10)
}

fn default_lifetime() -> Duration {
	DEFAULT_CREDENTIAL_LIFETIME
}

fn default_response_ttl() -> Duration {
	DEFAULT_RESPONSE_TTL
}
