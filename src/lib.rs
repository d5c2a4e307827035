//! Outbound call pipeline for gateways: single-flight bearer credentials with background
//! renewal, composable call stages, and short-lived response caching.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod client;
pub mod config;
pub mod credential;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod security;

mod error;
mod _prelude {
	pub use std::{
		fmt::{Debug, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration,
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;
	pub use tokio_util::sync::CancellationToken;

	pub use crate::{Error, Result};
}

pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	client::InternalClient,
	config::{CredentialConfig, Gateway, GatewayConfig, ResponseCacheConfig},
	credential::{
		Credential, CredentialSource, RenewalPolicy,
		manager::{CredentialCache, CredentialState, CredentialStatus},
		source::{HttpCredentialSource, StaticCredentialSource},
	},
	error::{
		CredentialFetchFailure, Error, PipelineConfigurationError, Result, TransportFailure,
		TransportFailureKind,
	},
	http::{
		client::ReqwestTransport,
		request::{Call, OutgoingRequest, Response},
	},
	pipeline::{
		Capability, Chain, Handler, HandlerFuture, Pipeline, Stage, builder::PipelineBuilder,
		credential::CredentialStage,
		response_cache::{ResponseCache, ResponseCacheStage},
	},
	registry::{JitterStrategy, RetryPolicy, ServiceRegistration, ServiceRegistry},
};
