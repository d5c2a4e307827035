//! Composable call pipelines.
//!
//! A pipeline maps each [`Capability`] onto a base [`Handler`] wrapped by an ordered list of
//! [`Stage`]s. Stages are declared once at startup through
//! [`PipelineBuilder`](builder::PipelineBuilder); the stage declared last becomes the outermost
//! wrapper and sees each call first.

pub mod builder;
pub mod credential;
pub mod response_cache;

// std
use std::{borrow::Cow, collections::HashMap, fmt::Display};
// self
use crate::{
	_prelude::*,
	error::PipelineConfigurationError,
	http::request::{Call, Response},
};

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Response>> + 'a + Send>>;

/// Anything that can complete a [`Call`].
pub trait Handler: Send + Sync {
	/// Perform the call, honouring `cancel`.
	fn call<'a>(&'a self, call: Call, cancel: &'a CancellationToken) -> HandlerFuture<'a>;
}

/// Cross-cutting behaviour wrapped around a base handler.
pub trait Stage: Send + Sync {
	/// Short name used in diagnostics and configuration errors.
	fn name(&self) -> &'static str;

	/// Whether the stage can wrap handlers for `capability`.
	fn supports(&self, _capability: &Capability) -> bool {
		true
	}

	/// Wrap `inner`, producing the handler that runs this stage first.
	fn wrap(&self, inner: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

/// Name of a handler contract stages attach to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability(Cow<'static, str>);
impl Capability {
	/// Calls against internal services over HTTP.
	pub const INTERNAL_HTTP: Self = Self(Cow::Borrowed("internal-http"));

	/// Custom capability name.
	pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
		Self(name.into())
	}

	/// Capability name.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for Capability {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Assembled handler chain for one capability.
#[derive(Clone)]
pub struct Chain {
	capability: Capability,
	stages: Arc<[&'static str]>,
	entry: Arc<dyn Handler>,
}
impl Chain {
	pub(crate) fn new(
		capability: Capability,
		stages: Vec<&'static str>,
		entry: Arc<dyn Handler>,
	) -> Self {
		Self { capability, stages: stages.into(), entry }
	}

	/// Capability served by this chain.
	pub fn capability(&self) -> &Capability {
		&self.capability
	}

	/// Stage names ordered from outermost to innermost.
	pub fn stages(&self) -> &[&'static str] {
		&self.stages
	}
}
impl Handler for Chain {
	fn call<'a>(&'a self, call: Call, cancel: &'a CancellationToken) -> HandlerFuture<'a> {
		self.entry.call(call, cancel)
	}
}
impl Debug for Chain {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Chain")
			.field("capability", &self.capability)
			.field("stages", &self.stages)
			.finish()
	}
}

/// Resolved chains keyed by capability.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
	chains: HashMap<Capability, Chain>,
}
impl Pipeline {
	pub(crate) fn new(chains: HashMap<Capability, Chain>) -> Self {
		Self { chains }
	}

	/// Chain registered for `capability`.
	pub fn chain(&self, capability: &Capability) -> Result<Chain> {
		self.chains.get(capability).cloned().ok_or_else(|| {
			PipelineConfigurationError::UnknownCapability { capability: capability.to_string() }
				.into()
		})
	}

	/// Registered capabilities, sorted.
	pub fn capabilities(&self) -> Vec<&Capability> {
		let mut capabilities: Vec<_> = self.chains.keys().collect();

		capabilities.sort_unstable();

		capabilities
	}
}
