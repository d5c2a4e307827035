//! Typed facade over the `internal-http` chain.

// crates.io
use http::Method;
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	http::request::{OutgoingRequest, Response},
	pipeline::{Chain, Handler},
	registry::ServiceRegistry,
};

/// Calls logical internal services through an assembled chain and decodes JSON bodies.
#[derive(Clone, Debug)]
pub struct InternalClient {
	chain: Chain,
	registry: Arc<ServiceRegistry>,
}
impl InternalClient {
	/// Client sending through `chain` to services known to `registry`.
	pub fn new(chain: Chain, registry: Arc<ServiceRegistry>) -> Self {
		Self { chain, registry }
	}

	/// Stages the calls pass through, outermost first.
	pub fn stages(&self) -> &[&'static str] {
		self.chain.stages()
	}

	/// GET and decode the JSON body.
	pub async fn get<T>(
		&self,
		service: &str,
		request: OutgoingRequest,
		cancel: &CancellationToken,
	) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.typed(service, Method::GET, request, cancel).await
	}

	/// POST and decode the JSON body.
	pub async fn post<T>(
		&self,
		service: &str,
		request: OutgoingRequest,
		cancel: &CancellationToken,
	) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.typed(service, Method::POST, request, cancel).await
	}

	/// POST, ignoring the response body.
	pub async fn post_unit(
		&self,
		service: &str,
		request: OutgoingRequest,
		cancel: &CancellationToken,
	) -> Result<()> {
		self.send(service, Method::POST, request, cancel).await.map(drop)
	}

	/// PUT and decode the JSON body.
	pub async fn put<T>(
		&self,
		service: &str,
		request: OutgoingRequest,
		cancel: &CancellationToken,
	) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.typed(service, Method::PUT, request, cancel).await
	}

	/// PUT, ignoring the response body.
	pub async fn put_unit(
		&self,
		service: &str,
		request: OutgoingRequest,
		cancel: &CancellationToken,
	) -> Result<()> {
		self.send(service, Method::PUT, request, cancel).await.map(drop)
	}

	/// DELETE and decode the JSON body.
	pub async fn delete<T>(
		&self,
		service: &str,
		request: OutgoingRequest,
		cancel: &CancellationToken,
	) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.typed(service, Method::DELETE, request, cancel).await
	}

	/// Send without decoding.
	pub async fn send(
		&self,
		service: &str,
		method: Method,
		request: OutgoingRequest,
		cancel: &CancellationToken,
	) -> Result<Response> {
		let registration = self.registry.get(service)?;
		let call = request.into_call(&registration, method)?;

		self.chain.call(call, cancel).await
	}

	async fn typed<T>(
		&self,
		service: &str,
		method: Method,
		request: OutgoingRequest,
		cancel: &CancellationToken,
	) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let registration = self.registry.get(service)?;
		let call = request.into_call(&registration, method)?;
		let failure = call.clone();
		let response = self.chain.call(call, cancel).await?;

		response.decode().map_err(|kind| failure.failure(kind))
	}
}
