//! Outgoing request construction and the call/response values that flow through a pipeline.

// crates.io
use http::{
	HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
	header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde::{Serialize, de::DeserializeOwned};
use url::Url;
// self
use crate::{
	_prelude::*,
	error::{TransportFailure, TransportFailureKind},
	registry::ServiceRegistration,
};

/// Request described relative to a logical service.
///
/// The HTTP method is chosen by the client operation (`get`, `post`, ...), and the path is
/// resolved against the service's base address when the call is made.
#[derive(Clone, Debug, Default)]
pub struct OutgoingRequest {
	path: String,
	query: Vec<(String, String)>,
	headers: HeaderMap,
	body: Option<Vec<u8>>,
}
impl OutgoingRequest {
	/// Request for a path relative to the service base address.
	pub fn new(path: impl Into<String>) -> Self {
		Self { path: path.into(), ..Default::default() }
	}

	/// Append a query parameter.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Append one query parameter per value under the same key.
	pub fn query_values<I, S>(mut self, key: impl Into<String>, values: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let key = key.into();

		for value in values {
			self.query.push((key.clone(), value.into()));
		}

		self
	}

	/// Append a header value.
	pub fn header(mut self, name: HeaderName, value: impl AsRef<str>) -> Result<Self> {
		let value = HeaderValue::from_str(value.as_ref()).map_err(|err| Error::Validation {
			field: "header",
			reason: format!("Invalid value for {name}: {err}."),
		})?;

		self.headers.append(name, value);

		Ok(self)
	}

	/// Attach a bearer credential, replacing any existing authorization header.
	pub fn bearer(mut self, token: &str) -> Result<Self> {
		self.headers.insert(AUTHORIZATION, bearer_value(token)?);

		Ok(self)
	}

	/// Serialize `body` as the JSON request body.
	pub fn json<T>(mut self, body: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		let bytes = serde_json::to_vec(body).map_err(|err| Error::Validation {
			field: "body",
			reason: format!("Request body could not be serialized: {err}."),
		})?;

		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		self.body = Some(bytes);

		Ok(self)
	}

	/// Path relative to the service base address.
	pub fn path(&self) -> &str {
		&self.path
	}

	/// Resolve into a [`Call`] addressed to `service`.
	pub fn into_call(self, service: &ServiceRegistration, method: Method) -> Result<Call> {
		let path = self.path.trim_start_matches('/');
		let mut url = service.base_url.join(path)?;

		if !self.query.is_empty() {
			url.query_pairs_mut().extend_pairs(self.query.iter());
		}

		Ok(Call {
			service: Arc::from(service.name.as_str()),
			method,
			url,
			headers: self.headers,
			body: self.body.map(Arc::from),
		})
	}
}

/// Fully resolved call handed to pipeline handlers.
#[derive(Clone, Debug)]
pub struct Call {
	/// Logical service name.
	pub service: Arc<str>,
	/// HTTP method.
	pub method: Method,
	/// Absolute URL.
	pub url: Url,
	/// Request headers.
	pub headers: HeaderMap,
	/// Optional request body.
	pub body: Option<Arc<[u8]>>,
}
impl Call {
	/// Build a call directly from its parts.
	pub fn new(service: impl Into<Arc<str>>, method: Method, url: Url) -> Self {
		Self { service: service.into(), method, url, headers: HeaderMap::new(), body: None }
	}

	/// Whether the call only reads state (GET/HEAD) and may be served from a cache.
	pub fn is_read(&self) -> bool {
		matches!(self.method, Method::GET | Method::HEAD)
	}

	/// Normalized request identity: method plus absolute URL.
	pub fn cache_key(&self) -> String {
		format!("{} {}", self.method, self.url)
	}

	/// Set the authorization header to a bearer credential.
	pub fn set_bearer(&mut self, token: &str) -> Result<()> {
		self.headers.insert(AUTHORIZATION, bearer_value(token)?);

		Ok(())
	}

	/// Build a transport failure describing this call.
	pub fn failure(&self, kind: TransportFailureKind) -> Error {
		TransportFailure::new(self.service.as_ref(), self.method.clone(), self.url.as_str(), kind)
			.into()
	}
}

/// Successful downstream response.
#[derive(Clone, Debug)]
pub struct Response {
	/// Response status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw body bytes.
	pub body: Arc<[u8]>,
}
impl Response {
	/// Build a response from its parts.
	pub fn new(status: StatusCode, body: impl Into<Arc<[u8]>>) -> Self {
		Self { status, headers: HeaderMap::new(), body: body.into() }
	}

	/// JSON `200 OK` response, mostly useful for handlers that answer without a network hop.
	pub fn json<T>(value: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		let body = serde_json::to_vec(value)?;
		let mut response = Self::new(StatusCode::OK, body);

		response.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		Ok(response)
	}

	/// Decode the body as JSON.
	pub fn decode<T>(&self) -> std::result::Result<T, TransportFailureKind>
	where
		T: DeserializeOwned,
	{
		serde_json::from_slice(&self.body)
			.map_err(|err| TransportFailureKind::Deserialize { message: err.to_string() })
	}
}

fn bearer_value(token: &str) -> Result<HeaderValue> {
	let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|err| {
		Error::Validation { field: "authorization", reason: format!("Invalid credential: {err}.") }
	})?;

	value.set_sensitive(true);

	Ok(value)
}
