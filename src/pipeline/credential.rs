//! Stage attaching the shared bearer credential to every call.

// self
use crate::{
	_prelude::*,
	credential::manager::CredentialCache,
	http::request::Call,
	pipeline::{Handler, HandlerFuture, Stage},
};

/// Sets `Authorization: Bearer <credential>` before delegating.
///
/// A call never reaches the inner handler when no credential can be obtained.
#[derive(Clone, Debug)]
pub struct CredentialStage {
	credentials: CredentialCache,
}
impl CredentialStage {
	/// Stage drawing credentials from `credentials`.
	pub fn new(credentials: CredentialCache) -> Self {
		Self { credentials }
	}
}
impl Stage for CredentialStage {
	fn name(&self) -> &'static str {
		"credential"
	}

	fn wrap(&self, inner: Arc<dyn Handler>) -> Arc<dyn Handler> {
		Arc::new(Authorizing { credentials: self.credentials.clone(), inner })
	}
}

struct Authorizing {
	credentials: CredentialCache,
	inner: Arc<dyn Handler>,
}
impl Handler for Authorizing {
	fn call<'a>(&'a self, mut call: Call, cancel: &'a CancellationToken) -> HandlerFuture<'a> {
		Box::pin(async move {
			let credential = self.credentials.get_credential(cancel).await?;

			call.set_bearer(credential.value())?;

			self.inner.call(call, cancel).await
		})
	}
}
