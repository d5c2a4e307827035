//! Integration tests composing the response cache and credential stages around a base handler.

// std
use std::sync::{
	Arc, Mutex,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use gateway_outbound::{
	CancellationToken, Call, Capability, CredentialCache, CredentialStage, Error, Handler,
	HandlerFuture, InternalClient, OutgoingRequest, PipelineBuilder, RenewalPolicy, Response,
	ResponseCache, ResponseCacheStage, Result, ServiceRegistration, ServiceRegistry,
	StaticCredentialSource,
};
use http::header::AUTHORIZATION;
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq)]
struct Order {
	id: String,
}

#[derive(Default)]
struct OrderService {
	calls: AtomicUsize,
	seen_authorization: Mutex<Vec<String>>,
}
impl Handler for OrderService {
	fn call<'a>(&'a self, call: Call, _cancel: &'a CancellationToken) -> HandlerFuture<'a> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			if let Some(value) = call.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
				self.seen_authorization.lock().expect("lock").push(value.to_owned());
			}

			Response::json(&serde_json::json!({ "id": "42" }))
		})
	}
}

fn registry() -> Result<Arc<ServiceRegistry>> {
	let ordering = ServiceRegistration::new("ordering", "https://ordering.internal/api")?;

	Ok(Arc::new(ServiceRegistry::builder().register(ordering)?.build()))
}

fn client(base: Arc<OrderService>) -> Result<InternalClient> {
	let credentials = CredentialCache::new(
		Arc::new(StaticCredentialSource::new("svc-token")),
		RenewalPolicy { background: false, ..Default::default() },
	)?;
	let pipeline = PipelineBuilder::new()
		.register(Capability::INTERNAL_HTTP, base)?
		.add_stage(Arc::new(ResponseCacheStage::new(Arc::new(ResponseCache::default()))))?
		.add_stage(Arc::new(CredentialStage::new(credentials)))?
		.build()?;

	Ok(InternalClient::new(pipeline.chain(&Capability::INTERNAL_HTTP)?, registry()?))
}

#[tokio::test]
async fn repeated_read_is_served_once_by_the_base_handler() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let base = Arc::new(OrderService::default());
	let client = client(base.clone())?;
	let cancel = CancellationToken::new();

	assert_eq!(client.stages(), ["credential", "response-cache"]);

	let first: Order = client.get("ordering", OutgoingRequest::new("orders/42"), &cancel).await?;
	let second: Order = client.get("ordering", OutgoingRequest::new("orders/42"), &cancel).await?;

	assert_eq!(first, Order { id: "42".into() });
	assert_eq!(second, first);
	assert_eq!(base.calls.load(Ordering::SeqCst), 1);
	assert_eq!(*base.seen_authorization.lock().expect("lock"), ["Bearer svc-token"]);

	Ok(())
}

#[tokio::test]
async fn writes_always_reach_the_base_handler() -> Result<()> {
	let base = Arc::new(OrderService::default());
	let client = client(base.clone())?;
	let cancel = CancellationToken::new();
	let body = serde_json::json!({ "sku": "apple" });

	client.post_unit("ordering", OutgoingRequest::new("orders").json(&body)?, &cancel).await?;
	client.post_unit("ordering", OutgoingRequest::new("orders").json(&body)?, &cancel).await?;

	assert_eq!(base.calls.load(Ordering::SeqCst), 2);

	Ok(())
}

#[tokio::test]
async fn undecodable_body_is_a_transport_failure() -> Result<()> {
	#[derive(Debug, Deserialize)]
	struct Basket {
		#[allow(dead_code)]
		items: Vec<String>,
	}

	let base = Arc::new(OrderService::default());
	let client = client(base)?;
	let cancel = CancellationToken::new();

	for _ in 0..2 {
		let err = client
			.get::<Basket>("ordering", OutgoingRequest::new("orders/42"), &cancel)
			.await
			.expect_err("shape mismatch");

		assert!(matches!(
			err,
			Error::Transport(ref failure)
				if matches!(failure.kind, gateway_outbound::TransportFailureKind::Deserialize { .. })
		));
	}

	Ok(())
}

#[tokio::test]
async fn unknown_service_is_rejected_before_the_chain() -> Result<()> {
	let base = Arc::new(OrderService::default());
	let client = client(base.clone())?;
	let err = client
		.get::<Order>("billing", OutgoingRequest::new("invoices"), &CancellationToken::new())
		.await
		.expect_err("unknown service");

	assert!(matches!(err, Error::NotRegistered { ref service } if service == "billing"));
	assert_eq!(base.calls.load(Ordering::SeqCst), 0);

	Ok(())
}
