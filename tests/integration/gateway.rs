//! End-to-end tests of a gateway assembled from JSON configuration.

// crates.io
use gateway_outbound::{
	CancellationToken, CredentialState, Error, Gateway, GatewayConfig, OutgoingRequest, Result,
};
use serde::Deserialize;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{header, method, path},
};

#[derive(Debug, Deserialize, PartialEq)]
struct Order {
	id: String,
}

fn config(server: &MockServer) -> Result<GatewayConfig> {
	GatewayConfig::from_json(&format!(
		r#"{{
			"require_https": false,
			"services": [
				{{ "name": "ordering", "base_url": "{uri}/ordering" }}
			],
			"credential": {{
				"renewal_url": "{uri}/token/renew",
				"renewal": {{ "background": false }}
			}}
		}}"#,
		uri = server.uri()
	))
}

async fn mount_token_endpoint(server: &MockServer, expected: u64) {
	Mock::given(method("POST"))
		.and(path("/token/renew"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(serde_json::json!({ "access_token": "gw-token", "expires_in": 1200 })),
		)
		.expect(expected)
		.mount(server)
		.await;
}

#[tokio::test]
async fn cached_reads_share_one_credential_and_one_downstream_call() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_token_endpoint(&server, 1).await;
	Mock::given(method("GET"))
		.and(path("/ordering/orders/42"))
		.and(header("authorization", "Bearer gw-token"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "42" })))
		.expect(1)
		.mount(&server)
		.await;

	let gateway = Gateway::from_config(config(&server)?)?;
	let cancel = CancellationToken::new();

	assert_eq!(gateway.client().stages(), ["credential", "response-cache"]);

	let first: Order = gateway.client().get("ordering", OutgoingRequest::new("orders/42"), &cancel).await?;
	let second: Order =
		gateway.client().get("ordering", OutgoingRequest::new("orders/42"), &cancel).await?;

	assert_eq!(first, Order { id: "42".into() });
	assert_eq!(first, second);

	let status = gateway.credentials().status().await;

	assert_eq!(status.state, CredentialState::Ready);
	assert_eq!(status.metrics.served, 2);
	assert_eq!(gateway.response_cache().len().await, 1);

	gateway.shutdown();
	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn credential_endpoint_failure_blocks_the_call() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/token/renew"))
		.respond_with(ResponseTemplate::new(401))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

	let gateway = Gateway::from_config(config(&server)?)?;
	let err = gateway
		.client()
		.get::<Order>("ordering", OutgoingRequest::new("orders/1"), &CancellationToken::new())
		.await
		.expect_err("no credential");

	assert!(matches!(err, Error::CredentialFetch(_)));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn writes_are_forwarded_every_time() -> Result<()> {
	let server = MockServer::start().await;

	mount_token_endpoint(&server, 1).await;
	Mock::given(method("PUT"))
		.and(path("/ordering/orders/42"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "42" })))
		.expect(2)
		.mount(&server)
		.await;

	let gateway = Gateway::from_config(config(&server)?)?;
	let cancel = CancellationToken::new();
	let body = serde_json::json!({ "status": "shipped" });

	for _ in 0..2 {
		let order: Order = gateway
			.client()
			.put("ordering", OutgoingRequest::new("orders/42").json(&body)?, &cancel)
			.await?;

		assert_eq!(order.id, "42");
	}

	assert!(gateway.response_cache().is_empty().await);

	server.verify().await;

	Ok(())
}
