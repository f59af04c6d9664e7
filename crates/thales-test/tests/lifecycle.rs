//! Server start, drain, and shutdown.

use std::time::Duration;

use serde_json::json;
use thales_config::ThalesConfig;
use thales_core::{Code, Credentials};
use thales_middleware::{chain, handler_fn};
use thales_server::{App, Registry, ServiceDescriptor, ShutdownSignal};
use thales_test::{MemoryTransport, TestError};
use tokio_test::{assert_err, assert_ok};

fn registry() -> Registry {
    Registry::new()
        .service(ServiceDescriptor::new("test.Life").unary("Slow").unary("Fast"))
        .use_method(
            "slow",
            chain![handler_fn(|ctx| Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ctx.set_response(json!({ "done": true }));
                Ok(())
            }))],
        )
        .use_method("fast", chain![handler_fn(|_ctx| Box::pin(async { Ok(()) }))])
}

#[tokio::test]
async fn test_close_drains_in_flight_calls() {
    let transport = MemoryTransport::new();
    let server = App::new(registry())
        .start(&transport, "memory:0", &Credentials::Insecure)
        .await
        .unwrap();
    let addr = server.local_addr().to_string();
    let client = transport.client(&addr);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.unary("test.Life", "Slow", json!({})).await }
    });
    while server.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    assert_ok!(server.close().await);

    let outcome = assert_ok!(pending.await.unwrap());
    outcome.assert_ok();
    assert_eq!(outcome.message().unwrap(), &json!({ "done": true }));

    assert!(!transport.is_listening(&addr));
    let err = client.unary("test.Life", "Fast", json!({})).await.unwrap_err();
    assert!(matches!(err, TestError::NotListening(_)));
}

#[tokio::test]
async fn test_listen_on_configured_address() {
    let mut config = ThalesConfig::default();
    config.server.addr = "memory:4242".to_string();
    config.server.stream_capacity = 4;
    config.errors.silent = true;

    let app = App::from_config(registry(), &config);
    let transport = MemoryTransport::with_capacity(app.config().stream_capacity());
    assert_eq!(transport.capacity(), 4);
    let server = app.listen(&transport, &Credentials::Insecure).await.unwrap();

    assert_eq!(server.local_addr(), "memory:4242");
    let methods = transport.methods("memory:4242").unwrap();
    assert_eq!(methods.len(), 2);

    let outcome = transport
        .client("memory:4242")
        .unary("test.Life", "fast", json!({}))
        .await
        .unwrap();
    outcome.assert_ok();
    assert_eq!(outcome.message().unwrap(), &json!({}));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_close_on_external_signal() {
    let transport = MemoryTransport::new();
    let server = App::new(registry())
        .start(&transport, "memory:0", &Credentials::Insecure)
        .await
        .unwrap();
    let addr = server.local_addr().to_string();

    let signal = ShutdownSignal::new();
    let closing = tokio::spawn(server.close_on(signal.clone()));

    let outcome = transport
        .client(&addr)
        .unary("test.Life", "Fast", json!({}))
        .await
        .unwrap();
    assert_eq!(outcome.code(), Code::Ok);

    signal.trigger();
    closing.await.unwrap().unwrap();
    assert!(!transport.is_listening(&addr));
}

#[tokio::test]
async fn test_second_bind_on_same_address_fails() {
    let transport = MemoryTransport::new();
    let first = App::new(registry())
        .start(&transport, "memory:5", &Credentials::Insecure)
        .await
        .unwrap();

    let err = assert_err!(
        App::new(registry())
            .start(&transport, "memory:5", &Credentials::Insecure)
            .await
    );
    assert!(matches!(err, thales_server::ServerError::Bind { .. }));

    first.close().await.unwrap();
}
