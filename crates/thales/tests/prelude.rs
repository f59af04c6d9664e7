//! The prelude is enough to build, serve and observe a service.

use serde_json::json;
use thales::prelude::*;
use thales_test::MemoryTransport;

#[tokio::test]
async fn test_greeter_with_metrics() {
    let registry = Registry::new()
        .service(ServiceDescriptor::new("helloworld.Greeter").unary("SayHello"))
        .use_global(CallMetricsMiddleware::new())
        .use_method(
            "sayHello",
            chain![handler_fn(|ctx| Box::pin(async move {
                let name = ctx
                    .request()
                    .and_then(|m| m["name"].as_str())
                    .unwrap_or("world")
                    .to_string();
                ctx.set_response(json!({ "message": format!("hello {name}") }));
                Ok(())
            }))],
        );

    let transport = MemoryTransport::new();
    let server = App::new(registry)
        .info(AppInfo::new("greeter").with_environment("test"))
        .error_hook(MetricsErrorHook)
        .start(&transport, "memory:0", &Credentials::Insecure)
        .await
        .unwrap();

    let outcome = transport
        .client(server.local_addr())
        .unary("helloworld.Greeter", "SayHello", json!({ "name": "thales" }))
        .await
        .unwrap();

    outcome.assert_ok();
    assert_eq!(outcome.message().unwrap(), &json!({ "message": "hello thales" }));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_app_info_reaches_handlers() {
    let registry = Registry::new()
        .service(ServiceDescriptor::new("test.Info").unary("Env"))
        .use_method(
            "env",
            chain![handler_fn(|ctx| Box::pin(async move {
                let env = ctx.app().environment().to_string();
                ctx.set_response(json!({ "env": env }));
                Ok(())
            }))],
        );

    let transport = MemoryTransport::new();
    let server = App::new(registry)
        .info(AppInfo::new("info").with_environment("staging"))
        .start(&transport, "memory:0", &Credentials::Insecure)
        .await
        .unwrap();

    let outcome = transport
        .client(server.local_addr())
        .unary("test.Info", "Env", json!({}))
        .await
        .unwrap();
    assert_eq!(outcome.message().unwrap(), &json!({ "env": "staging" }));

    server.close().await.unwrap();
}
