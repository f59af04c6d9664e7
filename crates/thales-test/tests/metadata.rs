//! Header and trailer delivery as seen by a caller.

use futures_util::StreamExt;
use serde_json::json;
use thales_core::{CallType, Credentials, Message, Metadata};
use thales_middleware::{chain, from_fn, handler_fn, Chain};
use thales_server::{App, Registry, RunningServer, ServiceDescriptor};
use thales_test::{CallOutcome, MemoryTransport};

async fn serve(call_type: CallType, handler: Chain) -> (RunningServer, MemoryTransport) {
    let registry = Registry::new()
        .service(ServiceDescriptor::new("test.Meta").method("Check", call_type))
        .use_method("check", handler);
    let transport = MemoryTransport::new();
    let server = App::new(registry)
        .start(&transport, "memory:0", &Credentials::Insecure)
        .await
        .unwrap();
    (server, transport)
}

async fn unary(handler: Chain) -> CallOutcome {
    let (server, transport) = serve(CallType::Unary, handler).await;
    let outcome = transport
        .client(server.local_addr())
        .unary("test.Meta", "Check", json!({}))
        .await
        .unwrap();
    server.close().await.unwrap();
    outcome
}

async fn server_stream(handler: Chain) -> CallOutcome {
    let (server, transport) = serve(CallType::ResponseStream, handler).await;
    let outcome = transport
        .client(server.local_addr())
        .server_stream("test.Meta", "Check", json!({}))
        .await
        .unwrap();
    server.close().await.unwrap();
    outcome
}

async fn duplex(handler: Chain, input: &[Message]) -> CallOutcome {
    let (server, transport) = serve(CallType::Duplex, handler).await;
    let call = transport
        .client(server.local_addr())
        .duplex("test.Meta", "Check")
        .await
        .unwrap();
    for message in input {
        call.send(message.clone()).await.unwrap();
    }
    let outcome = call.finish().await.unwrap();
    server.close().await.unwrap();
    outcome
}

fn md(pairs: &[(&str, &str)]) -> Metadata {
    pairs.iter().copied().collect()
}

#[tokio::test]
async fn test_header_staged_fields_are_sent() {
    let outcome = unary(chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_header("c", "d");
        ctx.flush_header().await
    }))])
    .await;
    assert_eq!(outcome.header(), Some(&md(&[("c", "d")])));
}

#[tokio::test]
async fn test_header_override_replaces_staged_fields() {
    let outcome = unary(chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_header("c", "d");
        ctx.flush_header_with(json!({ "a": "b" })).await
    }))])
    .await;
    assert_eq!(outcome.header(), Some(&md(&[("a", "b")])));
}

#[tokio::test]
async fn test_malformed_header_override_is_ignored() {
    let outcome = unary(chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_header("c", "d");
        ctx.flush_header_with(json!(["not", "a", "mapping"])).await
    }))])
    .await;
    assert_eq!(outcome.header(), Some(&md(&[("c", "d")])));
}

#[tokio::test]
async fn test_header_fields_after_flush_are_dropped() {
    let outcome = unary(chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_header("c", "d");
        ctx.flush_header().await?;
        ctx.set_header("late", "value");
        ctx.flush_header_with(json!({ "again": "no" })).await
    }))])
    .await;
    outcome.assert_ok();
    assert_eq!(outcome.header(), Some(&md(&[("c", "d")])));
}

#[tokio::test]
async fn test_header_sent_with_status_when_never_flushed() {
    let outcome = unary(chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_header("x-request", "1");
        Ok(())
    }))])
    .await;
    assert_eq!(outcome.header(), Some(&md(&[("x-request", "1")])));
}

#[tokio::test]
async fn test_unary_trailer() {
    let outcome = unary(chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_trailer("foo", "bar");
        Ok(())
    }))])
    .await;
    outcome.assert_ok().assert_trailer("foo", "bar");
}

#[tokio::test]
async fn test_trailer_replaced_by_end_value() {
    let outcome = server_stream(chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_trailer("foo", "bar");
        ctx.writer()?.end_with(json!({ "bar": "biz" }));
        Ok(())
    }))])
    .await;
    assert_eq!(outcome.trailer(), &md(&[("bar", "biz")]));
}

#[tokio::test]
async fn test_trailer_kept_without_end_value() {
    let outcome = server_stream(chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_trailer("foo", "bar");
        ctx.writer()?.end();
        Ok(())
    }))])
    .await;
    assert_eq!(outcome.trailer(), &md(&[("foo", "bar")]));
}

#[tokio::test]
async fn test_trailer_kept_with_malformed_end_value() {
    let outcome = server_stream(chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_trailer("foo", "bar");
        ctx.writer()?.end_with(json!("biz"));
        Ok(())
    }))])
    .await;
    assert_eq!(outcome.trailer(), &md(&[("foo", "bar")]));
}

#[tokio::test]
async fn test_duplex_trailer_replaced_by_end_value() {
    let handler = chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_trailer("foo", "bar");
        ctx.writer()?.end_with(json!({ "bar": "biz" }));
        Ok(())
    }))];
    let outcome = duplex(handler, &[]).await;
    outcome.assert_ok();
    assert_eq!(outcome.trailer(), &md(&[("bar", "biz")]));
}

#[tokio::test]
async fn test_duplex_trailer_kept_without_end_value() {
    let handler = chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_trailer("foo", "bar");
        ctx.writer()?.end();
        Ok(())
    }))];
    let outcome = duplex(handler, &[]).await;
    outcome.assert_ok();
    assert_eq!(outcome.trailer(), &md(&[("foo", "bar")]));
}

#[tokio::test]
async fn test_duplex_trailer_kept_with_malformed_end_value() {
    let handler = chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_trailer("foo", "bar");
        ctx.writer()?.end_with(json!("biz"));
        Ok(())
    }))];
    let outcome = duplex(handler, &[]).await;
    outcome.assert_ok();
    assert_eq!(outcome.trailer(), &md(&[("foo", "bar")]));
}

#[tokio::test]
async fn test_duplex_echo_keeps_trailer_set_before_end() {
    let handler = chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_trailer("foo", "bar");
        let mut input = ctx.take_request_stream()?;
        let writer = ctx.writer()?;
        tokio::spawn(async move {
            while let Some(Ok(message)) = input.next().await {
                if writer.write(message).await.is_err() {
                    return;
                }
            }
            writer.end();
        });
        Ok(())
    }))];
    let outcome = duplex(handler, &[json!({ "n": 1 })]).await;
    outcome.assert_ok();
    assert_eq!(outcome.messages(), &[json!({ "n": 1 })]);
    assert_eq!(outcome.trailer(), &md(&[("foo", "bar")]));
}

#[tokio::test]
async fn test_duplex_header_fields_after_flush_are_dropped() {
    let handler = chain![handler_fn(|ctx| Box::pin(async move {
        ctx.set_header("c", "d");
        ctx.flush_header().await?;
        ctx.set_header("late", "value");
        let writer = ctx.writer()?;
        writer.write(json!({ "ok": true })).await?;
        writer.end();
        Ok(())
    }))];
    let outcome = duplex(handler, &[]).await;
    outcome.assert_ok();
    assert_eq!(outcome.header(), Some(&md(&[("c", "d")])));
    assert_eq!(outcome.messages(), &[json!({ "ok": true })]);
}

#[tokio::test]
async fn test_middleware_sees_incoming_metadata() {
    let registry = Registry::new()
        .service(ServiceDescriptor::new("test.Meta").unary("Check"))
        .use_global(from_fn(|ctx, next| Box::pin(async move {
            let token = ctx.metadata().get("authorization").map(str::to_string);
            if let Some(token) = token {
                ctx.set_header("x-auth", token);
            }
            next.run(ctx).await
        })))
        .use_method("check", chain![handler_fn(|_ctx| Box::pin(async { Ok(()) }))]);
    let transport = MemoryTransport::new();
    let server = App::new(registry)
        .start(&transport, "memory:0", &Credentials::Insecure)
        .await
        .unwrap();

    let outcome = transport
        .client(server.local_addr())
        .call("test.Meta", "Check")
        .metadata("Authorization", "Bearer abc")
        .unary(json!({}))
        .await
        .unwrap();

    assert_eq!(outcome.header().unwrap().get("x-auth"), Some("Bearer abc"));
    server.close().await.unwrap();
}
