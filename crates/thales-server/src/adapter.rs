//! Call adapters.
//!
//! One adapter per call shape bridges an [`IncomingCall`] to a [`Context`],
//! runs the route's composed chain, writes the result back, and terminates
//! the call. All four share the same skeleton:
//!
//! 1. build the context and check the request shape
//! 2. dispatch the chain, catching panics
//! 3. deliver the response (single message, piped stream, or wait for end)
//! 4. finish with `OK` and the trailer, or route the failure through the
//!    [`ErrorPipeline`] and finish with the status it derives
//!
//! Headers are flushed automatically before the first response message or
//! with the terminal status, whichever comes first.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};
use thales_core::{
    AppInfo, CallError, CallHandle, CallResult, CallType, ContractViolation, Context, EndReason,
    IncomingCall, IncomingRequest, MessageStream, Metadata, Response, Status,
};
use thales_middleware::ComposedChain;

use crate::error_pipeline::{ErrorPipeline, Thrown};
use crate::registry::{Route, RouteTable};

/// Everything a call needs besides the call itself.
#[derive(Debug, Clone)]
pub struct CallEnv {
    /// Resolved routes.
    pub routes: Arc<RouteTable>,
    /// Error pipeline shared by every call.
    pub pipeline: ErrorPipeline,
    /// Shared application info.
    pub app: Arc<AppInfo>,
}

/// Serves one call from acceptance to terminal status.
///
/// # Errors
///
/// Returns the [`ContractViolation`] if middleware or handler code broke the
/// chain contract. The call has been terminated with `INTERNAL` by then.
pub async fn serve_call(call: IncomingCall, env: &CallEnv) -> Result<(), ContractViolation> {
    let Some(route) = env.routes.get(&call.service, &call.method).cloned() else {
        tracing::debug!(service = %call.service, method = %call.method, "unknown method");
        let handle = CallHandle::new(call.sink, call.cancel);
        let status = Status::unimplemented(format!(
            "unknown method {}/{}",
            call.service, call.method
        ));
        finish(&handle, status).await;
        return Ok(());
    };

    let handle = CallHandle::new(call.sink, call.cancel);
    let shape_ok = matches!(
        (&call.request, route.call_type().streams_request()),
        (IncomingRequest::Stream(_), true) | (IncomingRequest::Message(_), false)
    );

    let mut ctx = Context::new(
        route.call_type(),
        route.descriptor().service.clone(),
        route.descriptor().method.clone(),
        handle,
    )
    .with_metadata(call.metadata)
    .with_request(call.request)
    .with_app(Arc::clone(&env.app))
    .with_peer(call.peer);

    tracing::debug!(
        request_id = %ctx.request_id(),
        service = ctx.service(),
        method = ctx.method(),
        call_type = %ctx.call_type(),
        "call started"
    );

    let call = ctx.call().clone();
    let Some(chain) = route.chain() else {
        let status = Status::unimplemented(format!(
            "method {}/{} is not implemented",
            ctx.service(),
            ctx.method()
        ));
        finish(&call, status).await;
        return Ok(());
    };

    let outcome = if shape_ok {
        run(&route, chain, &mut ctx).await
    } else {
        let expected = if route.call_type().streams_request() {
            "request stream"
        } else {
            "single request message"
        };
        Err(Thrown::Error(CallError::ShapeMismatch { expected }))
    };

    let (status, violation) = match outcome {
        Ok(()) => (Status::ok().with_trailer(ctx.trailer()), None),
        Err(thrown) => match env.pipeline.on_error(thrown, &ctx) {
            Ok(status) => (status, None),
            Err(violation) => (Status::internal("internal error"), Some(violation)),
        },
    };
    log_finished(&ctx, &status);
    finish(&call, status).await;
    violation.map_or(Ok(()), Err)
}

async fn run(route: &Route, chain: &ComposedChain, ctx: &mut Context) -> Result<(), Thrown> {
    match route.call_type() {
        CallType::Unary | CallType::RequestStream => single_response(chain, ctx).await,
        CallType::ResponseStream => streamed_response(chain, ctx, true).await,
        CallType::Duplex => streamed_response(chain, ctx, false).await,
    }
}

/// Unary and client-stream: the chain settles, then its response is sent.
async fn single_response(chain: &ComposedChain, ctx: &mut Context) -> Result<(), Thrown> {
    guarded(chain.dispatch(ctx)).await?;

    let message = match ctx.take_response() {
        Response::Message(message) => message,
        Response::Empty => serde_json::Value::Object(serde_json::Map::new()),
        Response::Stream(_) => {
            return Err(Thrown::Error(CallError::ShapeMismatch {
                expected: "single response message",
            }))
        }
    };
    let call = ctx.call().clone();
    call.send_message(message).await?;
    Ok(())
}

/// Server-stream and duplex: forward whatever the chain produced, then wait
/// for a writer to end the stream.
///
/// A server-stream sequence ends the stream when exhausted. A duplex call
/// only ends on an explicit `end`.
async fn streamed_response(
    chain: &ComposedChain,
    ctx: &mut Context,
    end_when_exhausted: bool,
) -> Result<(), Thrown> {
    guarded(chain.dispatch(ctx)).await?;

    let call = ctx.call().clone();
    match ctx.take_response() {
        Response::Stream(stream) => {
            guarded(pipe(stream, &call)).await?;
            if end_when_exhausted {
                call.end(None::<Metadata>);
            }
        }
        Response::Message(message) => {
            call.send_message(message).await?;
            if end_when_exhausted {
                call.end(None::<Metadata>);
            }
        }
        Response::Empty => {}
    }

    match call.wait_end().await {
        EndReason::Ended => Ok(()),
        EndReason::Abandoned => {
            tracing::warn!(
                request_id = %ctx.request_id(),
                service = ctx.service(),
                method = ctx.method(),
                "response stream dropped without end(), ending it"
            );
            call.end(None::<Metadata>);
            Ok(())
        }
        EndReason::Cancelled => Err(Thrown::Error(CallError::Cancelled)),
        EndReason::Failed => Err(Thrown::Error(
            Status::internal("response writer panicked before ending the stream").into(),
        )),
    }
}

/// Forwards each produced item as it becomes available.
async fn pipe(mut stream: MessageStream, call: &CallHandle) -> CallResult<()> {
    let cancel = call.cancel_signal().clone();
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CallError::Cancelled),
            item = stream.next() => item,
        };
        match item {
            Some(message) => call.send_message(message?).await?,
            None => return Ok(()),
        }
    }
}

/// Awaits `future`, turning errors and panics into a [`Thrown`].
async fn guarded<F>(future: F) -> Result<(), Thrown>
where
    F: Future<Output = CallResult<()>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Thrown::Error(err)),
        Err(payload) => Err(Thrown::Panic(payload)),
    }
}

async fn finish(call: &CallHandle, status: Status) {
    if let Err(e) = call.finish(status).await {
        tracing::debug!(error = %e, "failed to deliver terminal status");
    }
}

fn log_finished(ctx: &Context, status: &Status) {
    tracing::debug!(
        request_id = %ctx.request_id(),
        service = ctx.service(),
        method = ctx.method(),
        code = status.code().name(),
        duration_ms = u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX),
        "call finished"
    );
}
