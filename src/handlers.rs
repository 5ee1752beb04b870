//! Call handlers, one state machine per RPC shape.
//!
//! | shape            | inbound                 | outbound               | closes             |
//! |------------------|-------------------------|------------------------|--------------------|
//! | unary            | request                 | one reply              | after the reply    |
//! | server streaming | request                 | N writes               | after the last one |
//! | client streaming | messages, client done   | one reply              | after the reply    |
//! | bidi             | messages, client done   | write per message, end | after `end`        |
//!
//! Every handler ends with exactly one `Close`, including on failure.

use crate::call::{CallSink, Inbound};
use crate::decoder::{decode_bidi, decode_frame, decode_stream, BidiExchange, Frame};
use crate::engine::MockEngine;
use crate::error::MockError;
use crate::resolver::HandlerIdentity;
use crate::scheduler::{cumulative_offsets, DelayScheduler};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, Instrument};

/// Everything a handler needs for one call.
pub(crate) struct CallContext {
    pub engine: Arc<MockEngine>,
    pub handler: HandlerIdentity,
    pub sink: CallSink,
    pub scheduler: DelayScheduler,
}

impl CallContext {
    async fn render(&self, request: Value) -> Result<String, MockError> {
        self.engine.render_mock(&self.handler, request).await
    }

    fn fail(&self, err: &MockError) {
        self.engine.record_failure(&self.handler, err);
    }

    /// Error frame, then close.
    fn abort_stream(&self, err: MockError) {
        self.fail(&err);
        self.sink.write(err.to_payload());
        self.sink.close();
    }

    /// Delayed reply (or error reply), then close.
    async fn respond(&self, frame: Result<Frame, MockError>) {
        match frame {
            Ok(frame) => {
                debug!(delay_ms = frame.delay.as_millis() as u64, "Scheduling reply");
                if !self.scheduler.sleep(frame.delay).await {
                    debug!("Call cancelled before reply");
                    return;
                }
                self.sink.reply(frame.into_value());
            }
            Err(err) => {
                self.fail(&err);
                self.sink.reply(err.to_payload());
            }
        }
        self.sink.close();
    }
}

/// Wait for client events until `ClientDone`. Returns `None` on cancellation.
async fn read_until_done(
    ctx: &CallContext,
    inbound: &mut UnboundedReceiver<Inbound>,
    mut on_message: impl FnMut(Value),
) -> Option<()> {
    loop {
        match inbound.recv().await {
            Some(Inbound::Message(message)) => on_message(message),
            Some(Inbound::ClientDone) => {
                ctx.sink.status().begin_completing();
                return Some(());
            }
            Some(Inbound::Cancel) | None => {
                debug!("Call cancelled by client");
                ctx.sink.status().cancel();
                return None;
            }
        }
    }
}

pub(crate) async fn unary(ctx: CallContext, request: Value) {
    let frame = match ctx.render(request).await {
        Ok(text) => decode_frame(&text),
        Err(err) => Err(err),
    };
    ctx.respond(frame).await;
}

pub(crate) async fn server_streaming(ctx: CallContext, request: Value) {
    let text = match ctx.render(request).await {
        Ok(text) => text,
        Err(err) => return ctx.abort_stream(err),
    };

    // A bad frame ends the stream at its own turn.
    let mut frames = Vec::new();
    let mut failure = None;
    for result in decode_stream(&text, &ctx.engine.config().stream_separator) {
        match result {
            Ok(frame) => frames.push(frame),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    let offsets = cumulative_offsets(frames.iter().map(|f| f.delay));
    debug!(frames = frames.len(), "Streaming mock frames");

    let start = Instant::now();
    for (frame, offset) in frames.into_iter().zip(offsets) {
        if !ctx.scheduler.sleep_until(start + offset).await || !ctx.sink.write(frame.into_value()) {
            debug!("Stream cancelled");
            return;
        }
    }

    match failure {
        Some(err) => ctx.abort_stream(err),
        None => {
            ctx.sink.close();
        }
    }
}

pub(crate) async fn client_streaming(ctx: CallContext, mut inbound: UnboundedReceiver<Inbound>) {
    let mut messages = Vec::new();
    let received = read_until_done(&ctx, &mut inbound, |message| {
        debug!("Received client message");
        messages.push(message);
    })
    .await;
    if received.is_none() {
        return;
    }

    debug!(messages = messages.len(), "Client done");
    let frame = match ctx.render(Value::Array(messages)).await {
        Ok(text) => decode_frame(&text),
        Err(err) => Err(err),
    };
    ctx.respond(frame).await;
}

/// Spawn the ordered writer of a bidi call.
///
/// Messages are written at their deadlines in the order they were queued, so
/// replies keep the order of the client messages they answer.
fn spawn_ordered_writer(ctx: &CallContext) -> (UnboundedSender<(Instant, Value)>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<(Instant, Value)>();
    let sink = ctx.sink.clone();
    let scheduler = ctx.scheduler.clone();

    let writer = tokio::spawn(
        async move {
            while let Some((deadline, message)) = rx.recv().await {
                if !scheduler.sleep_until(deadline).await || !sink.write(message) {
                    debug!("Call cancelled with data pending");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    (tx, writer)
}

pub(crate) async fn bidi(ctx: CallContext, mut inbound: UnboundedReceiver<Inbound>) {
    let (pending, writer) = spawn_ordered_writer(&ctx);
    let mut last = Value::Null;

    loop {
        let message = match inbound.recv().await {
            Some(Inbound::Message(message)) => message,
            Some(Inbound::ClientDone) => {
                ctx.sink.status().begin_completing();
                break;
            }
            Some(Inbound::Cancel) | None => {
                debug!("Call cancelled by client");
                ctx.sink.status().cancel();
                return;
            }
        };
        let received_at = Instant::now();

        // Re-resolved and re-rendered for every message.
        let exchange = match ctx.render(message.clone()).await {
            Ok(text) => decode_bidi(&text),
            Err(err) => Err(err),
        };
        let data = match exchange {
            Ok(BidiExchange { data, .. }) => data,
            Err(err) => {
                drain(pending, writer).await;
                return ctx.abort_stream(err);
            }
        };

        if pending.send((received_at + data.delay, data.into_value())).is_err() {
            // The writer only stops early once the call is cancelled.
            return;
        }
        last = message;
    }

    let done_at = Instant::now();
    let exchange = match ctx.render(last).await {
        Ok(text) => decode_bidi(&text),
        Err(err) => Err(err),
    };

    // `end` never overtakes a data write still in flight.
    drain(pending, writer).await;

    match exchange {
        Ok(BidiExchange { end: Some(end), .. }) => {
            if !ctx.scheduler.sleep_until(done_at + end.delay).await {
                debug!("Call cancelled before end");
                return;
            }
            ctx.sink.write(end.into_value());
        }
        Ok(_) => debug!("No end section"),
        Err(err) => return ctx.abort_stream(err),
    }
    ctx.sink.close();
}

/// Close the writer's queue and wait until everything queued is written.
async fn drain(pending: UnboundedSender<(Instant, Value)>, writer: JoinHandle<()>) {
    drop(pending);
    let _ = writer.await;
}
