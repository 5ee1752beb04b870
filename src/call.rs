//! Per-call state, events, and the caller-facing handle.
//!
//! A call is driven by typed inbound events and answers with outbound
//! effects over channels, so the transport only has to pump both ends.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

/// The four RPC call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidi,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::ServerStreaming => "server_streaming",
            CallKind::ClientStreaming => "client_streaming",
            CallKind::Bidi => "bidi",
        }
    }
}

/// Lifecycle of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallState {
    /// Accepting inbound events
    Active = 0,
    /// Client is done; final output is pending
    Completing = 1,
    /// Terminal
    Closed = 2,
}

impl CallState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CallState::Active,
            1 => CallState::Completing,
            _ => CallState::Closed,
        }
    }
}

/// Events delivered to a call handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A client message
    Message(Value),
    /// The client finished sending
    ClientDone,
    /// The transport aborted the call
    Cancel,
}

/// Effects a call handler asks the transport to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Stream a message to the client
    Write(Value),
    /// Answer a unary or client-streaming call
    Reply(Value),
    /// Finish the call; always the last event
    Close,
}

/// Shared state of one call, observed by the handler and its deferred actions.
#[derive(Debug, Default)]
pub struct CallStatus {
    state: AtomicU8,
    cancelled: AtomicBool,
    notify: Notify,
    /// Serializes emission against the transition to `Closed`.
    gate: Mutex<()>,
}

impl CallStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CallState::Closed
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Active -> Completing`. Returns false from any other state.
    pub fn begin_completing(&self) -> bool {
        self.state
            .compare_exchange(
                CallState::Active as u8,
                CallState::Completing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Move to `Closed`. Only the first caller gets `true`.
    pub fn close(&self) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.swap(CallState::Closed as u8, Ordering::SeqCst) != CallState::Closed as u8
    }

    /// Run `emit` only if the call is still open.
    ///
    /// Holds off `close` and `cancel` until `emit` returns, so nothing emitted
    /// here can land after the call was closed.
    pub fn while_open<R>(&self, emit: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            None
        } else {
            Some(emit())
        }
    }

    /// Close without output and wake every pending delay.
    pub fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);
        let first = self.close();
        self.notify.notify_waiters();
        first
    }

    /// Resolves once the call is cancelled.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Guarded writer for a call's outbound channel.
///
/// Writes after close are dropped, and a vanished receiver counts as a
/// cancellation rather than an error.
#[derive(Debug, Clone)]
pub struct CallSink {
    tx: mpsc::UnboundedSender<Outbound>,
    status: Arc<CallStatus>,
}

impl CallSink {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>, status: Arc<CallStatus>) -> Self {
        Self { tx, status }
    }

    pub fn status(&self) -> &Arc<CallStatus> {
        &self.status
    }

    fn send(&self, event: Outbound) -> bool {
        match self.status.while_open(|| self.tx.send(event)) {
            Some(Ok(())) => true,
            Some(Err(_)) => {
                debug!("Caller went away, cancelling call");
                self.status.cancel();
                false
            }
            None => {
                debug!("Dropping output for closed call");
                false
            }
        }
    }

    /// Stream one message. Returns false if the call is gone.
    pub fn write(&self, message: Value) -> bool {
        self.send(Outbound::Write(message))
    }

    /// Deliver the single response of a unary or client-streaming call.
    pub fn reply(&self, message: Value) -> bool {
        self.send(Outbound::Reply(message))
    }

    /// Emit `Close` and transition to `Closed`, at most once per call.
    pub fn close(&self) -> bool {
        if !self.status.close() {
            return false;
        }
        // The receiver may already be gone; the call is closed either way.
        let _ = self.tx.send(Outbound::Close);
        true
    }
}

/// Caller-side handle of an in-flight call.
///
/// Dropping the handle cancels the call.
#[derive(Debug)]
pub struct Call {
    kind: CallKind,
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    status: Arc<CallStatus>,
}

impl Call {
    pub(crate) fn new(
        kind: CallKind,
        inbound: mpsc::UnboundedSender<Inbound>,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        status: Arc<CallStatus>,
    ) -> Self {
        Self {
            kind,
            inbound,
            outbound,
            status,
        }
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn state(&self) -> CallState {
        self.status.state()
    }

    /// Send a client message. Returns false once the handler stopped listening.
    pub fn send(&self, message: Value) -> bool {
        self.inbound.send(Inbound::Message(message)).is_ok()
    }

    /// Signal that the client has finished sending.
    pub fn client_done(&self) -> bool {
        self.inbound.send(Inbound::ClientDone).is_ok()
    }

    /// Abort the call. Pending output is discarded.
    pub fn cancel(&self) {
        self.status.cancel();
        let _ = self.inbound.send(Inbound::Cancel);
    }

    /// Next outbound event, `None` once the call has finished.
    pub async fn next(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Drain every remaining outbound event.
    pub async fn collect(mut self) -> Vec<Outbound> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if !self.status.is_closed() {
            self.status.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_close_exactly_once() {
        let status = CallStatus::new();
        assert_eq!(status.state(), CallState::Active);
        assert!(status.begin_completing());
        assert!(!status.begin_completing());
        assert_eq!(status.state(), CallState::Completing);
        assert!(status.close());
        assert!(!status.close());
        assert!(!status.cancel());
        assert_eq!(status.state(), CallState::Closed);
    }

    #[test]
    fn test_sink_drops_writes_after_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = CallSink::new(tx, CallStatus::new());

        assert!(sink.write(json!({"n": 1})));
        assert!(sink.close());
        assert!(!sink.write(json!({"n": 2})));
        assert!(!sink.close());

        assert_eq!(rx.try_recv().unwrap(), Outbound::Write(json!({"n": 1})));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_write_lands_after_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let status = CallStatus::new();
        let sink = CallSink::new(tx.clone(), status.clone());

        let writer = std::thread::spawn(move || {
            let mut n = 0u64;
            while sink.write(json!(n)) {
                n += 1;
            }
        });

        std::thread::sleep(std::time::Duration::from_millis(5));
        status.cancel();
        // Anything the writer sent must precede this marker.
        tx.send(Outbound::Reply(json!("cancelled"))).unwrap();
        writer.join().unwrap();
        drop(tx);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(Outbound::Reply(json!("cancelled"))));
    }

    #[test]
    fn test_sink_dead_receiver_cancels() {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = CallStatus::new();
        let sink = CallSink::new(tx, status.clone());
        drop(rx);

        assert!(!sink.reply(json!({})));
        assert!(status.is_cancelled());
        assert!(status.is_closed());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let status = CallStatus::new();
        let waiter = {
            let status = status.clone();
            tokio::spawn(async move { status.cancelled().await })
        };
        tokio::task::yield_now().await;
        status.cancel();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_after_the_fact() {
        let status = CallStatus::new();
        status.cancel();
        status.cancelled().await;
    }

    #[test]
    fn test_dropping_call_cancels() {
        let (in_tx, _in_rx) = mpsc::unbounded_channel();
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        let status = CallStatus::new();
        let call = Call::new(CallKind::Unary, in_tx, out_rx, status.clone());
        drop(call);
        assert!(status.is_cancelled());
    }
}
