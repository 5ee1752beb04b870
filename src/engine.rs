//! The mock engine: shared resolution pipeline and call entry points.

use crate::call::{Call, CallKind, CallSink, CallStatus};
use crate::config::EngineConfig;
use crate::error::MockError;
use crate::handlers::{self, CallContext};
use crate::resolver::{HandlerIdentity, MockPathResolver};
use crate::scheduler::DelayScheduler;
use crate::store::{FsStore, MockStore};
use crate::template::{RenderContext, Renderer, TemplateEngine};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};

/// gRPC mock engine.
///
/// Resolves, renders, and replays mock files for all four call shapes.
/// Calls are spawned onto the current tokio runtime.
pub struct MockEngine {
    config: EngineConfig,
    resolver: MockPathResolver,
    store: Arc<dyn MockStore>,
    renderer: Arc<dyn Renderer>,
    /// Total calls opened.
    calls_total: AtomicU64,
    /// Mock files resolved (exact or fallback).
    mocks_resolved: AtomicU64,
    /// Resolutions that found no mock file.
    mocks_unmatched: AtomicU64,
    /// Calls answered with an error payload.
    calls_failed: AtomicU64,
}

impl MockEngine {
    /// Create an engine reading mocks from the filesystem with Handlebars templates.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_backends(config, Arc::new(FsStore), Arc::new(TemplateEngine::new()))
    }

    /// Create an engine with a custom store and renderer.
    pub fn with_backends(
        config: EngineConfig,
        store: Arc<dyn MockStore>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let resolver = MockPathResolver::from_config(&config);

        info!(
            mocks_dir = %config.mocks_dir.display(),
            fallback = config.fallback,
            "gRPC mock engine initialized"
        );

        Self {
            config,
            resolver,
            store,
            renderer,
            calls_total: AtomicU64::new(0),
            mocks_resolved: AtomicU64::new(0),
            mocks_unmatched: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &MockPathResolver {
        &self.resolver
    }

    /// Get total calls opened.
    pub fn total_calls(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get total mock resolutions that found a file.
    pub fn total_resolved(&self) -> u64 {
        self.mocks_resolved.load(Ordering::Relaxed)
    }

    /// Get total mock resolutions that found nothing.
    pub fn total_unmatched(&self) -> u64 {
        self.mocks_unmatched.load(Ordering::Relaxed)
    }

    /// Get total calls answered with an error payload.
    pub fn total_failed(&self) -> u64 {
        self.calls_failed.load(Ordering::Relaxed)
    }

    /// Resolve, read, and render the mock for `handler`.
    ///
    /// The file is read and compiled on every invocation.
    pub async fn render_mock(
        &self,
        handler: &HandlerIdentity,
        request: Value,
    ) -> Result<String, MockError> {
        let resolved = match self
            .resolver
            .locate(self.store.as_ref(), handler, self.config.fallback)
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => {
                self.mocks_unmatched.fetch_add(1, Ordering::Relaxed);
                if self.config.settings.log_unmatched {
                    warn!(handler = %handler, error = %err, "No suitable mock file found");
                }
                return Err(err);
            }
        };

        self.mocks_resolved.fetch_add(1, Ordering::Relaxed);
        if self.config.settings.log_matches {
            info!(
                handler = %handler,
                path = %resolved.path.display(),
                fallback = resolved.is_fallback(),
                "Resolved mock file"
            );
        }

        let template = self
            .store
            .read_to_string(&resolved.path)
            .await
            .map_err(|source| MockError::Read {
                path: resolved.path.clone(),
                source,
            })?;

        self.renderer.render(&template, &RenderContext::new(request))
    }

    pub(crate) fn record_failure(&self, handler: &HandlerIdentity, err: &MockError) {
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
        // Misses were already logged during resolution.
        if !err.is_not_found() {
            warn!(handler = %handler, error = %err, "Failed to build mock response");
        }
    }

    /// Open a unary call. The reply arrives after the mock's `delay`.
    pub fn unary(self: &Arc<Self>, handler: &str, request: Value) -> Result<Call, MockError> {
        self.open(CallKind::Unary, handler, request)
    }

    /// Open a server-streaming call for a single request.
    pub fn server_streaming(
        self: &Arc<Self>,
        handler: &str,
        request: Value,
    ) -> Result<Call, MockError> {
        self.open(CallKind::ServerStreaming, handler, request)
    }

    /// Open a client-streaming call. Feed it messages, then `client_done`.
    pub fn client_streaming(self: &Arc<Self>, handler: &str) -> Result<Call, MockError> {
        self.open(CallKind::ClientStreaming, handler, Value::Null)
    }

    /// Open a bidirectional-streaming call.
    pub fn bidi(self: &Arc<Self>, handler: &str) -> Result<Call, MockError> {
        self.open(CallKind::Bidi, handler, Value::Null)
    }

    fn open(
        self: &Arc<Self>,
        kind: CallKind,
        handler: &str,
        request: Value,
    ) -> Result<Call, MockError> {
        let handler = HandlerIdentity::parse(handler)?;
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let status = CallStatus::new();

        let span = info_span!("call", handler = %handler, kind = kind.as_str());
        let ctx = CallContext {
            engine: Arc::clone(self),
            handler,
            sink: CallSink::new(outbound_tx, status.clone()),
            scheduler: DelayScheduler::new(status.clone()),
        };

        match kind {
            CallKind::Unary => {
                tokio::spawn(handlers::unary(ctx, request).instrument(span));
            }
            CallKind::ServerStreaming => {
                tokio::spawn(handlers::server_streaming(ctx, request).instrument(span));
            }
            CallKind::ClientStreaming => {
                tokio::spawn(handlers::client_streaming(ctx, inbound_rx).instrument(span));
            }
            CallKind::Bidi => {
                tokio::spawn(handlers::bidi(ctx, inbound_rx).instrument(span));
            }
        }

        Ok(Call::new(kind, inbound_tx, outbound_rx, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallState, Outbound};
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn engine(store: InMemoryStore) -> Arc<MockEngine> {
        let config = EngineConfig {
            mocks_dir: "mocks".into(),
            ..EngineConfig::default()
        };
        Arc::new(MockEngine::with_backends(
            config,
            Arc::new(store),
            Arc::new(TemplateEngine::new()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unary_hit() {
        let engine = engine(InMemoryStore::new().with(
            "mocks/pkg/Greeter/Hello.mock",
            r#"{"message": "{{request.name}}", "delay": 10}"#,
        ));
        let start = Instant::now();

        let mut call = engine.unary("pkg.Greeter.Hello", json!({"name": "Ana"})).unwrap();
        assert_eq!(call.next().await, Some(Outbound::Reply(json!({"message": "Ana"}))));
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(call.next().await, Some(Outbound::Close));
        assert_eq!(call.next().await, None);
        assert_eq!(call.state(), CallState::Closed);

        assert_eq!(engine.total_calls(), 1);
        assert_eq!(engine.total_resolved(), 1);
        assert_eq!(engine.total_failed(), 0);
    }

    #[tokio::test]
    async fn test_unary_miss() {
        let engine = engine(InMemoryStore::new());

        let call = engine.unary("pkg.Greeter.Hello", json!({})).unwrap();
        let events = call.collect().await;
        assert_eq!(
            events,
            vec![
                Outbound::Reply(json!({
                    "error": "No suitable mock file was found for mocks/pkg/Greeter/Hello.mock"
                })),
                Outbound::Close,
            ]
        );
        assert_eq!(engine.total_unmatched(), 1);
        assert_eq!(engine.total_failed(), 1);
    }

    #[tokio::test]
    async fn test_invalid_handler_is_rejected_up_front() {
        let engine = engine(InMemoryStore::new());
        assert!(matches!(
            engine.unary("nodots", json!({})),
            Err(MockError::InvalidHandler(_))
        ));
        assert_eq!(engine.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_mock_edits_take_effect_next_call() {
        let dir = tempfile::tempdir().unwrap();
        let mock = dir.path().join("pkg/Svc/Get.mock");
        std::fs::create_dir_all(mock.parent().unwrap()).unwrap();
        std::fs::write(&mock, r#"{"v": 1}"#).unwrap();

        let engine = Arc::new(MockEngine::new(EngineConfig {
            mocks_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        }));
        let events = engine.unary("pkg.Svc.Get", json!({})).unwrap().collect().await;
        assert_eq!(events[0], Outbound::Reply(json!({"v": 1})));

        std::fs::write(&mock, r#"{"v": 2}"#).unwrap();
        let events = engine.unary("pkg.Svc.Get", json!({})).unwrap().collect().await;
        assert_eq!(events[0], Outbound::Reply(json!({"v": 2})));
    }

    #[tokio::test]
    async fn test_unary_echoes_quoted_request_strings() {
        let engine = engine(InMemoryStore::new().with(
            "mocks/pkg/Greeter/Hello.mock",
            r#"{"message": "{{request.name}}"}"#,
        ));

        let call = engine.unary("pkg.Greeter.Hello", json!({"name": "Ana \"the\" dev"})).unwrap();
        assert_eq!(
            call.collect().await,
            vec![
                Outbound::Reply(json!({"message": "Ana \"the\" dev"})),
                Outbound::Close,
            ]
        );
        assert_eq!(engine.total_failed(), 0);
    }

    #[tokio::test]
    async fn test_render_mock_uses_fallback() {
        let engine = engine(InMemoryStore::new().with("mocks/pkg/__/Get.mock", r#"{"any": true}"#));
        let handler = HandlerIdentity::parse("pkg.Svc.Get").unwrap();

        let text = engine.render_mock(&handler, Value::Null).await.unwrap();
        assert_eq!(text, r#"{"any": true}"#);
    }

    #[tokio::test]
    async fn test_render_mock_respects_disabled_fallback() {
        let config = EngineConfig {
            mocks_dir: "mocks".into(),
            fallback: false,
            ..EngineConfig::default()
        };
        let engine = MockEngine::with_backends(
            config,
            Arc::new(InMemoryStore::new().with("mocks/__/Get.mock", "{}")),
            Arc::new(TemplateEngine::new()),
        );
        let handler = HandlerIdentity::parse("pkg.Svc.Get").unwrap();

        let err = engine.render_mock(&handler, Value::Null).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
