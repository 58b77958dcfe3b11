//
// engine.rs
//
// The analysis engine facade: the operations the surrounding protocol layer
// invokes, wrapped in the resource guards. The engine has no knowledge of
// how requests arrive over the wire.
//

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Diagnostic, Position, Url};
use tree_sitter::Tree;

use crate::call_site::{self, CallSiteContext};
use crate::error::EngineError;
use crate::parse_cache::{CacheConfig, CacheMetrics, ParseCache};
use crate::parser_pool::parse_bounded;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::scheduler::{DiagnosticsSink, SchedulerConfig, ValidationScheduler};
use crate::semantic;
use crate::session::SessionTracker;
use crate::spec::SpecStore;
use crate::timeout::{OperationGuard, OperationKind, TimeoutConfig};

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub rate_limit: RateLimitConfig,
    pub timeouts: TimeoutConfig,
}

pub struct AnalysisEngine {
    store: Arc<SpecStore>,
    cache: Arc<ParseCache>,
    scheduler: Arc<ValidationScheduler>,
    sessions: SessionTracker,
    rate_limiter: RateLimiter,
    guard: OperationGuard,
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<SpecStore>,
        config: EngineConfig,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Arc<Self> {
        let cache = Arc::new(ParseCache::new(config.cache));
        let scheduler =
            ValidationScheduler::new(cache.clone(), store.clone(), sink, config.scheduler);
        Arc::new(Self {
            store,
            cache,
            scheduler,
            sessions: SessionTracker::new(),
            rate_limiter: RateLimiter::new(config.rate_limit),
            guard: OperationGuard::new(config.timeouts),
        })
    }

    pub fn store(&self) -> &Arc<SpecStore> {
        &self.store
    }

    pub fn cache_metrics(&self) -> &CacheMetrics {
        self.cache.metrics()
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Start the periodic cache sweep. Call once from the host's runtime.
    pub fn spawn_cache_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.cache.spawn_sweeper()
    }

    /// Admission: rate limit first, ownership second, then lazily claim.
    fn admit(&self, connection: &str, uri: &Url) -> Result<(), EngineError> {
        if !self.rate_limiter.try_acquire(connection) {
            return Err(EngineError::RateLimited {
                connection: connection.to_string(),
            });
        }
        if !self.sessions.validate_access(connection, uri) {
            return Err(EngineError::AccessDenied { uri: uri.clone() });
        }
        self.sessions.register(connection, uri);
        Ok(())
    }

    /// Synchronous diagnostics for a document version: syntax diagnostics,
    /// plus semantic ones when the parse is clean.
    pub async fn get_diagnostics(
        &self,
        connection: &str,
        uri: &Url,
        text: &str,
        version: i32,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        self.admit(connection, uri)?;

        let doc = self
            .guard
            .run(
                OperationKind::Validation,
                self.cache.get_or_parse(uri, text, version),
            )
            .await??;

        if !doc.syntax_diagnostics.is_empty() {
            return Ok(doc.syntax_diagnostics.clone());
        }
        let index = self.store.snapshot();
        semantic::analyze(&doc.tree, &doc.text, &index, &CancellationToken::new())
    }

    /// Debounced validation that publishes through the sink. A burst of
    /// submissions for one URI completes at most one validation.
    pub fn schedule_validation(
        &self,
        connection: &str,
        uri: &Url,
        text: String,
        version: i32,
    ) -> Result<(), EngineError> {
        self.admit(connection, uri)?;
        self.scheduler.submit(uri.clone(), text, version);
        Ok(())
    }

    /// Resolve the call-site context at a cursor position.
    ///
    /// Falls back to the lexical line scan when the parse fails or times
    /// out; both paths return the same context shape.
    pub async fn get_call_site_context(
        &self,
        connection: &str,
        uri: &Url,
        text: &str,
        position: Position,
    ) -> Result<Option<CallSiteContext>, EngineError> {
        self.admit(connection, uri)?;
        let index = self.store.snapshot();

        match parse_bounded(Arc::from(text), self.cache.parse_config()).await {
            Ok(tree) => {
                let context = call_site::context_at(&tree, text, &index, position);
                if context.is_some() || !tree.root_node().has_error() {
                    return Ok(context);
                }
                // A mangled mid-typing parse may bury the call under error
                // nodes; the lexical scan still resolves it.
                Ok(self.lexical_context(text, position, &index))
            }
            Err(EngineError::Timeout { .. }) | Err(EngineError::ParseFailed) => {
                log::warn!("tree unavailable for {uri}, using lexical call-site fallback");
                Ok(self.lexical_context(text, position, &index))
            }
            Err(err) => Err(err),
        }
    }

    fn lexical_context(
        &self,
        text: &str,
        position: Position,
        index: &crate::spec::SpecIndex,
    ) -> Option<CallSiteContext> {
        let line = text.split('\n').nth(position.line as usize).unwrap_or("");
        call_site::context_at_lexical(line, position.character, index)
    }

    /// Parse arbitrary text under the size-scaled deadline.
    pub async fn parse(&self, text: &str) -> Result<Tree, EngineError> {
        parse_bounded(Arc::from(text), self.cache.parse_config()).await
    }

    /// Document close: drop the cache entry and any pending validation.
    pub fn close_document(&self, uri: &Url) {
        self.cache.invalidate(uri);
        self.scheduler.forget(uri);
    }

    /// Connection teardown. Invoked unconditionally on disconnect, normal
    /// or abnormal.
    pub fn disconnect(&self, connection: &str) {
        for uri in self.sessions.cleanup(connection) {
            self.scheduler.forget(&uri);
        }
        self.rate_limiter.remove_connection(connection);
        log::debug!("connection '{connection}' disconnected, sessions purged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DiagnosticsSink;
    use std::sync::Mutex;
    use std::time::Duration;

    struct NullSink;
    impl DiagnosticsSink for NullSink {
        fn publish(&self, _uri: Url, _version: i32, _diagnostics: Vec<Diagnostic>) {}
    }

    #[derive(Default)]
    struct CountingSink {
        count: Mutex<usize>,
    }
    impl DiagnosticsSink for CountingSink {
        fn publish(&self, _uri: Url, _version: i32, _diagnostics: Vec<Diagnostic>) {
            *self.count.lock().unwrap() += 1;
        }
    }

    fn test_store() -> Arc<SpecStore> {
        let doc = r#"{
            "entries": [{
                "name": "copy_file",
                "kind": "function",
                "hover": "Copy a file.",
                "parameters": [
                    {"name": "source", "semanticType": "path", "pickerKind": "file-picker"},
                    {"name": "dest", "semanticType": "path", "pickerKind": "file-picker"}
                ]
            }]
        }"#;
        Arc::new(SpecStore::from_json(doc).unwrap())
    }

    fn engine_with_config(config: EngineConfig) -> Arc<AnalysisEngine> {
        AnalysisEngine::new(test_store(), config, Arc::new(NullSink))
    }

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file:///{path}")).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_is_distinct() {
        let config = EngineConfig {
            rate_limit: RateLimitConfig {
                max_tokens: 1,
                refill_interval: Duration::from_secs(3600),
            },
            ..EngineConfig::default()
        };
        let engine = engine_with_config(config);
        let u = uri("a.stencil");

        engine
            .get_diagnostics("conn-1", &u, "copy_file(\"a\", \"b\")", 1)
            .await
            .unwrap();
        match engine
            .get_diagnostics("conn-1", &u, "copy_file(\"a\", \"b\")", 1)
            .await
        {
            Err(EngineError::RateLimited { connection }) => assert_eq!(connection, "conn-1"),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_access_denied_for_foreign_document() {
        let engine = engine_with_config(EngineConfig::default());
        let u = uri("a.stencil");

        engine
            .get_diagnostics("conn-1", &u, "copy_file(\"a\", \"b\")", 1)
            .await
            .unwrap();
        match engine
            .get_diagnostics("conn-2", &u, "copy_file(\"a\", \"b\")", 1)
            .await
        {
            Err(EngineError::AccessDenied { uri: denied }) => assert_eq!(denied, u),
            other => panic!("expected AccessDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_releases_documents_and_bucket() {
        let engine = engine_with_config(EngineConfig::default());
        let u = uri("a.stencil");

        engine
            .get_diagnostics("conn-1", &u, "copy_file(\"a\", \"b\")", 1)
            .await
            .unwrap();
        engine.disconnect("conn-1");

        // Another connection can now claim the document.
        engine
            .get_diagnostics("conn-2", &u, "copy_file(\"a\", \"b\")", 2)
            .await
            .unwrap();
        assert_eq!(engine.sessions().owner_of(&u).as_deref(), Some("conn-2"));
    }

    #[tokio::test]
    async fn test_call_site_context_tree_path() {
        let engine = engine_with_config(EngineConfig::default());
        let context = engine
            .get_call_site_context(
                "conn-1",
                &uri("a.stencil"),
                "copy_file(\"a.txt\", \"b\")",
                Position::new(0, 12),
            )
            .await
            .unwrap()
            .expect("context");
        assert_eq!(context.function_name, "copy_file");
        assert_eq!(context.parameter_index, 0);
    }

    #[tokio::test]
    async fn test_call_site_context_none_outside_calls() {
        let engine = engine_with_config(EngineConfig::default());
        let context = engine
            .get_call_site_context(
                "conn-1",
                &uri("a.stencil"),
                "x = 1",
                Position::new(0, 2),
            )
            .await
            .unwrap();
        assert!(context.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_validation_publishes() {
        let sink = Arc::new(CountingSink::default());
        let engine = AnalysisEngine::new(test_store(), EngineConfig::default(), sink.clone());

        engine
            .schedule_validation(
                "conn-1",
                &uri("a.stencil"),
                "copy_file(\"a\", \"b\")".to_string(),
                1,
            )
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*sink.count.lock().unwrap(), 1);
    }
}
