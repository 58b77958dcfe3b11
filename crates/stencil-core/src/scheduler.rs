//
// scheduler.rs
//
// Debounced single-flight validation per document. Every new submission for
// a URI cancels the pending one atomically, so at most one validation runs
// per document and only the one reflecting the last edit publishes.
//

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Diagnostic, Url};

use crate::error::EngineError;
use crate::parse_cache::ParseCache;
use crate::semantic;
use crate::spec::SpecStore;

/// Receives the combined diagnostics for a document version. Implemented by
/// the surrounding protocol layer; the engine has no knowledge of how the
/// publication travels over the wire.
pub trait DiagnosticsSink: Send + Sync {
    fn publish(&self, uri: Url, version: i32, diagnostics: Vec<Diagnostic>);
}

/// Pending validation tasks keyed by URI.
///
/// `schedule` is an atomic cancel-then-replace: the map insert swaps the
/// stored token in one step, so a concurrent submission for the same key
/// can never leave two live validations behind.
#[derive(Debug, Default)]
pub struct PendingValidations {
    pending: DashMap<Url, CancellationToken>,
}

impl PendingValidations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending work for this URI and register a fresh token.
    pub fn schedule(&self, uri: Url) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(old) = self.pending.insert(uri, token.clone()) {
            old.cancel();
        }
        token
    }

    /// Mark the current cycle complete.
    pub fn complete(&self, uri: &Url) {
        self.pending.remove(uri);
    }

    /// Cancel pending work for a URI (document close, disconnect).
    pub fn cancel(&self, uri: &Url) {
        if let Some((_, token)) = self.pending.remove(uri) {
            token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        self.pending.retain(|_, token| {
            token.cancel();
            false
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Monotonic publish gate: diagnostics for an older version than the last
/// published one are never sent, even if their validation finished late.
#[derive(Debug, Default)]
pub struct DiagnosticsGate {
    last_published: DashMap<Url, i32>,
}

impl DiagnosticsGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_publish(&self, uri: &Url, version: i32) -> bool {
        match self.last_published.get(uri) {
            Some(last) => version > *last,
            None => true,
        }
    }

    pub fn record_publish(&self, uri: &Url, version: i32) {
        self.last_published.insert(uri.clone(), version);
    }

    pub fn clear(&self, uri: &Url) {
        self.last_published.remove(uri);
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Quiet interval coalescing rapid keystrokes into one validation.
    pub debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
        }
    }
}

/// Orchestrates the cache and the analyzer behind a per-document
/// `Idle -> Pending -> Running -> Idle` cycle.
pub struct ValidationScheduler {
    pending: PendingValidations,
    gate: DiagnosticsGate,
    cache: Arc<ParseCache>,
    store: Arc<SpecStore>,
    sink: Arc<dyn DiagnosticsSink>,
    config: SchedulerConfig,
}

impl ValidationScheduler {
    pub fn new(
        cache: Arc<ParseCache>,
        store: Arc<SpecStore>,
        sink: Arc<dyn DiagnosticsSink>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            pending: PendingValidations::new(),
            gate: DiagnosticsGate::new(),
            cache,
            store,
            sink,
            config,
        })
    }

    pub fn pending(&self) -> &PendingValidations {
        &self.pending
    }

    pub fn gate(&self) -> &DiagnosticsGate {
        &self.gate
    }

    /// Submit a document change for validation. Supersedes any pending
    /// cycle for the same URI.
    pub fn submit(self: &Arc<Self>, uri: Url, text: String, version: i32) {
        // Swap the token before spawning: the superseding edit must cancel
        // the prior cycle even if the runtime delays the new task.
        let token = self.pending.schedule(uri.clone());
        let this = self.clone();
        tokio::spawn(async move {
            // Pending: wait out the debounce interval, cancellable.
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(this.config.debounce) => {}
            }

            // Running: parse, analyze, publish.
            match this.run_validation(&uri, &text, version, &token).await {
                Ok(Some(diagnostics)) => {
                    if token.is_cancelled() {
                        return;
                    }
                    if !this.gate.can_publish(&uri, version) {
                        log::trace!("skipping stale diagnostics for {uri} v{version}");
                        return;
                    }
                    this.sink.publish(uri.clone(), version, diagnostics);
                    this.gate.record_publish(&uri, version);
                    this.pending.complete(&uri);
                }
                Ok(None) => {} // superseded mid-flight, silent
                Err(err) if err.is_cancellation() => {}
                Err(err) => {
                    log::warn!("validation of {uri} v{version} failed: {err}");
                    this.pending.complete(&uri);
                }
            }
        });
    }

    async fn run_validation(
        &self,
        uri: &Url,
        text: &str,
        version: i32,
        token: &CancellationToken,
    ) -> Result<Option<Vec<Diagnostic>>, EngineError> {
        let doc = self.cache.get_or_parse(uri, text, version).await?;
        if token.is_cancelled() {
            return Ok(None);
        }

        let mut diagnostics = doc.syntax_diagnostics.clone();
        if diagnostics.is_empty() {
            let index = self.store.snapshot();
            match semantic::analyze(&doc.tree, &doc.text, &index, token) {
                Ok(semantic_diagnostics) => diagnostics.extend(semantic_diagnostics),
                Err(err) if err.is_cancellation() => return Ok(None),
                Err(err) => return Err(err),
            }
        }
        Ok(Some(diagnostics))
    }

    /// Forget all scheduler state for a document (close path).
    pub fn forget(&self, uri: &Url) {
        self.pending.cancel(uri);
        self.gate.clear(uri);
    }
}
