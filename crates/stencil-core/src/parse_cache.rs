//
// parse_cache.rs
//
// Version-keyed parse cache with syntax diagnostics and time-based eviction.
//

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range, Url};
use tree_sitter::{Node, Tree};

use crate::error::EngineError;
use crate::parser_pool::{parse_bounded, ParseConfig};

/// Source tag on syntax-level diagnostics, so consumers can filter them
/// from semantic ones.
pub const SOURCE_PARSER: &str = "stencil-parser";

/// Cache policy.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries idle beyond this are reclaimed by the periodic sweep.
    pub stale_after: Duration,
    /// Interval between sweeps.
    pub sweep_interval: Duration,
    pub parse: ParseConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            parse: ParseConfig::default(),
        }
    }
}

/// Hit/miss/eviction counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// A parsed document as served to the analyzer and the call-site resolver.
#[derive(Debug)]
pub struct ParsedDocument {
    pub uri: Url,
    pub version: i32,
    pub text: Arc<str>,
    pub tree: Arc<Tree>,
    pub syntax_diagnostics: Vec<Diagnostic>,
}

struct CacheEntry {
    doc: Arc<ParsedDocument>,
    last_access: Instant,
}

/// Parse cache keyed by document URI, holding the entry for the most recent
/// version of each document. A newer version replaces the prior entry; an
/// explicit invalidation removes it immediately.
pub struct ParseCache {
    entries: DashMap<Url, CacheEntry>,
    config: CacheConfig,
    metrics: CacheMetrics,
}

impl ParseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            metrics: CacheMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn parse_config(&self) -> &ParseConfig {
        &self.config.parse
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached entry when `version` matches, otherwise parse and
    /// replace whatever was stored for this URI.
    pub async fn get_or_parse(
        &self,
        uri: &Url,
        text: &str,
        version: i32,
    ) -> Result<Arc<ParsedDocument>, EngineError> {
        if let Some(mut entry) = self.entries.get_mut(uri) {
            if entry.doc.version == version {
                entry.last_access = Instant::now();
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                log::trace!("parse cache hit for {uri} v{version}");
                return Ok(entry.doc.clone());
            }
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);

        let text: Arc<str> = Arc::from(text);
        let tree = parse_bounded(text.clone(), &self.config.parse).await?;
        let mut syntax_diagnostics = Vec::new();
        collect_syntax_diagnostics(tree.root_node(), &mut syntax_diagnostics);

        let doc = Arc::new(ParsedDocument {
            uri: uri.clone(),
            version,
            text,
            tree: Arc::new(tree),
            syntax_diagnostics,
        });
        self.entries.insert(
            uri.clone(),
            CacheEntry {
                doc: doc.clone(),
                last_access: Instant::now(),
            },
        );
        log::trace!("parse cache stored {uri} v{version}");
        Ok(doc)
    }

    /// Look up the cached entry without parsing. Does not bump access time.
    pub fn peek(&self, uri: &Url, version: i32) -> Option<Arc<ParsedDocument>> {
        let entry = self.entries.get(uri)?;
        (entry.doc.version == version).then(|| entry.doc.clone())
    }

    /// Remove a document's entry. A no-op when absent.
    pub fn invalidate(&self, uri: &Url) {
        self.entries.remove(uri);
    }

    /// Remove entries idle beyond the staleness threshold. Returns the
    /// number reclaimed.
    pub fn sweep_stale(&self) -> usize {
        let stale_after = self.config.stale_after;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.last_access.elapsed() < stale_after);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.metrics
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Run the staleness sweep periodically. The task holds only a weak
    /// handle and exits when the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                let removed = cache.sweep_stale();
                if removed > 0 {
                    log::debug!("parse cache sweep reclaimed {removed} stale entries");
                }
            }
        })
    }
}

pub(crate) fn node_lsp_range(node: Node) -> Range {
    Range {
        start: Position::new(
            node.start_position().row as u32,
            node.start_position().column as u32,
        ),
        end: Position::new(
            node.end_position().row as u32,
            node.end_position().column as u32,
        ),
    }
}

fn collect_syntax_diagnostics(node: Node, diagnostics: &mut Vec<Diagnostic>) {
    if node.is_error() || node.is_missing() {
        let message = if node.is_missing() {
            format!("Missing {}", node.kind())
        } else {
            "Syntax error".to_string()
        };

        diagnostics.push(Diagnostic {
            range: node_lsp_range(node),
            severity: Some(DiagnosticSeverity::ERROR),
            message,
            source: Some(SOURCE_PARSER.to_string()),
            ..Default::default()
        });
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_syntax_diagnostics(child, diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file:///{path}")).unwrap()
    }

    #[tokio::test]
    async fn test_same_version_is_a_hit_with_identical_diagnostics() {
        let cache = ParseCache::new(CacheConfig::default());
        let u = uri("a.stencil");
        let text = "copy_file(\"a.txt\"";

        let first = cache.get_or_parse(&u, text, 1).await.unwrap();
        let second = cache.get_or_parse(&u, text, 1).await.unwrap();

        assert_eq!(cache.metrics().hits(), 1);
        assert_eq!(cache.metrics().misses(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.syntax_diagnostics, second.syntax_diagnostics);
    }

    #[tokio::test]
    async fn test_new_version_replaces_prior_entry() {
        let cache = ParseCache::new(CacheConfig::default());
        let u = uri("a.stencil");

        cache.get_or_parse(&u, "a(1)", 1).await.unwrap();
        let updated = cache.get_or_parse(&u, "a(1, 2)", 2).await.unwrap();

        assert_eq!(cache.metrics().misses(), 2);
        assert_eq!(cache.len(), 1, "one live entry per URI");
        assert_eq!(updated.version, 2);
        assert!(cache.peek(&u, 1).is_none());
        assert!(cache.peek(&u, 2).is_some());
    }

    #[tokio::test]
    async fn test_syntax_diagnostics_carry_parser_source() {
        let cache = ParseCache::new(CacheConfig::default());
        let u = uri("broken.stencil");
        let doc = cache.get_or_parse(&u, "copy_file(\"a.txt\"", 1).await.unwrap();
        assert!(!doc.syntax_diagnostics.is_empty());
        for diag in &doc.syntax_diagnostics {
            assert_eq!(diag.source.as_deref(), Some(SOURCE_PARSER));
            assert_eq!(diag.severity, Some(DiagnosticSeverity::ERROR));
        }
    }

    #[tokio::test]
    async fn test_empty_text_yields_a_result() {
        let cache = ParseCache::new(CacheConfig::default());
        let doc = cache.get_or_parse(&uri("empty.stencil"), "", 1).await.unwrap();
        assert!(doc.syntax_diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let cache = ParseCache::new(CacheConfig::default());
        let u = uri("a.stencil");
        cache.get_or_parse(&u, "a(1)", 1).await.unwrap();

        cache.invalidate(&u);
        assert!(cache.is_empty());
        // Invalidating a missing entry is a no-op, never an error.
        cache.invalidate(&u);
        cache.invalidate(&uri("never-seen.stencil"));
    }

    #[tokio::test]
    async fn test_sweep_reclaims_idle_entries() {
        let config = CacheConfig {
            stale_after: Duration::ZERO,
            ..CacheConfig::default()
        };
        let cache = ParseCache::new(config);
        cache
            .get_or_parse(&uri("a.stencil"), "a(1)", 1)
            .await
            .unwrap();
        cache
            .get_or_parse(&uri("b.stencil"), "b(2)", 1)
            .await
            .unwrap();

        let removed = cache.sweep_stale();
        assert_eq!(removed, 2);
        assert!(cache.is_empty());
        assert_eq!(cache.metrics().evictions(), 2);
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_entries() {
        let cache = ParseCache::new(CacheConfig::default());
        cache
            .get_or_parse(&uri("a.stencil"), "a(1)", 1)
            .await
            .unwrap();
        assert_eq!(cache.sweep_stale(), 0);
        assert_eq!(cache.len(), 1);
    }
}
