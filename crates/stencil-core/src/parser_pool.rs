//
// parser_pool.rs
//
// Thread-local parser pool plus the deadline-bound parse entry point.
//

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use tree_sitter::{Parser, Tree};

use crate::error::EngineError;
use crate::timeout::OperationKind;

thread_local! {
    static PARSER: RefCell<Parser> = RefCell::new({
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_javascript::LANGUAGE.into())
            .expect("Failed to set Stencil expression language");
        parser
    });
}

/// Execute a function with a thread-local parser instance.
/// The parser is reused across calls on the same thread.
pub fn with_parser<F, R>(f: F) -> R
where
    F: FnOnce(&mut Parser) -> R,
{
    PARSER.with(|parser| f(&mut parser.borrow_mut()))
}

/// Parse deadline and input-size policy.
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Base deadline applied to every parse.
    pub base_timeout: Duration,
    /// Additional budget per input character.
    pub per_char: Duration,
    /// Hard ceiling on the scaled deadline.
    pub max_timeout: Duration,
    /// Inputs larger than this are rejected before parsing.
    pub max_document_bytes: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_millis(500),
            per_char: Duration::from_nanos(10_000), // ~0.01ms per character
            max_timeout: Duration::from_secs(10),
            max_document_bytes: 1024 * 1024,
        }
    }
}

/// Deadline for parsing an input of `len` characters: linear in size,
/// clamped to the configured maximum.
pub fn parse_timeout_for(config: &ParseConfig, len: usize) -> Duration {
    let scaled = config
        .base_timeout
        .saturating_add(config.per_char.saturating_mul(len.min(u32::MAX as usize) as u32));
    scaled.min(config.max_timeout)
}

/// Parse `text` on the blocking pool under the size-scaled deadline.
///
/// Deadline expiry surfaces as a `Timeout` failure rather than a hang; the
/// abandoned blocking task finishes on its own and its result is dropped.
pub async fn parse_bounded(text: Arc<str>, config: &ParseConfig) -> Result<Tree, EngineError> {
    if text.len() > config.max_document_bytes {
        return Err(EngineError::DocumentTooLarge {
            size: text.len(),
            limit: config.max_document_bytes,
        });
    }

    let deadline = parse_timeout_for(config, text.chars().count());
    let task = tokio::task::spawn_blocking(move || with_parser(|p| p.parse(text.as_ref(), None)));

    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(Some(tree))) => Ok(tree),
        Ok(Ok(None)) => Err(EngineError::ParseFailed),
        Ok(Err(join_err)) => {
            log::warn!("parse task failed to complete: {join_err}");
            Err(EngineError::ParseFailed)
        }
        Err(_) => Err(EngineError::Timeout {
            operation: OperationKind::Parsing,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_initialized_with_expression_language() {
        let result = with_parser(|parser| parser.parse("copy_file(\"a.txt\")", None).is_some());
        assert!(result, "Parser should parse a Stencil call");
    }

    #[test]
    fn test_parser_reuse_on_same_thread() {
        let result1 = with_parser(|parser| parser.parse("a(1)", None).is_some());
        let result2 = with_parser(|parser| parser.parse("b(2)", None).is_some());
        assert!(result1 && result2, "All parses should succeed");
    }

    #[test]
    fn test_timeout_scales_with_length_and_clamps() {
        let config = ParseConfig::default();
        let small = parse_timeout_for(&config, 0);
        assert_eq!(small, Duration::from_millis(500));
        let medium = parse_timeout_for(&config, 100_000);
        assert_eq!(medium, Duration::from_millis(1500));
        let huge = parse_timeout_for(&config, 100_000_000);
        assert_eq!(huge, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_parse_bounded_returns_tree() {
        let tree = parse_bounded(Arc::from("outer(inner(\"x\"))"), &ParseConfig::default())
            .await
            .unwrap();
        assert_eq!(tree.root_node().kind(), "program");
        assert!(!tree.root_node().has_error());
    }

    #[tokio::test]
    async fn test_parse_bounded_rejects_oversized_input() {
        let config = ParseConfig {
            max_document_bytes: 8,
            ..ParseConfig::default()
        };
        let result = parse_bounded(Arc::from("copy_file(\"a.txt\", \"b.txt\")"), &config).await;
        match result {
            Err(EngineError::DocumentTooLarge { size, limit }) => {
                assert!(size > limit);
            }
            other => panic!("expected DocumentTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parse_bounded_accepts_garbage_input() {
        // Malformed input is a parse result with error nodes, not a failure.
        let tree = parse_bounded(Arc::from("copy_file(\"a.txt\""), &ParseConfig::default())
            .await
            .unwrap();
        assert!(tree.root_node().has_error());
    }
}
