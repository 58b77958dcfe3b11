//
// semantic.rs
//
// Semantic analysis: cross-checks call expressions against the API-surface
// specification. Runs only on trees with zero syntax errors; a document the
// user is mid-typing gets no cascading semantic noise.
//

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity};
use tree_sitter::{Node, Tree};

use crate::error::EngineError;
use crate::parse_cache::node_lsp_range;
use crate::spec::{PickerKind, SpecIndex};

/// Source tag on semantic diagnostics.
pub const SOURCE_SEMANTIC: &str = "stencil-semantic";

/// Cap on emitted semantic diagnostics per document. A pathological input
/// full of violations stops producing output here instead of growing an
/// unbounded result set.
pub const MAX_DIAGNOSTICS: usize = 200;

pub(crate) fn node_text<'a>(node: Node, text: &'a str) -> &'a str {
    &text[node.byte_range()]
}

/// Resolve the callee of a call expression to a lookup name.
///
/// Returns the name (qualified as `object.member` for member calls) and the
/// callee node whose range anchors unknown-function diagnostics. Callee
/// shapes the API surface cannot describe (computed members, calls on call
/// results) return `None` and are skipped.
pub(crate) fn callee_name<'a>(call: Node<'a>, text: &str) -> Option<(String, Node<'a>)> {
    let func = call.child_by_field_name("function")?;
    match func.kind() {
        "identifier" => Some((node_text(func, text).to_string(), func)),
        "member_expression" => {
            let object = func.child_by_field_name("object")?;
            let property = func.child_by_field_name("property")?;
            if object.kind() != "identifier" {
                return None;
            }
            let name = format!("{}.{}", node_text(object, text), node_text(property, text));
            Some((name, func))
        }
        _ => None,
    }
}

/// Named, non-extra children of the call's argument list.
pub(crate) fn argument_nodes(call: Node) -> Vec<Node> {
    let Some(args) = call.child_by_field_name("arguments") else {
        return Vec::new();
    };
    let mut cursor = args.walk();
    args.named_children(&mut cursor)
        .filter(|c| !c.is_extra())
        .collect()
}

/// Literal text of an argument, if it is a literal at all.
///
/// Strings lose their quotes; numbers and booleans keep their spelling.
/// Identifiers return `None`: a variable's runtime value is unknowable
/// statically, so enum-constrained positions accept them unchecked.
pub(crate) fn literal_value(node: Node, text: &str) -> Option<String> {
    match node.kind() {
        "string" | "template_string" => Some(strip_quotes(node_text(node, text)).to_string()),
        "number" | "true" | "false" | "null" => Some(node_text(node, text).to_string()),
        _ => None,
    }
}

pub(crate) fn strip_quotes(raw: &str) -> &str {
    let raw = raw.strip_prefix(['"', '\'', '`']).unwrap_or(raw);
    raw.strip_suffix(['"', '\'', '`']).unwrap_or(raw)
}

/// Walk every call expression and produce semantic diagnostics.
///
/// Returns an empty list when the tree has any syntax error (fail-fast).
/// Cancellation is polled once per visited node so a superseded validation
/// releases its thread promptly.
pub fn analyze(
    tree: &Tree,
    text: &str,
    index: &SpecIndex,
    cancel: &CancellationToken,
) -> Result<Vec<Diagnostic>, EngineError> {
    let root = tree.root_node();
    if root.has_error() {
        return Ok(Vec::new());
    }

    let mut diagnostics = Vec::new();
    visit(root, text, index, cancel, &mut diagnostics)?;
    Ok(diagnostics)
}

fn visit(
    node: Node,
    text: &str,
    index: &SpecIndex,
    cancel: &CancellationToken,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    if diagnostics.len() >= MAX_DIAGNOSTICS {
        return Ok(());
    }

    if node.kind() == "call_expression" {
        check_call(node, text, index, diagnostics);
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, text, index, cancel, diagnostics)?;
    }
    Ok(())
}

fn check_call(call: Node, text: &str, index: &SpecIndex, diagnostics: &mut Vec<Diagnostic>) {
    let Some((name, callee_node)) = callee_name(call, text) else {
        return;
    };

    let Some(entry) = index.resolve_callee(&name) else {
        diagnostics.push(semantic_error(
            node_lsp_range(callee_node),
            format!("Unknown function '{name}'"),
        ));
        return;
    };

    let arguments = argument_nodes(call);
    if arguments.len() != entry.parameters.len() {
        diagnostics.push(semantic_error(
            node_lsp_range(call),
            format!(
                "Function '{name}' expects {} arguments, but {} provided",
                entry.parameters.len(),
                arguments.len()
            ),
        ));
    }

    for (argument, parameter) in arguments.iter().zip(entry.parameters.iter()) {
        if parameter.picker_kind != PickerKind::EnumList {
            continue;
        }
        let Some(value) = literal_value(*argument, text) else {
            // Variable reference at an enum-constrained position: accepted
            // without check, the runtime value is unknowable.
            continue;
        };
        let options = parameter.options.as_deref().unwrap_or(&[]);
        let matched = options.iter().any(|o| o.eq_ignore_ascii_case(&value));
        if !matched {
            diagnostics.push(semantic_error(
                node_lsp_range(*argument),
                format!(
                    "Invalid value '{value}'. Expected one of: {}",
                    options.join(", ")
                ),
            ));
        }
    }
}

fn semantic_error(range: tower_lsp::lsp_types::Range, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(DiagnosticSeverity::ERROR),
        message,
        source: Some(SOURCE_SEMANTIC.to_string()),
        ..Default::default()
    }
}
