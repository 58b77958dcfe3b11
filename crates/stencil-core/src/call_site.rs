//
// call_site.rs
//
// Cursor-to-call-site resolution: finds the enclosing function call, the
// active parameter slot, and the matching parameter specification. Powers
// both the analyzer's context needs and the picker trigger protocol.
//
// Two interchangeable paths produce the same context shape: the primary
// tree-based walk, and a lexical scan over the raw line used when no tree
// is available (pathological parse failure or timeout).
//

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tower_lsp::lsp_types::Position;
use tree_sitter::{Node, Point, Tree};

use crate::semantic::{argument_nodes, callee_name, literal_value, strip_quotes};
use crate::spec::{ParameterSpec, PickerKind, SpecIndex};

/// The resolved (function, parameter index, parameter spec) tuple for a
/// cursor position.
#[derive(Debug, Clone)]
pub struct CallSiteContext {
    /// Qualified as `object.member` when applicable.
    pub function_name: String,
    pub parameter_index: usize,
    /// `None` when the function is unknown or the index is out of range.
    pub parameter: Option<Arc<ParameterSpec>>,
    /// Literal text currently occupying the slot, if any (quotes stripped).
    pub current_value: Option<String>,
}

/// Directive for the external UI layer to open its parameter picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerDirective {
    pub function_name: String,
    pub parameter_index: usize,
    pub current_value: Option<String>,
}

/// Trigger decision for a resolved call site. Pure function of the
/// parameter's picker kind: only `file-picker` emits a directive; enum
/// lists are rendered by the standard completion mechanism and `none`
/// means no UI at all.
pub fn picker_directive(context: &CallSiteContext) -> Option<PickerDirective> {
    let parameter = context.parameter.as_ref()?;
    match parameter.picker_kind {
        PickerKind::FilePicker => Some(PickerDirective {
            function_name: context.function_name.clone(),
            parameter_index: context.parameter_index,
            current_value: context.current_value.clone(),
        }),
        PickerKind::EnumList | PickerKind::None => None,
    }
}

/// Find the deepest node containing `point`.
///
/// Depth-first descent that only continues into a child whose span contains
/// the point; among siblings containing it, the most deeply nested match
/// wins. Hover and the trigger protocol both depend on getting the smallest
/// containing node, not the first one found.
pub fn node_at(node: Node, point: Point) -> Option<Node> {
    if point < node.start_position() || point > node.end_position() {
        return None;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(deeper) = node_at(child, point) {
            return Some(deeper);
        }
    }

    Some(node)
}

/// Resolve the call-site context at an LSP position using the syntax tree.
pub fn context_at(
    tree: &Tree,
    text: &str,
    index: &SpecIndex,
    position: Position,
) -> Option<CallSiteContext> {
    let line_text = text.split('\n').nth(position.line as usize)?;
    let byte_col = utf16_column_to_byte_offset(line_text, position.character as usize);
    let cursor_byte = line_start_byte(text, position.line as usize)? + byte_col;
    let point = Point {
        row: position.line as usize,
        column: byte_col,
    };

    let mut current = node_at(tree.root_node(), point)?;
    loop {
        if current.kind() == "call_expression" {
            if let Some(context) = call_context(current, text, index, cursor_byte) {
                return Some(context);
            }
        }
        current = current.parent()?;
    }
}

fn call_context(
    call: Node,
    text: &str,
    index: &SpecIndex,
    cursor_byte: usize,
) -> Option<CallSiteContext> {
    let args = call.child_by_field_name("arguments")?;
    // Cursor must sit between the parentheses, not on the callee.
    if cursor_byte <= args.start_byte() || cursor_byte >= args.end_byte() {
        return None;
    }

    let (function_name, _) = callee_name(call, text)?;

    let mut cursor = args.walk();
    let parameter_index = args
        .children(&mut cursor)
        .filter(|c| c.kind() == "," && c.start_byte() < cursor_byte)
        .count();

    let current_value = argument_nodes(call)
        .get(parameter_index)
        .and_then(|n| literal_value(*n, text));

    let parameter = index
        .resolve_callee(&function_name)
        .and_then(|entry| entry.parameters.get(parameter_index).cloned());

    Some(CallSiteContext {
        function_name,
        parameter_index,
        parameter,
        current_value,
    })
}

// ---------------------------------------------------------------------------
// Lexical fallback
// ---------------------------------------------------------------------------

fn callee_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\s*$").unwrap()
    })
}

struct CallFrame {
    name: Option<String>,
    commas: usize,
    value_start: usize,
}

/// Degraded call-site resolution over the raw line text, for when the
/// tree-based path is unavailable. Returns the same context shape.
///
/// Scans the line prefix up to the cursor, tracking string state and a
/// stack of open parens; the innermost unclosed paren preceded by an
/// identifier is the enclosing call.
pub fn context_at_lexical(
    line_text: &str,
    character: u32,
    index: &SpecIndex,
) -> Option<CallSiteContext> {
    let byte_col = utf16_column_to_byte_offset(line_text, character as usize);
    let prefix = &line_text[..byte_col];

    let mut stack: Vec<CallFrame> = Vec::new();
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in prefix.char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => in_string = Some(ch),
            '(' => {
                let name = callee_regex()
                    .captures(&prefix[..i])
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                stack.push(CallFrame {
                    name,
                    commas: 0,
                    value_start: i + ch.len_utf8(),
                });
            }
            ')' => {
                stack.pop();
            }
            ',' => {
                if let Some(top) = stack.last_mut() {
                    top.commas += 1;
                    top.value_start = i + ch.len_utf8();
                }
            }
            _ => {}
        }
    }

    let frame = stack.iter().rev().find(|f| f.name.is_some())?;
    let function_name = frame.name.clone()?;
    let parameter_index = frame.commas;

    let raw_value = prefix[frame.value_start..].trim();
    let current_value = if raw_value.is_empty() {
        None
    } else {
        Some(strip_quotes(raw_value).to_string())
    };

    let parameter = index
        .resolve_callee(&function_name)
        .and_then(|entry| entry.parameters.get(parameter_index).cloned());

    Some(CallSiteContext {
        function_name,
        parameter_index,
        parameter,
        current_value,
    })
}

// ---------------------------------------------------------------------------
// Position conversion
// ---------------------------------------------------------------------------

fn utf16_column_to_byte_offset(line_text: &str, utf16_col: usize) -> usize {
    let mut utf16_count = 0;
    for (byte_idx, ch) in line_text.char_indices() {
        if utf16_count >= utf16_col {
            return byte_idx;
        }
        utf16_count += ch.len_utf16();
    }
    line_text.len()
}

fn line_start_byte(text: &str, line: usize) -> Option<usize> {
    if line == 0 {
        return Some(0);
    }
    let mut offset = 0;
    for (i, segment) in text.split_inclusive('\n').enumerate() {
        if i == line {
            return Some(offset);
        }
        offset += segment.len();
    }
    // Cursor on the line right after a trailing newline.
    (text.ends_with('\n') && text.split_inclusive('\n').count() == line).then_some(offset)
}
