/// Reserved words of the Stencil expression grammar.
///
/// Stencil's expression layer is ECMAScript-compatible, so its keyword set
/// is the ECMAScript one. API-surface entries must not collide with these:
/// the parser would never produce a plain call node for `if(...)`, so a
/// colliding entry could never be resolved and is rejected at spec load.
pub const RESERVED_WORDS: &[&str] = &[
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "export",
    "extends",
    "false",
    "finally",
    "for",
    "function",
    "if",
    "import",
    "in",
    "instanceof",
    "let",
    "new",
    "null",
    "return",
    "super",
    "switch",
    "this",
    "throw",
    "true",
    "try",
    "typeof",
    "undefined",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

/// Check whether `name` collides with a grammar reserved word.
///
/// The check is case-insensitive because all specification name lookups are
/// case-insensitive; an entry named `If` would shadow the keyword in the
/// store's index even though the grammar treats only `if` as reserved.
pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(name))
}
