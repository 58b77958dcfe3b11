// lib.rs — Incremental language-analysis engine for Stencil templates.
//
// The crate is transport-agnostic: LSP handlers or a custom RPC side-channel
// call into `AnalysisEngine` (or the individual service objects) and decide
// how results travel over the wire.

pub mod call_site;
pub mod engine;
pub mod error;
pub mod parse_cache;
pub mod parser_pool;
pub mod rate_limit;
pub mod reserved_words;
pub mod scheduler;
pub mod semantic;
pub mod session;
pub mod spec;
pub mod timeout;

pub use call_site::{picker_directive, CallSiteContext, PickerDirective};
pub use engine::{AnalysisEngine, EngineConfig};
pub use error::EngineError;
pub use scheduler::DiagnosticsSink;
pub use spec::{ApiSpec, SpecStore};
