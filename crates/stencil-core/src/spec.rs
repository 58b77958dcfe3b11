//
// spec.rs
//
// The API-surface specification store: loads the declarative description of
// the template API (functions, objects, parameters, picker hints), validates
// it, and indexes it for case-insensitive O(1) lookup. The store is immutable
// after a successful load; reload swaps the whole index atomically so
// concurrent readers never observe a half-updated specification.
//

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::error::EngineError;
use crate::reserved_words::is_reserved_word;

// ---------------------------------------------------------------------------
// Raw specification document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Object,
    Function,
}

/// Semantic type of a parameter. Closed enumeration: unknown values are
/// rejected by the deserializer before validation even runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Path,
    Constant,
    String,
    Number,
    Boolean,
    Any,
}

/// UI-picker hint for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PickerKind {
    FilePicker,
    EnumList,
    #[default]
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    pub semantic_type: SemanticType,
    #[serde(default)]
    pub picker_kind: PickerKind,
    /// Allowed values; required iff `picker_kind` is `enum-list`.
    #[serde(default)]
    pub options: Option<Vec<String>>,
    /// Macro expansions allowed inside the value; only valid for `string`.
    #[serde(default)]
    pub macros: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySpec {
    pub name: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub hover: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub members: Vec<EntrySpec>,
}

/// The top-level specification document.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSpec {
    pub entries: Vec<EntrySpec>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Outcome of specification validation. Errors block the load entirely;
/// warnings are advisory and logged.
#[derive(Debug, Clone, Default)]
pub struct SpecValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SpecValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a specification document against the schema rules.
///
/// Every rule produces a distinct message so a misconfigured spec can be
/// fixed without guesswork.
pub fn validate(spec: &ApiSpec) -> SpecValidation {
    let mut report = SpecValidation::default();
    let mut seen: HashSet<String> = HashSet::new();

    for entry in &spec.entries {
        let lower = entry.name.to_ascii_lowercase();
        if !seen.insert(lower) {
            report
                .errors
                .push(format!("Duplicate entry name '{}'", entry.name));
        }
        if is_reserved_word(&entry.name) {
            report.errors.push(format!(
                "Entry name '{}' collides with a grammar reserved word",
                entry.name
            ));
        }
        if entry.hover.trim().is_empty() {
            report
                .warnings
                .push(format!("Entry '{}' has no hover documentation", entry.name));
        }

        match entry.kind {
            EntryKind::Function => {
                if !entry.members.is_empty() {
                    report.errors.push(format!(
                        "Function entry '{}' must not declare members",
                        entry.name
                    ));
                }
                validate_parameters(&entry.name, &entry.parameters, &mut report);
            }
            EntryKind::Object => {
                if !entry.parameters.is_empty() {
                    report.errors.push(format!(
                        "Object entry '{}' must not declare parameters",
                        entry.name
                    ));
                }
                if entry.members.is_empty() {
                    report
                        .errors
                        .push(format!("Object entry '{}' has no members", entry.name));
                }
                let mut member_seen: HashSet<String> = HashSet::new();
                for member in &entry.members {
                    let qualified = format!("{}.{}", entry.name, member.name);
                    if !member_seen.insert(member.name.to_ascii_lowercase()) {
                        report.errors.push(format!(
                            "Duplicate member name '{}' in object '{}'",
                            member.name, entry.name
                        ));
                    }
                    if member.kind != EntryKind::Function {
                        report.errors.push(format!(
                            "Member '{}' must be a function; objects nest only one level",
                            qualified
                        ));
                    }
                    if is_reserved_word(&member.name) {
                        report.errors.push(format!(
                            "Member name '{}' collides with a grammar reserved word",
                            qualified
                        ));
                    }
                    if member.hover.trim().is_empty() {
                        report.warnings.push(format!(
                            "Member '{}' has no hover documentation",
                            qualified
                        ));
                    }
                    validate_parameters(&qualified, &member.parameters, &mut report);
                }
            }
        }
    }

    report
}

fn validate_parameters(owner: &str, parameters: &[ParameterSpec], report: &mut SpecValidation) {
    for param in parameters {
        match param.picker_kind {
            PickerKind::EnumList => {
                let empty = param.options.as_ref().map_or(true, |o| o.is_empty());
                if empty {
                    report.errors.push(format!(
                        "Parameter '{}' of '{}' uses enum-list but declares no options",
                        param.name, owner
                    ));
                }
                if param.semantic_type != SemanticType::Constant {
                    report.warnings.push(format!(
                        "Parameter '{}' of '{}' pairs enum-list with a non-constant type",
                        param.name, owner
                    ));
                }
            }
            PickerKind::FilePicker => {
                if param.semantic_type != SemanticType::Path {
                    report.warnings.push(format!(
                        "Parameter '{}' of '{}' pairs file-picker with a non-path type",
                        param.name, owner
                    ));
                }
            }
            PickerKind::None => {}
        }
        if param.picker_kind != PickerKind::EnumList
            && param.options.as_ref().is_some_and(|o| !o.is_empty())
        {
            report.warnings.push(format!(
                "Parameter '{}' of '{}' declares options without enum-list",
                param.name, owner
            ));
        }
        if param.macros.is_some() && param.semantic_type != SemanticType::String {
            report.errors.push(format!(
                "Parameter '{}' of '{}' declares macros but is not a string",
                param.name, owner
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Indexed model
// ---------------------------------------------------------------------------

/// A function entry after indexing, with shared parameter specs so a
/// call-site context can hold one without copying.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    /// Name as declared (unqualified).
    pub name: String,
    /// `object.member` for members, same as `name` for globals.
    pub qualified_name: String,
    pub hover: String,
    pub parameters: Vec<Arc<ParameterSpec>>,
}

impl FunctionEntry {
    /// Render a `name(a, b, c)` signature line for hover documentation.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        format!("{}({})", self.qualified_name, params.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub name: String,
    pub hover: String,
    pub member_names: Vec<String>,
}

/// Read-only snapshot of the indexed specification.
///
/// All lookups are case-insensitive. A snapshot is immutable; holders keep
/// reading consistent data across a concurrent reload.
#[derive(Debug, Default)]
pub struct SpecIndex {
    functions: HashMap<String, Arc<FunctionEntry>>,
    members: HashMap<String, Arc<FunctionEntry>>,
    objects: HashMap<String, Arc<ObjectEntry>>,
}

impl SpecIndex {
    fn build(spec: &ApiSpec) -> Self {
        let mut index = SpecIndex::default();
        for entry in &spec.entries {
            match entry.kind {
                EntryKind::Function => {
                    let function = Arc::new(FunctionEntry {
                        name: entry.name.clone(),
                        qualified_name: entry.name.clone(),
                        hover: entry.hover.clone(),
                        parameters: entry
                            .parameters
                            .iter()
                            .cloned()
                            .map(Arc::new)
                            .collect(),
                    });
                    index
                        .functions
                        .insert(entry.name.to_ascii_lowercase(), function);
                }
                EntryKind::Object => {
                    let object = Arc::new(ObjectEntry {
                        name: entry.name.clone(),
                        hover: entry.hover.clone(),
                        member_names: entry.members.iter().map(|m| m.name.clone()).collect(),
                    });
                    index
                        .objects
                        .insert(entry.name.to_ascii_lowercase(), object);
                    for member in &entry.members {
                        let qualified = format!("{}.{}", entry.name, member.name);
                        let function = Arc::new(FunctionEntry {
                            name: member.name.clone(),
                            qualified_name: qualified.clone(),
                            hover: member.hover.clone(),
                            parameters: member
                                .parameters
                                .iter()
                                .cloned()
                                .map(Arc::new)
                                .collect(),
                        });
                        index
                            .members
                            .insert(qualified.to_ascii_lowercase(), function);
                    }
                }
            }
        }
        index
    }

    /// Look up a global function by bare name.
    pub fn lookup_function(&self, name: &str) -> Option<Arc<FunctionEntry>> {
        self.functions.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Look up an object member function.
    pub fn lookup_member(&self, object: &str, member: &str) -> Option<Arc<FunctionEntry>> {
        let key = format!("{}.{}", object.to_ascii_lowercase(), member.to_ascii_lowercase());
        self.members.get(&key).cloned()
    }

    /// Look up an object entry (hover documentation, member list).
    pub fn lookup_object(&self, name: &str) -> Option<Arc<ObjectEntry>> {
        self.objects.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Resolve a callee name as written at a call site: either a bare
    /// global name or a dotted `object.member` pair.
    pub fn resolve_callee(&self, callee: &str) -> Option<Arc<FunctionEntry>> {
        match callee.split_once('.') {
            Some((object, member)) => self.lookup_member(object, member),
            None => self.lookup_function(callee),
        }
    }

    pub fn function_count(&self) -> usize {
        self.functions.len() + self.members.len()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Owning handle for the indexed specification.
///
/// Construction fails while validation errors exist; warnings are logged and
/// retained in the report. `reload` builds the replacement index off to the
/// side and swaps it in one write, never mutating in place.
#[derive(Debug)]
pub struct SpecStore {
    index: RwLock<Arc<SpecIndex>>,
    report: RwLock<SpecValidation>,
}

impl SpecStore {
    pub fn load(spec: ApiSpec) -> Result<Self, EngineError> {
        let (index, report) = Self::validate_and_index(spec)?;
        Ok(Self {
            index: RwLock::new(Arc::new(index)),
            report: RwLock::new(report),
        })
    }

    /// Parse and load a JSON specification document.
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        let spec: ApiSpec = serde_json::from_str(text).map_err(|e| EngineError::InvalidSpec {
            errors: vec![format!("specification document is not well-formed: {e}")],
        })?;
        Self::load(spec)
    }

    /// Replace the active specification atomically.
    ///
    /// A failed reload leaves the previous index active and returns the
    /// validation error.
    pub fn reload(&self, spec: ApiSpec) -> Result<SpecValidation, EngineError> {
        let (index, report) = Self::validate_and_index(spec)?;
        *self.index.write().unwrap() = Arc::new(index);
        *self.report.write().unwrap() = report.clone();
        Ok(report)
    }

    fn validate_and_index(spec: ApiSpec) -> Result<(SpecIndex, SpecValidation), EngineError> {
        let report = validate(&spec);
        if !report.is_valid() {
            return Err(EngineError::InvalidSpec {
                errors: report.errors,
            });
        }
        for warning in &report.warnings {
            log::warn!("specification: {warning}");
        }
        Ok((SpecIndex::build(&spec), report))
    }

    /// Acquire the current index snapshot. Cheap; readers work against the
    /// snapshot without further locking.
    pub fn snapshot(&self) -> Arc<SpecIndex> {
        self.index.read().unwrap().clone()
    }

    pub fn validation_report(&self) -> SpecValidation {
        self.report.read().unwrap().clone()
    }
}
