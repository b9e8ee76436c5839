//! Conversion-directive engine.
//!
//! Directives are compiled once into a [`CompiledConversion`], then applied
//! to a populated store. For every (table, field) the passes run in
//! [`Comparison::PASS_ORDER`]: unique passes first, each consuming the
//! field values it matched, then the repeatable passes. Identifier renames
//! are propagated once all groups have run.

pub mod matching;
pub mod operations;
pub mod rename;

use std::collections::HashSet;
use std::fmt;

use crate::diagnostics::Diagnostics;
use crate::directives::{Comparison, ConversionDirectives, MatchKind, OperationSet, RegexCache};
use crate::error::{DirectiveError, DirectiveResult};
use crate::store::ExtractionStore;

pub use matching::{candidates, exact_matches, levenshtein_mutual, levenshtein_nearest, regex_matches, Candidate, Match};
pub use operations::{compile_operations, Applied, AssignValue, DirectiveContext, Operation};
pub use rename::{propagate_renames, Rename};

// =============================================================================
// Compiled directives
// =============================================================================

/// One directive key with its compiled operations.
#[derive(Debug, Clone)]
pub struct CompiledDirective {
    pub comparison: Comparison,
    pub key: String,
    pub operations: Vec<Operation>,
    pub required: bool,
}

/// All directives targeting one (table, field), in pass order.
#[derive(Debug, Clone)]
pub struct DirectiveGroup {
    pub table: String,
    pub field: String,
    pub directives: Vec<CompiledDirective>,
}

impl DirectiveGroup {
    fn is_required(&self) -> bool {
        self.directives.iter().any(|d| d.required)
    }

    fn pass(&self, comparison: Comparison) -> impl Iterator<Item = (usize, &CompiledDirective)> {
        self.directives
            .iter()
            .enumerate()
            .filter(move |(_, d)| d.comparison == comparison)
    }
}

/// Conversion directives ready to run, with their precompiled patterns.
#[derive(Debug, Clone, Default)]
pub struct CompiledConversion {
    pub groups: Vec<DirectiveGroup>,
    pub cache: RegexCache,
}

impl CompiledConversion {
    /// Compile every directive.
    ///
    /// A directive that fails to compile is skipped with a warning, or aborts
    /// compilation when it is required.
    pub fn compile(directives: &ConversionDirectives, diagnostics: &mut Diagnostics) -> DirectiveResult<Self> {
        let mut cache = RegexCache::new();
        let mut groups = Vec::new();

        for (table, fields) in directives {
            for (field, by_comparison) in fields {
                let mut group = DirectiveGroup {
                    table: table.clone(),
                    field: field.clone(),
                    directives: Vec::new(),
                };
                for comparison in Comparison::PASS_ORDER {
                    let Some(keyed) = by_comparison.get(&comparison) else {
                        continue;
                    };
                    for (key, set) in keyed {
                        let context = DirectiveContext { table, field, key };
                        match compile_directive(comparison, key, set, context, &mut cache) {
                            Ok(directive) => group.directives.push(directive),
                            Err(err) => diagnostics.report(set.required, err)?,
                        }
                    }
                }
                if !group.directives.is_empty() {
                    groups.push(group);
                }
            }
        }

        Ok(Self { groups, cache })
    }

    pub fn directive_count(&self) -> usize {
        self.groups.iter().map(|g| g.directives.len()).sum()
    }
}

fn compile_directive(
    comparison: Comparison,
    key: &str,
    set: &OperationSet,
    context: DirectiveContext<'_>,
    cache: &mut RegexCache,
) -> DirectiveResult<CompiledDirective> {
    if comparison.kind() == MatchKind::Regex {
        cache.compile(key)?;
    }
    Ok(CompiledDirective {
        comparison,
        key: key.to_string(),
        operations: compile_operations(set, context, cache)?,
        required: set.required,
    })
}

// =============================================================================
// Report
// =============================================================================

/// A directive that matched no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnusedDirective {
    pub table: String,
    pub field: String,
    pub comparison: Comparison,
    pub key: String,
}

impl fmt::Display for UnusedDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} [{}] '{}' matched no record",
            self.table, self.field, self.comparison, self.key
        )
    }
}

/// Outcome of a conversion run.
#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    /// Directive applications committed to a record
    pub applied: usize,
    pub renames: Vec<Rename>,
    pub unused: Vec<UnusedDirective>,
}

impl ConversionReport {
    pub fn summary(&self) -> String {
        format!(
            "Converted: {} applications, {} id renames, {} unused directives",
            self.applied,
            self.renames.len(),
            self.unused.len()
        )
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Compile and apply conversion directives in one step.
pub fn apply_conversion(
    store: &mut ExtractionStore,
    directives: &ConversionDirectives,
    diagnostics: &mut Diagnostics,
) -> DirectiveResult<ConversionReport> {
    let compiled = CompiledConversion::compile(directives, diagnostics)?;
    convert(store, &compiled, diagnostics)
}

/// Apply compiled directives to `store`, then propagate id renames.
pub fn convert(
    store: &mut ExtractionStore,
    conversion: &CompiledConversion,
    diagnostics: &mut Diagnostics,
) -> DirectiveResult<ConversionReport> {
    let mut report = ConversionReport::default();

    for group in &conversion.groups {
        let mut used = vec![false; group.directives.len()];
        if check_target(store, group, diagnostics)? {
            run_group(store, group, &conversion.cache, &mut used, &mut report, diagnostics)?;
        }
        for (directive, _) in group.directives.iter().zip(&used).filter(|(_, used)| !**used) {
            let unused = UnusedDirective {
                table: group.table.clone(),
                field: group.field.clone(),
                comparison: directive.comparison,
                key: directive.key.clone(),
            };
            diagnostics.warn(format!("Unused conversion directive: {}", unused));
            report.unused.push(unused);
        }
    }

    report.renames = propagate_renames(store)?;
    tracing::info!("{}", report.summary());
    Ok(report)
}

/// Whether the group's table and field exist; reports them missing otherwise.
fn check_target(store: &ExtractionStore, group: &DirectiveGroup, diagnostics: &mut Diagnostics) -> DirectiveResult<bool> {
    let message = match store.table(&group.table) {
        None => format!("table '{}'", group.table),
        Some(table) if !table.values().any(|r| r.contains_key(&group.field)) => {
            format!("field '{}' in table '{}'", group.field, group.table)
        }
        Some(_) => return Ok(true),
    };
    diagnostics.report(group.is_required(), DirectiveError::MissingTarget(message))?;
    Ok(false)
}

fn run_group(
    store: &mut ExtractionStore,
    group: &DirectiveGroup,
    cache: &RegexCache,
    used: &mut [bool],
    report: &mut ConversionReport,
    diagnostics: &mut Diagnostics,
) -> DirectiveResult<()> {
    let mut consumed: HashSet<String> = HashSet::new();

    for comparison in Comparison::PASS_ORDER {
        let unique = comparison.is_unique();

        if comparison.kind() == MatchKind::Levenshtein {
            let pass: Vec<(usize, &CompiledDirective)> = group.pass(comparison).collect();
            if pass.is_empty() {
                continue;
            }
            let keys: Vec<&str> = pass.iter().map(|(_, d)| d.key.as_str()).collect();
            let pool = snapshot(store, group, unique, &consumed);
            let pairs = if unique {
                levenshtein_mutual(&keys, &pool)
            } else {
                levenshtein_nearest(&keys, &pool)
            };
            for (k, matched) in pairs {
                let (index, directive) = pass[k];
                used[index] = true;
                if unique {
                    consumed.insert(matched.value.clone());
                }
                if apply_directive(store, group, directive, &matched, cache, diagnostics)? {
                    report.applied += 1;
                }
            }
            continue;
        }

        for (index, directive) in group.pass(comparison) {
            // Re-snapshot per directive: earlier directives may have edited
            // the field or consumed values.
            let pool = snapshot(store, group, unique, &consumed);
            let matches = match comparison.kind() {
                MatchKind::Regex => match cache.get(&directive.key) {
                    Some(pattern) => regex_matches(pattern, &pool),
                    None => Vec::new(),
                },
                _ => exact_matches(&directive.key, &pool),
            };
            if matches.is_empty() {
                continue;
            }
            used[index] = true;

            let targets = if unique {
                if matches.len() > 1 {
                    diagnostics.warn(format!(
                        "{}.{} [{}] '{}' matched {} records; applying to '{}' only",
                        group.table,
                        group.field,
                        comparison,
                        directive.key,
                        matches.len(),
                        matches[0].id
                    ));
                }
                consumed.insert(matches[0].value.clone());
                &matches[..1]
            } else {
                &matches[..]
            };

            for matched in targets {
                if apply_directive(store, group, directive, matched, cache, diagnostics)? {
                    report.applied += 1;
                }
            }
        }
    }
    Ok(())
}

fn snapshot(store: &ExtractionStore, group: &DirectiveGroup, unique: bool, consumed: &HashSet<String>) -> Vec<Candidate> {
    match store.table(&group.table) {
        Some(table) => candidates(table, &group.field, |v| !unique || !consumed.contains(v)),
        None => Vec::new(),
    }
}

/// Apply a directive's operations to the matched record.
///
/// Edits are committed only when every operation succeeds.
fn apply_directive(
    store: &mut ExtractionStore,
    group: &DirectiveGroup,
    directive: &CompiledDirective,
    matched: &Match,
    cache: &RegexCache,
    diagnostics: &mut Diagnostics,
) -> DirectiveResult<bool> {
    let Some(record) = store.record_mut(&group.table, &matched.id) else {
        return Ok(false);
    };

    let mut edited = record.clone();
    for operation in &directive.operations {
        match operation.apply(&mut edited, cache) {
            Ok(Applied::Done) => {}
            Ok(Applied::Skipped(message)) => diagnostics.warn(format!(
                "{}.{} = '{}' on record '{}': {}",
                group.table, group.field, directive.key, matched.id, message
            )),
            Err(message) => {
                let failure = DirectiveError::Failed {
                    table: group.table.clone(),
                    field: group.field.clone(),
                    key: directive.key.clone(),
                    message: format!("record '{}': {}", matched.id, message),
                };
                diagnostics.report(directive.required, failure)?;
                return Ok(false);
            }
        }
    }

    *record = edited;
    Ok(true)
}
