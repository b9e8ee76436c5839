//! Record edit operations of conversion directives.
//!
//! Compiled from an [`OperationSet`] in the fixed order assign, append,
//! prepend, regex, delete, rename.

use crate::directives::{normalize_replacement, OperationSet, RegexCache};
use crate::error::{DirectiveError, DirectiveResult, ExpressionError};
use crate::expression::Expression;
use crate::store::{FieldValue, Record, ID_FIELD};

/// Value written by an `assign`.
#[derive(Debug, Clone)]
pub enum AssignValue {
    /// Evaluated against the matched record.
    Expression(Expression),
    /// Assigned verbatim.
    List(Vec<String>),
}

/// A single edit on a matched record.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Set a field
    Assign { field: String, value: AssignValue },

    /// Concatenate after the current value
    Append { field: String, value: FieldValue },

    /// Concatenate before the current value
    Prepend { field: String, value: FieldValue },

    /// Regex substitution; `pattern` is a key into the [`RegexCache`]
    Regex {
        field: String,
        pattern: String,
        replacement: String,
    },

    /// Remove a field
    Delete { field: String },

    /// Rename a field in place
    Rename { from: String, to: String },
}

/// Non-fatal result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Done,
    /// The operation had nothing to do; the message explains why.
    Skipped(String),
}

/// Where a directive comes from, for error messages.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveContext<'a> {
    pub table: &'a str,
    pub field: &'a str,
    pub key: &'a str,
}

/// Compile an operation set, registering regex patterns in `cache`.
pub fn compile_operations(
    set: &OperationSet,
    context: DirectiveContext<'_>,
    cache: &mut RegexCache,
) -> DirectiveResult<Vec<Operation>> {
    let mut operations = Vec::new();

    for (field, value) in &set.assign {
        let value = match value {
            FieldValue::Scalar(text) => AssignValue::Expression(Expression::compile(text).map_err(|e| match e {
                ExpressionError::Malformed { expression, message } => DirectiveError::BadPattern {
                    pattern: expression,
                    message,
                },
                other => DirectiveError::Invalid(other.to_string()),
            })?),
            FieldValue::List(values) => AssignValue::List(values.clone()),
        };
        operations.push(Operation::Assign {
            field: field.clone(),
            value,
        });
    }
    for (field, value) in &set.append {
        operations.push(Operation::Append {
            field: field.clone(),
            value: value.clone(),
        });
    }
    for (field, value) in &set.prepend {
        operations.push(Operation::Prepend {
            field: field.clone(),
            value: value.clone(),
        });
    }
    for (field, pair) in &set.regex {
        let [pattern, replacement] = pair.as_slice() else {
            return Err(DirectiveError::MalformedRegexPair {
                field: field.clone(),
                message: format!("expected [pattern, replacement], found {} element(s)", pair.len()),
            });
        };
        cache.compile(pattern)?;
        operations.push(Operation::Regex {
            field: field.clone(),
            pattern: pattern.clone(),
            replacement: normalize_replacement(replacement),
        });
    }
    for field in &set.delete {
        if field == ID_FIELD {
            return Err(DirectiveError::DeleteId {
                table: context.table.to_string(),
                field: context.field.to_string(),
                key: context.key.to_string(),
            });
        }
        operations.push(Operation::Delete { field: field.clone() });
    }
    for (from, to) in &set.rename {
        if from == ID_FIELD || to == ID_FIELD {
            return Err(DirectiveError::Invalid(format!(
                "directive {}.{} = '{}' renames to or from the id field; assign the id instead",
                context.table, context.field, context.key
            )));
        }
        operations.push(Operation::Rename {
            from: from.clone(),
            to: to.clone(),
        });
    }

    Ok(operations)
}

impl Operation {
    /// Apply this operation to a record.
    ///
    /// `Err` carries the failure message; the caller decides whether it is fatal.
    pub fn apply(&self, record: &mut Record, cache: &RegexCache) -> Result<Applied, String> {
        match self {
            Operation::Assign { field, value } => self.apply_assign(record, field, value),
            Operation::Append { field, value } => {
                self.apply_concat(record, field, |current| current.append(value))
            }
            Operation::Prepend { field, value } => {
                self.apply_concat(record, field, |current| current.prepend(value))
            }
            Operation::Regex {
                field,
                pattern,
                replacement,
            } => self.apply_regex(record, cache, field, pattern, replacement),
            Operation::Delete { field } => Ok(self.apply_delete(record, field)),
            Operation::Rename { from, to } => Ok(self.apply_rename(record, from, to)),
        }
    }

    fn apply_assign(&self, record: &mut Record, field: &str, value: &AssignValue) -> Result<Applied, String> {
        let value = match value {
            AssignValue::Expression(expression) => expression.evaluate(record).map_err(|e| e.to_string())?,
            AssignValue::List(values) => FieldValue::List(values.clone()),
        };
        if field == ID_FIELD {
            if value.is_list() {
                return Err(format!("cannot assign a list to '{}'", ID_FIELD));
            }
            if value.as_scalar().map_or(true, |id| id.trim().is_empty()) {
                return Err(format!("cannot assign an empty '{}'", ID_FIELD));
            }
        }
        record.insert(field.to_string(), value);
        Ok(Applied::Done)
    }

    fn apply_concat(
        &self,
        record: &mut Record,
        field: &str,
        combine: impl FnOnce(&mut FieldValue) -> Result<(), String>,
    ) -> Result<Applied, String> {
        match record.get_mut(field) {
            Some(current) => {
                combine(current).map_err(|e| format!("field '{}': {}", field, e))?;
                Ok(Applied::Done)
            }
            None => Ok(Applied::Skipped(format!("field '{}' is missing", field))),
        }
    }

    fn apply_regex(
        &self,
        record: &mut Record,
        cache: &RegexCache,
        field: &str,
        pattern: &str,
        replacement: &str,
    ) -> Result<Applied, String> {
        let regex = cache
            .get(pattern)
            .ok_or_else(|| format!("pattern '{}' was not compiled", pattern))?;
        let Some(current) = record.get_mut(field) else {
            return Ok(Applied::Skipped(format!("regex target field '{}' is missing", field)));
        };

        let before = current.clone();
        current.map_values(|value| regex.replace_all(value, replacement).into_owned());
        if *current == before {
            Ok(Applied::Skipped(format!(
                "regex '{}' made no change to field '{}'",
                pattern, field
            )))
        } else {
            Ok(Applied::Done)
        }
    }

    fn apply_delete(&self, record: &mut Record, field: &str) -> Applied {
        match record.shift_remove(field) {
            Some(_) => Applied::Done,
            None => Applied::Skipped(format!("field '{}' to delete is missing", field)),
        }
    }

    fn apply_rename(&self, record: &mut Record, from: &str, to: &str) -> Applied {
        match record.shift_remove_full(from) {
            Some((index, _, value)) => {
                record.shift_insert(index.min(record.len()), to.to_string(), value);
                Applied::Done
            }
            None => Applied::Skipped(format!("field '{}' to rename is missing", from)),
        }
    }
}
