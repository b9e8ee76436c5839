//! Conversion directives authored as a tagged worksheet.
//!
//! ```text
//! #tags | #protocol.name.value | #protocol.id.assign | #protocol.name.regex | #comparison | #unique
//!       | extraction           | P-EXT               | "^ext", "EXT"        | exact       | true
//!       | wash                 | P-W                 |                      | levenshtein |
//! ```
//!
//! Every data row is one directive: the `.value` column gives the match key,
//! each non-empty operation column adds one edit to that directive.

use crate::error::{DirectiveError, DirectiveResult, Location, TagError};
use crate::sheet::{is_blank_row, is_ignore_row, is_tags_row, Worksheet};
use crate::store::FieldValue;
use crate::tags::{tokenize, Token};

use super::model::{Comparison, ConversionDirectives, MatchKind, OperationSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Assign,
    Append,
    Prepend,
    Regex,
    Delete,
    Rename,
}

impl OperationKind {
    fn parse(suffix: &str) -> Option<Self> {
        match suffix {
            "assign" => Some(Self::Assign),
            "append" => Some(Self::Append),
            "prepend" => Some(Self::Prepend),
            "regex" => Some(Self::Regex),
            "delete" => Some(Self::Delete),
            "rename" => Some(Self::Rename),
            _ => None,
        }
    }
}

/// Compiled header of one directive block.
#[derive(Debug, Default)]
struct DirectiveHeader {
    table: String,
    field: String,
    value_column: usize,
    operations: Vec<(usize, String, OperationKind)>,
    comparison_column: Option<usize>,
    unique_column: Option<usize>,
    required_column: Option<usize>,
}

fn is_truthy(cell: &str) -> bool {
    matches!(
        cell.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "x"
    )
}

/// Split `#table.field.suffix`.
fn split_directive_tag(tag: &str) -> Option<(&str, &str, &str)> {
    let body = tag.strip_prefix('#')?;
    let (table, rest) = body.split_once('.')?;
    let (field, suffix) = rest.rsplit_once('.')?;
    if table.is_empty() || field.is_empty() {
        return None;
    }
    Some((table, field, suffix))
}

fn compile_directive_header(sheet: &Worksheet, row: usize) -> DirectiveResult<DirectiveHeader> {
    let mut header = DirectiveHeader::default();
    let mut value_seen = false;
    let width = sheet.rows.get(row).map_or(0, Vec::len);

    for column in 1..width {
        let location = sheet.location(row, column);
        let tokens = tokenize(sheet.cell(row, column)).map_err(|e| TagError::grammar(location.clone(), e.to_string()))?;
        let tag = match tokens.as_slice() {
            [] => continue,
            [Token::Tag(tag)] => tag.as_str(),
            _ => return Err(TagError::grammar(location, "expected a single directive tag").into()),
        };

        match tag {
            "#comparison" => header.comparison_column = Some(column),
            "#unique" => header.unique_column = Some(column),
            "#required" => header.required_column = Some(column),
            _ => {
                let (table, field, suffix) = split_directive_tag(tag)
                    .ok_or_else(|| TagError::grammar(location.clone(), format!("'{}' is not a directive tag", tag)))?;
                if value_seen && table != header.table {
                    return Err(TagError::structure(
                        location,
                        format!("'{}' names table '{}' but the value column uses '{}'", tag, table, header.table),
                    )
                    .into());
                }
                if suffix == "value" {
                    if value_seen {
                        return Err(TagError::structure(location, "more than one '.value' column").into());
                    }
                    value_seen = true;
                    header.table = table.to_string();
                    header.field = field.to_string();
                    header.value_column = column;
                } else {
                    let kind = OperationKind::parse(suffix).ok_or_else(|| {
                        TagError::grammar(location.clone(), format!("unknown directive operation '.{}'", suffix))
                    })?;
                    header.operations.push((column, format!("{}.{}", table, field), kind));
                }
            }
        }
    }

    if !value_seen {
        return Err(TagError::structure(sheet.location(row, 0), "directive header has no '.value' column").into());
    }
    let table_prefix = format!("{}.", header.table);
    for (column, target, _) in &mut header.operations {
        match target.strip_prefix(&table_prefix) {
            Some(field) => *target = field.to_string(),
            None => {
                return Err(TagError::structure(
                    sheet.location(row, *column),
                    format!("operation on '{}' does not name table '{}'", target, header.table),
                )
                .into())
            }
        }
    }
    Ok(header)
}

/// Parse a `.regex` cell: two literals separated by a comma.
fn regex_pair(cell: &str, field: &str, location: &Location) -> DirectiveResult<Vec<String>> {
    let malformed = |message: String| DirectiveError::MalformedRegexPair {
        field: field.to_string(),
        message: format!("{} at {}", message, location),
    };
    let tokens = tokenize(cell).map_err(|e| malformed(e.to_string()))?;
    match tokens.as_slice() {
        [Token::Literal(p) | Token::Regex(p), Token::Comma, Token::Literal(r) | Token::Regex(r)] => {
            Ok(vec![p.clone(), r.clone()])
        }
        _ => Err(malformed(format!("expected '\"pattern\", \"replacement\"', found '{}'", cell))),
    }
}

fn apply_operation(
    operations: &mut OperationSet,
    kind: OperationKind,
    target: &str,
    cell: &str,
    location: &Location,
) -> DirectiveResult<()> {
    let target = target.to_string();
    match kind {
        OperationKind::Assign => {
            operations.assign.insert(target, FieldValue::scalar(cell));
        }
        OperationKind::Append => {
            operations.append.insert(target, FieldValue::scalar(cell));
        }
        OperationKind::Prepend => {
            operations.prepend.insert(target, FieldValue::scalar(cell));
        }
        OperationKind::Regex => {
            let pair = regex_pair(cell, &target, location)?;
            operations.regex.insert(target, pair);
        }
        OperationKind::Delete => {
            if is_truthy(cell) {
                operations.delete.push(target);
            }
        }
        OperationKind::Rename => {
            operations.rename.insert(target, cell.to_string());
        }
    }
    Ok(())
}

/// Compile every directive block of `sheet`.
pub fn compile_conversion_sheet(sheet: &Worksheet) -> DirectiveResult<ConversionDirectives> {
    let mut directives = ConversionDirectives::new();
    let mut header: Option<DirectiveHeader> = None;

    for (index, row) in sheet.rows.iter().enumerate() {
        if is_tags_row(row) {
            header = Some(compile_directive_header(sheet, index)?);
            continue;
        }
        if is_ignore_row(row) {
            continue;
        }
        if is_blank_row(row) {
            header = None;
            continue;
        }
        let Some(header) = &header else {
            continue;
        };

        let key = sheet.cell(index, header.value_column).trim();
        if key.is_empty() {
            continue;
        }

        let kind_cell = header.comparison_column.map_or("", |c| sheet.cell(index, c));
        let kind = MatchKind::parse(kind_cell).ok_or_else(|| {
            DirectiveError::from(TagError::structure(
                sheet.location(index, header.comparison_column.unwrap_or(0)),
                format!("unknown comparison '{}'", kind_cell.trim()),
            ))
        })?;
        let unique = header.unique_column.is_some_and(|c| is_truthy(sheet.cell(index, c)));
        let comparison = Comparison::new(kind, unique);

        let mut operations = OperationSet {
            required: header.required_column.is_some_and(|c| is_truthy(sheet.cell(index, c))),
            ..OperationSet::default()
        };
        for (column, target, kind) in &header.operations {
            let cell = sheet.cell(index, *column).trim();
            if !cell.is_empty() {
                apply_operation(&mut operations, *kind, target, cell, &sheet.location(index, *column))?;
            }
        }

        directives
            .entry(header.table.clone())
            .or_default()
            .entry(header.field.clone())
            .or_default()
            .entry(comparison)
            .or_default()
            .insert(key.to_string(), operations);
    }

    tracing::debug!(
        "{}:{}: compiled conversion directives for {} table(s)",
        sheet.source,
        sheet.name,
        directives.len()
    );
    Ok(directives)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: &[&[&str]]) -> Worksheet {
        Worksheet::from_rows("directives.csv", "directives", rows.iter().map(|r| r.to_vec()))
    }

    #[test]
    fn test_compile_sheet() {
        let directives = compile_conversion_sheet(&sheet(&[
            &[
                "#tags",
                "#protocol.name.value",
                "#protocol.id.assign",
                "#protocol.name.regex",
                "#protocol.notes.delete",
                "#comparison",
                "#unique",
            ],
            &["#ignore", "Name", "New id", "Fix", "Drop notes", "How", "Once"],
            &["", "extraction", "P-EXT", r#""^ext", "EXT""#, "yes", "exact", "true"],
            &["", "wash", "P-W", "", "", "levenshtein", ""],
        ]))
        .unwrap();

        let by_comparison = &directives["protocol"]["name"];
        let extraction = &by_comparison[&Comparison::ExactUnique]["extraction"];
        assert_eq!(extraction.assign["id"], FieldValue::scalar("P-EXT"));
        assert_eq!(extraction.regex["name"], ["^ext", "EXT"]);
        assert_eq!(extraction.delete, ["notes"]);

        let wash = &by_comparison[&Comparison::Levenshtein]["wash"];
        assert_eq!(wash.assign["id"], FieldValue::scalar("P-W"));
        assert!(wash.regex.is_empty());
    }

    #[test]
    fn test_operations_must_share_the_value_table() {
        let err = compile_conversion_sheet(&sheet(&[
            &["#tags", "#protocol.name.value", "#sample.id.assign"],
            &["", "a", "b"],
        ]))
        .unwrap_err();
        assert!(matches!(err, DirectiveError::Tag(TagError::Structure { .. })));
    }

    #[test]
    fn test_malformed_regex_pair() {
        let err = compile_conversion_sheet(&sheet(&[
            &["#tags", "#protocol.name.value", "#protocol.name.regex"],
            &["", "a", r#""only one""#],
        ]))
        .unwrap_err();
        assert!(matches!(err, DirectiveError::MalformedRegexPair { .. }));
    }

    #[test]
    fn test_missing_value_column() {
        assert!(compile_conversion_sheet(&sheet(&[&["#tags", "#protocol.id.assign"]])).is_err());
    }
}
