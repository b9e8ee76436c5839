//! Tagging-directive injector.
//!
//! Runs on a raw worksheet before materialization. A tagging group locates
//! untagged header rows by their header texts and injects, right below each
//! one, an `#ignore` row with the matched labels and a `#tags` row with the
//! group's tags. A header already tagged by an earlier group gets its pair
//! extended instead. The tagged values are copied (or computed) into new columns
//! appended to the right of the sheet, so existing cells are never moved.
//!
//! A description's `header` is one of:
//!
//! - literal text, matched case-insensitively (exact cell first, then substring),
//! - `r"pattern"` / `r'pattern'`, matched against each cell,
//! - an expression with `#header#` placeholders, computed from the data row.

use regex::Regex;

use crate::diagnostics::Diagnostics;
use crate::directives::{HeaderTagDescription, TaggingGroup};
use crate::error::TaggingError;
use crate::expression::Expression;
use crate::sheet::{is_blank_row, is_ignore_row, is_tags_row, Worksheet, IGNORE_MARKER, TAGS_MARKER};
use crate::store::{FieldValue, Record};

// =============================================================================
// Header tests
// =============================================================================

#[derive(Debug, Clone)]
enum HeaderTest {
    /// Lowercased literal text
    Literal(String),
    Pattern(Regex),
    Computed(Expression),
}

impl HeaderTest {
    fn compile(text: &str) -> Result<Self, TaggingError> {
        let invalid = |message: String| TaggingError::InvalidDescription {
            description: text.to_string(),
            message,
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty header description".to_string()));
        }

        if let Some(pattern) = regex_literal(trimmed) {
            return Regex::new(pattern)
                .map(Self::Pattern)
                .map_err(|e| invalid(e.to_string()));
        }
        if trimmed.contains('#') {
            let expression = Expression::compile(trimmed).map_err(|e| invalid(e.to_string()))?;
            if expression.has_placeholders() {
                return Ok(Self::Computed(expression));
            }
        }
        Ok(Self::Literal(trimmed.to_lowercase()))
    }

    fn exact(&self, cell: &str) -> bool {
        let cell = cell.trim();
        match self {
            _ if cell.is_empty() => false,
            Self::Literal(text) => cell.to_lowercase() == *text,
            Self::Pattern(pattern) => pattern.is_match(cell),
            Self::Computed(_) => false,
        }
    }

    fn loose(&self, cell: &str) -> bool {
        match self {
            Self::Literal(text) => !cell.trim().is_empty() && cell.to_lowercase().contains(text.as_str()),
            _ => self.exact(cell),
        }
    }

    /// Whether any cell of `row` passes; computed tests need all their headers.
    fn matches_row(&self, row: &[String]) -> bool {
        match self {
            Self::Computed(expression) => expression.evaluate(&header_record(row)).is_ok(),
            _ => row.iter().any(|cell| self.loose(cell)),
        }
    }
}

fn regex_literal(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('r')?;
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    rest[1..].strip_suffix(quote)
}

/// Header texts of a row, each mapped to itself.
fn header_record(row: &[String]) -> Record {
    let mut record = Record::new();
    for cell in row.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
        record
            .entry(cell.to_string())
            .or_insert_with(|| FieldValue::scalar(cell));
    }
    record
}

/// Data row keyed by header text; empty cells are left out.
fn data_record(header: &[String], row: &[String]) -> Record {
    let mut record = Record::new();
    for (column, name) in header.iter().enumerate() {
        let name = name.trim();
        let value = row.get(column).map(|c| c.trim()).unwrap_or("");
        if name.is_empty() || value.is_empty() {
            continue;
        }
        record
            .entry(name.to_string())
            .or_insert_with(|| FieldValue::scalar(value));
    }
    record
}

// =============================================================================
// Blocks
// =============================================================================

struct CompiledDescription<'g> {
    description: &'g HeaderTagDescription,
    test: HeaderTest,
}

/// Where a matched description takes its value from.
#[derive(Debug, Clone, Copy)]
enum ValueSource<'d> {
    Column(usize),
    Computed(&'d Expression),
}

/// A matched header row and the data rows below it.
struct Block<'d> {
    header: usize,
    /// An `#ignore`/`#tags` pair already follows the header
    tagged: bool,
    /// First data row
    start: usize,
    /// First row after the block
    end: usize,
    sources: Vec<Option<ValueSource<'d>>>,
}

/// Match every description against `row`.
///
/// Returns `None` unless all required descriptions are found, each in its own
/// column, and at least one description matched.
fn match_header<'d>(descriptions: &'d [CompiledDescription<'_>], row: &[String]) -> Option<Vec<Option<ValueSource<'d>>>> {
    let mut taken = vec![false; row.len()];
    let header = header_record(row);
    let mut sources = Vec::with_capacity(descriptions.len());

    for d in descriptions {
        let source = match &d.test {
            HeaderTest::Computed(expression) => expression
                .evaluate(&header)
                .is_ok()
                .then_some(ValueSource::Computed(expression)),
            test => {
                let column = (0..row.len())
                    .find(|&c| !taken[c] && test.exact(&row[c]))
                    .or_else(|| (0..row.len()).find(|&c| !taken[c] && test.loose(&row[c])));
                if let Some(c) = column {
                    taken[c] = true;
                }
                column.map(ValueSource::Column)
            }
        };
        if source.is_none() && d.description.required {
            return None;
        }
        sources.push(source);
    }

    sources.iter().any(Option::is_some).then_some(sources)
}

fn block_end(sheet: &Worksheet, start: usize) -> usize {
    (start..sheet.rows.len())
        .find(|&r| is_blank_row(&sheet.rows[r]) || is_tags_row(&sheet.rows[r]))
        .unwrap_or(sheet.rows.len())
}

/// Header rows outside existing tagged scopes, top to bottom.
fn find_blocks<'d>(
    sheet: &Worksheet,
    descriptions: &'d [CompiledDescription<'_>],
    exclusion: Option<&HeaderTest>,
) -> Vec<Block<'d>> {
    let mut blocks = Vec::new();
    let mut in_scope = false;
    let mut row = 0;

    while row < sheet.rows.len() {
        let cells = &sheet.rows[row];
        if is_tags_row(cells) {
            in_scope = true;
        } else if is_blank_row(cells) {
            in_scope = false;
        } else if !in_scope && !is_ignore_row(cells) && !exclusion.is_some_and(|t| t.matches_row(cells)) {
            if let Some(sources) = match_header(descriptions, cells) {
                let tagged = row + 2 < sheet.rows.len()
                    && is_ignore_row(&sheet.rows[row + 1])
                    && is_tags_row(&sheet.rows[row + 2]);
                let start = if tagged { row + 3 } else { row + 1 };
                let end = block_end(sheet, start);
                blocks.push(Block {
                    header: row,
                    tagged,
                    start,
                    end,
                    sources,
                });
                row = end;
                continue;
            }
        }
        row += 1;
    }
    blocks
}

// =============================================================================
// Injection
// =============================================================================

/// What a tagging run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggingSummary {
    pub headers_tagged: usize,
    pub columns_added: usize,
    pub rows_inserted: usize,
}

impl TaggingSummary {
    pub fn summary(&self) -> String {
        format!(
            "Tagged: {} headers, {} columns added, {} rows inserted",
            self.headers_tagged, self.columns_added, self.rows_inserted
        )
    }
}

/// Apply every tagging group to `sheet`, in order.
pub fn apply_tagging(
    sheet: &mut Worksheet,
    groups: &[TaggingGroup],
    diagnostics: &mut Diagnostics,
) -> Result<TaggingSummary, TaggingError> {
    let mut summary = TaggingSummary::default();

    for (index, group) in groups.iter().enumerate() {
        if group.header_tag_descriptions.is_empty() {
            summary.rows_inserted += insert_static(sheet, group);
            continue;
        }

        let descriptions = group
            .header_tag_descriptions
            .iter()
            .map(|description| {
                Ok(CompiledDescription {
                    description,
                    test: HeaderTest::compile(&description.header)?,
                })
            })
            .collect::<Result<Vec<_>, TaggingError>>()?;
        let exclusion = group.exclusion_test.as_deref().map(HeaderTest::compile).transpose()?;

        let blocks = find_blocks(sheet, &descriptions, exclusion.as_ref());
        if blocks.is_empty() {
            diagnostics.warn(format!(
                "Tagging group {} matched no header in {}:{}",
                index + 1,
                sheet.source,
                sheet.name
            ));
            continue;
        }

        let first_column = sheet.width();
        summary.columns_added += descriptions.len();
        summary.headers_tagged += blocks.len();

        for (position, block) in blocks.iter().enumerate().rev() {
            summary.rows_inserted += tag_block(sheet, block, &descriptions, first_column, diagnostics)?;
            if !group.insert.is_empty() && (group.insert_multiple || position == 0) {
                summary.rows_inserted += splice(sheet, block.header, &group.insert);
            }
        }
    }

    if summary != TaggingSummary::default() {
        tracing::info!("{}:{}: {}", sheet.source, sheet.name, summary.summary());
    }
    Ok(summary)
}

/// Fill the new columns of a block and label them in its `#ignore`/`#tags`
/// rows, inserting that pair unless an earlier group already did.
///
/// Returns the number of rows inserted.
fn tag_block(
    sheet: &mut Worksheet,
    block: &Block<'_>,
    descriptions: &[CompiledDescription<'_>],
    first_column: usize,
    diagnostics: &mut Diagnostics,
) -> Result<usize, TaggingError> {
    let width = first_column + descriptions.len();
    let header = sheet.rows[block.header].clone();

    for r in block.start..block.end {
        if is_ignore_row(&sheet.rows[r]) {
            continue;
        }
        let record = data_record(&header, &sheet.rows[r]);

        let mut values = Vec::with_capacity(descriptions.len());
        for (d, source) in descriptions.iter().zip(&block.sources) {
            let value = match source {
                None => String::new(),
                Some(ValueSource::Column(c)) => sheet.cell(r, *c).to_string(),
                Some(ValueSource::Computed(expression)) => match expression.evaluate(&record) {
                    Ok(value) => value.values().join(","),
                    Err(err) if d.description.required => {
                        return Err(TaggingError::RequiredFailed {
                            tag: d.description.tag.clone(),
                            sheet: sheet.name.clone(),
                            row: r + 1,
                            message: err.to_string(),
                        })
                    }
                    Err(err) => {
                        diagnostics.warn(format!(
                            "{}:{} row {}: '{}' left empty: {}",
                            sheet.source,
                            sheet.name,
                            r + 1,
                            d.description.tag,
                            err
                        ));
                        String::new()
                    }
                },
            };
            values.push(value);
        }

        let row = &mut sheet.rows[r];
        if row.len() < width {
            row.resize(width, String::new());
        }
        row[first_column..width].clone_from_slice(&values);
    }

    let (mut labels, mut tags) = if block.tagged {
        (sheet.rows[block.header + 1].clone(), sheet.rows[block.header + 2].clone())
    } else {
        (vec![IGNORE_MARKER.to_string()], vec![TAGS_MARKER.to_string()])
    };
    labels.resize(width.max(labels.len()), String::new());
    tags.resize(width.max(tags.len()), String::new());
    for (i, (d, source)) in descriptions.iter().zip(&block.sources).enumerate() {
        if source.is_some() {
            labels[first_column + i] = d.description.header.clone();
            tags[first_column + i] = d.description.tag.clone();
        }
    }

    if block.tagged {
        sheet.rows[block.header + 1] = labels;
        sheet.rows[block.header + 2] = tags;
        Ok(0)
    } else {
        sheet.rows.insert(block.header + 1, tags);
        sheet.rows.insert(block.header + 1, labels);
        Ok(2)
    }
}

/// Splice an insert-only group: at the top, or above every `#tags` row.
fn insert_static(sheet: &mut Worksheet, group: &TaggingGroup) -> usize {
    if group.insert.is_empty() {
        return 0;
    }
    let positions: Vec<usize> = if group.insert_multiple {
        (0..sheet.rows.len()).filter(|&r| is_tags_row(&sheet.rows[r])).collect()
    } else {
        vec![0]
    };
    positions
        .into_iter()
        .rev()
        .map(|at| splice(sheet, at, &group.insert))
        .sum()
}

fn splice(sheet: &mut Worksheet, at: usize, rows: &[Vec<String>]) -> usize {
    for (offset, row) in rows.iter().enumerate() {
        sheet.rows.insert(at + offset, row.clone());
    }
    rows.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ExtractionStore, TableHierarchy};
    use crate::tags::materialize_sheet;

    fn sheet(rows: &[&[&str]]) -> Worksheet {
        Worksheet::from_rows("raw.csv", "Sheet1", rows.iter().map(|r| r.to_vec()))
    }

    fn description(header: &str, tag: &str, required: bool) -> HeaderTagDescription {
        HeaderTagDescription {
            header: header.to_string(),
            tag: tag.to_string(),
            required,
        }
    }

    fn group(descriptions: Vec<HeaderTagDescription>) -> TaggingGroup {
        TaggingGroup {
            header_tag_descriptions: descriptions,
            ..TaggingGroup::default()
        }
    }

    #[test]
    fn test_literal_descriptions_tag_block() {
        let mut s = sheet(&[
            &["Sample Name", "Organ", "Notes"],
            &["S1", "liver", ""],
            &["S2", "kidney", "x"],
            &[""],
            &["after"],
        ]);
        let groups = [group(vec![
            description("sample name", "#sample.id", true),
            description("Organ", "#sample.organ", false),
        ])];
        let mut diagnostics = Diagnostics::new(true);
        let summary = apply_tagging(&mut s, &groups, &mut diagnostics).unwrap();

        assert_eq!(summary.headers_tagged, 1);
        assert_eq!(summary.rows_inserted, 2);
        assert_eq!(s.rows[1], ["#ignore", "", "", "sample name", "Organ"]);
        assert_eq!(s.rows[2], ["#tags", "", "", "#sample.id", "#sample.organ"]);
        assert_eq!(s.rows[3], ["S1", "liver", "", "S1", "liver"]);
        assert_eq!(s.rows[6], ["after"]);

        let mut store = ExtractionStore::new();
        materialize_sheet(&s, &mut store, &TableHierarchy::default()).unwrap();
        assert_eq!(
            store.record("sample", "S2").unwrap()["organ"],
            FieldValue::scalar("kidney")
        );
    }

    #[test]
    fn test_required_description_missing_skips_row() {
        let mut s = sheet(&[&["Organ"], &["liver"]]);
        let groups = [group(vec![
            description("Sample Name", "#sample.id", true),
            description("Organ", "#sample.organ", false),
        ])];
        let mut diagnostics = Diagnostics::new(true);
        let summary = apply_tagging(&mut s, &groups, &mut diagnostics).unwrap();
        assert_eq!(summary.headers_tagged, 0);
        assert_eq!(s.rows.len(), 2);
        assert_eq!(diagnostics.warnings().count(), 1);
    }

    #[test]
    fn test_matched_columns_are_distinct() {
        let raw = [description("Name", "#a.id", true), description("name", "#a.alias", true)];
        let descriptions: Vec<CompiledDescription> = raw
            .iter()
            .map(|d| CompiledDescription {
                description: d,
                test: HeaderTest::compile(&d.header).unwrap(),
            })
            .collect();

        let one = vec!["Name".to_string()];
        assert!(match_header(&descriptions, &one).is_none());

        // Exact match is preferred, the substring match takes the other column.
        let two = vec!["Full name".to_string(), "Name".to_string()];
        let sources = match_header(&descriptions, &two).unwrap();
        assert!(matches!(sources[0], Some(ValueSource::Column(1))));
        assert!(matches!(sources[1], Some(ValueSource::Column(0))));
    }

    #[test]
    fn test_regex_and_computed_descriptions() {
        let mut s = sheet(&[
            &["Subject", "Visit", "organ type"],
            &["A", "1", "liver"],
            &["B", "", "kidney"],
        ]);
        let groups = [group(vec![
            description("#Subject#-#Visit#", "#sample.id", false),
            description(r#"r"^organ""#, "#sample.organ", false),
        ])];
        let mut diagnostics = Diagnostics::new(true);
        apply_tagging(&mut s, &groups, &mut diagnostics).unwrap();

        assert_eq!(s.rows[1][3..], ["#Subject#-#Visit#", r#"r"^organ""#]);
        assert_eq!(s.rows[3][3..], ["A-1", "liver"]);
        // Visit is empty: the optional computed value is left blank.
        assert_eq!(s.rows[4][3..], ["", "kidney"]);
        assert!(diagnostics.warnings().any(|w| w.message.contains("left empty")));
    }

    #[test]
    fn test_required_computed_failure_is_an_error() {
        let mut s = sheet(&[&["Subject", "Visit"], &["B", ""]]);
        let groups = [group(vec![description("#Subject#-#Visit#", "#sample.id", true)])];
        let mut diagnostics = Diagnostics::new(true);
        assert!(matches!(
            apply_tagging(&mut s, &groups, &mut diagnostics),
            Err(TaggingError::RequiredFailed { row: 2, .. })
        ));
    }

    #[test]
    fn test_exclusion_and_existing_scopes() {
        let mut s = sheet(&[
            &["#tags", "#sample.id"],
            &["", "Sample"],
            &[""],
            &["Summary", "Sample"],
            &[""],
            &["Sample"],
            &["S9"],
        ]);
        let mut g = group(vec![description("Sample", "#sample.id", true)]);
        g.exclusion_test = Some("summary".to_string());
        let mut diagnostics = Diagnostics::new(true);
        let summary = apply_tagging(&mut s, &[g], &mut diagnostics).unwrap();

        assert_eq!(summary.headers_tagged, 1);
        assert_eq!(s.rows[6][0], "#ignore");
        assert_eq!(s.rows[7][0], "#tags");
        assert_eq!(s.rows[8], ["S9", "", "S9"]);
    }

    #[test]
    fn test_insert_rows() {
        let insert = vec![vec!["#tags".to_string(), "#project.id=\"P1\"".to_string()]];

        let mut s = sheet(&[&["a"], &["#tags", "#x.id"], &["1"], &[""], &["#tags", "#y.id"]]);
        let once = TaggingGroup {
            insert: insert.clone(),
            ..TaggingGroup::default()
        };
        let mut diagnostics = Diagnostics::new(true);
        apply_tagging(&mut s, &[once], &mut diagnostics).unwrap();
        assert_eq!(s.rows[0], insert[0]);
        assert_eq!(s.rows.len(), 6);

        let mut s = sheet(&[&["a"], &["#tags", "#x.id"], &["1"], &[""], &["#tags", "#y.id"]]);
        let multiple = TaggingGroup {
            insert: insert.clone(),
            insert_multiple: true,
            ..TaggingGroup::default()
        };
        let summary = apply_tagging(&mut s, &[multiple], &mut diagnostics).unwrap();
        assert_eq!(summary.rows_inserted, 2);
        assert_eq!(s.rows[1], insert[0]);
        assert_eq!(s.rows[5], insert[0]);
    }

    #[test]
    fn test_group_inserts_above_first_header_only() {
        let mut s = sheet(&[&["Sample"], &["S1"], &[""], &["Sample"], &["S2"]]);
        let g = TaggingGroup {
            header_tag_descriptions: vec![description("Sample", "#sample.id", true)],
            insert: vec![vec!["#ignore".to_string(), "generated".to_string()]],
            ..TaggingGroup::default()
        };
        let mut diagnostics = Diagnostics::new(true);
        let summary = apply_tagging(&mut s, &[g], &mut diagnostics).unwrap();
        assert_eq!(summary.headers_tagged, 2);
        assert_eq!(summary.rows_inserted, 5);
        assert_eq!(s.rows[0], ["#ignore", "generated"]);
        assert_eq!(s.rows[1], ["Sample"]);
        assert_eq!(s.rows[6], ["Sample"]);
    }

    #[test]
    fn test_second_group_extends_existing_tags_row() {
        let mut s = sheet(&[&["Sample", "Protocol"], &["S1", "P1"]]);
        let groups = [
            group(vec![description("Sample", "#sample.id", true)]),
            group(vec![description("Protocol", "#protocol.id", true)]),
        ];
        let mut diagnostics = Diagnostics::new(true);
        let summary = apply_tagging(&mut s, &groups, &mut diagnostics).unwrap();

        assert_eq!(summary.rows_inserted, 2);
        assert_eq!(s.rows.len(), 4);
        assert_eq!(s.rows[1], ["#ignore", "", "Sample", "Protocol"]);
        assert_eq!(s.rows[2], ["#tags", "", "#sample.id", "#protocol.id"]);
        assert_eq!(s.rows[3], ["S1", "P1", "S1", "P1"]);

        let mut store = ExtractionStore::new();
        materialize_sheet(&s, &mut store, &TableHierarchy::default()).unwrap();
        assert!(store.record("sample", "S1").is_some());
        assert!(store.record("protocol", "P1").is_some());
    }

    #[test]
    fn test_invalid_description() {
        assert!(matches!(
            HeaderTest::compile(r#"r"(""#),
            Err(TaggingError::InvalidDescription { .. })
        ));
        assert!(HeaderTest::compile("  ").is_err());
    }
}
