//! In-memory worksheet: a ragged grid of string cells.

use crate::error::Location;
use crate::tags::lexer::leading_bare;

/// Marker in column 0 opening a header row.
pub const TAGS_MARKER: &str = "#tags";

/// Marker in column 0 for rows the materializer skips.
pub const IGNORE_MARKER: &str = "#ignore";

/// One sheet of a tagged source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Worksheet {
    /// File the sheet was read from.
    pub source: String,
    /// Sheet name.
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl Worksheet {
    pub fn new(source: impl Into<String>, name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            rows,
        }
    }

    /// Build a sheet from string slices (handy for tests and embedded sheets).
    pub fn from_rows<R, C>(source: &str, name: &str, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self::new(
            source,
            name,
            rows.into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        )
    }

    /// Cell text, or `""` outside the grid.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Widest row length.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn location(&self, row: usize, column: usize) -> Location {
        Location::new(self.source.clone(), self.name.clone(), row, column)
    }

    /// Pad every row with empty cells up to `width`.
    pub fn pad_to(&mut self, width: usize) {
        for row in &mut self.rows {
            if row.len() < width {
                row.resize(width, String::new());
            }
        }
    }
}

/// True if every cell of the row is empty after trimming.
pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// True if column 0 opens a header row.
pub fn is_tags_row(row: &[String]) -> bool {
    row.first()
        .map(|cell| leading_bare(cell) == TAGS_MARKER)
        .unwrap_or(false)
}

/// True if column 0 marks the row as ignored.
pub fn is_ignore_row(row: &[String]) -> bool {
    row.first()
        .map(|cell| leading_bare(cell) == IGNORE_MARKER)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_outside_grid_is_empty() {
        let sheet = Worksheet::from_rows("f.csv", "f", [vec!["a", "b"], vec!["c"]]);
        assert_eq!(sheet.cell(0, 1), "b");
        assert_eq!(sheet.cell(1, 1), "");
        assert_eq!(sheet.cell(9, 0), "");
        assert_eq!(sheet.width(), 2);
    }

    #[test]
    fn test_row_markers() {
        let tags: Vec<String> = vec!["#tags".into(), "#sample.id".into()];
        let tags_with_globals: Vec<String> = vec!["#tags #sample.type=\"tissue\"".into()];
        let tags_with_separator: Vec<String> = vec!["#tags;#sample.type=\"tissue\"".into()];
        let not_tags: Vec<String> = vec!["#tagsheet".into()];
        let ignore: Vec<String> = vec![" #ignore".into(), "x".into()];
        let blank: Vec<String> = vec!["".into(), "  ".into()];
        assert!(is_tags_row(&tags));
        assert!(is_tags_row(&tags_with_globals));
        assert!(is_tags_row(&tags_with_separator));
        assert!(!is_tags_row(&not_tags));
        assert!(is_ignore_row(&ignore));
        assert!(is_blank_row(&blank));
        assert!(!is_blank_row(&tags));
    }
}
