//! Field constructors: compiled recipes turning a worksheet row into a field value.

use crate::store::FieldValue;

/// A reference to a field declared elsewhere in the same header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub table: String,
    pub field: String,
    /// Column of the cell that used the reference (for error locations).
    pub used_at: usize,
}

/// One building block of a field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Fixed text.
    Literal(String),
    /// The trimmed text of a column in the current row.
    Column(usize),
    /// Another declared field; replaced by its column once the header is compiled.
    Field(FieldRef),
}

impl Operand {
    fn text<'r>(&'r self, row: &'r [String]) -> Option<&'r str> {
        match self {
            Operand::Literal(s) => Some(s.as_str()),
            Operand::Column(column) => row.get(*column).map(|cell| cell.trim()),
            Operand::Field(_) => None,
        }
    }
}

/// Compiled recipe for one field of a record.
///
/// The value is the concatenation of the operands. A plain column tag is a
/// single [`Operand::Column`]; an assignment (`=`) is any `+`-joined sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConstructor {
    /// Field name inside the record (own-table prefix already removed).
    pub name: String,
    pub operands: Vec<Operand>,
    /// List-valued (`*`) fields split their text and accumulate.
    pub list: bool,
    /// Column where the field was declared.
    pub column: usize,
}

impl FieldConstructor {
    pub fn column(name: impl Into<String>, column: usize, list: bool) -> Self {
        Self {
            name: name.into(),
            operands: vec![Operand::Column(column)],
            list,
            column,
        }
    }

    pub fn literal(name: impl Into<String>, value: impl Into<String>, column: usize) -> Self {
        Self {
            name: name.into(),
            operands: vec![Operand::Literal(value.into())],
            list: false,
            column,
        }
    }

    pub fn assigned(name: impl Into<String>, operands: Vec<Operand>, list: bool, column: usize) -> Self {
        Self {
            name: name.into(),
            operands,
            list,
            column,
        }
    }

    /// The column this field reads verbatim, if it is a plain column tag.
    pub fn source_column(&self) -> Option<usize> {
        match self.operands.as_slice() {
            [Operand::Column(column)] => Some(*column),
            _ => None,
        }
    }

    /// True if every operand is a literal.
    pub fn is_literal(&self) -> bool {
        self.operands.iter().all(|op| matches!(op, Operand::Literal(_)))
    }

    /// Evaluate against one row.
    ///
    /// Returns `None` when any column operand is empty, or when a list field
    /// yields no elements.
    pub fn evaluate(&self, row: &[String]) -> Option<FieldValue> {
        let mut text = String::new();
        for operand in &self.operands {
            let part = operand.text(row)?;
            if part.is_empty() && !matches!(operand, Operand::Literal(_)) {
                return None;
            }
            text.push_str(part);
        }

        if self.list {
            let items = split_list(&text);
            if items.is_empty() {
                None
            } else {
                Some(FieldValue::List(items))
            }
        } else if text.is_empty() {
            None
        } else {
            Some(FieldValue::Scalar(text))
        }
    }
}

/// Split list-field text on `;` if present, otherwise on `,`.
pub fn split_list(raw: &str) -> Vec<String> {
    let separator = if raw.contains(';') { ';' } else { ',' };
    raw.split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
