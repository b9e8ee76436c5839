//! Placeholder expressions evaluated against a record.
//!
//! An expression is plain text with embedded placeholders:
//!
//! - `#field#` substitutes the value of `field`,
//! - `#r"pattern"#` (or `#r'pattern'#`) substitutes the value of the single
//!   field whose name matches `pattern`.
//!
//! A `#` that does not open a placeholder is kept as text. Expressions are
//! compiled once and evaluated by substitution; nothing is executed.

use regex::Regex;

use crate::error::ExpressionError;
use crate::store::{FieldValue, Record};

/// A substitution point inside an expression.
#[derive(Debug, Clone)]
pub enum Placeholder {
    Field(String),
    FieldPattern(Regex),
}

/// One piece of a compiled expression.
#[derive(Debug, Clone)]
pub enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A compiled expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    segments: Vec<Segment>,
}

impl Expression {
    /// Compile `source`. Fails only on an invalid regex placeholder.
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        let chars: Vec<char> = source.chars().collect();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            if chars[i] != '#' {
                literal.push(chars[i]);
                i += 1;
                continue;
            }

            let placeholder = if chars.get(i + 1) == Some(&'r') && matches!(chars.get(i + 2), Some('"') | Some('\'')) {
                pattern_placeholder(source, &chars, i)?
            } else {
                field_placeholder(&chars, i)
            };

            match placeholder {
                Some((segment, next)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                    i = next;
                }
                None => {
                    literal.push('#');
                    i += 1;
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True if the expression contains at least one placeholder.
    pub fn has_placeholders(&self) -> bool {
        self.segments.iter().any(|s| !matches!(s, Segment::Literal(_)))
    }

    /// Names of the plain `#field#` placeholders, in order.
    pub fn field_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(Placeholder::Field(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Substitute placeholders with values from `record`.
    ///
    /// A lone placeholder yields the field value unchanged, lists included.
    /// Otherwise list values are joined with `,` before concatenation.
    pub fn evaluate(&self, record: &Record) -> Result<FieldValue, ExpressionError> {
        if let [Segment::Placeholder(placeholder)] = self.segments.as_slice() {
            return resolve(placeholder, record).cloned();
        }

        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => text.push_str(literal),
                Segment::Placeholder(placeholder) => {
                    text.push_str(&resolve(placeholder, record)?.values().join(","))
                }
            }
        }
        Ok(FieldValue::Scalar(text))
    }
}

fn resolve<'r>(placeholder: &Placeholder, record: &'r Record) -> Result<&'r FieldValue, ExpressionError> {
    match placeholder {
        Placeholder::Field(name) => record
            .get(name)
            .ok_or_else(|| ExpressionError::MissingField(name.clone())),
        Placeholder::FieldPattern(pattern) => {
            let matches: Vec<&String> = record.keys().filter(|k| pattern.is_match(k)).collect();
            match matches.as_slice() {
                [name] => Ok(&record[name.as_str()]),
                [] => Err(ExpressionError::NoFieldMatch(pattern.as_str().to_string())),
                _ => Err(ExpressionError::AmbiguousFieldMatch {
                    pattern: pattern.as_str().to_string(),
                    fields: matches.into_iter().cloned().collect(),
                }),
            }
        }
    }
}

/// `#name#` starting at `open`; `None` if it does not close on the same word.
fn field_placeholder(chars: &[char], open: usize) -> Option<(Segment, usize)> {
    let rest = &chars[open + 1..];
    let len = rest.iter().position(|&c| c == '#')?;
    let name: String = rest[..len].iter().collect();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return None;
    }
    Some((Segment::Placeholder(Placeholder::Field(name)), open + len + 2))
}

/// `#r"…"#` starting at `open`.
fn pattern_placeholder(
    source: &str,
    chars: &[char],
    open: usize,
) -> Result<Option<(Segment, usize)>, ExpressionError> {
    let quote = chars[open + 2];
    let body_start = open + 3;
    let Some(len) = chars[body_start..]
        .windows(2)
        .position(|w| w[0] == quote && w[1] == '#')
    else {
        return Ok(None);
    };
    let pattern: String = chars[body_start..body_start + len].iter().collect();
    let regex = Regex::new(&pattern).map_err(|e| ExpressionError::Malformed {
        expression: source.to_string(),
        message: e.to_string(),
    })?;
    Ok(Some((
        Segment::Placeholder(Placeholder::FieldPattern(regex)),
        body_start + len + 2,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, FieldValue)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_constant_expression() {
        let expr = Expression::compile("no placeholders # here").unwrap();
        assert!(!expr.has_placeholders());
        assert_eq!(
            expr.evaluate(&Record::new()).unwrap(),
            FieldValue::scalar("no placeholders # here")
        );
    }

    #[test]
    fn test_field_substitution() {
        let expr = Expression::compile("#subject.id#-#number#").unwrap();
        assert_eq!(expr.field_names(), ["subject.id", "number"]);
        let r = record(&[("subject.id", "SUB1".into()), ("number", "3".into())]);
        assert_eq!(expr.evaluate(&r).unwrap(), FieldValue::scalar("SUB1-3"));
    }

    #[test]
    fn test_lone_placeholder_keeps_list() {
        let r = record(&[("tags", FieldValue::list(["a", "b"]))]);
        assert_eq!(
            Expression::compile("#tags#").unwrap().evaluate(&r).unwrap(),
            FieldValue::list(["a", "b"])
        );
        assert_eq!(
            Expression::compile("[#tags#]").unwrap().evaluate(&r).unwrap(),
            FieldValue::scalar("[a,b]")
        );
    }

    #[test]
    fn test_pattern_placeholder() {
        let r = record(&[("weight%units", "mg".into()), ("weight", "5".into())]);
        let expr = Expression::compile(r##"#weight# #r"%units$"#"##).unwrap();
        assert_eq!(expr.evaluate(&r).unwrap(), FieldValue::scalar("5 mg"));

        let ambiguous = Expression::compile(r##"#r'^weight'#"##).unwrap();
        assert!(matches!(
            ambiguous.evaluate(&r),
            Err(ExpressionError::AmbiguousFieldMatch { .. })
        ));
        let none = Expression::compile(r##"#r"^height"#"##).unwrap();
        assert!(matches!(none.evaluate(&r), Err(ExpressionError::NoFieldMatch(_))));
    }

    #[test]
    fn test_missing_field_and_bad_pattern() {
        let expr = Expression::compile("#absent#").unwrap();
        assert_eq!(
            expr.evaluate(&Record::new()),
            Err(ExpressionError::MissingField("absent".to_string()))
        );
        assert!(matches!(
            Expression::compile(r##"#r"("#"##),
            Err(ExpressionError::Malformed { .. })
        ));
    }
}
