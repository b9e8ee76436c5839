//! Tokenizer for tag cells.
//!
//! A cell is split on the operators `* = + ; ,`, on whitespace, and around
//! quoted literals. Three token shapes depend on what starts them:
//!
//! - `#…` at a token boundary is a tag,
//! - `"…"` is a string literal (`\"` and `\\` escapes),
//! - `r"…"` / `r'…'` at a token boundary is a raw regular-expression literal.
//!
//! Everything else is a bare word.

use std::fmt;

use thiserror::Error;

/// A lexical token of the tag language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `#tags`, `#sample.id`, `#%units`, … (text includes the leading `#`).
    Tag(String),
    /// Contents of a `"…"` literal.
    Literal(String),
    /// Contents of an `r"…"` or `r'…'` literal.
    Regex(String),
    /// Unquoted text that is not a tag.
    Word(String),
    Equals,
    Plus,
    Star,
    Semicolon,
    Comma,
}

impl Token {
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            Token::Equals | Token::Plus | Token::Star | Token::Semicolon | Token::Comma
        )
    }

    pub fn is_operand(&self) -> bool {
        matches!(
            self,
            Token::Tag(_) | Token::Literal(_) | Token::Regex(_) | Token::Word(_)
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Tag(t) | Token::Word(t) => f.write_str(t),
            Token::Literal(s) => write!(f, "\"{}\"", s),
            Token::Regex(s) => write!(f, "r\"{}\"", s),
            Token::Equals => f.write_str("="),
            Token::Plus => f.write_str("+"),
            Token::Star => f.write_str("*"),
            Token::Semicolon => f.write_str(";"),
            Token::Comma => f.write_str(","),
        }
    }
}

/// Lexing failure with the character offset inside the cell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at character {offset})")]
pub struct LexError {
    pub message: String,
    pub offset: usize,
}

fn operator(c: char) -> Option<Token> {
    match c {
        '=' => Some(Token::Equals),
        '+' => Some(Token::Plus),
        '*' => Some(Token::Star),
        ';' => Some(Token::Semicolon),
        ',' => Some(Token::Comma),
        _ => None,
    }
}

fn ends_bare(c: char) -> bool {
    c.is_whitespace() || c == '"' || operator(c).is_some()
}

/// Split one cell into tokens.
pub fn tokenize(cell: &str) -> Result<Vec<Token>, LexError> {
    let chars: Vec<char> = cell.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
        } else if let Some(op) = operator(c) {
            tokens.push(op);
            i += 1;
        } else if c == '"' {
            let (text, next) = read_quoted(&chars, i)?;
            tokens.push(Token::Literal(text));
            i = next;
        } else if c == 'r' && matches!(chars.get(i + 1), Some('"') | Some('\'')) {
            let (text, next) = read_raw(&chars, i + 1)?;
            tokens.push(Token::Regex(text));
            i = next;
        } else {
            let start = i;
            while i < chars.len() && !ends_bare(chars[i]) {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if text.starts_with('#') {
                tokens.push(Token::Tag(text));
            } else {
                tokens.push(Token::Word(text));
            }
        }
    }

    Ok(tokens)
}

/// The first bare token of a cell (a tag such as `#tags`, or a word), cut
/// where [`tokenize`] would end it. Empty when the cell starts with an
/// operator or a literal.
pub fn leading_bare(cell: &str) -> &str {
    let cell = cell.trim_start();
    let end = cell.find(ends_bare).unwrap_or(cell.len());
    &cell[..end]
}

/// Read a `"…"` literal starting at the opening quote.
fn read_quoted(chars: &[char], open: usize) -> Result<(String, usize), LexError> {
    let mut text = String::new();
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if matches!(chars.get(i + 1), Some('"') | Some('\\')) => {
                text.push(chars[i + 1]);
                i += 2;
            }
            '"' => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(LexError {
        message: "unterminated string literal".to_string(),
        offset: open,
    })
}

/// Read a raw literal; `open` points at its quote character.
fn read_raw(chars: &[char], open: usize) -> Result<(String, usize), LexError> {
    let quote = chars[open];
    match chars[open + 1..].iter().position(|&c| c == quote) {
        Some(len) => {
            let text = chars[open + 1..open + 1 + len].iter().collect();
            Ok((text, open + len + 2))
        }
        None => Err(LexError {
            message: "unterminated regular expression literal".to_string(),
            offset: open - 1,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(s: &str) -> Token {
        Token::Tag(s.to_string())
    }

    #[test]
    fn test_leading_bare_matches_first_token() {
        for cell in ["#tags", " #tags #sample.type=\"x\"", "#tags;#sample.type=\"x\"", "#tags,#a.b", "#ignore\tnote"] {
            let first = tokenize(cell).unwrap().into_iter().next().unwrap();
            assert_eq!(Token::Tag(leading_bare(cell).to_string()), first, "{}", cell);
        }
        assert_eq!(leading_bare("#tags \"unterminated"), "#tags");
        assert_eq!(leading_bare("=x"), "");
    }

    #[test]
    fn test_field_tag_and_attribute() {
        assert_eq!(
            tokenize("#sample.weight%units").unwrap(),
            vec![tag("#sample.weight%units")]
        );
        assert_eq!(tokenize("  #%units ").unwrap(), vec![tag("#%units")]);
    }

    #[test]
    fn test_assignment_tokens() {
        let tokens = tokenize(r##"#sample.id=#subject.id+"-"+#sample.number"##).unwrap();
        assert_eq!(
            tokens,
            vec![
                tag("#sample.id"),
                Token::Equals,
                tag("#subject.id"),
                Token::Plus,
                Token::Literal("-".to_string()),
                Token::Plus,
                tag("#sample.number"),
            ]
        );
    }

    #[test]
    fn test_table_directive_and_list_marker() {
        assert_eq!(
            tokenize("#table=sample; *#.protocol.id").unwrap(),
            vec![
                tag("#table"),
                Token::Equals,
                Token::Word("sample".to_string()),
                Token::Semicolon,
                Token::Star,
                tag("#.protocol.id"),
            ]
        );
    }

    #[test]
    fn test_regex_literal_only_at_token_start() {
        assert_eq!(
            tokenize(r#"r"^Sample\s+ID$""#).unwrap(),
            vec![Token::Regex(r"^Sample\s+ID$".to_string())]
        );
        assert_eq!(
            tokenize(r#"r'a"b'"#).unwrap(),
            vec![Token::Regex("a\"b".to_string())]
        );
        assert_eq!(
            tokenize(r#"bar"x""#).unwrap(),
            vec![Token::Word("bar".to_string()), Token::Literal("x".to_string())]
        );
    }

    #[test]
    fn test_quoted_literal_keeps_separators() {
        assert_eq!(
            tokenize(r#""a, b; c = \"d\"""#).unwrap(),
            vec![Token::Literal("a, b; c = \"d\"".to_string())]
        );
    }

    #[test]
    fn test_unterminated_literals() {
        assert!(tokenize("\"open").is_err());
        let err = tokenize("#x=r'open").unwrap_err();
        assert_eq!(err.offset, 3);
    }
}
