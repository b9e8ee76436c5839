//! CSV worksheet loading with encoding and delimiter auto-detection.
//!
//! Produces a raw [`Worksheet`] grid. Cells are kept verbatim (apart from the
//! CSV quoting), rows may be ragged and blank rows are preserved since they
//! close tag scopes.

use std::path::Path;

use crate::error::{SourceError, SourceResult};
use crate::sheet::Worksheet;

/// A source reference: `path` or `path:sheet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub path: String,
    pub sheet: Option<String>,
}

impl SourceSpec {
    /// Split an optional `:sheet` suffix off `spec`.
    ///
    /// The suffix is only taken when the path part names an existing file,
    /// so Windows drive letters and odd file names survive.
    pub fn parse(spec: &str) -> Self {
        if let Some((path, sheet)) = spec.rsplit_once(':') {
            if !sheet.is_empty() && !sheet.contains(|c| c == '/' || c == '\\') && Path::new(path).is_file() {
                return Self {
                    path: path.to_string(),
                    sheet: Some(sheet.to_string()),
                };
            }
        }
        Self {
            path: spec.to_string(),
            sheet: None,
        }
    }
}

/// Result of loading with detection metadata
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub worksheet: Worksheet,
    /// Detected encoding
    pub encoding: String,
    /// Detected delimiter
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let text = match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text)
}

/// Detect the delimiter by counting unquoted occurrences in the first line.
///
/// Ties (including a single-column file) fall back to `,`.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut counts = [0usize; 4];
    let mut quoted = false;
    for c in first_line.chars() {
        if c == '"' {
            quoted = !quoted;
        } else if !quoted {
            if let Some(i) = separators.iter().position(|&s| s == c) {
                counts[i] += 1;
            }
        }
    }

    let mut best_sep = ',';
    let mut best_count = 0;
    for (&sep, &count) in separators.iter().zip(&counts) {
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }
    best_sep
}

/// Split `content` into one slice per CSV record, keeping line breaks that
/// sit inside quoted fields. Each entry carries its 1-based starting line.
fn record_lines(content: &str, delimiter: char) -> Vec<(usize, &str)> {
    #[derive(Clone, Copy)]
    enum State {
        Field { at_start: bool },
        Quoted,
        QuoteInQuoted,
    }

    let mut lines = Vec::new();
    let mut state = State::Field { at_start: true };
    let mut start = 0;
    let mut first_line = 1;
    let mut line = 1;

    for (i, c) in content.char_indices() {
        state = match (state, c) {
            (State::Quoted, '\n') => {
                line += 1;
                State::Quoted
            }
            (State::Quoted, '"') => State::QuoteInQuoted,
            (State::Quoted, _) => State::Quoted,
            (State::QuoteInQuoted, '"') => State::Quoted,
            (State::Field { at_start: true }, '"') => State::Quoted,
            (_, '\n') => {
                lines.push((first_line, content[start..i].trim_end_matches('\r')));
                start = i + 1;
                line += 1;
                first_line = line;
                State::Field { at_start: true }
            }
            (_, c) => State::Field {
                at_start: c == delimiter,
            },
        };
    }
    if start < content.len() {
        lines.push((first_line, content[start..].trim_end_matches('\r')));
    }
    lines
}

/// Parse CSV text into a worksheet grid.
pub fn parse_worksheet(content: &str, delimiter: char, source: &str, name: &str) -> SourceResult<Worksheet> {
    let delimiter_byte = u8::try_from(delimiter).map_err(|_| SourceError::Csv {
        path: source.to_string(),
        line: 0,
        message: format!("delimiter '{}' is not a single byte", delimiter),
    })?;

    // The csv reader skips empty lines, but blank rows close tag scopes:
    // only non-blank records go through the reader, blanks are kept here.
    let lines = record_lines(content, delimiter);
    let filled: Vec<&(usize, &str)> = lines.iter().filter(|(_, text)| !text.trim().is_empty()).collect();
    let body = filled.iter().map(|(_, text)| *text).collect::<Vec<_>>().join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter_byte)
        .from_reader(body.as_bytes());

    let mut records = Vec::with_capacity(filled.len());
    for record in reader.records() {
        let record = record.map_err(|e| SourceError::Csv {
            path: source.to_string(),
            line: e
                .position()
                .and_then(|p| filled.get(p.record() as usize))
                .map_or(0, |entry| entry.0),
            message: e.to_string(),
        })?;
        records.push(record.iter().map(str::to_string).collect::<Vec<String>>());
    }

    let mut records = records.into_iter();
    let rows = lines
        .iter()
        .map(|(_, text)| {
            if text.trim().is_empty() {
                Vec::new()
            } else {
                records.next().unwrap_or_default()
            }
        })
        .collect();

    Ok(Worksheet::new(source, name, rows))
}

/// Load CSV bytes with auto-detection of encoding and delimiter.
pub fn load_bytes_auto(bytes: &[u8], source: &str, name: &str) -> SourceResult<LoadResult> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(SourceError::EmptyFile(source.to_string()));
    }

    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = if source.ends_with(".tsv") {
        '\t'
    } else {
        detect_delimiter(&content)
    };

    let worksheet = parse_worksheet(&content, delimiter, source, name)?;
    tracing::debug!(
        "Loaded '{}' ({} rows, encoding {}, delimiter {:?})",
        source,
        worksheet.rows.len(),
        encoding,
        delimiter
    );
    Ok(LoadResult {
        worksheet,
        encoding,
        delimiter,
    })
}

/// Load a worksheet from `path` or `path:sheet`.
///
/// The sheet name defaults to the file stem.
pub fn load_worksheet(spec: &str) -> SourceResult<Worksheet> {
    let spec = SourceSpec::parse(spec);
    let path = Path::new(&spec.path);

    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) {
        Some(ext) if ext == "csv" || ext == "tsv" || ext == "txt" => {}
        Some(ext) => return Err(SourceError::Unsupported(format!("'.{}' ({})", ext, spec.path))),
        None => return Err(SourceError::Unsupported(spec.path.clone())),
    }

    let bytes = std::fs::read(path).map_err(|source| SourceError::Io {
        path: spec.path.clone(),
        source,
    })?;
    let name = spec.sheet.clone().unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| spec.path.clone())
    });

    Ok(load_bytes_auto(&bytes, &spec.path, &name)?.worksheet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ExtractionStore, TableHierarchy};
    use crate::tags::materialize_sheet;
    use std::io::Write;

    #[test]
    fn test_parse_keeps_blank_and_ragged_rows() {
        let csv = "#tags,#sample.id\n,S1,extra\n\n,S2";
        let sheet = parse_worksheet(csv, ',', "a.csv", "a").unwrap();
        assert_eq!(sheet.rows.len(), 4);
        assert_eq!(sheet.rows[1], ["", "S1", "extra"]);
        assert_eq!(sheet.cell(3, 1), "S2");
        assert_eq!(sheet.cell(2, 1), "");
    }

    #[test]
    fn test_blank_line_closes_tag_scope() {
        let sheet = parse_worksheet("#tags,#sample.id\r\n,S1\r\n\r\n,outside\r\n", ',', "a.csv", "a").unwrap();
        assert_eq!(sheet.rows.len(), 4);
        assert!(sheet.rows[2].is_empty());

        let mut store = ExtractionStore::new();
        materialize_sheet(&sheet, &mut store, &TableHierarchy::default()).unwrap();
        assert!(store.record("sample", "S1").is_some());
        assert!(store.record("sample", "outside").is_none());
    }

    #[test]
    fn test_quoted_line_breaks_stay_in_their_cell() {
        let csv = "#tags,#sample.id,#sample.note\n,S1,\"first\n\nsecond\"\n\n,S2,\"a \"\"b\"\"\"";
        let sheet = parse_worksheet(csv, ',', "a.csv", "a").unwrap();
        assert_eq!(sheet.rows.len(), 4);
        assert_eq!(sheet.cell(1, 2), "first\n\nsecond");
        assert!(sheet.rows[2].is_empty());
        assert_eq!(sheet.cell(3, 2), "a \"b\"");
    }

    #[test]
    fn test_quoted_tag_cells() {
        let csv = "#tags;\"#sample.id=#subject.id+\"\"-\"\"\"\n;x";
        let sheet = parse_worksheet(csv, ';', "a.csv", "a").unwrap();
        assert_eq!(sheet.cell(0, 1), r#"#sample.id=#subject.id+"-""#);
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc"), '\t');
        assert_eq!(detect_delimiter("a|b|c"), '|');
        assert_eq!(detect_delimiter("\"x;y;z\",b"), ',');
        assert_eq!(detect_delimiter("single"), ',');
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Société");
    }

    #[test]
    fn test_empty_source_rejected() {
        assert!(matches!(
            load_bytes_auto(b"  \n", "empty.csv", "empty"),
            Err(SourceError::EmptyFile(_))
        ));
    }

    #[test]
    fn test_load_worksheet_from_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "#tags,#sample.id,#sample.name").unwrap();
        writeln!(file, ",S1,first").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let sheet = load_worksheet(&path).unwrap();
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.source, path);

        let named = load_worksheet(&format!("{}:samples", path)).unwrap();
        assert_eq!(named.name, "samples");
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(load_worksheet("book.xlsx"), Err(SourceError::Unsupported(_))));
    }
}
