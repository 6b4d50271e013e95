//! CSV decoder for uploaded traffic files.

use std::borrow::Cow;

use csv::{ReaderBuilder, StringRecord, Trim};

/// Header names and untyped rows of one upload.
#[derive(Debug, Clone, Default)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
}

impl ParsedCsv {
    /// Index of the column called `name`, if present.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Decodes upload bytes as UTF-8 (BOM stripped), falling back to Latin-1.
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text.strip_prefix('\u{feff}').unwrap_or(text)),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Reads a CSV upload into headers and rows.
///
/// Rows may be ragged; missing trailing cells are treated as empty by the
/// validator.
///
/// # Errors
///
/// Returns an error if the bytes are not readable as CSV.
pub fn parse_csv(bytes: &[u8]) -> Result<ParsedCsv, csv::Error> {
    let text = decode_text(bytes);
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for result in reader.records() {
        rows.push(result?);
    }

    Ok(ParsedCsv { headers, rows })
}
