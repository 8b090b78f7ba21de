use std::fs;
use std::str::FromStr;

use strum_macros::EnumString;

use crate::IndexMap;
use crate::errors::SyntaxError;
use crate::tokens::TokenStream;

/// Format presets selectable via `WITH <fmt> FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Format {
    Csv,
    Json,
    Psv,
    Tsv,
}

/// Format/IO configuration attached to a source or sink. A plain value
/// aggregate: every field is optional so an unset field can be overridden by
/// a later clause or an extension-derived preset. Merging is field-wise with
/// the right side winning when set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints {
    pub append: Option<bool>,
    pub delimiter: Option<String>,
    pub headers: Option<bool>,
    pub gzip: Option<bool>,
    pub quoted_numbers: Option<bool>,
    pub quoted_text: Option<bool>,
    pub is_json: Option<bool>,
    pub avro_schema: Option<String>,
    pub properties: Option<IndexMap<String, String>>,
    pub json_path: Option<String>,
}

impl Hints {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply a format preset. Idempotent: applying the same format twice
    /// leaves the hints unchanged.
    pub fn using_format(mut self, format: Format) -> Self {
        match format {
            Format::Csv => self.delimited_preset(","),
            Format::Tsv => self.delimited_preset("\t"),
            Format::Psv => self.delimited_preset("|"),
            Format::Json => self.is_json = Some(true),
        }
        self
    }

    fn delimited_preset(&mut self, delimiter: &str) {
        self.delimiter = Some(delimiter.to_string());
        self.headers = Some(true);
        self.quoted_text = Some(true);
        self.quoted_numbers = Some(false);
    }

    /// Field-wise merge; fields set in `other` win.
    pub fn merge(mut self, other: &Hints) -> Self {
        fn over<T: Clone>(lhs: &mut Option<T>, rhs: &Option<T>) {
            if rhs.is_some() {
                *lhs = rhs.clone();
            }
        }
        over(&mut self.append, &other.append);
        over(&mut self.delimiter, &other.delimiter);
        over(&mut self.headers, &other.headers);
        over(&mut self.gzip, &other.gzip);
        over(&mut self.quoted_numbers, &other.quoted_numbers);
        over(&mut self.quoted_text, &other.quoted_text);
        over(&mut self.is_json, &other.is_json);
        over(&mut self.avro_schema, &other.avro_schema);
        over(&mut self.properties, &other.properties);
        over(&mut self.json_path, &other.json_path);
        self
    }

    pub fn with_append(mut self, append: bool) -> Self {
        self.append = Some(append);
        self
    }

    /// Parse one or more `WITH …` clauses. At least one clause is required;
    /// the caller wraps this in an optional tag when hints may be absent.
    /// Later clauses override earlier ones field-by-field.
    pub fn parse_with(ts: &mut TokenStream) -> Result<Hints, SyntaxError> {
        if !ts.is("WITH") {
            return Err(SyntaxError::expected("WITH", ts.peek()));
        }

        let mut hints = Hints::default();
        while ts.next_if("WITH") {
            hints = hints.parse_clause(ts)?;
        }
        Ok(hints)
    }

    fn parse_clause(mut self, ts: &mut TokenStream) -> Result<Hints, SyntaxError> {
        if ts.next_if("AVRO") {
            let path = expect_atom(ts, "a schema path")?;
            self.avro_schema = Some(read_aux_file(ts, &path, "Avro schema")?);
        } else if ts.next_if("GZIP") {
            ts.expect("COMPRESSION")?;
            self.gzip = Some(true);
        } else if ts.next_if("DELIMITER") {
            self.delimiter = Some(expect_atom(ts, "a delimiter")?);
        } else if ts.next_if("COLUMN") {
            ts.expect("HEADERS")?;
            self.headers = Some(true);
        } else if ts.next_if("PROPERTIES") {
            let path = expect_atom(ts, "a properties path")?;
            let text = read_aux_file(ts, &path, "properties file")?;
            self.properties = Some(parse_properties(&text));
        } else if ts.next_if("QUOTED") {
            if ts.next_if("NUMBERS") {
                self.quoted_numbers = Some(true);
            } else if ts.next_if("TEXT") {
                self.quoted_text = Some(true);
            } else {
                return Err(SyntaxError::expected("NUMBERS or TEXT", ts.peek()));
            }
        } else if let Some(format) = peek_format(ts) {
            ts.next()?;
            ts.expect("FORMAT")?;
            self = self.using_format(format);
        } else {
            return Err(SyntaxError::expected("a hint clause after WITH", ts.peek()));
        }
        Ok(self)
    }
}

fn peek_format(ts: &TokenStream) -> Option<Format> {
    let token = ts.peek()?;
    Format::from_str(token.text()).ok()
}

fn expect_atom(ts: &mut TokenStream, what: &str) -> Result<String, SyntaxError> {
    match ts.peek() {
        Some(token) if token.is_ident() || token.is_quoted() => {
            Ok(ts.next()?.text.to_string())
        }
        other => Err(SyntaxError::expected(what, other)),
    }
}

fn read_aux_file(ts: &TokenStream, path: &str, what: &str) -> Result<String, SyntaxError> {
    fs::read_to_string(path)
        .map_err(|e| ts.syntax_error(format!("Cannot read {what} '{path}': {e}")))
}

/// `key=value` lines; blank lines and `#` comments are ignored.
fn parse_properties(text: &str) -> IndexMap<String, String> {
    let mut properties = IndexMap::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            properties.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    properties
}
