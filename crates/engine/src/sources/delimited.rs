use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use qwery_parser::Hints;
use smol_str::SmolStr;

use super::{InputSource, OutputSource};
use crate::devices::{InputDevice, OutputDevice, Record};
use crate::errors::{Phase, Result, RuntimeError};
use crate::rows::Row;
use crate::scope::Scope;
use crate::values::Value;

fn delimiter_byte(hints: &Hints) -> u8 {
    hints
        .delimiter
        .as_deref()
        .and_then(|d| d.bytes().next())
        .unwrap_or(b',')
}

/// RFC-4180 reader over line records: quoted cells may embed the delimiter,
/// doubled quotes escape. Headers come from the first non-empty line when
/// the hint asks for them, else columns are named `col0..colN`.
pub struct DelimitedInputSource {
    device: Box<dyn InputDevice>,
    delimiter: u8,
    expect_headers: bool,
    headers: Option<Vec<SmolStr>>,
}

impl DelimitedInputSource {
    pub fn new(device: Box<dyn InputDevice>, hints: &Hints) -> Self {
        Self {
            device,
            delimiter: delimiter_byte(hints),
            expect_headers: hints.headers.unwrap_or(false),
            headers: None,
        }
    }

    fn split(&self, record: &Record) -> Result<Vec<String>> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(record.bytes.as_slice());
        let mut cells = csv::StringRecord::new();
        match reader.read_record(&mut cells) {
            Ok(true) => Ok(cells.iter().map(str::to_string).collect()),
            Ok(false) => Ok(Vec::new()),
            Err(e) => Err(RuntimeError::with_cause(
                Phase::Read,
                format!("Malformed delimited record at offset {}", record.offset),
                e,
            )
            .into()),
        }
    }
}

impl InputSource for DelimitedInputSource {
    fn open(&mut self, scope: &Scope) -> Result<()> {
        self.device.open(scope)
    }

    fn read(&mut self) -> Result<Option<Row>> {
        loop {
            let Some(record) = self.device.read()? else {
                return Ok(None);
            };
            if record.bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let cells = self.split(&record)?;
            if cells.is_empty() {
                continue;
            }

            if self.headers.is_none() {
                if self.expect_headers {
                    self.headers = Some(cells.into_iter().map(SmolStr::from).collect());
                    continue;
                }
                self.headers = Some(
                    (0..cells.len())
                        .map(|i| SmolStr::from(format!("col{i}")))
                        .collect(),
                );
            }

            let headers = self.headers.as_ref().unwrap();
            let mut row = Row::with_capacity(cells.len());
            for (i, cell) in cells.into_iter().enumerate() {
                let name = headers
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| SmolStr::from(format!("col{i}")));
                row.push(name, Value::from_text(&cell));
            }
            return Ok(Some(row));
        }
    }

    fn close(&mut self) -> Result<()> {
        self.device.close()
    }
}

/// Mirror writer: headers once when the sink starts empty, quoting driven
/// by the hints (text-only quoting by default, never numbers unless asked).
pub struct DelimitedOutputSource {
    device: Box<dyn OutputDevice>,
    delimiter: u8,
    quote_style: QuoteStyle,
    want_headers: bool,
    emit_headers: bool,
    lines: u64,
}

impl DelimitedOutputSource {
    pub fn new(device: Box<dyn OutputDevice>, hints: &Hints) -> Self {
        let quote_style = match (
            hints.quoted_text.unwrap_or(false),
            hints.quoted_numbers.unwrap_or(false),
        ) {
            (true, true) => QuoteStyle::Always,
            (true, false) => QuoteStyle::NonNumeric,
            _ => QuoteStyle::Necessary,
        };
        Self {
            device,
            delimiter: delimiter_byte(hints),
            quote_style,
            want_headers: hints.headers.unwrap_or(false),
            emit_headers: false,
            lines: 0,
        }
    }

    fn format_record<'a>(&self, cells: impl Iterator<Item = &'a str>) -> Result<Vec<u8>> {
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(self.quote_style)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer
            .write_record(cells)
            .and_then(|()| writer.flush().map_err(csv::Error::from))
            .map_err(|e| {
                RuntimeError::with_cause(Phase::Write, "Cannot format delimited record", e)
            })?;
        let mut bytes = writer
            .into_inner()
            .map_err(|e| RuntimeError::with_cause(Phase::Write, "Cannot finish record", e.into_error()))?;
        while bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        Ok(bytes)
    }

    fn emit(&mut self, bytes: Vec<u8>) -> Result<()> {
        let record = Record::new(bytes, self.lines);
        self.lines += 1;
        self.device.write(record)
    }
}

impl OutputSource for DelimitedOutputSource {
    fn open(&mut self, scope: &Scope) -> Result<()> {
        self.device.open(scope)?;
        self.emit_headers = self.want_headers && self.device.starts_empty();
        Ok(())
    }

    fn write(&mut self, row: &Row) -> Result<()> {
        if self.emit_headers {
            self.emit_headers = false;
            let names: Vec<&str> = row.names().map(SmolStr::as_str).collect();
            let header = self.format_record(names.into_iter())?;
            self.emit(header)?;
        }
        let cells: Vec<String> = row.values().map(Value::to_string).collect();
        let line = self.format_record(cells.iter().map(String::as_str))?;
        self.emit(line)
    }

    fn close(&mut self) -> Result<()> {
        self.device.close()
    }
}
