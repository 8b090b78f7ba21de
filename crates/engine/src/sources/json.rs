use std::collections::VecDeque;

use chrono::SecondsFormat;
use smol_str::SmolStr;

use super::{InputSource, OutputSource};
use crate::devices::{InputDevice, OutputDevice, Record};
use crate::errors::{Phase, Result, RuntimeError};
use crate::rows::Row;
use crate::scope::Scope;
use crate::values::Value;

/// One JSON value per record. Objects become one row, arrays unfold into a
/// row per element, and a bare scalar becomes a single synthetic column.
pub struct JsonInputSource {
    device: Box<dyn InputDevice>,
    json_path: Option<String>,
    pending: VecDeque<Row>,
}

impl JsonInputSource {
    pub fn new(device: Box<dyn InputDevice>, json_path: Option<String>) -> Self {
        Self {
            device,
            json_path,
            pending: VecDeque::new(),
        }
    }

    fn unfold(&mut self, value: serde_json::Value, offset: u64) {
        match value {
            serde_json::Value::Object(map) => self.pending.push_back(object_row(map)),
            serde_json::Value::Array(items) => {
                for item in items {
                    match item {
                        serde_json::Value::Object(map) => {
                            self.pending.push_back(object_row(map));
                        }
                        scalar => {
                            log::warn!(
                                "synthesising a column for a non-object JSON element at offset {offset}"
                            );
                            let mut row = Row::with_capacity(1);
                            row.push("value", convert(scalar));
                            self.pending.push_back(row);
                        }
                    }
                }
            }
            scalar => {
                let mut row = Row::with_capacity(1);
                row.push("value", convert(scalar));
                self.pending.push_back(row);
            }
        }
    }

    fn navigate(&self, mut value: serde_json::Value) -> Option<serde_json::Value> {
        let Some(path) = &self.json_path else {
            return Some(value);
        };
        for key in path.split('.').filter(|k| !k.is_empty()) {
            value = match value {
                serde_json::Value::Object(mut map) => map.remove(key)?,
                _ => return None,
            };
        }
        Some(value)
    }
}

impl InputSource for JsonInputSource {
    fn open(&mut self, scope: &Scope) -> Result<()> {
        self.device.open(scope)
    }

    fn read(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(record) = self.device.read()? else {
                return Ok(None);
            };
            if record.bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let value: serde_json::Value =
                serde_json::from_slice(&record.bytes).map_err(|e| {
                    RuntimeError::with_cause(
                        Phase::Read,
                        format!("Invalid JSON record at offset {}", record.offset),
                        e,
                    )
                })?;
            match self.navigate(value) {
                Some(value) => self.unfold(value, record.offset),
                None => log::warn!(
                    "json path '{}' missing at offset {}",
                    self.json_path.as_deref().unwrap_or_default(),
                    record.offset
                ),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.device.close()
    }
}

/// One JSON object per line; round-trips through the JSON input source.
pub struct JsonOutputSource {
    device: Box<dyn OutputDevice>,
    lines: u64,
}

impl JsonOutputSource {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self { device, lines: 0 }
    }
}

impl OutputSource for JsonOutputSource {
    fn open(&mut self, scope: &Scope) -> Result<()> {
        self.device.open(scope)
    }

    fn write(&mut self, row: &Row) -> Result<()> {
        let mut object = serde_json::Map::with_capacity(row.len());
        for (name, value) in row.iter() {
            object.insert(name.to_string(), to_json(value));
        }
        let line = serde_json::to_vec(&serde_json::Value::Object(object)).map_err(|e| {
            RuntimeError::with_cause(Phase::Write, "Cannot serialise row as JSON", e)
        })?;
        let record = Record::new(line, self.lines);
        self.lines += 1;
        self.device.write(record)
    }

    fn close(&mut self) -> Result<()> {
        self.device.close()
    }
}

fn object_row(map: serde_json::Map<String, serde_json::Value>) -> Row {
    let mut row = Row::with_capacity(map.len());
    for (name, value) in map {
        row.push(SmolStr::from(name), convert(value));
    }
    row
}

fn convert(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(v),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(v) => Value::Int(v),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(v) => Value::Str(v),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(convert).collect())
        }
        serde_json::Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(name, value)| (SmolStr::from(name), convert(value)))
                .collect(),
        ),
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::Int(v) => serde_json::Value::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(v) => serde_json::Value::from(v.as_str()),
        Value::Bytes(v) => serde_json::Value::from(v.clone()),
        Value::Date(v) => {
            serde_json::Value::from(v.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Object(pairs) => serde_json::Value::Object(
            pairs
                .iter()
                .map(|(name, value)| (name.to_string(), to_json(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::devices::{TextFileInputDevice, TextFileOutputDevice};

    fn read_all(path: &std::path::Path, json_path: Option<&str>) -> Vec<Row> {
        let device = Box::new(TextFileInputDevice::new(path, false));
        let mut source = JsonInputSource::new(device, json_path.map(str::to_string));
        source.open(&Scope::root()).unwrap();
        let mut rows = Vec::new();
        while let Some(row) = source.read().unwrap() {
            rows.push(row);
        }
        source.close().unwrap();
        rows
    }

    #[test]
    fn objects_become_rows_and_arrays_unfold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        std::fs::write(
            &path,
            "{\"Symbol\":\"XOM\",\"LastSale\":88.5}\n[{\"a\":1},{\"a\":2}]\n",
        )
        .unwrap();

        let rows = read_all(&path, None);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("Symbol"), Some(&Value::Str("XOM".into())));
        assert_eq!(rows[2].get("a"), Some(&Value::Int(2)));
    }

    #[test]
    fn scalars_get_a_synthetic_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalars.json");
        std::fs::write(&path, "[1,2]\n\"lone\"\n").unwrap();

        let rows = read_all(&path, None);
        assert_eq!(rows[0].get("value"), Some(&Value::Int(1)));
        assert_eq!(rows[2].get("value"), Some(&Value::Str("lone".into())));
    }

    #[test]
    fn json_path_navigates_into_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested.json");
        std::fs::write(
            &path,
            "{\"payload\":{\"rows\":[{\"n\":1},{\"n\":2}]},\"meta\":{}}\n",
        )
        .unwrap();

        let rows = read_all(&path, Some("payload.rows"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn writer_round_trips_through_the_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");

        let device = Box::new(TextFileOutputDevice::new(&path, false, false));
        let mut sink = JsonOutputSource::new(device);
        sink.open(&Scope::root()).unwrap();
        let mut row = Row::new();
        row.push("Symbol", Value::Str("MSFT".into()));
        row.push("LastSale", Value::Float(410.0));
        sink.write(&row).unwrap();
        sink.close().unwrap();

        let rows = read_all(&path, None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Symbol"), Some(&Value::Str("MSFT".into())));
        assert_eq!(rows[0].get("LastSale"), Some(&Value::Float(410.0)));
    }
}
