mod delimited;
mod json;

pub use delimited::{DelimitedInputSource, DelimitedOutputSource};
pub use json::{JsonInputSource, JsonOutputSource};

use qwery_parser::hints::Format;
use qwery_parser::Hints;

use crate::errors::{Phase, Result, RuntimeError};
use crate::registry::DeviceRegistry;
use crate::rows::Row;
use crate::scope::Scope;

/// Row-level input over a device. `read` yields rows until exhaustion;
/// `close` releases the device and is idempotent.
pub trait InputSource {
    fn open(&mut self, scope: &Scope) -> Result<()>;
    fn read(&mut self) -> Result<Option<Row>>;
    fn close(&mut self) -> Result<()>;
}

/// Row-level output over a device.
pub trait OutputSource {
    fn open(&mut self, scope: &Scope) -> Result<()>;
    fn write(&mut self, row: &Row) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Resolve a path to a row input source: extension presets first, explicit
/// hints winning field-by-field, then the format-matching codec over the
/// registry's device.
pub fn input_source(
    registry: &DeviceRegistry,
    path: &str,
    hints: &Hints,
) -> Result<Box<dyn InputSource>> {
    let hints = effective_hints(path, hints);
    reject_unprovided_codecs(path, &hints)?;
    let device = registry.open_input(path, &hints)?;
    if hints.is_json == Some(true) {
        Ok(Box::new(JsonInputSource::new(device, hints.json_path.clone())))
    } else {
        Ok(Box::new(DelimitedInputSource::new(device, &hints)))
    }
}

pub fn output_source(
    registry: &DeviceRegistry,
    path: &str,
    hints: &Hints,
) -> Result<Box<dyn OutputSource>> {
    let hints = effective_hints(path, hints);
    reject_unprovided_codecs(path, &hints)?;
    let device = registry.open_output(path, &hints)?;
    if hints.is_json == Some(true) {
        Ok(Box::new(JsonOutputSource::new(device)))
    } else {
        Ok(Box::new(DelimitedOutputSource::new(device, &hints)))
    }
}

/// Derive format defaults from the file extension (`.gz` stripped first) and
/// let explicit hints override them.
pub(crate) fn effective_hints(path: &str, explicit: &Hints) -> Hints {
    let mut base = Hints::default();
    if path.ends_with(".gz") {
        base.gzip = Some(true);
    }
    let stem = path.strip_suffix(".gz").unwrap_or(path);
    let format = match stem.rsplit('.').next() {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => Format::Tsv,
        Some(ext) if ext.eq_ignore_ascii_case("psv") => Format::Psv,
        _ => Format::Csv,
    };
    base.using_format(format).merge(explicit)
}

/// The Avro codec is a capability provider; without one registered an
/// Avro-hinted resource cannot be served.
fn reject_unprovided_codecs(path: &str, hints: &Hints) -> Result<()> {
    if hints.avro_schema.is_some() {
        return Err(RuntimeError::new(
            Phase::Open,
            format!("No Avro codec is registered for '{path}'"),
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn extension_presets_yield_to_explicit_hints() {
        let explicit = Hints {
            delimiter: Some(";".into()),
            ..Hints::default()
        };
        let hints = effective_hints("data.csv", &explicit);
        assert_eq!(hints.delimiter.as_deref(), Some(";"));
        assert_eq!(hints.headers, Some(true));
    }

    #[test]
    fn gz_suffix_sets_gzip_and_uses_the_inner_extension() {
        let hints = effective_hints("events.tsv.gz", &Hints::default());
        assert_eq!(hints.gzip, Some(true));
        assert_eq!(hints.delimiter.as_deref(), Some("\t"));
    }

    #[test]
    fn json_extension_selects_the_json_codec() {
        let hints = effective_hints("rows.json", &Hints::default());
        assert_eq!(hints.is_json, Some(true));
    }
}
