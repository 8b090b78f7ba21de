use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::errors::{Phase, Result, RuntimeError};
use crate::scope::Scope;

/// One raw record as handed between a device and a source codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub bytes: Vec<u8>,
    pub offset: u64,
}

impl Record {
    pub fn new(bytes: Vec<u8>, offset: u64) -> Self {
        Self { bytes, offset }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub records: u64,
    pub bytes: u64,
}

impl DeviceStats {
    fn bump(&mut self, size: usize) {
        self.records += 1;
        self.bytes += size as u64;
    }
}

/// Byte-record input. Exactly one `open` per execution; `close` is
/// idempotent and must be callable from any suspension point.
pub trait InputDevice {
    fn open(&mut self, scope: &Scope) -> Result<()>;
    fn read(&mut self) -> Result<Option<Record>>;
    fn close(&mut self) -> Result<()>;
    fn stats(&self) -> DeviceStats;
}

/// Byte-record output. `starts_empty` reports whether the sink had no prior
/// content at open time, which drives header emission.
pub trait OutputDevice {
    fn open(&mut self, scope: &Scope) -> Result<()>;
    fn write(&mut self, record: Record) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn stats(&self) -> DeviceStats;
    fn starts_empty(&self) -> bool;
}

/// Line-oriented file reader, transparently gunzipping when asked. Records
/// are lines without their terminator; CRLF and LF both read.
pub struct TextFileInputDevice {
    path: PathBuf,
    gzip: bool,
    reader: Option<BufReader<Box<dyn Read>>>,
    offset: u64,
    stats: DeviceStats,
}

impl TextFileInputDevice {
    pub fn new(path: impl Into<PathBuf>, gzip: bool) -> Self {
        Self {
            path: path.into(),
            gzip,
            reader: None,
            offset: 0,
            stats: DeviceStats::default(),
        }
    }
}

impl InputDevice for TextFileInputDevice {
    fn open(&mut self, _scope: &Scope) -> Result<()> {
        let file = File::open(&self.path).map_err(|e| {
            RuntimeError::with_cause(
                Phase::Open,
                format!("Cannot open '{}'", self.path.display()),
                e,
            )
        })?;
        let raw: Box<dyn Read> = if self.gzip {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        self.reader = Some(BufReader::new(raw));
        log::debug!("opened {} for reading", self.path.display());
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Record>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut line = Vec::new();
        let read = reader.read_until(b'\n', &mut line).map_err(|e| {
            RuntimeError::with_cause(
                Phase::Read,
                format!("Read failed on '{}'", self.path.display()),
                e,
            )
        })?;
        if read == 0 {
            return Ok(None);
        }
        let offset = self.offset;
        self.offset += read as u64;
        while line.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            line.pop();
        }
        self.stats.bump(read);
        Ok(Some(Record::new(line, offset)))
    }

    fn close(&mut self) -> Result<()> {
        if self.reader.take().is_some() {
            log::debug!("closed {}", self.path.display());
        }
        Ok(())
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}

enum SinkWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl SinkWriter {
    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            SinkWriter::Plain(w) => w.write_all(bytes),
            SinkWriter::Gzip(w) => w.write_all(bytes),
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            SinkWriter::Plain(mut w) => w.flush(),
            SinkWriter::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// Line-oriented file writer. Append keeps existing content; otherwise the
/// file is truncated. Lines end with LF.
pub struct TextFileOutputDevice {
    path: PathBuf,
    gzip: bool,
    append: bool,
    writer: Option<SinkWriter>,
    starts_empty: bool,
    stats: DeviceStats,
}

impl TextFileOutputDevice {
    pub fn new(path: impl Into<PathBuf>, gzip: bool, append: bool) -> Self {
        Self {
            path: path.into(),
            gzip,
            append,
            writer: None,
            starts_empty: true,
            stats: DeviceStats::default(),
        }
    }
}

impl OutputDevice for TextFileOutputDevice {
    fn open(&mut self, _scope: &Scope) -> Result<()> {
        let existing_len = if self.append {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        self.starts_empty = existing_len == 0;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(&self.path)
            .map_err(|e| {
                RuntimeError::with_cause(
                    Phase::Open,
                    format!("Cannot open '{}' for writing", self.path.display()),
                    e,
                )
            })?;
        let buffered = BufWriter::new(file);
        self.writer = Some(if self.gzip {
            SinkWriter::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            SinkWriter::Plain(buffered)
        });
        log::debug!("opened {} for writing", self.path.display());
        Ok(())
    }

    fn write(&mut self, record: Record) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(RuntimeError::new(
                Phase::Write,
                format!("'{}' is not open", self.path.display()),
            )
            .into());
        };
        writer
            .write_all(&record.bytes)
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(|e| {
                RuntimeError::with_cause(
                    Phase::Write,
                    format!("Write failed on '{}'", self.path.display()),
                    e,
                )
            })?;
        self.stats.bump(record.size() + 1);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finish().map_err(|e| {
                RuntimeError::with_cause(
                    Phase::Close,
                    format!("Flush failed on '{}'", self.path.display()),
                    e,
                )
            })?;
            log::debug!("closed {}", self.path.display());
        }
        Ok(())
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }

    fn starts_empty(&self) -> bool {
        self.starts_empty
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn lines_round_trip_without_terminators() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        std::fs::write(&path, "one\r\ntwo\nthree").unwrap();

        let scope = Scope::root();
        let mut device = TextFileInputDevice::new(&path, false);
        device.open(&scope).unwrap();
        let mut lines = Vec::new();
        while let Some(record) = device.read().unwrap() {
            lines.push(String::from_utf8(record.bytes).unwrap());
        }
        device.close().unwrap();
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(device.stats().records, 3);
    }

    #[test]
    fn append_reports_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let scope = Scope::root();

        let mut device = TextFileOutputDevice::new(&path, false, false);
        device.open(&scope).unwrap();
        assert!(device.starts_empty());
        device.write(Record::new(b"a".to_vec(), 0)).unwrap();
        device.close().unwrap();

        let mut device = TextFileOutputDevice::new(&path, false, true);
        device.open(&scope).unwrap();
        assert!(!device.starts_empty());
        device.close().unwrap();
    }

    #[test]
    fn gzip_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.gz");
        let scope = Scope::root();

        let mut sink = TextFileOutputDevice::new(&path, true, false);
        sink.open(&scope).unwrap();
        sink.write(Record::new(b"packed".to_vec(), 0)).unwrap();
        sink.close().unwrap();

        let mut source = TextFileInputDevice::new(&path, true);
        source.open(&scope).unwrap();
        let record = source.read().unwrap().unwrap();
        assert_eq!(record.bytes, b"packed");
        source.close().unwrap();
    }

    #[test]
    fn close_is_idempotent() {
        let mut device = TextFileInputDevice::new("nowhere.txt", false);
        device.close().unwrap();
        device.close().unwrap();
    }
}
