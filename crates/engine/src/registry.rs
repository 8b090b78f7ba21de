use std::rc::Rc;

use qwery_parser::Hints;

use crate::devices::{InputDevice, OutputDevice, TextFileInputDevice, TextFileOutputDevice};
use crate::errors::{Phase, Result, RuntimeError};

/// Opens concrete devices for paths it recognises. `accepts` lets a factory
/// refuse a resource so the next one is tried.
pub trait DeviceFactory {
    fn accepts(&self, path: &str, hints: &Hints) -> bool;
    fn input(&self, path: &str, hints: &Hints) -> Result<Box<dyn InputDevice>>;
    fn output(&self, path: &str, hints: &Hints) -> Result<Box<dyn OutputDevice>>;
}

/// An ordered, first-match-wins list of device factories. Built once and
/// frozen; capability providers (Avro, JDBC, Kafka, S3) prepend factories
/// before the build.
pub struct DeviceRegistry {
    factories: Vec<Box<dyn DeviceFactory>>,
}

impl DeviceRegistry {
    pub fn builder() -> DeviceRegistryBuilder {
        DeviceRegistryBuilder {
            factories: Vec::new(),
        }
    }

    /// The stock registry: local files with transparent GZIP.
    pub fn standard() -> Rc<DeviceRegistry> {
        Rc::new(
            DeviceRegistry::builder()
                .with_factory(FileDeviceFactory)
                .build_unshared(),
        )
    }

    pub fn can_resolve(&self, path: &str, hints: &Hints) -> bool {
        self.factories.iter().any(|f| f.accepts(path, hints))
    }

    pub fn open_input(&self, path: &str, hints: &Hints) -> Result<Box<dyn InputDevice>> {
        self.factory_for(path, hints)?.input(path, hints)
    }

    pub fn open_output(&self, path: &str, hints: &Hints) -> Result<Box<dyn OutputDevice>> {
        self.factory_for(path, hints)?.output(path, hints)
    }

    fn factory_for(&self, path: &str, hints: &Hints) -> Result<&dyn DeviceFactory> {
        self.factories
            .iter()
            .map(Box::as_ref)
            .find(|f| f.accepts(path, hints))
            .ok_or_else(|| {
                RuntimeError::new(Phase::Open, format!("No device accepts '{path}'")).into()
            })
    }
}

pub struct DeviceRegistryBuilder {
    factories: Vec<Box<dyn DeviceFactory>>,
}

impl DeviceRegistryBuilder {
    pub fn with_factory(mut self, factory: impl DeviceFactory + 'static) -> Self {
        self.factories.push(Box::new(factory));
        self
    }

    pub fn build(self) -> Rc<DeviceRegistry> {
        Rc::new(self.build_unshared())
    }

    fn build_unshared(self) -> DeviceRegistry {
        DeviceRegistry {
            factories: self.factories,
        }
    }
}

/// Local filesystem paths, with `.gz` (or the gzip hint) unwrapped
/// transparently. Refuses URL-schemed paths so provider factories can claim
/// them.
pub struct FileDeviceFactory;

impl FileDeviceFactory {
    fn is_local(path: &str) -> bool {
        !path.contains("://") || path.starts_with("file://")
    }

    fn strip_scheme(path: &str) -> &str {
        path.strip_prefix("file://").unwrap_or(path)
    }

    fn wants_gzip(path: &str, hints: &Hints) -> bool {
        hints.gzip.unwrap_or(false) || path.ends_with(".gz")
    }
}

impl DeviceFactory for FileDeviceFactory {
    fn accepts(&self, path: &str, _hints: &Hints) -> bool {
        Self::is_local(path)
    }

    fn input(&self, path: &str, hints: &Hints) -> Result<Box<dyn InputDevice>> {
        let local = Self::strip_scheme(path);
        Ok(Box::new(TextFileInputDevice::new(
            local,
            Self::wants_gzip(local, hints),
        )))
    }

    fn output(&self, path: &str, hints: &Hints) -> Result<Box<dyn OutputDevice>> {
        let local = Self::strip_scheme(path);
        Ok(Box::new(TextFileOutputDevice::new(
            local,
            Self::wants_gzip(local, hints),
            hints.append.unwrap_or(false),
        )))
    }
}
