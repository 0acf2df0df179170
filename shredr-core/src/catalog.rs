//! Builds the list of devices that may be offered for erasure.
//!
//! The catalog does not talk to the operating system itself. It asks a
//! [`DeviceService`] for every known device and each device's properties,
//! shapes them into [`Device`] values, and drops anything that must never be
//! erased: the disk holding the running system's root filesystem, devices
//! mounted under the protected path (live media) and devices reporting a size
//! of zero (e.g. empty card readers).
use crate::device::Device;
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing::debug;

/// Mount-path fragment identifying the running live system's boot medium.
pub const DEFAULT_PROTECTED_PATH: &str = "/run/live/medium";

/// Mount point of the running system; its device is always excluded.
pub const SYSTEM_ROOT: &str = "/";

/// A per-device property exposed by a [`DeviceService`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    /// Path of the device node.
    File,
    Vendor,
    Model,
    /// Mount points of the device and its partitions.
    MountPaths,
    /// Capacity in bytes.
    Size,
}

impl Property {
    pub fn name(self) -> &'static str {
        match self {
            Property::File => "file",
            Property::Vendor => "vendor",
            Property::Model => "model",
            Property::MountPaths => "mount-paths",
            Property::Size => "size",
        }
    }
}

/// A property value as returned by a [`DeviceService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    Paths(Vec<String>),
    Bytes(u64),
}

/// The external device-property service.
pub trait DeviceService {
    /// Identifiers of every known device, in the service's own order.
    fn enumerate(&self) -> Result<Vec<String>>;

    /// Looks up a single property of the device identified by `id`.
    fn property(&self, id: &str, property: Property) -> Result<PropertyValue>;
}

/// Produces the erase-eligible device list from a [`DeviceService`].
pub struct DeviceCatalog<S> {
    service: S,
    protected_path: String,
}

impl<S: DeviceService> DeviceCatalog<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            protected_path: DEFAULT_PROTECTED_PATH.to_string(),
        }
    }

    /// Replaces the protected mount-path fragment.
    pub fn with_protected_path(mut self, path: impl Into<String>) -> Self {
        self.protected_path = path.into();
        self
    }

    pub fn protected_path(&self) -> &str {
        &self.protected_path
    }

    /// Queries the service and returns every erase-eligible device.
    ///
    /// Order follows the service's enumeration order. Nothing is retried; a
    /// failed refresh can simply be requested again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceQuery`] if the service fails or reports a
    /// property of the wrong kind.
    pub fn refresh(&self) -> Result<Vec<Device>> {
        let ids = self.service.enumerate()?;
        let mut devices = Vec::with_capacity(ids.len());

        for id in ids {
            let device = self.shape(&id)?;

            if device.mount_paths.iter().any(|mount| mount == SYSTEM_ROOT) {
                debug!(device = %id, "excluding system disk");
                continue;
            }
            if let Some(mount) = device
                .mount_paths
                .iter()
                .find(|mount| mount.contains(self.protected_path.as_str()))
            {
                debug!(device = %id, %mount, "excluding device on protected path");
                continue;
            }
            if device.size_bytes == 0 {
                debug!(device = %id, "excluding zero-size device");
                continue;
            }

            devices.push(device);
        }

        Ok(devices)
    }

    fn shape(&self, id: &str) -> Result<Device> {
        Ok(Device {
            file: PathBuf::from(self.text(id, Property::File)?),
            vendor: self.text(id, Property::Vendor)?,
            model: self.text(id, Property::Model)?,
            mount_paths: match self.service.property(id, Property::MountPaths)? {
                PropertyValue::Paths(paths) => paths,
                other => return Err(unexpected(id, Property::MountPaths, &other)),
            },
            size_bytes: match self.service.property(id, Property::Size)? {
                PropertyValue::Bytes(size) => size,
                other => return Err(unexpected(id, Property::Size, &other)),
            },
        })
    }

    fn text(&self, id: &str, property: Property) -> Result<String> {
        match self.service.property(id, property)? {
            PropertyValue::Text(text) => Ok(text),
            other => Err(unexpected(id, property, &other)),
        }
    }
}

fn unexpected(id: &str, property: Property, value: &PropertyValue) -> Error {
    Error::device_query(
        id,
        format!("unexpected value for '{}': {value:?}", property.name()),
    )
}
