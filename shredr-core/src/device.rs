use std::fmt;
use std::path::PathBuf;

/// A storage device that may be offered as an erase target.
///
/// Devices are produced fresh on every [`crate::catalog::DeviceCatalog::refresh`]
/// and are never cached by the library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// The device node (e.g., `/dev/sdb`).
    pub file: PathBuf,
    /// Vendor string reported by the device, possibly empty.
    pub vendor: String,
    /// Model string reported by the device, possibly empty.
    pub model: String,
    /// Every mount point of the device or its partitions, in service order.
    pub mount_paths: Vec<String>,
    /// Total capacity in bytes.
    pub size_bytes: u64,
}

impl Device {
    /// Vendor and model joined for display, or `"Unknown"` when both are blank.
    pub fn label(&self) -> String {
        let label = format!("{} {}", self.vendor.trim(), self.model.trim());
        let label = label.trim();
        if label.is_empty() {
            "Unknown".to_string()
        } else {
            label.to_string()
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mount_info = if !self.mount_paths.is_empty() {
            format!("[Mounted at {}]", self.mount_paths.join(", "))
        } else {
            "[Not mounted]".to_string()
        };

        write!(
            f,
            "{:<15} {:<25} {:>9} {}",
            self.file.display(),
            self.label(),
            format_size(self.size_bytes),
            mount_info
        )
    }
}

/// Formats a byte count with decimal (base-1000) units and one fractional digit.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
