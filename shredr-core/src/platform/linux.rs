use crate::catalog::{DeviceService, Property, PropertyValue};
use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SYS_BLOCK: &str = "/sys/block";

/// Whether the mount source `name` is `device_name` itself or one of its
/// partitions (`sdb1`, `nvme0n1p2`, `mmcblk0p1`).
fn is_same_or_partition(name: &str, device_name: &str) -> bool {
    let Some(suffix) = name.strip_prefix(device_name) else {
        return false;
    };
    let digits = suffix.strip_prefix('p').unwrap_or(suffix);
    suffix.is_empty()
        || (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            // `sda` + `1` is a partition, but `nvme0n1` + `0` is `nvme0n10`.
            && (suffix.starts_with('p') || !device_name.ends_with(|c: char| c.is_ascii_digit())))
}

/// Helper to read a specific file below a device's `/sys/block` entry.
fn read_sys_file(root: &Path, device_name: &str, file: &str) -> io::Result<String> {
    let path = root.join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// A [`DeviceService`] backed by `/sys/block` and a `sysinfo` mount snapshot.
///
/// Property lookups are answered as follows:
/// - `File`: `/dev/<name>`.
/// - `Vendor` / `Model`: `/sys/block/<name>/device/{vendor,model}`, empty when
///   the kernel does not expose them (e.g. virtual devices).
/// - `Size`: `/sys/block/<name>/size`, which is always in 512-byte sectors.
/// - `MountPaths`: every mounted filesystem whose source is the device itself
///   or one of its partitions (`sdb1`, `nvme0n1p2`).
///
/// Loop devices are never enumerated.
///
/// Mount points are captured once when the service is created, so a refresh
/// should create a new service.
pub struct SysBlockService {
    root: PathBuf,
    mounts: Vec<(String, String)>,
}

impl SysBlockService {
    pub fn new() -> Self {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let mounts = disks
            .iter()
            .map(|disk| {
                let name = disk.name().to_string_lossy();
                let name = name.trim_start_matches("/dev/").to_string();
                (name, disk.mount_point().to_string_lossy().to_string())
            })
            .collect();

        Self {
            root: PathBuf::from(SYS_BLOCK),
            mounts,
        }
    }

    /// Builds a service over an arbitrary sysfs-like tree and mount table.
    pub fn with_root(root: impl Into<PathBuf>, mounts: Vec<(String, String)>) -> Self {
        Self {
            root: root.into(),
            mounts,
        }
    }

    fn mount_paths(&self, device_name: &str) -> Vec<String> {
        self.mounts
            .iter()
            .filter(|(name, mount)| is_same_or_partition(name, device_name) && !mount.is_empty())
            .map(|(_, mount)| mount.clone())
            .collect()
    }
}

impl Default for SysBlockService {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceService for SysBlockService {
    fn enumerate(&self) -> Result<Vec<String>> {
        let block_dir =
            fs::read_dir(&self.root).map_err(|e| Error::device_query("*", e))?;

        let mut names: Vec<String> = block_dir
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| !name.starts_with("loop"))
            .collect();
        names.sort();
        Ok(names)
    }

    fn property(&self, id: &str, property: Property) -> Result<PropertyValue> {
        if !self.root.join(id).exists() {
            return Err(Error::device_query(id, "no such block device"));
        }

        let value = match property {
            Property::File => {
                PropertyValue::Text(PathBuf::from("/dev").join(id).display().to_string())
            }
            Property::Vendor => {
                PropertyValue::Text(read_sys_file(&self.root, id, "device/vendor").unwrap_or_default())
            }
            Property::Model => {
                PropertyValue::Text(read_sys_file(&self.root, id, "device/model").unwrap_or_default())
            }
            Property::MountPaths => PropertyValue::Paths(self.mount_paths(id)),
            Property::Size => {
                let sectors = read_sys_file(&self.root, id, "size")
                    .map_err(|e| Error::device_query(id, e))?
                    .parse::<u64>()
                    .map_err(|e| Error::device_query(id, format!("bad size: {e}")))?;
                let bytes = sectors
                    .checked_mul(512)
                    .ok_or_else(|| Error::device_query(id, "size overflows u64"))?;
                PropertyValue::Bytes(bytes)
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeviceCatalog;

    fn fake_block(root: &Path, name: &str, sectors: &str, vendor: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("device")).unwrap();
        fs::write(dir.join("size"), format!("{sectors}\n")).unwrap();
        if let Some(vendor) = vendor {
            fs::write(dir.join("device/vendor"), format!("{vendor}   \n")).unwrap();
            fs::write(dir.join("device/model"), "Flash Drive\n").unwrap();
        }
    }

    #[test]
    fn reads_properties_from_sysfs_tree() {
        let root = tempfile::tempdir().unwrap();
        fake_block(root.path(), "sdb", "62521344", Some("Kingston"));
        fake_block(root.path(), "loop0", "0", None);
        let mounts = vec![
            ("sdb1".to_string(), "/media/stick".to_string()),
            ("nvme0n1p2".to_string(), "/".to_string()),
        ];
        let service = SysBlockService::with_root(root.path(), mounts);

        assert_eq!(service.enumerate().unwrap(), ["sdb"]);
        assert_eq!(
            service.property("sdb", Property::File).unwrap(),
            PropertyValue::Text("/dev/sdb".into())
        );
        assert_eq!(
            service.property("sdb", Property::Vendor).unwrap(),
            PropertyValue::Text("Kingston".into())
        );
        assert_eq!(
            service.property("loop0", Property::Model).unwrap(),
            PropertyValue::Text(String::new())
        );
        assert_eq!(
            service.property("sdb", Property::Size).unwrap(),
            PropertyValue::Bytes(62_521_344 * 512)
        );
        assert_eq!(
            service.property("sdb", Property::MountPaths).unwrap(),
            PropertyValue::Paths(vec!["/media/stick".into()])
        );
    }

    #[test]
    fn catalog_over_sysfs_drops_zero_size_devices() {
        let root = tempfile::tempdir().unwrap();
        fake_block(root.path(), "loop0", "2048", None);
        fake_block(root.path(), "sda", "0", None);
        fake_block(root.path(), "sdb", "2048", Some("ACME"));

        let catalog = DeviceCatalog::new(SysBlockService::with_root(root.path(), Vec::new()));
        let devices = catalog.refresh().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].file, PathBuf::from("/dev/sdb"));
        assert_eq!(devices[0].size_bytes, 2048 * 512);
    }

    #[test]
    fn unreadable_size_is_a_query_error() {
        let root = tempfile::tempdir().unwrap();
        fake_block(root.path(), "sdz", "not-a-number", None);
        let service = SysBlockService::with_root(root.path(), Vec::new());

        assert!(matches!(
            service.property("sdz", Property::Size),
            Err(Error::DeviceQuery { .. })
        ));
        assert!(matches!(
            service.property("missing", Property::File),
            Err(Error::DeviceQuery { .. })
        ));
    }

    #[test]
    fn oversized_size_is_a_query_error() {
        let root = tempfile::tempdir().unwrap();
        fake_block(root.path(), "sdz", "36028797018963968", None);
        let service = SysBlockService::with_root(root.path(), Vec::new());

        match service.property("sdz", Property::Size) {
            Err(Error::DeviceQuery { device, detail }) => {
                assert_eq!(device, "sdz");
                assert!(detail.contains("overflow"));
            }
            other => panic!("expected a device query error, got {other:?}"),
        }
    }

    #[test]
    fn mounts_belong_only_to_their_own_device() {
        let root = tempfile::tempdir().unwrap();
        for name in ["loop1", "sda", "nvme0n1", "mmcblk0"] {
            fake_block(root.path(), name, "2048", None);
        }
        let mounts = vec![
            ("loop10".to_string(), "/run/live/medium".to_string()),
            ("sdaa1".to_string(), "/media/other".to_string()),
            ("sda2".to_string(), "/media/data".to_string()),
            ("nvme0n10p1".to_string(), "/srv".to_string()),
            ("nvme0n1p3".to_string(), "/home".to_string()),
            ("mmcblk0p1".to_string(), "/boot/firmware".to_string()),
            ("mmcblk01".to_string(), "/nope".to_string()),
        ];
        let service = SysBlockService::with_root(root.path(), mounts);

        let paths = |id: &str| service.property(id, Property::MountPaths).unwrap();
        assert_eq!(paths("loop1"), PropertyValue::Paths(Vec::new()));
        assert_eq!(paths("sda"), PropertyValue::Paths(vec!["/media/data".into()]));
        assert_eq!(paths("nvme0n1"), PropertyValue::Paths(vec!["/home".into()]));
        assert_eq!(paths("mmcblk0"), PropertyValue::Paths(vec!["/boot/firmware".into()]));
    }

    #[test]
    fn partition_suffixes() {
        assert!(is_same_or_partition("sda", "sda"));
        assert!(is_same_or_partition("sda1", "sda"));
        assert!(is_same_or_partition("sda12", "sda"));
        assert!(is_same_or_partition("nvme0n1p2", "nvme0n1"));
        assert!(!is_same_or_partition("sdaa", "sda"));
        assert!(!is_same_or_partition("sdaa1", "sda"));
        assert!(!is_same_or_partition("loop10", "loop1"));
        assert!(!is_same_or_partition("nvme0n10", "nvme0n1"));
        assert!(!is_same_or_partition("sdap", "sda"));
        assert!(!is_same_or_partition("sdb1", "sda"));
    }

    #[test]
    fn root_disk_is_never_offered() {
        let root = tempfile::tempdir().unwrap();
        fake_block(root.path(), "nvme0n1", "1000215216", Some("Samsung"));
        fake_block(root.path(), "sdb", "62521344", Some("Kingston"));
        let mounts = vec![
            ("nvme0n1p1".to_string(), "/boot/efi".to_string()),
            ("nvme0n1p2".to_string(), "/".to_string()),
        ];

        let catalog = DeviceCatalog::new(SysBlockService::with_root(root.path(), mounts));
        let devices = catalog.refresh().unwrap();
        let files: Vec<_> = devices.iter().map(|d| d.file.clone()).collect();
        assert_eq!(files, [PathBuf::from("/dev/sdb")]);
    }

    #[test]
    fn missing_sys_block_is_a_query_error() {
        let service = SysBlockService::with_root("/nonexistent/shredr/sys/block", Vec::new());
        assert!(matches!(service.enumerate(), Err(Error::DeviceQuery { .. })));
    }
}
