//! In-memory filesystem for exercising the procfs provider without a Linux host.

use super::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// In-memory filesystem.
///
/// Files and directories live in maps; parent directories are created
/// implicitly so `read_dir` on `/sys/devices/system/cpu` works after adding
/// `/sys/devices/system/cpu/cpu0/online`.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file, creating parent directories.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory and its parents.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Removes a file or a whole directory subtree.
    pub fn remove(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.files.retain(|p, _| !p.starts_with(path));
        self.directories.retain(|p| !p.starts_with(path));
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("file not found: {path:?}"))
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {path:?}"),
            ));
        }

        let children = self
            .files
            .keys()
            .chain(self.directories.iter())
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect::<HashSet<_>>();
        let mut entries: Vec<PathBuf> = children.into_iter().collect();
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_file_creates_parents() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/devices/system/cpu/cpu1/online", "1\n");

        assert!(fs.exists(Path::new("/sys/devices/system/cpu/cpu1")));
        assert!(fs.exists(Path::new("/sys/devices/system/cpu")));
        assert_eq!(
            fs.read_to_string(Path::new("/sys/devices/system/cpu/cpu1/online"))
                .unwrap(),
            "1\n"
        );
    }

    #[test]
    fn read_dir_lists_direct_children_sorted() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/devices/system/cpu/possible", "0-1\n");
        fs.add_dir("/sys/devices/system/cpu/cpu1");
        fs.add_dir("/sys/devices/system/cpu/cpu0");

        let entries = fs.read_dir(Path::new("/sys/devices/system/cpu")).unwrap();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/sys/devices/system/cpu/cpu0"),
                PathBuf::from("/sys/devices/system/cpu/cpu1"),
                PathBuf::from("/sys/devices/system/cpu/possible"),
            ]
        );
    }

    #[test]
    fn remove_drops_subtree() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/devices/system/cpu/cpu3/online", "1\n");
        fs.remove("/sys/devices/system/cpu/cpu3");

        assert!(!fs.exists(Path::new("/sys/devices/system/cpu/cpu3")));
        assert!(!fs.exists(Path::new("/sys/devices/system/cpu/cpu3/online")));
        assert!(fs.exists(Path::new("/sys/devices/system/cpu")));
    }

    #[test]
    fn missing_path_is_not_found() {
        let fs = MockFs::new();
        let err = fs.read_to_string(Path::new("/proc/stat")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(fs.read_dir(Path::new("/proc")).is_err());
    }
}
