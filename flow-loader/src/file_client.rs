//! File access backends.

use oftrain::prelude::v1::*;
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

/// Source of raw file bytes.
pub trait FileClient {
    /// Read the full contents at `path`.
    fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Backend name, used in diagnostics.
    fn name(&self) -> &str;
}

/// Reads files from the local filesystem, optionally relative to a root directory.
#[derive(Clone, Debug, Default)]
pub struct DiskBackend {
    root: Option<PathBuf>,
}

impl DiskBackend {
    /// Backend resolving paths relative to the working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl FileClient for DiskBackend {
    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let path = match &self.root {
            Some(root) => root.join(path),
            None => PathBuf::from(path),
        };

        let mut buf = vec![];
        std::fs::File::open(&path)
            .and_then(|mut f| f.read_to_end(&mut buf))
            .with_context(|| format!("failed to read {}", path.display()))?;

        Ok(buf)
    }

    fn name(&self) -> &str {
        "disk"
    }
}

/// Serves files from memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the file at `path`.
    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(path.into(), bytes);
    }
}

impl FileClient for MemoryBackend {
    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no such file: {path}"))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend() {
        let mut client = MemoryBackend::new();
        client.insert("a/b.flo", vec![1, 2, 3]);
        assert_eq!(client.get("a/b.flo").unwrap(), vec![1, 2, 3]);
        assert!(client.get("missing").is_err());
    }

    #[test]
    fn disk_backend_missing_file() {
        let client = DiskBackend::with_root(std::env::temp_dir());
        let err = client.get("definitely/not/here.flo").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn disk_backend_reads() {
        let dir = std::env::temp_dir();
        let name = format!("flow-loader-test-{}.bin", std::process::id());
        std::fs::write(dir.join(&name), [7u8, 8, 9]).unwrap();

        let client = DiskBackend::with_root(&dir);
        assert_eq!(client.get(&name).unwrap(), vec![7, 8, 9]);

        std::fs::remove_file(dir.join(&name)).unwrap();
    }
}
