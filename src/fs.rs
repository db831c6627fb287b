//! Filesystem collaborator.
//!
//! The store never touches the disk directly: all persistence goes
//! through the object-safe [`FileSystem`] trait, with paths expressed
//! relative to a configured root. [`TokioFs`] is the production
//! implementation; [`MemFs`] is an in-memory double for tests.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Minimal file metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
}

/// Async filesystem operations consumed by the store.
///
/// All paths are relative to the implementation's root. Implementations
/// must be `Send + Sync` so collections can be shared across tasks.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;
    async fn write(&self, path: &str, contents: &str) -> Result<()>;
    async fn append(&self, path: &str, contents: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn mkdir(&self, path: &str) -> Result<()>;
    async fn stat(&self, path: &str) -> Result<FileStat>;
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
    async fn remove(&self, path: &str) -> Result<()>;
    /// File names (not paths) directly inside `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;
}

/// [`FileSystem`] backed by `tokio::fs`, rooted at a base directory.
pub struct TokioFs {
    root: PathBuf,
}

impl TokioFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl FileSystem for TokioFs {
    async fn read(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.resolve(path)).await?)
    }

    async fn write(&self, path: &str, contents: &str) -> Result<()> {
        let full = self.resolve(path);
        ensure_parent(&full).await?;
        tokio::fs::write(full, contents).await?;
        Ok(())
    }

    async fn append(&self, path: &str, contents: &str) -> Result<()> {
        let full = self.resolve(path);
        ensure_parent(&full).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(full)
            .await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.resolve(path)).await?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let meta = tokio::fs::metadata(self.resolve(path)).await?;
        Ok(FileStat { size: meta.len() })
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        tokio::fs::rename(self.resolve(from), self.resolve(to)).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        tokio::fs::remove_file(self.resolve(path)).await?;
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(self.resolve(dir)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// In-memory [`FileSystem`] for tests.
#[derive(Default)]
pub struct MemFs {
    files: RwLock<HashMap<String, String>>,
    dirs: RwLock<HashSet<String>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(path: &str) -> crate::Error {
        std::io::Error::new(ErrorKind::NotFound, format!("no such file: {path}")).into()
    }
}

#[async_trait]
impl FileSystem for MemFs {
    async fn read(&self, path: &str) -> Result<String> {
        self.files
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(path))
    }

    async fn write(&self, path: &str, contents: &str) -> Result<()> {
        self.files
            .write()
            .unwrap()
            .insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn append(&self, path: &str, contents: &str) -> Result<()> {
        self.files
            .write()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_str(contents);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.read().unwrap().contains_key(path)
            || self.dirs.read().unwrap().contains(path))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.dirs.write().unwrap().insert(path.to_string());
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        self.files
            .read()
            .unwrap()
            .get(path)
            .map(|contents| FileStat {
                size: contents.len() as u64,
            })
            .ok_or_else(|| Self::not_found(path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files.write().unwrap();
        let contents = files.remove(from).ok_or_else(|| Self::not_found(from))?;
        files.insert(to.to_string(), contents);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.files
            .write()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .files
            .read()
            .unwrap()
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }
}
