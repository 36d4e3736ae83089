//! Bundle directory layout
//!
//! Bundles live directly under the stack root as `<prefix>.<index>`, with a
//! decimal index. Live indices always form one contiguous run; the highest
//! index holds the values closest to the top of the stack.
//!
//! ```text
//! <root>/
//!   stack.0    <- oldest values (bottom of the stack)
//!   stack.1
//!   stack.2    <- most recently spilled bundle
//! ```
//!
//! [`BundleStore`] only knows about files. Ordering and buffering decisions
//! belong to the stack.

use crate::error::{Result, StackError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Inclusive range of live bundle indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleRange {
    pub min: u64,
    pub max: u64,
}

impl BundleRange {
    /// Number of bundles in the range
    pub fn len(&self) -> u64 {
        self.max - self.min + 1
    }

    /// Range after appending the next bundle
    pub fn push(range: Option<BundleRange>) -> BundleRange {
        match range {
            Some(r) => BundleRange {
                min: r.min,
                max: r.max + 1,
            },
            None => BundleRange { min: 0, max: 0 },
        }
    }

    /// Range after consuming the top bundle (`None` once nothing is left)
    pub fn pop(self) -> Option<BundleRange> {
        if self.max > self.min {
            Some(BundleRange {
                min: self.min,
                max: self.max - 1,
            })
        } else {
            None
        }
    }
}

/// File-level access to one stack's bundles
#[derive(Debug, Clone)]
pub struct BundleStore {
    root: PathBuf,
    prefix: String,
}

impl BundleStore {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        BundleStore {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the bundle with the given index
    pub fn path(&self, index: u64) -> PathBuf {
        self.root.join(format!("{}.{}", self.prefix, index))
    }

    /// Create the root if needed and find the live bundle range
    ///
    /// Entries whose name does not start with `<prefix>.` are ignored. An
    /// entry that does, but whose suffix is not a decimal integer, is a
    /// corrupt index. So is a hole in the run of indices.
    pub fn discover(&self) -> Result<Option<BundleRange>> {
        fs::create_dir_all(&self.root)?;

        let marker = format!("{}.", self.prefix);
        let mut indices = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(suffix) = name.as_encoded_bytes().strip_prefix(marker.as_bytes()) else {
                continue;
            };
            let index = std::str::from_utf8(suffix).ok().and_then(parse_index);
            indices.push(index.ok_or_else(|| StackError::CorruptIndex {
                path: entry.path(),
                reason: format!(
                    "suffix '{}' is not a bundle index",
                    String::from_utf8_lossy(suffix)
                ),
            })?);
        }

        indices.sort_unstable();

        let (Some(&min), Some(&max)) = (indices.first(), indices.last()) else {
            return Ok(None);
        };

        for (expected, &found) in (min..).zip(indices.iter()) {
            if found != expected {
                return Err(StackError::CorruptIndex {
                    path: self.path(expected),
                    reason: format!(
                        "bundle {} is missing from range {}..={}",
                        expected, min, max
                    ),
                });
            }
        }

        Ok(Some(BundleRange { min, max }))
    }

    /// Write a complete bundle payload
    ///
    /// If the write fails, a partially written file is removed before the
    /// error is returned so no short bundle is ever left behind.
    pub fn write(&self, index: u64, payload: &[u8]) -> Result<PathBuf> {
        let path = self.path(index);
        if let Err(e) = fs::write(&path, payload) {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        Ok(path)
    }

    /// Read a complete bundle payload
    pub fn read(&self, index: u64) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(index))?)
    }

    pub fn remove(&self, index: u64) -> Result<()> {
        Ok(fs::remove_file(self.path(index))?)
    }

    /// Delete the root and everything beneath it
    ///
    /// An absent root counts as success. Other removal failures are returned
    /// so the caller can decide whether the directory really survived.
    pub fn destroy(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn parse_index(suffix: &str) -> Option<u64> {
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}
