//! Disposal of segment files that are no longer needed.
//!
//! Pruning and startup discontinuity resolution never call `remove_file`
//! directly. They hand files to a [`RecycleBin`], which may keep them around
//! for an operator to inspect.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub trait RecycleBin: Send + Sync {
  /// Takes ownership of the file at `path`. The file must no longer exist at
  /// `path` once this returns `Ok`.
  fn recycle(&self, path: &Path) -> Result<()>;
}

/// Hard-deletes recycled files.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeletingRecycleBin;

impl RecycleBin for DeletingRecycleBin {
  fn recycle(&self, path: &Path) -> Result<()> {
    match fs::remove_file(path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

/// Soft-deletes recycled files by moving them into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryRecycleBin {
  directory: PathBuf,
}

impl DirectoryRecycleBin {
  pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
    let directory = directory.into();
    fs::create_dir_all(&directory)?;
    Ok(Self { directory })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// Names of the files currently held by the bin.
  pub fn contents(&self) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(&self.directory)? {
      let entry = entry?;
      names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort_unstable();
    Ok(names)
  }
}

impl RecycleBin for DirectoryRecycleBin {
  fn recycle(&self, path: &Path) -> Result<()> {
    let Some(name) = path.file_name() else {
      return Ok(());
    };
    match fs::rename(path, self.directory.join(name)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

/// Removes `start` and its ancestors while they are empty, stopping at `root`.
pub(crate) fn remove_empty_parents(start: &Path, root: &Path) {
  let mut current = Some(start);
  while let Some(dir) = current {
    if dir == root || !dir.starts_with(root) {
      break;
    }
    // Fails (and stops the walk) as soon as a directory still has entries.
    if fs::remove_dir(dir).is_err() {
      break;
    }
    current = dir.parent();
  }
}
