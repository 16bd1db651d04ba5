//! Virtual path resolution under a fixed root.
//!
//! A virtual path is slash-rooted as the client sees it. Resolution
//! normalises it lexically, refuses anything that climbs above the root,
//! then canonicalises the deepest existing ancestor so a symlinked directory
//! cannot carry the result outside the root either.
//!
//! [`Sandbox::resolve`] leaves the final component alone, since `unlink` and
//! `readlink` must act on a link itself. [`Sandbox::resolve_follow`] chases a
//! final symlink hop by hop and holds every target to the same containment
//! rule, so calls the host would follow never land outside the root.
//! [`Sandbox::resolve_entry`] refuses the root as a directory entry.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use netfs_proto::{FsError, FsResult, PathResolver};

/// Hops allowed when chasing a final symlink, matching Linux `MAXSYMLINKS`.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolves virtual paths to real paths contained in `root`.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    /// Accept an NTFS alternate data stream suffix (`name:stream`).
    streams: bool,
}

impl Sandbox {
    /// Create a sandbox over an existing directory.
    ///
    /// The root is canonicalised once here (e.g. macOS `/tmp` →
    /// `/private/tmp`) so containment checks compare like with like.
    pub fn new(root: impl AsRef<Path>) -> FsResult<Self> {
        let root = root.as_ref();
        let canonical = dunce::canonicalize(root).map_err(|e| FsError::from_io(e, root))?;
        if !canonical.is_dir() {
            return Err(FsError::NotADirectory(canonical.display().to_string()));
        }
        Ok(Self {
            root: canonical,
            streams: false,
        })
    }

    /// Allow `file:stream` final components.
    pub fn with_streams(mut self) -> Self {
        self.streams = true;
        self
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a virtual path to an absolute path within the root.
    pub fn resolve(&self, virtual_path: &str) -> FsResult<PathBuf> {
        let escape = || FsError::path_escapes_root(virtual_path);

        let mut parts: Vec<OsString> = Vec::new();
        for component in Path::new(virtual_path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop().ok_or_else(escape)?;
                }
                Component::Normal(name) => parts.push(name.to_os_string()),
                Component::Prefix(_) => return Err(escape()),
            }
        }

        let Some(last) = parts.pop() else {
            return Ok(self.root.clone());
        };

        let (name, stream) = self.split_stream(last)?;

        let parent = parts.iter().fold(self.root.clone(), |acc, p| acc.join(p));
        let parent = self.anchor(&parent, virtual_path)?;

        let mut resolved = parent.join(name);
        if let Some(stream) = stream {
            let mut with_stream = resolved.into_os_string();
            with_stream.push(":");
            with_stream.push(stream);
            resolved = PathBuf::from(with_stream);
        }
        Ok(resolved)
    }

    /// Resolve a virtual path, following a final symlink while its target
    /// stays inside the root. A missing final component resolves as-is, so
    /// `create` through a dangling link lands where the link points.
    pub fn resolve_follow(&self, virtual_path: &str) -> FsResult<PathBuf> {
        let mut current = self.resolve(virtual_path)?;

        for _ in 0..MAX_SYMLINK_HOPS {
            let meta = match fs::symlink_metadata(&current) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(current),
                Err(e) => return Err(FsError::from_io(e, &current)),
            };
            if !meta.file_type().is_symlink() {
                return Ok(current);
            }

            let target = fs::read_link(&current).map_err(|e| FsError::from_io(e, &current))?;
            let base = current.parent().unwrap_or(self.root.as_path());
            current = self.contain(&normalize(&base.join(target)), virtual_path)?;
        }

        Err(FsError::TooManySymlinks(virtual_path.to_string()))
    }

    /// Resolve a path naming a directory entry. The root has no entry of its
    /// own, so it can't be created, removed or renamed.
    pub fn resolve_entry(&self, virtual_path: &str) -> FsResult<PathBuf> {
        let resolved = self.resolve(virtual_path)?;
        if resolved == self.root {
            tracing::warn!(virtual_path, "refused to modify the export root");
            return Err(FsError::permission_denied(format!(
                "{virtual_path}: export root"
            )));
        }
        Ok(resolved)
    }

    /// Check an absolute host path against the root, canonicalising all but
    /// its final component.
    fn contain(&self, path: &Path, virtual_path: &str) -> FsResult<PathBuf> {
        if path == self.root {
            return Ok(self.root.clone());
        }
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => Ok(self.anchor(parent, virtual_path)?.join(name)),
            _ => self.anchor(path, virtual_path),
        }
    }

    /// Separate an alternate data stream suffix from the final component.
    fn split_stream(&self, last: OsString) -> FsResult<(OsString, Option<String>)> {
        if !self.streams {
            return Ok((last, None));
        }
        let Some(text) = last.to_str() else {
            return Ok((last, None));
        };
        match text.split_once(':') {
            Some((base, stream)) if !base.is_empty() && !stream.is_empty() => {
                Ok((OsString::from(base), Some(stream.to_string())))
            }
            Some(_) => Err(FsError::invalid_argument(format!(
                "malformed stream name: {text}"
            ))),
            None => Ok((last, None)),
        }
    }

    /// Canonicalise the deepest existing ancestor of `dir` and re-append the
    /// missing tail, failing if the canonical ancestor is outside the root.
    fn anchor(&self, dir: &Path, virtual_path: &str) -> FsResult<PathBuf> {
        let mut existing = dir.to_path_buf();
        let mut missing: Vec<OsString> = Vec::new();

        let canonical = loop {
            match dunce::canonicalize(&existing) {
                Ok(canonical) => break canonical,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    let Some(name) = existing.file_name() else {
                        return Err(FsError::from_io(e, dir));
                    };
                    missing.push(name.to_os_string());
                    if !existing.pop() {
                        return Err(FsError::from_io(e, dir));
                    }
                }
                Err(e) => return Err(FsError::from_io(e, dir)),
            }
        };

        if !canonical.starts_with(&self.root) {
            tracing::warn!(
                virtual_path,
                resolved = %canonical.display(),
                "path escapes root through a symlink"
            );
            return Err(FsError::path_escapes_root(virtual_path));
        }

        Ok(missing.into_iter().rev().fold(canonical, |acc, p| acc.join(p)))
    }
}

/// Fold `.` and `..` out of an absolute path without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

impl PathResolver for Sandbox {
    fn resolve(&self, virtual_path: &str) -> FsResult<PathBuf> {
        Sandbox::resolve(self, virtual_path)
    }

    fn resolve_follow(&self, virtual_path: &str) -> FsResult<PathBuf> {
        Sandbox::resolve_follow(self, virtual_path)
    }

    fn resolve_entry(&self, virtual_path: &str) -> FsResult<PathBuf> {
        Sandbox::resolve_entry(self, virtual_path)
    }
}
