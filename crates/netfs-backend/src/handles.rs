//! Open file handle registry.
//!
//! Backends open a file first and only then register it, so an id is never
//! visible before its file is open. Ids come from a counter that starts at
//! 1 and never repeats within a process: a stale id from a released handle
//! can't alias a newer one.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use netfs_proto::{FsError, FsResult, HandleId, OpenFlags};
use parking_lot::Mutex;

/// One open file.
#[derive(Debug)]
pub struct OpenHandle {
    id: HandleId,
    path: PathBuf,
    flags: OpenFlags,
    /// `None` once the handle has been released.
    file: Mutex<Option<File>>,
}

impl OpenHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Path the handle was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Run `f` against the open file while holding the handle's lock.
    ///
    /// Seek-then-transfer sequences must happen inside one call so two
    /// requests on the same handle can't interleave between the two steps.
    pub fn with_file<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> FsResult<T> {
        let mut slot = self.file.lock();
        let file = slot.as_mut().ok_or(FsError::BadHandle(self.id))?;
        f(file).map_err(|e| match FsError::from_io(e, &self.path) {
            // EBADF from the OS means the file was not opened for this transfer.
            FsError::BadHandle(_) => FsError::BadHandle(self.id),
            other => other,
        })
    }

    /// Take the file out of its slot, closing it.
    fn close(&self) -> bool {
        self.file.lock().take().is_some()
    }
}

/// Registry of open handles shared by every request on one server.
#[derive(Debug)]
pub struct HandleRegistry {
    next_id: AtomicU64,
    open: Mutex<HashMap<HandleId, Arc<OpenHandle>>>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Register an already-open file and return its id.
    pub fn register(&self, path: impl Into<PathBuf>, file: File, flags: OpenFlags) -> HandleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(OpenHandle {
            id,
            path: path.into(),
            flags,
            file: Mutex::new(Some(file)),
        });
        tracing::debug!(fh = id, path = %handle.path.display(), "registered handle");
        self.open.lock().insert(id, handle);
        id
    }

    /// Look up a handle by id.
    pub fn lookup(&self, id: HandleId) -> FsResult<Arc<OpenHandle>> {
        self.open
            .lock()
            .get(&id)
            .cloned()
            .ok_or(FsError::BadHandle(id))
    }

    /// Close the underlying file, then drop the entry.
    ///
    /// The registry lock is held across both steps so no lookup can observe
    /// a half-released handle. A second call for the same id is `BadHandle`.
    pub fn unregister(&self, id: HandleId) -> FsResult<()> {
        let mut open = self.open.lock();
        let handle = open.get(&id).ok_or(FsError::BadHandle(id))?;
        handle.close();
        open.remove(&id);
        tracing::debug!(fh = id, "released handle");
        Ok(())
    }

    /// Force-close every remaining handle. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.open.lock().drain().collect();
        let count = drained.iter().filter(|(_, handle)| handle.close()).count();
        if count > 0 {
            tracing::info!(count, "closed outstanding handles");
        }
        count
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self, id: HandleId) -> bool {
        self.open.lock().contains_key(&id)
    }
}

impl Drop for HandleRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
