//! File identity registry (spec.md §4.3).
//!
//! Canonicalizes paths to a unique filesystem serial and hands out, to
//! every in-process handle opened against the same underlying file, the
//! *same* reader/writer mutex and exclusive mutex objects. This is what lets
//! two different `PosixFile`s that happen to open the same `<db>-shm` path
//! (e.g. via different relative paths) cooperate correctly within one
//! process.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use std::sync::OnceLock;

use crate::locks::{lock_all, unlock_all};

/// The filesystem's canonical identity for a file: `(device, inode)` on
/// Unix-like systems. Two paths that resolve to the same file yield equal
/// keys regardless of how each path was spelled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FileKey {
    /// `(st_dev, st_ino)`, available wherever `stat` succeeds.
    DeviceInode(u64, u64),
    /// Fallback when a stable file key is unavailable: the canonicalized
    /// absolute path string. Spec.md §6 explicitly allows this; correctness
    /// does not depend on cross-platform file-key availability.
    CanonicalPath(String),
}

/// One entry in the identity registry: the mutexes shared by every
/// in-process handle that resolves to this filesystem object.
pub struct FileSerial {
    key: FileKey,
    refcount: Mutex<usize>,
    /// In-process reader/writer coordination (spec.md §4.2 `mutex()`).
    pub(crate) rw_mutex: RwLock<()>,
    /// In-process exclusive-upgrade coordination (spec.md §4.2
    /// `exclusive_mutex()`).
    pub(crate) exclusive_mutex: Mutex<()>,
}

impl std::fmt::Debug for FileSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSerial").field("key", &self.key).finish()
    }
}

struct Registry {
    /// Most-recently-created entries live at the tail; `find` searches
    /// tail-to-head per spec.md §4.3.
    entries: Vec<Arc<FileSerial>>,
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(Registry { entries: Vec::new() }))
}

fn file_key_for(path: &Path) -> std::io::Result<FileKey> {
    let canonical = std::fs::canonicalize(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(&canonical)?;
        Ok(FileKey::DeviceInode(meta.dev(), meta.ino()))
    }
    #[cfg(not(unix))]
    {
        Ok(FileKey::CanonicalPath(canonical.to_string_lossy().into_owned()))
    }
}

/// Resolve `path` to its filesystem serial, incrementing its reference
/// count. Two paths resolving to the same filesystem object return the same
/// `Arc<FileSerial>` (by reference equality), and therefore share the same
/// mutexes, per spec.md §4.3's invariant.
///
/// Inserting a new entry additionally takes the exclusive side of the
/// current tail's own mutex in the deadlock-free order of §4.4 before
/// linking the new entry in after it (spec.md §4.3), so a thread already
/// coordinating through that neighbor's mutex never observes the registry
/// mid-insert.
pub fn find(path: &Path) -> std::io::Result<Arc<FileSerial>> {
    let key = file_key_for(path)?;

    // Shared side first: most lookups hit an existing entry.
    {
        let guard = registry().read();
        if let Some(serial) = guard.entries.iter().rev().find(|s| s.key == key) {
            *serial.refcount.lock() += 1;
            return Ok(Arc::clone(serial));
        }
    }

    // Miss: take the exclusive side and re-check (another thread may have
    // inserted it between our read and write acquisitions).
    let mut guard = registry().write();
    if let Some(serial) = guard.entries.iter().rev().find(|s| s.key == key) {
        *serial.refcount.lock() += 1;
        return Ok(Arc::clone(serial));
    }

    let serial = Arc::new(FileSerial {
        key,
        refcount: Mutex::new(1),
        rw_mutex: RwLock::new(()),
        exclusive_mutex: Mutex::new(()),
    });

    let tail = guard.entries.last().map(Arc::clone);
    let neighbor_locks: Vec<&RwLock<()>> = tail.iter().map(|t| &t.rw_mutex).collect();
    let neighbor_guards = lock_all(&neighbor_locks);
    guard.entries.push(Arc::clone(&serial));
    unlock_all(neighbor_guards);

    tracing::debug!(target: "luxwal.vfs::identity", "created new file serial");
    Ok(serial)
}

/// Release one reference to `serial`. When the count reaches zero the entry
/// is unlinked from the registry so a later `find` of the same path creates
/// a fresh serial (and fresh mutexes).
///
/// Unlinking additionally takes the exclusive side of both structural
/// neighbors' own mutexes in the deadlock-free order of §4.4 before
/// removing this entry (spec.md §4.3), so neither neighbor's in-flight
/// coordination ever observes the registry mid-removal.
pub fn release(serial: &Arc<FileSerial>) {
    let should_unlink = {
        let mut count = serial.refcount.lock();
        *count -= 1;
        *count == 0
    };
    if !should_unlink {
        return;
    }

    let mut guard = registry().write();
    let Some(idx) = guard.entries.iter().position(|entry| Arc::ptr_eq(entry, serial)) else {
        return;
    };

    let prev = (idx > 0).then(|| Arc::clone(&guard.entries[idx - 1]));
    let next = (idx + 1 < guard.entries.len()).then(|| Arc::clone(&guard.entries[idx + 1]));
    let neighbor_locks: Vec<&RwLock<()>> = prev
        .iter()
        .chain(next.iter())
        .map(|neighbor| &neighbor.rw_mutex)
        .collect();
    let neighbor_guards = lock_all(&neighbor_locks);

    guard.entries.remove(idx);
    unlock_all(neighbor_guards);

    tracing::debug!(target: "luxwal.vfs::identity", "unlinked file serial");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn same_path_yields_same_serial() {
        let file = NamedTempFile::new().unwrap();
        let a = find(file.path()).unwrap();
        let b = find(file.path()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        release(&a);
        release(&b);
    }

    #[test]
    fn different_spellings_of_same_path_share_serial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        std::fs::write(&path, b"x").unwrap();
        let indirect = dir.path().join(".").join("a.db");

        let a = find(&path).unwrap();
        let b = find(&indirect).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        release(&a);
        release(&b);
    }

    #[test]
    fn release_to_zero_unlinks_entry() {
        let file = NamedTempFile::new().unwrap();
        let a = find(file.path()).unwrap();
        release(&a);
        let b = find(file.path()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        release(&b);
    }
}
