//! File façade (spec.md §4.2): the minimal file-I/O surface the WAL engine
//! consumes, and its single POSIX-backed implementation.
//!
//! Three disjoint locking planes meet here, deliberately not unified per
//! spec.md §4.2's design rationale:
//! 1. `mutex()` / `exclusive_mutex()` — in-process only, delegated to the
//!    file identity registry so every handle onto the same filesystem
//!    object shares them.
//! 2. `file_lock()` / `try_file_lock()` — cross-process advisory byte-range
//!    locks via `fcntl(F_SETLK[W])`.
//! 3. Shared memory mapping (`map_shared`) — visible to every process, not
//!    a lock at all.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use luxwal_error::{LuxWalError, Result};

use crate::identity::{self, FileSerial};
use crate::mmap::MmapSegment;

/// Options controlling how [`PosixVfs::open`] opens a path.
#[derive(Debug, Clone, Copy)]
pub struct VfsOpenOptions {
    pub create: bool,
    pub create_new: bool,
    pub read: bool,
    pub write: bool,
}

impl VfsOpenOptions {
    /// Open an existing file for read/write, failing if it is missing.
    #[must_use]
    pub const fn read_write() -> Self {
        Self {
            create: false,
            create_new: false,
            read: true,
            write: true,
        }
    }

    /// Create the file if absent, open read/write either way.
    #[must_use]
    pub const fn create_read_write() -> Self {
        Self {
            create: true,
            create_new: false,
            read: true,
            write: true,
        }
    }

    /// Create the file, failing if it already exists (spec.md §4.11's
    /// "create both files with create-exclusive" step).
    #[must_use]
    pub const fn create_new_read_write() -> Self {
        Self {
            create: true,
            create_new: true,
            read: true,
            write: true,
        }
    }
}

/// A held advisory byte-range lock. Released on `Drop`.
pub struct FileLockGuard {
    fd: RawFd,
    offset: u64,
    len: u64,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = libc::F_UNLCK as libc::c_short;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = libc::off_t::try_from(self.offset).unwrap_or(0);
        fl.l_len = libc::off_t::try_from(self.len).unwrap_or(0);
        // SAFETY: `fd` remains open for the lifetime of the owning file
        // handle, which outlives every `FileLockGuard` it issues.
        unsafe {
            let _ = libc::fcntl(self.fd, libc::F_SETLK, std::ptr::addr_of!(fl));
        }
    }
}

/// The file-I/O contract the WAL engine consumes (spec.md §4.2).
pub trait VfsFile: Send + Sync {
    fn size(&self) -> Result<u64>;
    fn path(&self) -> &Path;
    fn is_open(&self) -> bool;

    /// Re-establish the underlying descriptor after an interrupted blocking
    /// operation invalidated it. Clients MUST call this before further use.
    fn reopen(&self) -> Result<()>;

    fn read(&self, dst: &mut [u8], offset: u64) -> Result<usize>;
    fn write(&self, src: &[u8], offset: u64) -> Result<usize>;
    fn sync(&self) -> Result<()>;
    fn set_len(&self, len: u64) -> Result<()>;

    fn map_shared(&self, offset: u64, len: usize) -> Result<MmapSegment>;

    /// In-process reader/writer mutex, shared by every handle onto this
    /// same filesystem object.
    fn mutex(&self) -> &RwLock<()>;
    /// In-process exclusive-upgrade mutex, likewise shared.
    fn exclusive_mutex(&self) -> &Mutex<()>;

    fn file_lock(&self, offset: u64, len: u64, shared: bool) -> Result<FileLockGuard>;
    fn try_file_lock(&self, offset: u64, len: u64, shared: bool) -> Result<Option<FileLockGuard>>;

    /// Acquire the in-process reader side of `mutex()` without returning a
    /// borrowed guard, so a caller modeling an explicit lock-state machine
    /// (spec.md §4.7) can hold it across independent method calls. Must be
    /// paired with exactly one `unlock_inprocess_shared()`.
    fn lock_inprocess_shared(&self);
    fn unlock_inprocess_shared(&self);
    /// Same as above for the writer side of `mutex()`.
    fn lock_inprocess_exclusive(&self);
    fn unlock_inprocess_exclusive(&self);
}

struct OpenState {
    file: Option<File>,
}

/// POSIX-backed [`VfsFile`] implementation.
pub struct PosixFile {
    path: PathBuf,
    options: VfsOpenOptions,
    state: RwLock<OpenState>,
    serial: Arc<FileSerial>,
}

impl PosixFile {
    fn open_file(path: &Path, options: VfsOpenOptions) -> Result<File> {
        OpenOptions::new()
            .read(options.read)
            .write(options.write)
            .create(options.create)
            .create_new(options.create_new)
            .open(path)
            .map_err(LuxWalError::Io)
    }

    fn with_fd<T>(&self, f: impl FnOnce(RawFd) -> Result<T>) -> Result<T> {
        let guard = self.state.read();
        match &guard.file {
            Some(file) => f(file.as_raw_fd()),
            None => Err(LuxWalError::ClosedByInterrupt),
        }
    }

    fn lock_inner(&self, offset: u64, len: u64, shared: bool, blocking: bool) -> Result<bool> {
        self.with_fd(|fd| {
            let mut fl: libc::flock = unsafe { std::mem::zeroed() };
            fl.l_type = if shared { libc::F_RDLCK } else { libc::F_WRLCK } as libc::c_short;
            fl.l_whence = libc::SEEK_SET as libc::c_short;
            fl.l_start = libc::off_t::try_from(offset).map_err(|_| {
                LuxWalError::ArithmeticOverflow {
                    detail: "lock offset does not fit in off_t".to_owned(),
                }
            })?;
            fl.l_len = libc::off_t::try_from(len).map_err(|_| LuxWalError::ArithmeticOverflow {
                detail: "lock length does not fit in off_t".to_owned(),
            })?;
            let cmd = if blocking { libc::F_SETLKW } else { libc::F_SETLK };
            // SAFETY: `fd` is valid for the duration of this call, held open
            // by the `RwLock` read guard in `with_fd`.
            let rc = unsafe { libc::fcntl(fd, cmd, std::ptr::addr_of!(fl)) };
            if rc != -1 {
                return Ok(true);
            }
            let err = std::io::Error::last_os_error();
            if !blocking
                && matches!(err.raw_os_error(), Some(libc::EACCES) | Some(libc::EAGAIN))
            {
                return Ok(false);
            }
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Err(LuxWalError::ClosedByInterrupt);
            }
            Err(LuxWalError::LockFailed {
                detail: err.to_string(),
            })
        })
    }
}

impl VfsFile for PosixFile {
    fn size(&self) -> Result<u64> {
        self.with_fd(|fd| {
            // SAFETY: fd valid per with_fd's guard.
            let mut stat: libc::stat = unsafe { std::mem::zeroed() };
            let rc = unsafe { libc::fstat(fd, &mut stat) };
            if rc != 0 {
                return Err(LuxWalError::Io(std::io::Error::last_os_error()));
            }
            Ok(u64::try_from(stat.st_size).unwrap_or(0))
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.state.read().file.is_some()
    }

    fn reopen(&self) -> Result<()> {
        let file = Self::open_file(&self.path, self.options)?;
        self.state.write().file = Some(file);
        tracing::debug!(target: "luxwal.vfs::file", path = %self.path.display(), "reopened after interrupt");
        Ok(())
    }

    fn read(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        let guard = self.state.read();
        let file = guard.file.as_ref().ok_or(LuxWalError::ClosedByInterrupt)?;
        match file.read_at(dst, offset) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                drop(guard);
                self.state.write().file = None;
                Err(LuxWalError::ClosedByInterrupt)
            }
            Err(err) => Err(LuxWalError::Io(err)),
        }
    }

    fn write(&self, src: &[u8], offset: u64) -> Result<usize> {
        let guard = self.state.read();
        let file = guard.file.as_ref().ok_or(LuxWalError::ClosedByInterrupt)?;
        match file.write_at(src, offset) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                drop(guard);
                self.state.write().file = None;
                Err(LuxWalError::ClosedByInterrupt)
            }
            Err(err) => Err(LuxWalError::Io(err)),
        }
    }

    fn sync(&self) -> Result<()> {
        let guard = self.state.read();
        let file = guard.file.as_ref().ok_or(LuxWalError::ClosedByInterrupt)?;
        file.sync_all().map_err(LuxWalError::Io)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        let guard = self.state.read();
        let file = guard.file.as_ref().ok_or(LuxWalError::ClosedByInterrupt)?;
        file.set_len(len).map_err(LuxWalError::Io)
    }

    fn map_shared(&self, offset: u64, len: usize) -> Result<MmapSegment> {
        self.with_fd(|fd| MmapSegment::map(fd, offset, len))
    }

    fn mutex(&self) -> &RwLock<()> {
        &self.serial.rw_mutex
    }

    fn exclusive_mutex(&self) -> &Mutex<()> {
        &self.serial.exclusive_mutex
    }

    fn file_lock(&self, offset: u64, len: u64, shared: bool) -> Result<FileLockGuard> {
        self.lock_inner(offset, len, shared, true)?;
        let fd = self.with_fd(|fd| Ok(fd))?;
        Ok(FileLockGuard { fd, offset, len })
    }

    fn try_file_lock(&self, offset: u64, len: u64, shared: bool) -> Result<Option<FileLockGuard>> {
        if self.lock_inner(offset, len, shared, false)? {
            let fd = self.with_fd(|fd| Ok(fd))?;
            Ok(Some(FileLockGuard { fd, offset, len }))
        } else {
            Ok(None)
        }
    }

    fn lock_inprocess_shared(&self) {
        use lock_api::RawRwLock;
        self.serial.rw_mutex.raw().lock_shared();
    }

    fn unlock_inprocess_shared(&self) {
        use lock_api::RawRwLock;
        // SAFETY: callers pair this with exactly one prior
        // `lock_inprocess_shared()`, matching the lock state machine's own
        // acquire/release discipline (spec.md §4.7).
        unsafe {
            self.serial.rw_mutex.raw().unlock_shared();
        }
    }

    fn lock_inprocess_exclusive(&self) {
        use lock_api::RawRwLock;
        self.serial.rw_mutex.raw().lock_exclusive();
    }

    fn unlock_inprocess_exclusive(&self) {
        use lock_api::RawRwLock;
        // SAFETY: callers pair this with exactly one prior
        // `lock_inprocess_exclusive()`.
        unsafe {
            self.serial.rw_mutex.raw().unlock_exclusive();
        }
    }
}

impl Drop for PosixFile {
    fn drop(&mut self) {
        identity::release(&self.serial);
    }
}

/// The VFS entry point: opens paths into [`PosixFile`] handles.
pub trait Vfs {
    type File: VfsFile;

    fn open(&self, path: &Path, options: VfsOpenOptions) -> Result<Self::File>;
}

/// The only [`Vfs`] implementation this crate ships: plain POSIX files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixVfs;

impl Vfs for PosixVfs {
    type File = PosixFile;

    fn open(&self, path: &Path, options: VfsOpenOptions) -> Result<PosixFile> {
        let file = PosixFile::open_file(path, options)?;
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let serial = identity::find(&canonical)?;
        Ok(PosixFile {
            path: path.to_path_buf(),
            options,
            state: RwLock::new(OpenState { file: Some(file) }),
            serial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let vfs = PosixVfs;
        let file = vfs.open(&path, VfsOpenOptions::create_new_read_write()).unwrap();
        file.write(b"hello", 0).unwrap();
        let mut buf = [0u8; 5];
        let n = file.read(&mut buf, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn create_new_fails_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let vfs = PosixVfs;
        let _first = vfs.open(&path, VfsOpenOptions::create_new_read_write()).unwrap();
        let second = vfs.open(&path, VfsOpenOptions::create_new_read_write());
        assert!(second.is_err());
    }

    #[test]
    fn shared_locks_coexist_exclusive_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let vfs = PosixVfs;
        let a = vfs.open(&path, VfsOpenOptions::create_new_read_write()).unwrap();
        let b = vfs.open(&path, VfsOpenOptions::read_write()).unwrap();

        let lock_a = a.try_file_lock(0, 1, true).unwrap();
        assert!(lock_a.is_some());
        let lock_b = b.try_file_lock(0, 1, true).unwrap();
        assert!(lock_b.is_some());
        drop(lock_b);
        drop(lock_a);

        let excl = a.try_file_lock(0, 1, false).unwrap();
        assert!(excl.is_some());
        let other_shared = b.try_file_lock(0, 1, true).unwrap();
        assert!(other_shared.is_none());
    }

    #[test]
    fn same_path_shares_in_process_mutex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let vfs = PosixVfs;
        let a = vfs.open(&path, VfsOpenOptions::create_new_read_write()).unwrap();
        let b = vfs.open(&path, VfsOpenOptions::read_write()).unwrap();

        let _guard = a.mutex().write();
        assert!(b.mutex().try_write().is_none());
    }

    #[test]
    fn inprocess_paired_locks_exclude_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let vfs = PosixVfs;
        let a = vfs.open(&path, VfsOpenOptions::create_new_read_write()).unwrap();
        let b = vfs.open(&path, VfsOpenOptions::read_write()).unwrap();

        a.lock_inprocess_shared();
        assert!(b.mutex().try_write().is_none());
        a.unlock_inprocess_shared();
        assert!(b.mutex().try_write().is_some());

        a.lock_inprocess_exclusive();
        assert!(b.mutex().try_read().is_none());
        a.unlock_inprocess_exclusive();
    }
}
