//! Shared memory mapping of a file region (spec.md §4.2 `map_shared`).
//!
//! A [`MmapSegment`] is visible across every process that maps the same
//! file, which is exactly what the WAL index (spec.md §4.7) relies on to
//! publish its header and hash-table state to peers without an RPC layer.

use std::os::unix::io::RawFd;

use luxwal_error::{LuxWalError, Result};

/// A `mmap`-backed region, shared (`MAP_SHARED`) so writes are visible to
/// every process mapping the same file.
///
/// The mapped pointer is treated as process-local even though the bytes it
/// refers to are shared: the raw address itself is never meaningful across
/// processes (spec.md §9, "self-referential pointer"). Callers derive
/// offsets from `(segment_base, capacity * entry_size)`, never by storing
/// and reusing a raw address.
pub struct MmapSegment {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapped region is `MAP_SHARED` and this type enforces the same
// aliasing discipline a raw slice would (no interior mutability beyond plain
// bytes); callers serialize access via the WAL index's own lock protocol.
unsafe impl Send for MmapSegment {}
unsafe impl Sync for MmapSegment {}

impl MmapSegment {
    /// Map `len` bytes of `fd` starting at `offset`, shared for read+write.
    ///
    /// `offset` must be a multiple of the OS page size; `luxwal-core` only
    /// ever maps from offset `0`, so this is not a practical constraint.
    pub fn map(fd: RawFd, offset: u64, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(LuxWalError::InvalidArgument {
                detail: "cannot map a zero-length region".to_owned(),
            });
        }
        // SAFETY: `fd` is a valid, open file descriptor owned by the caller
        // for at least the lifetime of this segment; `len` and `offset` are
        // caller-validated. Failure is reported via `errno`, not UB.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                libc::off_t::try_from(offset).map_err(|_| LuxWalError::ArithmeticOverflow {
                    detail: "mmap offset does not fit in off_t".to_owned(),
                })?,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(LuxWalError::Io(std::io::Error::last_os_error()));
        }
        Ok(Self {
            ptr: ptr.cast::<u8>(),
            len,
        })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the mapped region as bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Mutably borrow the mapped region as bytes.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of `self`,
        // and `&mut self` guarantees exclusive Rust-side access (other
        // processes mapping the same pages are coordinated out-of-band by
        // the WAL index's lock protocol, not by the borrow checker).
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Flush any cached writes to the backing file. The WAL index relies on
    /// its own explicit `sync()`/`fsync()` on the file handle for durability
    /// semantics; this is exposed for completeness over the mapped pages
    /// themselves.
    pub fn flush(&self) -> Result<()> {
        // SAFETY: `ptr`/`len` describe the live mapping owned by `self`.
        let rc = unsafe { libc::msync(self.ptr.cast(), self.len, libc::MS_SYNC) };
        if rc != 0 {
            return Err(LuxWalError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for MmapSegment {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe exactly the mapping created in `map`.
        unsafe {
            let _ = libc::munmap(self.ptr.cast(), self.len);
        }
    }
}
