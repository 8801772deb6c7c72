//! File façade, file identity registry, and lock primitives (spec.md §4.2,
//! §4.3, §4.4) consumed by the `luxwal-core` WAL engine.
//!
//! This crate is the one place in the workspace where `unsafe` is allowed:
//! memory-mapping a region and issuing raw `fcntl` byte-range locks have no
//! safe stdlib equivalent. Everything above this crate sees only safe,
//! typed APIs.

pub mod file;
pub mod identity;
pub mod locks;
pub mod mmap;

pub use file::{FileLockGuard, PosixFile, PosixVfs, Vfs, VfsFile, VfsOpenOptions};
pub use locks::{lock_all, unlock_all};
pub use mmap::MmapSegment;
