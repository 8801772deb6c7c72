//! Fixed-width types and wire constants shared by every `luxwal` crate.
//!
//! No logic lives here, just the vocabulary every other crate builds on.

use serde::{Deserialize, Serialize};

/// Page payload size in bytes. Fixed for this WAL format (spec.md §3).
pub const PAGE_SIZE_BYTES: usize = 4096;

/// Size in bytes of the on-disk WAL header record (spec.md §3).
pub const WAL_HEADER_BYTES: usize = 32;

/// Size in bytes of a single frame header, excluding the page payload.
pub const FRAME_HEADER_BYTES: usize = 32;

/// Size in bytes of one complete frame: header + page image.
pub const FRAME_BYTES: usize = FRAME_HEADER_BYTES + PAGE_SIZE_BYTES;

/// Magic constant identifying a `luxwal` WAL file (`"LUX1"`).
pub const WAL_MAGIC: u32 = 0x4C55_5831;

/// Size in bytes of one copy of the shared-memory index header.
pub const INDEX_HEADER_BYTES: usize = 32;

/// Number of duplicated index-header copies kept in shared memory.
pub const INDEX_HEADER_COPIES: usize = 2;

/// Size in bytes of the lock-byte array following the duplicated headers.
pub const LOCK_BYTES_LEN: usize = 8;

/// Byte offset, within the lock-byte array, of the SHARED lock slot.
pub const LOCK_SLOT_SHARED_OFFSET: u64 = 0;

/// Byte offset, within the lock-byte array, of the EXCLUSIVE lock slot.
pub const LOCK_SLOT_EXCLUSIVE_OFFSET: u64 = 2;

/// Length in bytes of each byte-range lock slot.
pub const LOCK_SLOT_LEN: u64 = 1;

/// Initial capacity, in entries, of the frame→page hash table.
pub const HASH_TABLE_INITIAL_CAPACITY: u32 = 4096;

/// Load factor at which the hash table doubles its capacity.
pub const HASH_TABLE_MAX_LOAD_FACTOR: f64 = 0.75;

/// Sentinel empty-entry key in the frame→page hash table.
pub const HASH_TABLE_EMPTY_KEY: i32 = -1;

/// Sentinel value meaning "no committed frame yet" for `lastCommitFrame`.
pub const NO_COMMIT_FRAME: i32 = -1;

/// FNV-style hash engine seed (spec.md §4.1).
pub const HASH_ENGINE_SEED: u64 = 0xCBF2_9CE4_8422_2325;

/// FNV-style hash engine prime (spec.md §4.1).
pub const HASH_ENGINE_PRIME: u64 = 0x0000_0001_0000_01B3;

/// A 1-based page number in the database. Page `0` never appears on disk;
/// it is reserved as a sentinel in call sites that need "no page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageNumber(u64);

impl PageNumber {
    /// Construct a page number, panicking if `value == 0`.
    ///
    /// Use [`PageNumber::new`] at I/O boundaries where `0` must be rejected
    /// as a recoverable error instead.
    #[must_use]
    pub fn from_valid(value: u64) -> Self {
        assert!(value >= 1, "page numbers are 1-based, got 0");
        Self(value)
    }

    /// Construct a page number, returning `None` for the invalid `0` value.
    #[must_use]
    pub const fn new(value: u64) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// A frame slot index, `-1` meaning "none" (spec.md §3, `lastCommitFrame`,
/// `cursor`). Kept as a bare `i32` newtype rather than an `Option<u32>` so
/// it round-trips identically through the on-disk/shared-memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameIndex(i32);

impl FrameIndex {
    pub const NONE: Self = Self(-1);

    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }

    /// Returns the next frame index (`self + 1`), used to compute `cursor`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<i32> for FrameIndex {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// The random/sequential salt pair rotated at each checkpoint (spec.md §3,
/// GLOSSARY "Salts").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Salts {
    pub random: u32,
    pub sequential: u32,
}

impl Salts {
    #[must_use]
    pub const fn new(random: u32, sequential: u32) -> Self {
        Self { random, sequential }
    }
}

/// The three-state lock-state bitmask of spec.md §4.7.
///
/// Represented as a bitmask over `{SHARED, EXCLUSIVE}` exactly as specified:
/// `NONE = 0x01`, `SHARED = 0x02`, `EXCLUSIVE = 0x04`. `SHARED | EXCLUSIVE`
/// is a valid, and in fact the only legal, state for an upgraded writer —
/// exclusive is additive over shared, never a replacement for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockState(u8);

impl LockState {
    pub const NONE: Self = Self(0x01);
    pub const SHARED: Self = Self(0x02);
    pub const EXCLUSIVE: Self = Self(0x04);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn has_shared(self) -> bool {
        self.0 & Self::SHARED.0 != 0
    }

    #[must_use]
    pub const fn has_exclusive(self) -> bool {
        self.0 & Self::EXCLUSIVE.0 != 0
    }

    #[must_use]
    pub const fn with_shared(self) -> Self {
        Self((self.0 & !Self::NONE.0) | Self::SHARED.0)
    }

    #[must_use]
    pub const fn with_exclusive(self) -> Self {
        Self((self.0 & !Self::NONE.0) | Self::EXCLUSIVE.0)
    }

    #[must_use]
    pub const fn without_exclusive(self) -> Self {
        let cleared = self.0 & !Self::EXCLUSIVE.0;
        if cleared == 0 { Self::NONE } else { Self(cleared) }
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_number_rejects_zero() {
        assert!(PageNumber::new(0).is_none());
        assert_eq!(PageNumber::new(1).unwrap().get(), 1);
    }

    #[test]
    fn frame_index_none_is_negative() {
        assert!(FrameIndex::NONE.is_none());
        assert!(!FrameIndex::new(0).is_none());
        assert_eq!(FrameIndex::NONE.next().get(), 0);
    }

    #[test]
    fn lock_state_transitions() {
        let none = LockState::NONE;
        assert!(!none.has_shared());
        let shared = none.with_shared();
        assert!(shared.has_shared());
        assert!(!shared.has_exclusive());
        let exclusive = shared.with_exclusive();
        assert!(exclusive.has_shared());
        assert!(exclusive.has_exclusive());
        let back_to_shared = exclusive.without_exclusive();
        assert!(back_to_shared.has_shared());
        assert!(!back_to_shared.has_exclusive());
    }
}
