//! WAL index (spec.md §4.7): composes the off-heap hash table (§4.5) and
//! the duplicated index header (§4.6) over one memory-mapped `<db>-shm`
//! segment, and owns the SHARED/EXCLUSIVE lock state machine.
//!
//! One `WalIndex` models one connection's view of the shared index — the
//! mapped bytes are genuinely shared across processes, but the lock state
//! and in-memory header mirror are this instance's own, one per connection.

use luxwal_error::{LuxWalError, Result};
use luxwal_types::{FrameIndex, LockState, Salts, HASH_TABLE_MAX_LOAD_FACTOR, INDEX_HEADER_BYTES, LOCK_BYTES_LEN, LOCK_SLOT_EXCLUSIVE_OFFSET, LOCK_SLOT_LEN, LOCK_SLOT_SHARED_OFFSET};
use luxwal_vfs::{FileLockGuard, MmapSegment, VfsFile};

use crate::frame::WalFrame;
use crate::index_header::{self, IndexHeaderFields};
use crate::shm_table;
use crate::wal_header::WalHeader;
use crate::iterator::WalIterator;

/// Byte length of the two duplicated header copies.
const HEADERS_REGION_BYTES: usize = 2 * INDEX_HEADER_BYTES;
/// Offset, within the mapped segment, of the 8-byte lock-byte array
/// (spec.md §3 region ordering: headers, then lock bytes, then table).
const LOCK_BYTE_ARRAY_OFFSET: usize = HEADERS_REGION_BYTES;
/// Offset, within the mapped segment, of the frame→page table region.
const TABLE_REGION_OFFSET: usize = LOCK_BYTE_ARRAY_OFFSET + LOCK_BYTES_LEN;

fn total_region_bytes(capacity: u32) -> usize {
    TABLE_REGION_OFFSET + shm_table::region_bytes(capacity)
}

/// The shared-memory WAL index.
pub struct WalIndex<F: VfsFile> {
    shm_file: F,
    mmap: MmapSegment,
    header: IndexHeaderFields,
    lock_state: LockState,
    shared_file_lock: Option<FileLockGuard>,
    exclusive_file_lock: Option<FileLockGuard>,
    holds_inprocess_shared: bool,
    holds_inprocess_exclusive: bool,
    growing: bool,
}

impl<F: VfsFile> WalIndex<F> {
    /// Build a brand-new index for an empty database (spec.md §4.7
    /// `build_initial`): zero-fill the segment, write both header copies
    /// with `lastCommitFrame = -1`, `cursor = 0`, and the given salts/size.
    pub fn build_initial(db_size: i64, salts: Salts, shm_file: F) -> Result<Self> {
        if db_size < 0 {
            return Err(LuxWalError::InvalidArgument {
                detail: "dbSize must be >= 0".to_owned(),
            });
        }
        let capacity = luxwal_types::HASH_TABLE_INITIAL_CAPACITY;
        let total_len = total_region_bytes(capacity);
        shm_file.set_len(total_len as u64)?;
        let mut mmap = shm_file.map_shared(0, total_len)?;

        let header = IndexHeaderFields::empty(salts, db_size);
        index_header::publish(&mut mmap.as_mut_slice()[..HEADERS_REGION_BYTES], header);
        mmap.as_mut_slice()[LOCK_BYTE_ARRAY_OFFSET..TABLE_REGION_OFFSET].fill(0);
        shm_table::init_empty(&mut mmap.as_mut_slice()[TABLE_REGION_OFFSET..], capacity);
        mmap.flush()?;

        tracing::debug!(target: "luxwal.core::wal_index", db_size, "built initial WAL index");

        Ok(Self {
            shm_file,
            mmap,
            header,
            lock_state: LockState::NONE,
            shared_file_lock: None,
            exclusive_file_lock: None,
            holds_inprocess_shared: false,
            holds_inprocess_exclusive: false,
            growing: false,
        })
    }

    /// Attach to (and, if needed, rebuild from the WAL file) an existing
    /// index segment (spec.md §4.7 `build_from_existing`).
    ///
    /// `strict_checksums` governs what happens when a current-epoch frame's
    /// checksum fails to verify against the running chain during replay: if
    /// `true` the mismatch is a `CorruptWal` error; if `false` replay simply
    /// stops at that frame, treating it and everything after it as an
    /// in-flight writer's incomplete tail (spec.md §9 "Checkpoint and
    /// recovery" treats recovery as largely out of scope; this is the one
    /// place this crate still has to make a call about a torn tail).
    pub fn build_from_existing<WF: VfsFile>(wal_file: &WF, shm_file: F, strict_checksums: bool) -> Result<Self> {
        let capacity = luxwal_types::HASH_TABLE_INITIAL_CAPACITY;
        let min_len = total_region_bytes(capacity);
        let existing_len = shm_file.size()?;

        let mut mmap = if existing_len < min_len as u64 {
            shm_file.set_len(min_len as u64)?;
            let mut fresh = shm_file.map_shared(0, min_len)?;
            let placeholder = IndexHeaderFields::empty(Salts::default(), 0);
            index_header::publish(&mut fresh.as_mut_slice()[..HEADERS_REGION_BYTES], placeholder);
            shm_table::init_empty(&mut fresh.as_mut_slice()[TABLE_REGION_OFFSET..], capacity);
            fresh
        } else {
            shm_file.map_shared(0, existing_len as usize)?
        };

        let header = index_header::read_both(&mmap.as_slice()[..HEADERS_REGION_BYTES])?;

        let mut index = Self {
            shm_file,
            mmap,
            header,
            lock_state: LockState::NONE,
            shared_file_lock: None,
            exclusive_file_lock: None,
            holds_inprocess_shared: false,
            holds_inprocess_exclusive: false,
            growing: false,
        };

        if header.is_empty() {
            index.rebuild_from_wal(wal_file, strict_checksums)?;
        }

        Ok(index)
    }

    /// Replay committed frames from `wal_file` into an empty index,
    /// opportunistically under SHARED-then-EXCLUSIVE (spec.md §4.7).
    fn rebuild_from_wal<WF: VfsFile>(&mut self, wal_file: &WF, strict_checksums: bool) -> Result<()> {
        self.acquire_shared()?;
        self.acquire_exclusive()?;

        if self.is_stale()? {
            self.unlock_all();
            return Err(LuxWalError::StaleWal);
        }

        let wal_header = WalHeader::read_from_file(wal_file, 0)?;
        let frame_count = WalIterator::<WF>::frame_count_from_file_size(wal_file.size()?);
        let iter = WalIterator::new(wal_file, frame_count)?;

        let mut rebuilt = IndexHeaderFields::empty(wal_header.salts, wal_header.db_size);
        let mut chain_seed = crate::frame::FRAME_CHAIN_INITIAL_SEED;
        for (i, frame_result) in iter.enumerate() {
            let frame = frame_result?;
            if !frame.header.matches_epoch(wal_header.salts) {
                continue;
            }
            let expected = crate::frame::recompute_checksum(chain_seed, &frame.header, frame.page());
            if expected != frame.header.checksum {
                if strict_checksums {
                    return Err(LuxWalError::CorruptWal {
                        detail: format!("frame {i} checksum mismatch during index rebuild"),
                    });
                }
                tracing::warn!(
                    target: "luxwal.core::wal_index",
                    frame = i,
                    "stopping index rebuild at first unverifiable frame"
                );
                break;
            }
            let frame_index = FrameIndex::new(i as i32);
            rebuilt.notify_appended(frame_index, frame.header.checksum as i64, frame.header.commit);
            self.put_table_entry(frame_index.get(), frame.header.page_index as i64)?;
            chain_seed = frame.header.checksum;
        }
        self.header = rebuilt;
        self.publish()?;

        self.unlock_all();
        tracing::debug!(target: "luxwal.core::wal_index", frame_count, "rebuilt WAL index from existing WAL file");
        Ok(())
    }

    #[must_use]
    pub const fn header(&self) -> IndexHeaderFields {
        self.header
    }

    #[must_use]
    pub const fn lock_state(&self) -> LockState {
        self.lock_state
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    // --- Lock state machine (spec.md §4.7) -------------------------------

    /// NONE -> SHARED, or no-op if already >= SHARED.
    pub fn acquire_shared(&mut self) -> Result<()> {
        if self.lock_state.has_shared() {
            return Ok(());
        }
        self.shm_file.lock_inprocess_shared();
        self.holds_inprocess_shared = true;
        match self.shm_file.file_lock(
            LOCK_BYTE_ARRAY_OFFSET as u64 + LOCK_SLOT_SHARED_OFFSET,
            LOCK_SLOT_LEN,
            true,
        ) {
            Ok(guard) => {
                self.shared_file_lock = Some(guard);
                self.lock_state = self.lock_state.with_shared();
                tracing::debug!(target: "luxwal.core::wal_index", "acquired SHARED");
                Ok(())
            }
            Err(err) => {
                self.shm_file.unlock_inprocess_shared();
                self.holds_inprocess_shared = false;
                Err(err)
            }
        }
    }

    /// SHARED -> EXCLUSIVE, or no-op if already EXCLUSIVE. Fails with
    /// `OutOfOrderLock` if SHARED is not already held.
    pub fn acquire_exclusive(&mut self) -> Result<()> {
        if !self.lock_state.has_shared() {
            return Err(LuxWalError::OutOfOrderLock {
                detail: "EXCLUSIVE requested without SHARED held".to_owned(),
            });
        }
        if self.lock_state.has_exclusive() {
            return Ok(());
        }
        self.shm_file.lock_inprocess_exclusive();
        self.holds_inprocess_exclusive = true;
        match self.shm_file.file_lock(
            LOCK_BYTE_ARRAY_OFFSET as u64 + LOCK_SLOT_EXCLUSIVE_OFFSET,
            LOCK_SLOT_LEN,
            false,
        ) {
            Ok(guard) => {
                self.exclusive_file_lock = Some(guard);
                self.lock_state = self.lock_state.with_exclusive();
                tracing::debug!(target: "luxwal.core::wal_index", "acquired EXCLUSIVE");
                Ok(())
            }
            Err(err) => {
                self.shm_file.unlock_inprocess_exclusive();
                self.holds_inprocess_exclusive = false;
                Err(err)
            }
        }
    }

    /// Release EXCLUSIVE (cross-process then in-process) if held; no-op
    /// otherwise. SHARED, if held, is left untouched.
    pub fn release_exclusive(&mut self) {
        if !self.lock_state.has_exclusive() {
            return;
        }
        self.exclusive_file_lock = None;
        if self.holds_inprocess_exclusive {
            self.shm_file.unlock_inprocess_exclusive();
            self.holds_inprocess_exclusive = false;
        }
        self.lock_state = self.lock_state.without_exclusive();
        tracing::debug!(target: "luxwal.core::wal_index", "released EXCLUSIVE");
    }

    /// Release EXCLUSIVE (if held), then SHARED. Matches spec.md §4.7's
    /// `EXCLUSIVE + SHARED -> unlock` transition.
    pub fn unlock_all(&mut self) {
        self.release_exclusive();
        if !self.lock_state.has_shared() {
            return;
        }
        self.shared_file_lock = None;
        if self.holds_inprocess_shared {
            self.shm_file.unlock_inprocess_shared();
            self.holds_inprocess_shared = false;
        }
        self.lock_state = LockState::NONE;
        tracing::debug!(target: "luxwal.core::wal_index", "released SHARED");
    }

    // --- Staleness --------------------------------------------------------

    /// Reload the mapped header copies and report whether they diverge
    /// from this instance's in-memory snapshot (spec.md §4.7 `is_stale`).
    pub fn is_stale(&self) -> Result<bool> {
        let fresh = index_header::read_both(&self.mmap.as_slice()[..HEADERS_REGION_BYTES])?;
        Ok(fresh != self.header)
    }

    /// Re-read both header copies into this instance's in-memory mirror
    /// (spec.md §4.11 `begin_read_transaction`: "if stale, reload").
    pub fn reload(&mut self) -> Result<()> {
        self.header = index_header::read_both(&self.mmap.as_slice()[..HEADERS_REGION_BYTES])?;
        Ok(())
    }

    // --- Append / lookup ---------------------------------------------------

    /// Mutate both header copies and insert `(frameIndex, pageIndex)` into
    /// the frame→page table. Requires EXCLUSIVE.
    pub fn notify_appended(&mut self, frame: &WalFrame, frame_index: FrameIndex) -> Result<()> {
        if !self.lock_state.has_exclusive() {
            return Err(LuxWalError::internal("notify_appended requires EXCLUSIVE held"));
        }
        self.header
            .notify_appended(frame_index, frame.header.checksum as i64, frame.header.commit);
        self.put_table_entry(frame_index.get(), frame.header.page_index as i64)
    }

    /// Returns the frame slot `pageIndex` currently lives in, or `-1`.
    /// Requires at least SHARED.
    #[must_use]
    pub fn find_frame_index_of(&self, page_index: u64) -> i32 {
        if !self.lock_state.has_shared() {
            tracing::warn!(
                target: "luxwal.core::wal_index",
                "find_frame_index_of called without SHARED held"
            );
        }
        shm_table::key_of(self.table_region(), page_index as i64)
    }

    /// Write the in-memory header back to both mapped copies (spec.md §9:
    /// named distinctly from the WAL file's own `durable_sync()`, since the
    /// source conflates the two under one overloaded `sync`).
    pub fn publish(&mut self) -> Result<()> {
        index_header::publish(&mut self.mmap.as_mut_slice()[..HEADERS_REGION_BYTES], self.header);
        Ok(())
    }

    fn table_region(&self) -> &[u8] {
        &self.mmap.as_slice()[TABLE_REGION_OFFSET..]
    }

    fn table_region_mut(&mut self) -> &mut [u8] {
        &mut self.mmap.as_mut_slice()[TABLE_REGION_OFFSET..]
    }

    fn put_table_entry(&mut self, key: i32, value: i64) -> Result<()> {
        self.maybe_grow()?;
        shm_table::put(self.table_region_mut(), key, value)
    }

    fn maybe_grow(&mut self) -> Result<()> {
        let region = self.table_region();
        let capacity = shm_table::read_capacity(region);
        let size = shm_table::read_size(region);
        if f64::from(size + 1) / f64::from(capacity) < HASH_TABLE_MAX_LOAD_FACTOR {
            return Ok(());
        }
        self.grow()
    }

    /// Double the table's capacity in place (spec.md §4.5 "Growth"): map a
    /// larger region, zero-init it, copy the old entries into an off-heap
    /// scratch buffer, re-insert each into the new region, then swing the
    /// mapping. Guards against re-entrant growth (a re-insert triggering
    /// another grow) with a `RecursiveGrow` error.
    fn grow(&mut self) -> Result<()> {
        if self.growing {
            return Err(LuxWalError::RecursiveGrow);
        }
        self.growing = true;
        let result = self.grow_inner();
        self.growing = false;
        result
    }

    fn grow_inner(&mut self) -> Result<()> {
        let old_capacity = shm_table::read_capacity(self.table_region());
        let new_capacity = old_capacity
            .checked_mul(2)
            .ok_or_else(|| LuxWalError::ArithmeticOverflow {
                detail: "hash table capacity doubling overflowed u32".to_owned(),
            })?;
        let new_region_len = TABLE_REGION_OFFSET
            .checked_add(shm_table::region_bytes(new_capacity))
            .ok_or_else(|| LuxWalError::ArithmeticOverflow {
                detail: "grown hash table region size overflowed usize".to_owned(),
            })?;

        let scratch = shm_table::live_entries(self.table_region());

        self.shm_file.set_len(new_region_len as u64)?;
        let mut new_mmap = self.shm_file.map_shared(0, new_region_len)?;
        new_mmap.as_mut_slice()[..TABLE_REGION_OFFSET]
            .copy_from_slice(&self.mmap.as_slice()[..TABLE_REGION_OFFSET]);
        shm_table::init_empty(&mut new_mmap.as_mut_slice()[TABLE_REGION_OFFSET..], new_capacity);
        for (key, value) in scratch {
            shm_table::put(&mut new_mmap.as_mut_slice()[TABLE_REGION_OFFSET..], key, value)?;
        }
        new_mmap.flush()?;
        self.mmap = new_mmap;

        tracing::debug!(
            target: "luxwal.core::wal_index",
            old_capacity,
            new_capacity,
            "grew frame→page hash table"
        );
        Ok(())
    }
}

impl<F: VfsFile> Drop for WalIndex<F> {
    fn drop(&mut self) {
        self.unlock_all();
    }
}
