//! WAL engine: the public surface tying components 1–10 together
//! (spec.md §4.11).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use luxwal_error::{LuxWalError, Result};
use luxwal_types::{FrameIndex, PageNumber, Salts, FRAME_BYTES, FRAME_HEADER_BYTES, PAGE_SIZE_BYTES, WAL_HEADER_BYTES};
use luxwal_vfs::{Vfs, VfsFile, VfsOpenOptions};

use crate::frame::{WalFrameBuilder, FRAME_CHAIN_INITIAL_SEED};
use crate::telemetry::{NoOpWalObserver, WalTelemetryEvent, WalTelemetryObserver};
use crate::wal_header::WalHeader;
use crate::wal_index::WalIndex;

/// Process-global, one-shot lock guarding first-time WAL creation
/// (spec.md §4.11, §9 "Global mutable state"). Held only for the duration
/// of `<db>-wal`/`<db>-shm` creation, not for the engine's lifetime.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Caller-tunable knobs genuinely owned by the WAL engine's own API
/// surface — never sourced from environment or a config file, only ever
/// passed in by the embedding application.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    strict_checksums: bool,
}

impl EngineOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            strict_checksums: true,
        }
    }

    /// When `false`, a checksum mismatch encountered while replaying an
    /// existing WAL into a fresh index stops the replay at that frame
    /// instead of failing `open` outright (see [`WalIndex::build_from_existing`]).
    #[must_use]
    pub const fn strict_checksums(mut self, strict: bool) -> Self {
        self.strict_checksums = strict;
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new()
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Not cryptographically random: salts only need to differ across
/// checkpoint epochs so orphaned frames can be recognized, not resist an
/// adversary (spec.md GLOSSARY "Salts").
fn fresh_random_salt() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos ^ (std::process::id())
}

/// The public WAL engine (spec.md §4.11): open/close, transaction
/// boundaries, page lookup, and page writes.
pub struct Engine<V: Vfs> {
    wal_file: V::File,
    db_path: PathBuf,
    wal_path: PathBuf,
    shm_path: PathBuf,
    index: WalIndex<V::File>,
    wal_header: WalHeader,
    options: EngineOptions,
    observer: Arc<dyn WalTelemetryObserver>,
    closed: bool,
}

impl<V: Vfs> Engine<V> {
    /// Open (or create) the WAL for `db_path`, with default options and no
    /// telemetry observer.
    pub fn open(vfs: &V, db_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(vfs, db_path, EngineOptions::default(), Arc::new(NoOpWalObserver))
    }

    /// Open (or create) the WAL for `db_path` (spec.md §4.11 `open`).
    pub fn open_with_options(
        vfs: &V,
        db_path: impl AsRef<Path>,
        options: EngineOptions,
        observer: Arc<dyn WalTelemetryObserver>,
    ) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let wal_path = sibling_with_suffix(&db_path, "-wal");
        let shm_path = sibling_with_suffix(&db_path, "-shm");

        if wal_path.exists() {
            Self::open_existing(vfs, db_path, wal_path, shm_path, options, observer)
        } else {
            Self::create_new(vfs, db_path, wal_path, shm_path, options, observer)
        }
    }

    fn open_existing(
        vfs: &V,
        db_path: PathBuf,
        wal_path: PathBuf,
        shm_path: PathBuf,
        options: EngineOptions,
        observer: Arc<dyn WalTelemetryObserver>,
    ) -> Result<Self> {
        let wal_file = vfs.open(&wal_path, VfsOpenOptions::read_write())?;
        let shm_file = vfs.open(&shm_path, VfsOpenOptions::create_read_write())?;
        let index = WalIndex::build_from_existing(&wal_file, shm_file, options.strict_checksums)?;
        let wal_header = WalHeader::read_from_file(&wal_file, 0)?;

        tracing::debug!(target: "luxwal.core::engine", path = %db_path.display(), "opened existing WAL");

        Ok(Self {
            wal_file,
            db_path,
            wal_path,
            shm_path,
            index,
            wal_header,
            options,
            observer,
            closed: false,
        })
    }

    fn create_new(
        vfs: &V,
        db_path: PathBuf,
        wal_path: PathBuf,
        shm_path: PathBuf,
        options: EngineOptions,
        observer: Arc<dyn WalTelemetryObserver>,
    ) -> Result<Self> {
        let _init_guard = INIT_LOCK.try_lock().ok_or(LuxWalError::InitLockBusy)?;

        let db_is_empty = std::fs::metadata(&db_path).map_or(true, |meta| meta.len() == 0);
        if !db_is_empty {
            return Err(LuxWalError::NotImplemented {
                detail: "opening a WAL over a non-empty database with no existing WAL is a recovery path, not implemented".to_owned(),
            });
        }

        let wal_file = vfs.open(&wal_path, VfsOpenOptions::create_new_read_write())?;
        let shm_file = vfs.open(&shm_path, VfsOpenOptions::create_new_read_write())?;

        let salts = Salts::new(fresh_random_salt(), 0);
        let wal_header = WalHeader::build(0, 0, salts);
        wal_header.write_to_file(&wal_file, 0)?;
        wal_file.sync()?;

        let mut index = WalIndex::build_initial(0, salts, shm_file)?;
        index.acquire_shared()?;
        index.acquire_exclusive()?;
        index.publish()?;
        index.unlock_all();

        tracing::debug!(target: "luxwal.core::engine", path = %db_path.display(), "created new WAL");

        Ok(Self {
            wal_file,
            db_path,
            wal_path,
            shm_path,
            index,
            wal_header,
            options,
            observer,
            closed: false,
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    #[must_use]
    pub fn shm_path(&self) -> &Path {
        &self.shm_path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(LuxWalError::ClosedAsync);
        }
        Ok(())
    }

    /// `fsync` the WAL file, distinct from [`WalIndex::publish`]'s
    /// mapped-header writeback (spec.md §9 "Overloaded index-header `sync`").
    fn durable_sync(&self) -> Result<()> {
        self.wal_file.sync()
    }

    /// Always re-reads the WAL header from disk and validates it
    /// (spec.md §4.11 `header`).
    pub fn header(&self) -> Result<WalHeader> {
        self.ensure_open()?;
        WalHeader::read_from_file(&self.wal_file, 0)
    }

    /// Delegates to the index (spec.md §4.11 `frame_index_of`).
    #[must_use]
    pub fn frame_index_of(&self, page_index: u64) -> i32 {
        self.index.find_frame_index_of(page_index)
    }

    /// Read the page image stored at `frame_index` (spec.md §4.11 `page_at`).
    pub fn page_at(&self, frame_index: i32) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if frame_index < 0 {
            return Err(LuxWalError::InvalidArgument {
                detail: "frame index must be >= 0".to_owned(),
            });
        }
        if !self.index.lock_state().has_shared() {
            tracing::warn!(target: "luxwal.core::engine", "page_at called without SHARED held");
        }
        let last_commit_frame = self.index.header().last_commit_frame;
        if FrameIndex::new(frame_index).get() > last_commit_frame.get() {
            return Err(LuxWalError::NoSuchPage {
                frame_index,
                last_commit_frame: last_commit_frame.get(),
            });
        }

        let offset = WAL_HEADER_BYTES as u64
            + u64::from(frame_index as u32) * FRAME_BYTES as u64
            + FRAME_HEADER_BYTES as u64;
        let mut buf = vec![0u8; PAGE_SIZE_BYTES];
        let n = self.wal_file.read(&mut buf, offset)?;
        if n < PAGE_SIZE_BYTES {
            return Err(LuxWalError::CorruptPage {
                frame_index,
                detail: format!("short page read: {n} of {PAGE_SIZE_BYTES} bytes"),
            });
        }
        Ok(buf)
    }

    /// If the index is stale, reload it; then acquire SHARED
    /// (spec.md §4.11 `begin_read_transaction`).
    pub fn begin_read_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.index.is_stale()? {
            self.index.reload()?;
            self.observer.on_event(WalTelemetryEvent::StalenessDetected);
        }
        self.index.acquire_shared()?;
        self.observer.on_event(WalTelemetryEvent::ReadTransactionBegan);
        Ok(())
    }

    pub fn end_read_transaction(&mut self) {
        self.index.unlock_all();
        self.observer.on_event(WalTelemetryEvent::ReadTransactionEnded);
    }

    /// Acquire EXCLUSIVE (requires SHARED already held); if the index
    /// turns out stale, unlock and fail (spec.md §4.11
    /// `begin_write_transaction`).
    pub fn begin_write_transaction(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.index.acquire_exclusive()?;
        if self.index.is_stale()? {
            self.index.unlock_all();
            self.observer.on_event(WalTelemetryEvent::StalenessDetected);
            return Err(LuxWalError::StaleWal);
        }
        self.observer.on_event(WalTelemetryEvent::WriteTransactionBegan);
        Ok(())
    }

    pub fn end_write_transaction(&mut self) {
        self.index.unlock_all();
        self.observer.on_event(WalTelemetryEvent::WriteTransactionEnded);
    }

    /// Append a frame for `page_index` at the index's current cursor
    /// position, and, if `commit`, persist the new WAL header and sync
    /// both files (spec.md §4.11 `write_page`).
    pub fn write_page(&mut self, page_index: u64, page: &[u8], commit: bool) -> Result<()> {
        self.ensure_open()?;
        if !self.index.lock_state().has_exclusive() {
            return Err(LuxWalError::OutOfOrderLock {
                detail: "write_page requires EXCLUSIVE held".to_owned(),
            });
        }

        let header_snapshot = self.index.header();
        let cursor = header_snapshot.cursor;
        let salts = header_snapshot.salts;
        let seed = if cursor.get() == 0 {
            FRAME_CHAIN_INITIAL_SEED
        } else {
            header_snapshot.cumulative_checksum as u64
        };

        let frame = WalFrameBuilder::new()
            .page_index(page_index)
            .commit(commit)
            .salts(salts)
            .page(page.to_vec())
            .build(seed)
            .map_err(|err| match err {
                LuxWalError::InvalidArgument { detail } => LuxWalError::WriteFatal { detail },
                other => other,
            })?;

        let offset = WAL_HEADER_BYTES as u64 + u64::from(cursor.get() as u32) * FRAME_BYTES as u64;
        let header_bytes = frame.header();
        let header_written = self.wal_file.write(&header_bytes, offset)?;
        if header_written < FRAME_HEADER_BYTES {
            return Err(LuxWalError::WriteTransient {
                detail: format!("short frame-header write: {header_written} bytes"),
            });
        }
        let page_written = self
            .wal_file
            .write(frame.page(), offset + FRAME_HEADER_BYTES as u64)?;
        if page_written < PAGE_SIZE_BYTES {
            return Err(LuxWalError::WriteTransient {
                detail: format!("short page write: {page_written} bytes"),
            });
        }

        self.index.notify_appended(&frame, cursor)?;

        if commit {
            let new_db_size = self.index.header().db_size;
            let new_header = WalHeader::build(new_db_size, self.wal_header.checkpoint_sequence, salts);
            new_header.write_to_file(&self.wal_file, 0)?;
            self.wal_header = new_header;
            self.index.publish()?;
            self.durable_sync()?;
        }

        self.observer.on_event(WalTelemetryEvent::FrameAppended {
            frame_index: cursor.get(),
            page: PageNumber::from_valid(page_index),
            commit,
        });

        Ok(())
    }

    /// Release all locks and mark the engine closed; further operations
    /// fail with `ClosedAsync` (spec.md §4.11 `close`).
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.index.unlock_all();
        self.closed = true;
        tracing::debug!(target: "luxwal.core::engine", path = %self.db_path.display(), "closed WAL engine");
    }
}
