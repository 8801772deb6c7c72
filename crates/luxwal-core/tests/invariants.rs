//! Quantified invariants, round-trip/idempotence properties, and boundary
//! cases from spec.md §8.

use luxwal_core::frame::{recompute_checksum, FRAME_CHAIN_INITIAL_SEED};
use luxwal_core::{shm_table, Engine, WalFrameBuilder, WalHeader, WalIndex};
use luxwal_error::LuxWalError;
use luxwal_types::{PageNumber, Salts, PAGE_SIZE_BYTES};
use luxwal_vfs::{PosixVfs, Vfs, VfsOpenOptions};
use proptest::prelude::*;

fn page_with_prefix(prefix: &[u8]) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE_BYTES];
    page[..prefix.len()].copy_from_slice(prefix);
    page
}

// --- Invariant 1: cumulative checksum chains to the final frame's checksum.

#[test]
fn cumulative_checksum_chain_matches_final_frame() {
    let salts = Salts::new(1, 1);
    let mut seed = FRAME_CHAIN_INITIAL_SEED;
    let mut last_checksum = seed;
    for i in 1..=5u64 {
        let frame = WalFrameBuilder::new()
            .page_index(i)
            .commit(i == 5)
            .salts(salts)
            .page(page_with_prefix(&[1, 3, 3, 7]))
            .build(seed)
            .unwrap();
        assert_eq!(recompute_checksum(seed, &frame.header, frame.page()), frame.header.checksum);
        seed = frame.header.checksum;
        last_checksum = frame.header.checksum;
    }
    assert_eq!(seed, last_checksum);
}

// --- Invariant 2: overwriting a page relocates it to the newer frame.

#[test]
fn overwritten_page_resolves_to_its_newest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");
    let vfs = PosixVfs;

    let mut engine = Engine::open(&vfs, &db_path).unwrap();
    engine.begin_read_transaction().unwrap();
    engine.begin_write_transaction().unwrap();
    engine.write_page(7, &page_with_prefix(&[1]), true).unwrap();
    engine.write_page(7, &page_with_prefix(&[2]), true).unwrap();
    engine.end_write_transaction();
    engine.end_read_transaction();

    engine.begin_read_transaction().unwrap();
    assert_eq!(engine.frame_index_of(7), 1);
    engine.end_read_transaction();
}

// --- Invariant 3: reopening reads two byte-equal header copies (anything
// else would surface as `ConcurrentModification`, never silently).

#[test]
fn header_copies_stay_consistent_across_commits() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");
    let vfs = PosixVfs;

    {
        let mut engine = Engine::open(&vfs, &db_path).unwrap();
        engine.begin_read_transaction().unwrap();
        engine.begin_write_transaction().unwrap();
        for i in 1..=10u64 {
            engine.write_page(i, &page_with_prefix(&[1, 3, 3, 7]), true).unwrap();
        }
        engine.end_write_transaction();
        engine.end_read_transaction();
        engine.close();
    }

    // A fresh open re-reads both mapped header copies; any torn write would
    // surface here as `ConcurrentModification`.
    let reopened = Engine::open(&vfs, &db_path).unwrap();
    assert_eq!(reopened.header().unwrap().db_size, 10);
}

// --- Invariant 4: open either validates the header or raises corrupt-WAL.

#[test]
fn open_over_a_bad_magic_wal_file_raises_corrupt_wal() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");
    let vfs = PosixVfs;

    let mut wal_path = db_path.clone().into_os_string();
    wal_path.push("-wal");
    let wal_file = vfs
        .open(std::path::Path::new(&wal_path), VfsOpenOptions::create_new_read_write())
        .unwrap();
    wal_file.write(&[0xFFu8; 32], 0).unwrap();

    let err = Engine::open(&vfs, &db_path).unwrap_err();
    assert!(matches!(err, LuxWalError::CorruptWal { .. }));
}

// --- Invariant 5: begin_write_transaction succeeds iff SHARED held and not stale.

#[test]
fn begin_write_transaction_succeeds_with_shared_and_no_staleness() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");
    let vfs = PosixVfs;

    let mut engine = Engine::open(&vfs, &db_path).unwrap();
    engine.begin_read_transaction().unwrap();
    engine.begin_write_transaction().unwrap();
    engine.end_write_transaction();
    engine.end_read_transaction();
}

// --- Invariant 6: the frame→page table's load factor never exceeds 0.75.

proptest! {
    #[test]
    fn load_factor_never_exceeds_cap(count in 1u32..6000) {
        let capacity = luxwal_types::HASH_TABLE_INITIAL_CAPACITY;
        let mut region = vec![0u8; shm_table::region_bytes(capacity)];
        shm_table::init_empty(&mut region, capacity);

        let mut capacity = capacity;
        for i in 0..count {
            let needed = f64::from(shm_table::read_size(&region) + 1) / f64::from(capacity);
            if needed >= luxwal_types::HASH_TABLE_MAX_LOAD_FACTOR {
                capacity *= 2;
                let mut grown = vec![0u8; shm_table::region_bytes(capacity)];
                shm_table::init_empty(&mut grown, capacity);
                for (key, value) in shm_table::live_entries(&region) {
                    shm_table::put(&mut grown, key, value).unwrap();
                }
                region = grown;
            }
            shm_table::put(&mut region, i32::try_from(i).unwrap(), i64::from(i)).unwrap();
            prop_assert!(shm_table::load_factor(&region) <= luxwal_types::HASH_TABLE_MAX_LOAD_FACTOR);
        }
    }
}

// --- Round-trip / idempotence.

#[test]
fn wal_header_round_trips_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hdr");
    let vfs = PosixVfs;
    let file = vfs.open(&path, VfsOpenOptions::create_new_read_write()).unwrap();

    let header = WalHeader::build(3, 1, Salts::new(5, 6));
    header.write_to_file(&file, 0).unwrap();
    let read_back = WalHeader::read_from_file(&file, 0).unwrap();
    assert_eq!(read_back.to_bytes(), header.to_bytes());
}

#[test]
fn reload_twice_with_no_writer_leaves_index_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let shm_path = dir.path().join("db-shm");
    let vfs = PosixVfs;
    let shm_file = vfs.open(&shm_path, VfsOpenOptions::create_new_read_write()).unwrap();

    let mut index = WalIndex::build_initial(0, Salts::new(1, 1), shm_file).unwrap();
    index.reload().unwrap();
    let first = index.header();
    index.reload().unwrap();
    assert_eq!(index.header(), first);
}

// --- Boundary.

#[test]
fn page_at_negative_frame_index_is_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");
    let vfs = PosixVfs;
    let engine = Engine::open(&vfs, &db_path).unwrap();
    assert!(matches!(engine.page_at(-1), Err(LuxWalError::InvalidArgument { .. })));
}

#[test]
fn page_at_past_last_commit_is_no_such_page() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");
    let vfs = PosixVfs;

    let mut engine = Engine::open(&vfs, &db_path).unwrap();
    engine.begin_read_transaction().unwrap();
    engine.begin_write_transaction().unwrap();
    engine.write_page(1, &page_with_prefix(&[1]), true).unwrap();
    engine.end_write_transaction();
    engine.end_read_transaction();

    assert!(matches!(engine.page_at(1), Err(LuxWalError::NoSuchPage { .. })));
}

#[test]
fn build_initial_rejects_negative_db_size() {
    let dir = tempfile::tempdir().unwrap();
    let shm_path = dir.path().join("db-shm");
    let vfs = PosixVfs;
    let shm_file = vfs.open(&shm_path, VfsOpenOptions::create_new_read_write()).unwrap();

    let err = WalIndex::build_initial(-1, Salts::default(), shm_file).unwrap_err();
    assert!(matches!(err, LuxWalError::InvalidArgument { .. }));
}

// `build_initial(shm = null)` from spec.md §8's boundary list has no
// counterpart here: `shm_file: F` is an owned, non-nullable `VfsFile`, so
// Rust's type system rules the error class out statically rather than
// needing a runtime check.

#[test]
fn page_number_rejects_zero_at_the_type_boundary() {
    assert!(PageNumber::new(0).is_none());
}
