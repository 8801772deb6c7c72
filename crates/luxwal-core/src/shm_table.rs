//! Off-heap, open-addressed `i32 -> i64` hash table (spec.md §4.5).
//!
//! Backs the frame→page lookup: `key` is a frame index, `value` is the page
//! number that frame holds. Bucketing hashes the *value*, not the key, so
//! that `key_of(page_number)` — the lookup direction the engine actually
//! needs — is a single probe chain rather than a full scan. A `put` that
//! lands on a slot already holding the same value overwrites that slot's
//! key in place instead of appending a new entry, so repeated writes to the
//! same page never grow the table past the number of distinct live pages.
//!
//! Operates on a plain `&mut [u8]` region rather than owning any storage;
//! the WAL index (§4.7) owns the memory-mapped segment this table is a view
//! over and is the only component that knows how to grow it (growth is a
//! file-remap, not something this module can do to its own borrowed slice).

use luxwal_error::{LuxWalError, Result};
use luxwal_types::HASH_TABLE_EMPTY_KEY;

/// `capacity:i32, size:i32, data_pointer:i64` (spec.md §3). `data_pointer`
/// is written for on-disk-format parity with the source design but is
/// documented informational-only (spec.md §9): readers always derive the
/// entry region from `(region_base + TABLE_HEADER_BYTES, capacity)`, never
/// from the stored pointer.
pub const TABLE_HEADER_BYTES: usize = 16;

/// `key:i32, padding:i32, value:i64` per entry.
pub const TABLE_ENTRY_BYTES: usize = 16;

/// Fixed multiplier used to fold a 64-bit page value into a bucket index.
/// Any odd constant works; this is the "multiply a dense counter, mask to
/// capacity" idiom used throughout this crate's hash slot computations.
const HASH_MULTIPLIER: u32 = 383;

/// Total region size, in bytes, needed for a table of the given `capacity`.
#[must_use]
pub const fn region_bytes(capacity: u32) -> usize {
    TABLE_HEADER_BYTES + capacity as usize * TABLE_ENTRY_BYTES
}

fn entry_offset(index: u32) -> usize {
    TABLE_HEADER_BYTES + index as usize * TABLE_ENTRY_BYTES
}

#[must_use]
pub fn read_capacity(region: &[u8]) -> u32 {
    u32::from_be_bytes(region[0..4].try_into().unwrap())
}

#[must_use]
pub fn read_size(region: &[u8]) -> u32 {
    u32::from_be_bytes(region[4..8].try_into().unwrap())
}

pub fn write_size(region: &mut [u8], size: u32) {
    region[4..8].copy_from_slice(&size.to_be_bytes());
}

pub fn write_data_pointer(region: &mut [u8], pointer: u64) {
    region[8..16].copy_from_slice(&pointer.to_be_bytes());
}

fn read_entry(region: &[u8], index: u32) -> (i32, i64) {
    let off = entry_offset(index);
    let key = i32::from_be_bytes(region[off..off + 4].try_into().unwrap());
    let value = i64::from_be_bytes(region[off + 8..off + 16].try_into().unwrap());
    (key, value)
}

fn write_entry(region: &mut [u8], index: u32, key: i32, value: i64) {
    let off = entry_offset(index);
    region[off..off + 4].copy_from_slice(&key.to_be_bytes());
    region[off + 4..off + 8].fill(0);
    region[off + 8..off + 16].copy_from_slice(&value.to_be_bytes());
}

fn hash_bucket(value: i64, capacity: u32) -> u32 {
    debug_assert!(capacity.is_power_of_two(), "capacity must stay a power of two");
    let folded = (value as u64 ^ ((value as u64) >> 32)) as u32;
    folded.wrapping_mul(HASH_MULTIPLIER) & (capacity - 1)
}

/// Zero-initialize `region` as an empty table of `capacity` entries,
/// writing the sentinel empty key (`-1`) into every slot.
pub fn init_empty(region: &mut [u8], capacity: u32) {
    debug_assert_eq!(region.len(), region_bytes(capacity));
    region[0..4].copy_from_slice(&capacity.to_be_bytes());
    write_size(region, 0);
    write_data_pointer(region, 0);
    for index in 0..capacity {
        write_entry(region, index, HASH_TABLE_EMPTY_KEY, 0);
    }
}

/// Insert `(key, value)`. If a live entry already holds `value`, its key is
/// overwritten in place (spec.md §3: "size... matches the number of frames
/// ... pending visibility" — one live entry per distinct page). Callers are
/// responsible for having already grown `region` so the load factor stays
/// under the cap; this function does not grow anything itself.
pub fn put(region: &mut [u8], key: i32, value: i64) -> Result<()> {
    let capacity = read_capacity(region);
    if capacity == 0 {
        return Err(LuxWalError::internal("put against a zero-capacity hash table"));
    }
    let start = hash_bucket(value, capacity);
    let mut slot = start;
    loop {
        let (existing_key, existing_value) = read_entry(region, slot);
        if existing_key == HASH_TABLE_EMPTY_KEY {
            write_entry(region, slot, key, value);
            write_size(region, read_size(region) + 1);
            return Ok(());
        }
        if existing_value == value {
            write_entry(region, slot, key, value);
            return Ok(());
        }
        slot = (slot + 1) & (capacity - 1);
        if slot == start {
            return Err(LuxWalError::internal(
                "hash table probe wrapped fully without finding a slot; load-factor cap was violated",
            ));
        }
    }
}

/// Return the key most recently associated with `value`, or `-1`.
#[must_use]
pub fn key_of(region: &[u8], value: i64) -> i32 {
    let capacity = read_capacity(region);
    if capacity == 0 {
        return HASH_TABLE_EMPTY_KEY;
    }
    let start = hash_bucket(value, capacity);
    let mut slot = start;
    loop {
        let (existing_key, existing_value) = read_entry(region, slot);
        if existing_key == HASH_TABLE_EMPTY_KEY {
            return HASH_TABLE_EMPTY_KEY;
        }
        if existing_value == value {
            return existing_key;
        }
        slot = (slot + 1) & (capacity - 1);
        if slot == start {
            return HASH_TABLE_EMPTY_KEY;
        }
    }
}

#[must_use]
pub fn size(region: &[u8]) -> u32 {
    read_size(region)
}

#[must_use]
pub fn load_factor(region: &[u8]) -> f64 {
    let capacity = read_capacity(region);
    if capacity == 0 {
        return 1.0;
    }
    f64::from(read_size(region)) / f64::from(capacity)
}

/// Copy every live `(key, value)` pair out of `region`, in slot order. Used
/// by the WAL index when rehashing into a larger region during growth.
#[must_use]
pub fn live_entries(region: &[u8]) -> Vec<(i32, i64)> {
    let capacity = read_capacity(region);
    (0..capacity)
        .filter_map(|index| {
            let (key, value) = read_entry(region, index);
            (key != HASH_TABLE_EMPTY_KEY).then_some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_region(capacity: u32) -> Vec<u8> {
        let mut region = vec![0u8; region_bytes(capacity)];
        init_empty(&mut region, capacity);
        region
    }

    #[test]
    fn put_then_key_of_round_trips() {
        let mut region = fresh_region(16);
        put(&mut region, 0, 100).unwrap();
        put(&mut region, 1, 200).unwrap();
        assert_eq!(key_of(&region, 100), 0);
        assert_eq!(key_of(&region, 200), 1);
        assert_eq!(key_of(&region, 300), HASH_TABLE_EMPTY_KEY);
        assert_eq!(size(&region), 2);
    }

    #[test]
    fn repeated_value_overwrites_key_without_growing_size() {
        let mut region = fresh_region(16);
        put(&mut region, 0, 42).unwrap();
        put(&mut region, 1, 42).unwrap();
        assert_eq!(size(&region), 1);
        assert_eq!(key_of(&region, 42), 1);
    }

    #[test]
    fn load_factor_tracks_size_over_capacity() {
        let mut region = fresh_region(4);
        assert!((load_factor(&region) - 0.0).abs() < f64::EPSILON);
        put(&mut region, 0, 1).unwrap();
        put(&mut region, 1, 2).unwrap();
        put(&mut region, 2, 3).unwrap();
        assert!((load_factor(&region) - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn live_entries_excludes_empty_slots() {
        let mut region = fresh_region(8);
        put(&mut region, 0, 9).unwrap();
        put(&mut region, 1, 18).unwrap();
        let mut entries = live_entries(&region);
        entries.sort_unstable();
        assert_eq!(entries, vec![(0, 9), (1, 18)]);
    }

    #[test]
    fn rehash_into_larger_region_preserves_lookups() {
        let mut small = fresh_region(8);
        for i in 0..6 {
            put(&mut small, i, i64::from(i) * 7).unwrap();
        }
        let mut large = fresh_region(16);
        for (key, value) in live_entries(&small) {
            put(&mut large, key, value).unwrap();
        }
        for i in 0..6 {
            assert_eq!(key_of(&large, i64::from(i) * 7), i);
        }
        assert_eq!(size(&large), 6);
    }
}
