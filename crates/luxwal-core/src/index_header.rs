//! In-memory mirror of the duplicated shared-memory index header (spec.md
//! §4.6).
//!
//! `IndexHeaderFields` is the pure-data record; [`publish`]/[`read_both`]
//! realize the duplicated-copy concurrency protocol described in spec.md §9
//! ("Duplicated header for concurrent observation"): a writer overwrites
//! copy 0, then copy 1, each bracketed by a release fence; a reader reads
//! copy 1 then copy 0 behind acquire fences and compares the raw bytes
//! rather than the parsed fields, so a torn write is caught even if it
//! happens to parse to something superficially plausible.

use std::sync::atomic::{fence, Ordering};

use luxwal_error::{LuxWalError, Result};
use luxwal_types::{FrameIndex, Salts, INDEX_HEADER_BYTES};

/// The six fields of one index-header copy (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeaderFields {
    pub last_commit_frame: FrameIndex,
    pub cursor: FrameIndex,
    pub salts: Salts,
    pub db_size: i64,
    pub cumulative_checksum: i64,
}

impl IndexHeaderFields {
    #[must_use]
    pub const fn empty(salts: Salts, db_size: i64) -> Self {
        Self {
            last_commit_frame: FrameIndex::NONE,
            cursor: FrameIndex::new(0),
            salts,
            db_size,
            cumulative_checksum: 0,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.last_commit_frame.is_none()
    }

    /// Advance this header by one appended frame (spec.md §4.6
    /// `notify_appended`): bump the cursor, adopt the frame's checksum as
    /// the new cumulative checksum, count the page, and — only if the
    /// frame completes a transaction — move `last_commit_frame` forward.
    pub fn notify_appended(&mut self, frame_index: FrameIndex, frame_checksum: i64, is_commit: bool) {
        self.cursor = frame_index.next();
        self.cumulative_checksum = frame_checksum;
        self.db_size += 1;
        if is_commit {
            self.last_commit_frame = frame_index;
        }
    }

    fn to_bytes(self) -> [u8; INDEX_HEADER_BYTES] {
        let mut buf = [0u8; INDEX_HEADER_BYTES];
        buf[0..4].copy_from_slice(&self.last_commit_frame.get().to_be_bytes());
        buf[4..8].copy_from_slice(&self.cursor.get().to_be_bytes());
        buf[8..12].copy_from_slice(&self.salts.random.to_be_bytes());
        buf[12..16].copy_from_slice(&self.salts.sequential.to_be_bytes());
        buf[16..24].copy_from_slice(&self.db_size.to_be_bytes());
        buf[24..32].copy_from_slice(&self.cumulative_checksum.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            last_commit_frame: FrameIndex::new(i32::from_be_bytes(buf[0..4].try_into().unwrap())),
            cursor: FrameIndex::new(i32::from_be_bytes(buf[4..8].try_into().unwrap())),
            salts: Salts::new(
                u32::from_be_bytes(buf[8..12].try_into().unwrap()),
                u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            ),
            db_size: i64::from_be_bytes(buf[16..24].try_into().unwrap()),
            cumulative_checksum: i64::from_be_bytes(buf[24..32].try_into().unwrap()),
        }
    }
}

/// Write `fields` into both copies at the start of `region`, copy 0 first
/// then copy 1, with a release fence after each. Callers MUST already hold
/// the WAL index's EXCLUSIVE lock (spec.md §4.6).
pub fn publish(region: &mut [u8], fields: IndexHeaderFields) {
    let bytes = fields.to_bytes();
    region[0..INDEX_HEADER_BYTES].copy_from_slice(&bytes);
    fence(Ordering::Release);
    region[INDEX_HEADER_BYTES..2 * INDEX_HEADER_BYTES].copy_from_slice(&bytes);
    fence(Ordering::Release);
}

/// Read both header copies from `region` and compare their raw bytes.
/// Returns `ConcurrentModification` if they differ — a reader has caught a
/// writer mid-update (spec.md §4.6, §3 invariant 1).
pub fn read_both(region: &[u8]) -> Result<IndexHeaderFields> {
    let copy1 = &region[INDEX_HEADER_BYTES..2 * INDEX_HEADER_BYTES];
    fence(Ordering::Acquire);
    let copy0 = &region[0..INDEX_HEADER_BYTES];
    fence(Ordering::Acquire);
    if copy0 != copy1 {
        return Err(LuxWalError::ConcurrentModification);
    }
    Ok(IndexHeaderFields::from_bytes(copy0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_read_both_round_trips() {
        let mut region = vec![0u8; 2 * INDEX_HEADER_BYTES];
        let fields = IndexHeaderFields {
            last_commit_frame: FrameIndex::new(3),
            cursor: FrameIndex::new(4),
            salts: Salts::new(0xAAAA_BBBB, 7),
            db_size: 4,
            cumulative_checksum: -123,
        };
        publish(&mut region, fields);
        assert_eq!(read_both(&region).unwrap(), fields);
    }

    #[test]
    fn read_both_detects_torn_write() {
        let mut region = vec![0u8; 2 * INDEX_HEADER_BYTES];
        let fields = IndexHeaderFields::empty(Salts::new(1, 1), 0);
        publish(&mut region, fields);
        region[0] ^= 0xFF;
        assert!(matches!(read_both(&region), Err(LuxWalError::ConcurrentModification)));
    }

    #[test]
    fn notify_appended_tracks_commit_only_on_commit_frames() {
        let mut fields = IndexHeaderFields::empty(Salts::new(1, 1), 0);
        fields.notify_appended(FrameIndex::new(0), 111, false);
        assert!(fields.last_commit_frame.is_none());
        assert_eq!(fields.cursor.get(), 1);
        assert_eq!(fields.db_size, 1);

        fields.notify_appended(FrameIndex::new(1), 222, true);
        assert_eq!(fields.last_commit_frame.get(), 1);
        assert_eq!(fields.cursor.get(), 2);
        assert_eq!(fields.db_size, 2);
        assert_eq!(fields.cumulative_checksum, 222);
    }

    #[test]
    fn empty_header_reports_is_empty() {
        let fields = IndexHeaderFields::empty(Salts::default(), 0);
        assert!(fields.is_empty());
    }
}
