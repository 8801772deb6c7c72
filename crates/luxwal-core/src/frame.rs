//! WAL frame: fixed 32-byte header plus a 4096-byte page payload
//! (spec.md §3, §4.9).

use luxwal_error::{LuxWalError, Result};
use luxwal_types::{Salts, FRAME_HEADER_BYTES, HASH_ENGINE_SEED, PAGE_SIZE_BYTES};

use crate::hash::WalHasher;

/// Seed used to chain frame 0's checksum: the "empty-state seed" spec.md §3
/// calls for when there is no previous frame. Equal to a fresh `WalHasher`'s
/// state, so frame 0's checksum is computed exactly like any other frame,
/// just seeded from a brand-new hasher instead of a predecessor's checksum.
pub const FRAME_CHAIN_INITIAL_SEED: u64 = HASH_ENGINE_SEED;

/// The 32-byte frame header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalFrameHeader {
    pub page_index: u64,
    pub commit: bool,
    pub salts: Salts,
    pub checksum: u64,
}

impl WalFrameHeader {
    #[must_use]
    pub fn to_bytes(self) -> [u8; FRAME_HEADER_BYTES] {
        let mut buf = [0u8; FRAME_HEADER_BYTES];
        buf[0..8].copy_from_slice(&self.page_index.to_be_bytes());
        buf[8] = u8::from(self.commit);
        buf[9..13].copy_from_slice(&self.salts.random.to_be_bytes());
        buf[13..17].copy_from_slice(&self.salts.sequential.to_be_bytes());
        buf[17..25].copy_from_slice(&self.checksum.to_be_bytes());
        // buf[25..32] is reserved padding, left zero.
        buf
    }

    fn from_bytes(buf: &[u8; FRAME_HEADER_BYTES]) -> Self {
        Self {
            page_index: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
            commit: buf[8] != 0,
            salts: Salts::new(
                u32::from_be_bytes(buf[9..13].try_into().unwrap()),
                u32::from_be_bytes(buf[13..17].try_into().unwrap()),
            ),
            checksum: u64::from_be_bytes(buf[17..25].try_into().unwrap()),
        }
    }

    /// Whether this frame's salts match the WAL's current epoch — frames
    /// from a prior checkpoint epoch carry stale salts and MUST be ignored
    /// during index reconstruction (spec.md §3).
    #[must_use]
    pub const fn matches_epoch(&self, current: Salts) -> bool {
        self.salts.random == current.random && self.salts.sequential == current.sequential
    }
}

/// Recompute the checksum a frame with `header`'s fields and `page` bytes
/// should carry, chained from `seed`. Used during index reconstruction to
/// verify a frame read back off disk rather than one just built in memory.
#[must_use]
pub fn recompute_checksum(seed: u64, header: &WalFrameHeader, page: &[u8]) -> u64 {
    WalHasher::new_seeded(seed)
        .mix_i64(header.page_index as i64)
        .mix_bool(header.commit)
        .mix_i32(header.salts.random as i32)
        .mix_i32(header.salts.sequential as i32)
        .mix_bytes(page, 0, page.len())
        .state()
}

/// A complete frame: header plus page payload.
#[derive(Debug, Clone)]
pub struct WalFrame {
    pub header: WalFrameHeader,
    page: Vec<u8>,
}

impl WalFrame {
    #[must_use]
    pub fn header(&self) -> [u8; FRAME_HEADER_BYTES] {
        self.header.to_bytes()
    }

    #[must_use]
    pub fn page(&self) -> &[u8] {
        &self.page
    }

    /// Parse a complete `frame_bytes`-length record previously read from
    /// the WAL file.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_BYTES + PAGE_SIZE_BYTES {
            return Err(LuxWalError::CorruptPage {
                frame_index: -1,
                detail: format!("short frame record: {} bytes", buf.len()),
            });
        }
        let mut header_bytes = [0u8; FRAME_HEADER_BYTES];
        header_bytes.copy_from_slice(&buf[..FRAME_HEADER_BYTES]);
        let header = WalFrameHeader::from_bytes(&header_bytes);
        let page = buf[FRAME_HEADER_BYTES..FRAME_HEADER_BYTES + PAGE_SIZE_BYTES].to_vec();
        Ok(Self { header, page })
    }

    /// Serialize header + page into one `frame_bytes`-length record.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_BYTES + PAGE_SIZE_BYTES);
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.page);
        out
    }
}

/// Builder validating the required-field mask before constructing a
/// [`WalFrame`] (spec.md §4.9).
#[derive(Debug, Default)]
pub struct WalFrameBuilder {
    page_index: Option<u64>,
    commit: bool,
    salts: Option<Salts>,
    page: Option<Vec<u8>>,
}

impl WalFrameBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn page_index(mut self, page_index: u64) -> Self {
        self.page_index = Some(page_index);
        self
    }

    #[must_use]
    pub const fn commit(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }

    #[must_use]
    pub const fn salts(mut self, salts: Salts) -> Self {
        self.salts = Some(salts);
        self
    }

    #[must_use]
    pub fn page(mut self, page: Vec<u8>) -> Self {
        self.page = Some(page);
        self
    }

    /// Compute `calculate_checksum(cumulative_seed)` and build the frame.
    ///
    /// Chains: `seed.mix_i64(pageIndex).mix_bool(commit).mix_i32(randomSalt)
    /// .mix_i32(sequentialSalt).mix_bytes(page, 0, 4096).state()`.
    pub fn build(self, cumulative_seed: u64) -> Result<WalFrame> {
        let page_index = self
            .page_index
            .ok_or_else(|| LuxWalError::InvalidArgument {
                detail: "WalFrameBuilder missing pageIndex".to_owned(),
            })?;
        let salts = self.salts.ok_or_else(|| LuxWalError::InvalidArgument {
            detail: "WalFrameBuilder missing salts".to_owned(),
        })?;
        let page = self.page.ok_or_else(|| LuxWalError::InvalidArgument {
            detail: "WalFrameBuilder missing page".to_owned(),
        })?;
        if page.len() != PAGE_SIZE_BYTES {
            return Err(LuxWalError::InvalidArgument {
                detail: format!("page must be exactly {PAGE_SIZE_BYTES} bytes, got {}", page.len()),
            });
        }
        if page_index == 0 {
            return Err(LuxWalError::InvalidArgument {
                detail: "pageIndex must be >= 1".to_owned(),
            });
        }

        let checksum = WalHasher::new_seeded(cumulative_seed)
            .mix_i64(page_index as i64)
            .mix_bool(self.commit)
            .mix_i32(salts.random as i32)
            .mix_i32(salts.sequential as i32)
            .mix_bytes(&page, 0, PAGE_SIZE_BYTES)
            .state();

        Ok(WalFrame {
            header: WalFrameHeader {
                page_index,
                commit: self.commit,
                salts,
                checksum,
            },
            page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_prefix(prefix: &[u8]) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE_BYTES];
        page[..prefix.len()].copy_from_slice(prefix);
        page
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let frame = WalFrameBuilder::new()
            .page_index(1)
            .commit(true)
            .salts(Salts::new(10, 20))
            .page(page_with_prefix(&[1, 3, 3, 7]))
            .build(0)
            .unwrap();
        let parsed = WalFrameHeader::from_bytes(&frame.header());
        assert_eq!(parsed, frame.header);
    }

    #[test]
    fn builder_rejects_missing_fields() {
        let err = WalFrameBuilder::new().page_index(1).build(0);
        assert!(matches!(err, Err(LuxWalError::InvalidArgument { .. })));
    }

    #[test]
    fn builder_rejects_wrong_page_length() {
        let err = WalFrameBuilder::new()
            .page_index(1)
            .salts(Salts::default())
            .page(vec![0u8; 10])
            .build(0);
        assert!(matches!(err, Err(LuxWalError::InvalidArgument { .. })));
    }

    #[test]
    fn checksum_chains_from_seed() {
        let salts = Salts::new(1, 1);
        let page = page_with_prefix(&[1, 3, 3, 7]);
        let frame0 = WalFrameBuilder::new()
            .page_index(1)
            .commit(false)
            .salts(salts)
            .page(page.clone())
            .build(0)
            .unwrap();
        let frame1 = WalFrameBuilder::new()
            .page_index(2)
            .commit(true)
            .salts(salts)
            .page(page)
            .build(frame0.header.checksum)
            .unwrap();
        assert_ne!(frame0.header.checksum, frame1.header.checksum);
    }

    #[test]
    fn matches_epoch_detects_stale_salts() {
        let frame = WalFrameBuilder::new()
            .page_index(1)
            .salts(Salts::new(1, 1))
            .page(page_with_prefix(&[]))
            .build(0)
            .unwrap();
        assert!(frame.header.matches_epoch(Salts::new(1, 1)));
        assert!(!frame.header.matches_epoch(Salts::new(1, 2)));
    }

    #[test]
    fn recompute_checksum_matches_builder_output() {
        let salts = Salts::new(3, 4);
        let page = page_with_prefix(&[9, 9]);
        let frame = WalFrameBuilder::new()
            .page_index(5)
            .commit(true)
            .salts(salts)
            .page(page.clone())
            .build(FRAME_CHAIN_INITIAL_SEED)
            .unwrap();
        assert_eq!(
            recompute_checksum(FRAME_CHAIN_INITIAL_SEED, &frame.header, &page),
            frame.header.checksum
        );
    }

    #[test]
    fn from_bytes_rejects_short_buffer() {
        assert!(matches!(WalFrame::from_bytes(&[0u8; 10]), Err(LuxWalError::CorruptPage { .. })));
    }
}
