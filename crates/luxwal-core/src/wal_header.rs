//! WAL file header: the fixed 32-byte record at offset 0 of `<db>-wal`
//! (spec.md §3, §4.8).

use luxwal_error::{LuxWalError, Result};
use luxwal_types::{Salts, WAL_HEADER_BYTES, WAL_MAGIC};
use luxwal_vfs::VfsFile;

use crate::hash::WalHasher;

/// The parsed WAL header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub db_size: i64,
    pub checkpoint_sequence: u32,
    pub salts: Salts,
    pub checksum: u64,
}

impl WalHeader {
    /// Hash (spec.md §4.1) of the 24 bytes preceding the checksum field:
    /// magic, dbSize, checkpointSequence, randomSalt, sequentialSalt.
    #[must_use]
    pub fn calculate_checksum(db_size: i64, checkpoint_sequence: u32, salts: Salts) -> u64 {
        let mut hasher = WalHasher::new();
        let mut buf = [0u8; 20];
        buf[0..8].copy_from_slice(&db_size.to_be_bytes());
        buf[8..12].copy_from_slice(&checkpoint_sequence.to_be_bytes());
        buf[12..16].copy_from_slice(&salts.random.to_be_bytes());
        buf[16..20].copy_from_slice(&salts.sequential.to_be_bytes());
        hasher.mix_i32(WAL_MAGIC as i32);
        hasher.mix_bytes(&buf, 0, buf.len());
        hasher.state()
    }

    /// Build a header, computing the checksum from the other fields.
    #[must_use]
    pub fn build(db_size: i64, checkpoint_sequence: u32, salts: Salts) -> Self {
        let checksum = Self::calculate_checksum(db_size, checkpoint_sequence, salts);
        Self {
            db_size,
            checkpoint_sequence,
            salts,
            checksum,
        }
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; WAL_HEADER_BYTES] {
        let mut buf = [0u8; WAL_HEADER_BYTES];
        buf[0..4].copy_from_slice(&WAL_MAGIC.to_be_bytes());
        buf[4..12].copy_from_slice(&self.db_size.to_be_bytes());
        buf[12..16].copy_from_slice(&self.checkpoint_sequence.to_be_bytes());
        buf[16..20].copy_from_slice(&self.salts.random.to_be_bytes());
        buf[20..24].copy_from_slice(&self.salts.sequential.to_be_bytes());
        buf[24..32].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; WAL_HEADER_BYTES]) -> Result<Self> {
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != WAL_MAGIC {
            return Err(LuxWalError::CorruptWal {
                detail: format!("bad magic 0x{magic:08X}"),
            });
        }
        let db_size = i64::from_be_bytes(buf[4..12].try_into().unwrap());
        let checkpoint_sequence = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let salts = Salts::new(
            u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            u32::from_be_bytes(buf[20..24].try_into().unwrap()),
        );
        let checksum = u64::from_be_bytes(buf[24..32].try_into().unwrap());

        let expected = Self::calculate_checksum(db_size, checkpoint_sequence, salts);
        if expected != checksum {
            return Err(LuxWalError::CorruptWal {
                detail: "WAL header checksum mismatch".to_owned(),
            });
        }

        Ok(Self {
            db_size,
            checkpoint_sequence,
            salts,
            checksum,
        })
    }

    /// Read and validate the header at `offset` in `file` (spec.md §4.8).
    /// Fails with `CorruptWal` if fewer than 32 bytes are present, the
    /// magic is wrong, or the checksum does not match.
    pub fn read_from_file(file: &impl VfsFile, offset: u64) -> Result<Self> {
        let mut buf = [0u8; WAL_HEADER_BYTES];
        let n = file.read(&mut buf, offset)?;
        if n < WAL_HEADER_BYTES {
            return Err(LuxWalError::CorruptWal {
                detail: format!("WAL header truncated: read {n} of {WAL_HEADER_BYTES} bytes"),
            });
        }
        Self::from_bytes(&buf)
    }

    /// Serialize and write the header at `offset` in `file`.
    pub fn write_to_file(self, file: &impl VfsFile, offset: u64) -> Result<()> {
        let buf = self.to_bytes();
        let n = file.write(&buf, offset)?;
        if n < WAL_HEADER_BYTES {
            return Err(LuxWalError::WriteTransient {
                detail: format!("short write: wrote {n} of {WAL_HEADER_BYTES} bytes"),
            });
        }
        Ok(())
    }
}
