//! Sequential, sized traversal of committed frames in a WAL file
//! (spec.md §4.10).

use luxwal_error::{LuxWalError, Result};
use luxwal_types::{FrameIndex, FRAME_BYTES, WAL_HEADER_BYTES};
use luxwal_vfs::VfsFile;

use crate::frame::WalFrame;

/// Iterates frames `0..frame_count` of a WAL file in file order. Ordered,
/// sized, and immutable: each step reads exactly one `frame_bytes` record
/// and parses it; it never mutates the underlying file.
pub struct WalIterator<'a, F: VfsFile> {
    file: &'a F,
    frame_count: usize,
    next_index: usize,
}

impl<'a, F: VfsFile> WalIterator<'a, F> {
    /// Build an iterator over the first `frame_count` frames of `file`.
    ///
    /// Fails with `CorruptWal` if `file` is smaller than the WAL header —
    /// there is nowhere for frame 0 to start.
    pub fn new(file: &'a F, frame_count: usize) -> Result<Self> {
        let size = file.size()?;
        if size < WAL_HEADER_BYTES as u64 {
            return Err(LuxWalError::CorruptWal {
                detail: format!("WAL file smaller than header: {size} bytes"),
            });
        }
        Ok(Self {
            file,
            frame_count,
            next_index: 0,
        })
    }

    /// Derive the frame count from file size alone, ignoring any trailing
    /// partial frame (evidence of an in-flight writer, handled elsewhere).
    #[must_use]
    pub fn frame_count_from_file_size(file_size: u64) -> usize {
        if file_size < WAL_HEADER_BYTES as u64 {
            return 0;
        }
        ((file_size - WAL_HEADER_BYTES as u64) / FRAME_BYTES as u64) as usize
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.frame_count
    }

    fn read_frame(&self, index: usize) -> Result<WalFrame> {
        let offset = WAL_HEADER_BYTES as u64 + (index as u64) * FRAME_BYTES as u64;
        let mut buf = vec![0u8; FRAME_BYTES];
        let n = self.file.read(&mut buf, offset)?;
        if n < FRAME_BYTES {
            return Err(LuxWalError::CorruptPage {
                frame_index: FrameIndex::new(index as i32).get(),
                detail: format!("short frame read: {n} of {FRAME_BYTES} bytes at offset {offset}"),
            });
        }
        WalFrame::from_bytes(&buf)
    }
}

impl<F: VfsFile> Iterator for WalIterator<'_, F> {
    type Item = Result<WalFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.frame_count {
            return None;
        }
        let result = self.read_frame(self.next_index);
        self.next_index += 1;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.frame_count - self.next_index;
        (remaining, Some(remaining))
    }
}

impl<F: VfsFile> ExactSizeIterator for WalIterator<'_, F> {
    fn len(&self) -> usize {
        self.frame_count - self.next_index
    }
}
