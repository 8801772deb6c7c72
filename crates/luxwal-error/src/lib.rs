//! Error taxonomy for the `luxwal` WAL engine (spec.md §7).
//!
//! Every error that can reach a caller of `luxwal-core` or `luxwal-vfs` is
//! one of the variants below; internal `std::io::Error`s are translated to
//! the appropriate variant at the crate boundary rather than leaking raw.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LuxWalError>;

/// The WAL engine's error taxonomy, grouped by recovery policy in spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum LuxWalError {
    /// Checksum failure, bad magic, or a truncated WAL/header. Fatal for the
    /// current session; surface to the caller.
    #[error("corrupt WAL: {detail}")]
    CorruptWal { detail: String },

    /// A WAL frame's page payload could not be fully read. Fatal; surface.
    #[error("corrupt page at frame {frame_index}: {detail}")]
    CorruptPage { frame_index: i32, detail: String },

    /// Page requested at a frame index past `lastCommitFrame`. Expected;
    /// surface to caller.
    #[error("no such page: frame index {frame_index} past last commit {last_commit_frame}")]
    NoSuchPage {
        frame_index: i32,
        last_commit_frame: i32,
    },

    /// The index snapshot changed between SHARED and EXCLUSIVE acquisition.
    /// Recoverable: release locks and retry from `begin_read_transaction`.
    #[error("stale WAL snapshot")]
    StaleWal,

    /// EXCLUSIVE requested without SHARED already held. Programmer error;
    /// fatal for this session.
    #[error("lock requested out of order: {detail}")]
    OutOfOrderLock { detail: String },

    /// File lock acquisition failed for a reason other than interrupt.
    /// Propagate; caller may retry.
    #[error("file lock failed: {detail}")]
    LockFailed { detail: String },

    /// Blocking I/O was interrupted and the underlying file handle was
    /// closed. Fatal for this handle; caller must `reopen`.
    #[error("WAL handle closed by interrupt")]
    ClosedByInterrupt,

    /// Another thread closed the underlying file out from under this
    /// handle. Transient; caller may retry with a fresh handle.
    #[error("WAL handle closed asynchronously by another thread")]
    ClosedAsync,

    /// Non-deterministic I/O error during append. Transient; caller should
    /// retry.
    #[error("transient error during WAL write: {detail}")]
    WriteTransient { detail: String },

    /// Non-writable channel, corruption detected mid-write, or a closed
    /// channel. Fatal; caller must not retry.
    #[error("fatal error during WAL write: {detail}")]
    WriteFatal { detail: String },

    /// Both index-header copies differ and the current thread does not
    /// hold EXCLUSIVE. Recoverable: retry the snapshot load.
    #[error("concurrent modification detected in WAL index header")]
    ConcurrentModification,

    /// The off-heap hash table's grow operation was re-entered. Fatal;
    /// pre-grow capacity/size is restored before this is raised.
    #[error("recursive grow detected in off-heap hash table")]
    RecursiveGrow,

    /// WAL creation was attempted while another thread was already creating
    /// it. Transient; caller retries.
    #[error("WAL initializer lock busy")]
    InitLockBusy,

    /// A caller-supplied argument violates a documented precondition.
    #[error("invalid argument: {detail}")]
    InvalidArgument { detail: String },

    /// A width-checked arithmetic operation would overflow.
    #[error("arithmetic overflow: {detail}")]
    ArithmeticOverflow { detail: String },

    /// The requested operation is a documented non-goal (spec.md §1), e.g.
    /// opening a WAL over a non-empty database with no existing WAL.
    #[error("not implemented: {detail}")]
    NotImplemented { detail: String },

    /// An untranslated I/O error reached the crate boundary. Boundary code
    /// should prefer a more specific variant; this is the fallback.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LuxWalError {
    /// Construct an internal-invariant-violation error: for "this should be
    /// unreachable" conditions that are still surfaced as typed errors
    /// rather than panics.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::CorruptWal {
            detail: msg.into(),
        }
    }

    /// True for variants spec.md §7 classifies as recoverable by a simple
    /// caller-side retry (no state reconstruction beyond re-entering the
    /// read-transaction boundary).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StaleWal
                | Self::LockFailed { .. }
                | Self::ClosedAsync
                | Self::WriteTransient { .. }
                | Self::ConcurrentModification
                | Self::InitLockBusy
        )
    }
}
