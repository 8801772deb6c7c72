//! The `luxwal` write-ahead log engine: hash chain, duplicated-header
//! shared-memory index, frame codec, and the public [`Engine`] surface
//! (spec.md §2 components 4–11).

pub mod engine;
pub mod frame;
pub mod hash;
pub mod index_header;
pub mod iterator;
pub mod shm_table;
pub mod telemetry;
pub mod wal_header;
pub mod wal_index;

pub use engine::{Engine, EngineOptions};
pub use frame::{WalFrame, WalFrameBuilder, WalFrameHeader, FRAME_CHAIN_INITIAL_SEED};
pub use hash::WalHasher;
pub use index_header::IndexHeaderFields;
pub use iterator::WalIterator;
pub use telemetry::{NoOpWalObserver, WalTelemetryEvent, WalTelemetryObserver};
pub use wal_header::WalHeader;
pub use wal_index::WalIndex;
