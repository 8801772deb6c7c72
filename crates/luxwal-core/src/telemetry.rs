//! Zero-cost telemetry observer: the `WalTelemetryObserver` / `NoOpWalObserver`
//! pattern used throughout this crate.
//!
//! Observers are notified of engine-level events alongside (not instead of)
//! the `tracing` instrumentation already present at each call site; they
//! exist for callers that want typed, structured hooks rather than parsing
//! log lines. Observers MUST NOT block or perform I/O.

use luxwal_types::PageNumber;

/// One notable thing the WAL engine observed.
#[derive(Debug, Clone, Copy)]
pub enum WalTelemetryEvent {
    ReadTransactionBegan,
    ReadTransactionEnded,
    WriteTransactionBegan,
    WriteTransactionEnded,
    FrameAppended { frame_index: i32, page: PageNumber, commit: bool },
    StalenessDetected,
    ChecksumFailure { frame_index: i32 },
}

/// Receives [`WalTelemetryEvent`]s from an [`crate::engine::Engine`].
///
/// The default (`NoOpWalObserver`) compiles away to nothing; callers that
/// care wire in their own implementation (metrics counters, structured
/// audit logs, test instrumentation) without the engine depending on any
/// particular telemetry backend.
pub trait WalTelemetryObserver: Send + Sync {
    fn on_event(&self, event: WalTelemetryEvent);
}

/// Discards every event. The default observer for an [`crate::engine::Engine`]
/// that was not given one explicitly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpWalObserver;

impl WalTelemetryObserver for NoOpWalObserver {
    fn on_event(&self, _event: WalTelemetryEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        count: AtomicUsize,
    }

    impl WalTelemetryObserver for CountingObserver {
        fn on_event(&self, _event: WalTelemetryEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_accepts_every_event_variant() {
        let observer = NoOpWalObserver;
        observer.on_event(WalTelemetryEvent::ReadTransactionBegan);
        observer.on_event(WalTelemetryEvent::ChecksumFailure { frame_index: 3 });
    }

    #[test]
    fn custom_observer_counts_events() {
        let observer = CountingObserver {
            count: AtomicUsize::new(0),
        };
        observer.on_event(WalTelemetryEvent::WriteTransactionBegan);
        observer.on_event(WalTelemetryEvent::WriteTransactionEnded);
        assert_eq!(observer.count.load(Ordering::SeqCst), 2);
    }
}
