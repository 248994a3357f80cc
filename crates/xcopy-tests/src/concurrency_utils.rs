//! Measuring operations in flight
//!
//! [`ConcurrencyProbe`] forwards every call to an inner backend and records
//! how many calls were outstanding at once. An optional delay holds each call
//! open so that a task gets the chance to exceed its ceiling if it would.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use xcopy_types::{
    Backend, BatchResult, EntryOutcome, FileRequest, Location, MkdirsRequest, MvdirsRequest,
    Result, Stat, UserId,
};

/// Counters shared by a probe and the guards of its outstanding calls
#[derive(Debug, Default)]
struct Counters {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

/// Decrements the current count when the call it stands for returns
struct InFlight<'a> {
    counters: &'a Counters,
}

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.current.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        counters.total.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counters.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Backend wrapper recording the peak number of outstanding operations
pub struct ConcurrencyProbe {
    inner: Arc<dyn Backend>,
    delay: Duration,
    counters: Counters,
}

impl std::fmt::Debug for ConcurrencyProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyProbe")
            .field("inner", &self.inner.name())
            .field("delay", &self.delay)
            .field("counters", &self.counters)
            .finish()
    }
}

impl ConcurrencyProbe {
    /// Wrap `inner`, holding every call open for `delay`
    pub fn new(inner: Arc<dyn Backend>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            counters: Counters::default(),
        }
    }

    /// Most operations ever outstanding at once
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Operations outstanding right now
    pub fn current(&self) -> usize {
        self.counters.current.load(Ordering::SeqCst)
    }

    /// Operations started so far
    pub fn total(&self) -> usize {
        self.counters.total.load(Ordering::SeqCst)
    }

    async fn hold(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl Backend for ConcurrencyProbe {
    async fn readdir(&self, user: UserId, dir: &Location) -> Result<Vec<Stat>> {
        let _guard = InFlight::enter(&self.counters);
        self.hold().await;
        self.inner.readdir(user, dir).await
    }

    async fn mkdirs(&self, user: UserId, request: MkdirsRequest) -> Result<BatchResult> {
        let _guard = InFlight::enter(&self.counters);
        self.hold().await;
        self.inner.mkdirs(user, request).await
    }

    async fn mvdirs(&self, user: UserId, request: MvdirsRequest) -> Result<BatchResult> {
        let _guard = InFlight::enter(&self.counters);
        self.hold().await;
        self.inner.mvdirs(user, request).await
    }

    async fn copy_file(&self, user: UserId, request: FileRequest) -> Result<EntryOutcome> {
        let _guard = InFlight::enter(&self.counters);
        self.hold().await;
        self.inner.copy_file(user, request).await
    }

    async fn move_file(&self, user: UserId, request: FileRequest) -> Result<EntryOutcome> {
        let _guard = InFlight::enter(&self.counters);
        self.hold().await;
        self.inner.move_file(user, request).await
    }

    async fn remove_empty_dir(&self, user: UserId, dir: &Location) -> Result<bool> {
        let _guard = InFlight::enter(&self.counters);
        self.hold().await;
        self.inner.remove_empty_dir(user, dir).await
    }

    fn name(&self) -> &str {
        "probe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use xcopy_fs::MemoryBackend;

    #[tokio::test]
    async fn test_probe_counts_overlapping_calls() {
        let memory = MemoryBackend::new();
        memory.add_drive("d");
        memory.write_file("d", "a.txt", b"a");
        let probe = Arc::new(ConcurrencyProbe::new(
            Arc::new(memory),
            Duration::from_millis(20),
        ));

        let dir = Location::drive("d", "");
        let (first, second, third) = tokio::join!(
            probe.readdir(Uuid::nil(), &dir),
            probe.readdir(Uuid::nil(), &dir),
            probe.readdir(Uuid::nil(), &dir),
        );
        assert_eq!(first.unwrap().len(), 1);
        assert!(second.is_ok() && third.is_ok());
        assert_eq!(probe.peak(), 3);
        assert_eq!(probe.total(), 3);
        assert_eq!(probe.current(), 0);
    }
}
