use member_scan_common::member_id::MemberId;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Hand-off cell between the capture loop and the scan poller.
///
/// Holds at most one unread member id. The lock is held only for the get or
/// set of the value itself; decoding and registry lookups happen outside it.
/// One slot is created per scan session and cloned into both tasks.
#[derive(Debug, Clone, Default)]
pub struct ScanSlot {
    inner: Arc<Mutex<Option<MemberId>>>,
}

impl ScanSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<MemberId>> {
        // A panic elsewhere cannot leave an Option half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `id`, replacing any unread value. Last detection wins.
    pub fn write(&self, id: MemberId) {
        *self.lock() = Some(id);
    }

    /// Read and clear in one critical section.
    pub fn take(&self) -> Option<MemberId> {
        self.lock().take()
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}
