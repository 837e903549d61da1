use member_scan_camera::CameraStatus;
use member_scan_common::config::ScannerConfig;
use member_scan_common::member_id::MemberId;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{CloseReason, SharedStateMachine, StateKind};
use crate::index::MemberIndex;
use crate::registry::{Member, MemberRegistry, RegistryError};
use crate::slot::ScanSlot;

/// Poller intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub poll_interval: Duration,
    /// How long a successful scan stays on screen before the panel closes.
    pub confirm_delay: Duration,
    /// How long a "not found" message stays up before scanning resumes.
    pub error_display: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            confirm_delay: Duration::from_millis(1500),
            error_display: Duration::from_millis(3000),
        }
    }
}

impl From<&ScannerConfig> for PollTiming {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            confirm_delay: config.confirm_delay(),
            error_display: config.error_display(),
        }
    }
}

/// Everything one poller task needs, handed over at session start.
pub struct ScanPoller {
    pub machine: SharedStateMachine,
    pub registry: Arc<dyn MemberRegistry>,
    pub index: Arc<RwLock<MemberIndex>>,
    pub slot: ScanSlot,
    pub camera: watch::Receiver<CameraStatus>,
    /// Session token. Cancelled by a user close, and by the poller itself on
    /// exit so the capture loop and camera stop with it.
    pub cancel: CancellationToken,
    pub timing: PollTiming,
}

impl ScanPoller {
    /// Drive the state machine until the session closes.
    ///
    /// Each iteration checks for a close, drains the slot, then sleeps.
    /// A lookup and the delay that follows it are never interrupted.
    pub async fn run(mut self) {
        info!(
            poll_ms = self.timing.poll_interval.as_millis() as u64,
            "scan poller started"
        );

        loop {
            if self.closed_or_closing() {
                break;
            }

            if let Some(id) = self.slot.take() {
                self.resolve(id).await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.timing.poll_interval) => {}
                _ = self.cancel.cancelled() => {}
            }
        }

        self.cancel.cancel();
        info!("scan poller stopped");
    }

    /// True once the machine is closed. Applies a pending user close or a
    /// stopped camera first.
    fn closed_or_closing(&self) -> bool {
        let mut machine = self.machine.lock();
        if machine.kind() == StateKind::Closed {
            return true;
        }

        let reason = if self.cancel.is_cancelled() {
            Some(CloseReason::UserRequest)
        } else {
            camera_close_reason(&self.camera)
        };
        let Some(reason) = reason else {
            return false;
        };

        match &reason {
            CloseReason::CameraFailed(msg) => warn!(reason = %msg, "camera failed, closing scanner"),
            CloseReason::CameraStopped => warn!("camera stopped, closing scanner"),
            _ => debug!("close requested"),
        }
        if let Err(e) = machine.request_close(reason) {
            warn!(error = %e, "close rejected");
        }
        machine.kind() == StateKind::Closed
    }

    async fn resolve(&mut self, id: MemberId) {
        if let Err(e) = self.machine.lock().payload_taken(id.clone()) {
            warn!(member_id = %id, error = %e, "dropping scanned id");
            return;
        }

        match self.lookup(&id).await {
            Some(member) => {
                info!(member_id = %id, name = member.name, "member resolved");
                self.ensure_indexed(&member).await;
                if let Err(e) = self.machine.lock().resolved(member) {
                    error!(member_id = %id, error = %e, "failed to apply resolution");
                    return;
                }
                tokio::time::sleep(self.timing.confirm_delay).await;
                if let Err(e) = self.machine.lock().confirm_elapsed() {
                    error!(error = %e, "failed to finish confirmation");
                }
            }
            None => {
                info!(member_id = %id, "scanned member id not registered");
                if let Err(e) = self.machine.lock().not_found() {
                    error!(member_id = %id, error = %e, "failed to apply lookup miss");
                    return;
                }
                // Anything the camera saw while the message was up is stale.
                self.slot.clear();
                if self.closed_or_closing() {
                    return;
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.timing.error_display) => {}
                    _ = self.cancel.cancelled() => {}
                    _ = self.camera.wait_for(CameraStatus::is_terminal) => {}
                }
                if self.closed_or_closing() {
                    return;
                }
                self.slot.clear();
                if let Err(e) = self.machine.lock().error_elapsed() {
                    warn!(error = %e, "failed to resume scanning");
                }
            }
        }
    }

    /// Registry backend failures count as "not found"; the scan can be retried.
    async fn lookup(&self, id: &MemberId) -> Option<Member> {
        let registry = Arc::clone(&self.registry);
        let key = id.clone();
        let result = tokio::task::spawn_blocking(move || registry.lookup(&key))
            .await
            .unwrap_or_else(|e| Err(RegistryError::Task(e.to_string())));
        match result {
            Ok(found) => found,
            Err(e) => {
                error!(member_id = %id, error = %e, "registry lookup failed");
                None
            }
        }
    }

    /// Make sure the resolved member is selectable, rebuilding the index
    /// from the registry when it was registered after the last build.
    async fn ensure_indexed(&self, member: &Member) {
        let known = self
            .index
            .read()
            .map(|index| index.contains(&member.member_id))
            .unwrap_or(false);
        if known {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let rebuilt = tokio::task::spawn_blocking(move || MemberIndex::build(registry.as_ref()))
            .await
            .unwrap_or_else(|e| Err(RegistryError::Task(e.to_string())));
        match rebuilt {
            Ok(index) => {
                debug!(entries = index.len(), "member index rebuilt");
                match self.index.write() {
                    Ok(mut guard) => *guard = index,
                    Err(poisoned) => *poisoned.into_inner() = index,
                }
            }
            Err(e) => warn!(error = %e, "failed to rebuild member index"),
        }
    }
}

/// Close reason implied by the camera's status, if any. A camera whose
/// status sender is gone counts as stopped.
fn camera_close_reason(camera: &watch::Receiver<CameraStatus>) -> Option<CloseReason> {
    if camera.has_changed().is_err() && !camera.borrow().is_terminal() {
        return Some(CloseReason::CameraStopped);
    }
    match &*camera.borrow() {
        CameraStatus::Stopped => Some(CloseReason::CameraStopped),
        CameraStatus::Failed(msg) => Some(CloseReason::CameraFailed(msg.clone())),
        CameraStatus::Starting | CameraStatus::Active => None,
    }
}
