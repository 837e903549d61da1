use member_scan_camera::{Camera, CameraStatus};
use member_scan_common::member_id::MemberId;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{run_capture_loop, AnnotatedFrame, CaptureStats, PreviewReceiver};
use crate::detect::FrameDecoder;
use crate::index::{IndexEntry, MemberIndex};
use crate::registry::{Member, MemberRegistry, RegistryError};
use crate::session::{
    CloseReason, PollTiming, ScanPoller, ScanState, SharedStateMachine, StateKind, Transition,
    TransitionError,
};
use crate::slot::ScanSlot;

#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// What the UI renders: state, status line and the current selection.
#[derive(Debug, Clone, Serialize)]
pub struct ScannerSnapshot {
    pub state: StateKind,
    pub is_open: bool,
    pub status_line: String,
    /// Id being resolved or reported as unknown.
    pub scanned_id: Option<MemberId>,
    /// Shown while `RESOLVED`.
    pub member: Option<Member>,
    pub selected_id: Option<MemberId>,
    pub selected: Option<IndexEntry>,
    pub camera: Option<&'static str>,
    pub last_close: Option<CloseReason>,
    pub transitions: Vec<Transition>,
}

/// Tasks and channels of one open-to-close scan session.
struct ScanSession {
    cancel: CancellationToken,
    camera: watch::Receiver<CameraStatus>,
    preview: PreviewReceiver,
    capture: JoinHandle<CaptureStats>,
    poller: JoinHandle<()>,
}

impl ScanSession {
    async fn join(self) {
        self.cancel.cancel();
        if let Err(e) = self.poller.await {
            warn!(error = %e, "scan poller task failed");
        }
        if let Err(e) = self.capture.await {
            warn!(error = %e, "capture task failed");
        }
    }
}

/// Owns the scanner panel: opens and closes scan sessions and reports state.
///
/// The state machine and the selection outlive individual sessions.
pub struct Scanner {
    camera: Arc<dyn Camera>,
    decoder: Arc<FrameDecoder>,
    registry: Arc<dyn MemberRegistry>,
    index: Arc<RwLock<MemberIndex>>,
    machine: SharedStateMachine,
    timing: PollTiming,
    root: CancellationToken,
    session: Mutex<Option<ScanSession>>,
    toggle_lock: tokio::sync::Mutex<()>,
}

impl Scanner {
    pub fn new(
        camera: Arc<dyn Camera>,
        decoder: FrameDecoder,
        registry: Arc<dyn MemberRegistry>,
        timing: PollTiming,
    ) -> Self {
        Self {
            camera,
            decoder: Arc::new(decoder),
            registry,
            index: Arc::new(RwLock::new(MemberIndex::default())),
            machine: SharedStateMachine::new(),
            timing,
            root: CancellationToken::new(),
            session: Mutex::new(None),
            toggle_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<ScanSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> Arc<dyn MemberRegistry> {
        Arc::clone(&self.registry)
    }

    /// Rebuild the member index from the registry. Returns the entry count.
    pub async fn refresh_index(&self) -> Result<usize, ScannerError> {
        let registry = Arc::clone(&self.registry);
        let index = tokio::task::spawn_blocking(move || MemberIndex::build(registry.as_ref()))
            .await
            .map_err(|e| RegistryError::Task(e.to_string()))??;
        let len = index.len();
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = index;
        info!(entries = len, "member index loaded");
        Ok(len)
    }

    pub fn search(&self, query: &str) -> Vec<IndexEntry> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .search(query)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Open when closed, request a close otherwise.
    pub async fn toggle(&self) -> Result<ScannerSnapshot, ScannerError> {
        let _serial = self.toggle_lock.lock().await;
        let is_open = self.machine.lock().is_open();
        if is_open {
            self.close();
        } else {
            self.open().await?;
        }
        Ok(self.snapshot())
    }

    async fn open(&self) -> Result<(), ScannerError> {
        // The previous poller exits as soon as the machine is closed.
        let previous = self.session().take();
        if let Some(previous) = previous {
            previous.join().await;
        }

        self.machine.lock().open()?;

        // Fresh per session, so nothing from an earlier scan can leak in.
        let slot = ScanSlot::new();
        let cancel = self.root.child_token();
        let camera = self.camera.start(cancel.child_token());
        let (preview_tx, preview_rx) = watch::channel(None);

        let capture = tokio::spawn(run_capture_loop(
            Arc::clone(&self.decoder),
            camera.frames,
            slot.clone(),
            preview_tx,
            cancel.child_token(),
        ));
        let poller = tokio::spawn(
            ScanPoller {
                machine: self.machine.clone(),
                registry: Arc::clone(&self.registry),
                index: Arc::clone(&self.index),
                slot,
                camera: camera.status.clone(),
                cancel: cancel.clone(),
                timing: self.timing,
            }
            .run(),
        );

        info!(camera = self.camera.name(), "scan session opened");
        *self.session() = Some(ScanSession {
            cancel,
            camera: camera.status,
            preview: preview_rx,
            capture,
            poller,
        });
        Ok(())
    }

    /// Stops frame capture at once; an in-flight lookup still completes.
    fn close(&self) {
        match self.machine.lock().request_close(CloseReason::UserRequest) {
            Ok(outcome) => info!(?outcome, "scanner close requested"),
            Err(e) => warn!(error = %e, "scanner close rejected"),
        }
        if let Some(session) = self.session().as_ref() {
            session.cancel.cancel();
        }
    }

    pub fn snapshot(&self) -> ScannerSnapshot {
        let (camera, camera_active) = match self.session().as_ref() {
            Some(s) => {
                let status = s.camera.borrow();
                (Some(status.label()), status.is_active())
            }
            None => (None, false),
        };
        let machine = self.machine.lock();
        let (scanned_id, member) = match machine.state() {
            ScanState::OpenResolving(id) | ScanState::OpenError(id) => (Some(id.clone()), None),
            ScanState::Resolved(m) => (Some(m.member_id.clone()), Some(m.clone())),
            ScanState::Closed | ScanState::OpenWaiting => (None, None),
        };
        let selected_id = machine.selected_id().cloned();
        let selected = selected_id.as_ref().and_then(|id| {
            self.index
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(id)
                .cloned()
        });

        ScannerSnapshot {
            state: machine.kind(),
            is_open: machine.is_open(),
            status_line: machine.status_line(camera_active),
            scanned_id,
            member,
            selected_id,
            selected,
            camera,
            last_close: machine.last_close().cloned(),
            transitions: machine.history().cloned().collect(),
        }
    }

    pub fn selected_id(&self) -> Option<MemberId> {
        self.machine.lock().selected_id().cloned()
    }

    /// Last annotated frame of the current or most recent session.
    pub fn latest_frame(&self) -> Option<Arc<AnnotatedFrame>> {
        self.session()
            .as_ref()
            .and_then(|s| s.preview.borrow().clone())
    }

    /// Cancel the live session, if any, and wait for its tasks.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let session = self.session().take();
        if let Some(session) = session {
            session.join().await;
        }
        info!("scanner shut down");
    }
}
