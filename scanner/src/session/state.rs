use member_scan_common::member_id::MemberId;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::registry::Member;

const HISTORY_LEN: usize = 32;

/// Where the scanner panel is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    /// Panel hidden, nothing polled.
    Closed,
    /// Camera running, slot empty.
    OpenWaiting,
    /// A member id was taken from the slot and is being looked up.
    OpenResolving(MemberId),
    /// The id is well-formed but not registered.
    OpenError(MemberId),
    /// The id matched; shown until the confirmation delay ends.
    Resolved(Member),
}

/// Payload-free tag of a [`ScanState`], for logs and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateKind {
    Closed,
    OpenWaiting,
    OpenResolving,
    OpenError,
    Resolved,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateKind::Closed => "CLOSED",
            StateKind::OpenWaiting => "OPEN_WAITING",
            StateKind::OpenResolving => "OPEN_RESOLVING",
            StateKind::OpenError => "OPEN_ERROR",
            StateKind::Resolved => "RESOLVED",
        })
    }
}

impl ScanState {
    pub fn kind(&self) -> StateKind {
        match self {
            ScanState::Closed => StateKind::Closed,
            ScanState::OpenWaiting => StateKind::OpenWaiting,
            ScanState::OpenResolving(_) => StateKind::OpenResolving,
            ScanState::OpenError(_) => StateKind::OpenError,
            ScanState::Resolved(_) => StateKind::Resolved,
        }
    }

    /// Everything but `Closed` keeps the panel on screen.
    pub fn is_open(&self) -> bool {
        !matches!(self, ScanState::Closed)
    }
}

/// Why a session was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    UserRequest,
    CameraStopped,
    CameraFailed(String),
    /// The confirmation delay after a successful scan ran out.
    Resolved,
}

/// Result of a close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// Held until the in-flight resolution reaches its outcome state.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: StateKind,
    pub to: StateKind,
    pub at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {event} while {state}")]
    Illegal { event: &'static str, state: StateKind },
    #[error("resolved member {got} does not match the id being resolved ({expected})")]
    MemberMismatch { expected: MemberId, got: MemberId },
}

/// The scanner's single authoritative state plus the selection it produced.
///
/// Transitions are methods; an event that makes no sense for the current
/// state is rejected with [`TransitionError`] and leaves the state as it was.
#[derive(Debug)]
pub struct ScanStateMachine {
    state: ScanState,
    selected_id: Option<MemberId>,
    pending_close: Option<CloseReason>,
    last_close: Option<CloseReason>,
    history: VecDeque<Transition>,
}

impl Default for ScanStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanStateMachine {
    pub fn new() -> Self {
        Self {
            state: ScanState::Closed,
            selected_id: None,
            pending_close: None,
            last_close: None,
            history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Set only by a successful resolution; kept across sessions.
    pub fn selected_id(&self) -> Option<&MemberId> {
        self.selected_id.as_ref()
    }

    pub fn pending_close(&self) -> Option<&CloseReason> {
        self.pending_close.as_ref()
    }

    pub fn last_close(&self) -> Option<&CloseReason> {
        self.last_close.as_ref()
    }

    /// Oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Transition> {
        self.history.iter()
    }

    fn enter(&mut self, next: ScanState) {
        let from = self.state.kind();
        let to = next.kind();
        info!("{from}→{to}");
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(Transition {
            from,
            to,
            at_ms: chrono::Utc::now().timestamp_millis(),
        });
        self.state = next;
    }

    fn illegal(&self, event: &'static str) -> TransitionError {
        TransitionError::Illegal {
            event,
            state: self.state.kind(),
        }
    }

    fn close(&mut self, reason: CloseReason) {
        debug!(reason = ?reason, "closing scanner");
        self.pending_close = None;
        self.last_close = Some(reason);
        self.enter(ScanState::Closed);
    }

    /// `CLOSED → OPEN_WAITING` on user toggle.
    pub fn open(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.state, ScanState::Closed) {
            return Err(self.illegal("open"));
        }
        self.pending_close = None;
        self.last_close = None;
        self.enter(ScanState::OpenWaiting);
        Ok(())
    }

    /// `OPEN_WAITING → OPEN_RESOLVING` when the slot yields an id.
    pub fn payload_taken(&mut self, id: MemberId) -> Result<(), TransitionError> {
        if !matches!(self.state, ScanState::OpenWaiting) {
            return Err(self.illegal("resolve a payload"));
        }
        self.enter(ScanState::OpenResolving(id));
        Ok(())
    }

    /// `OPEN_RESOLVING → RESOLVED`. Sets the selection.
    ///
    /// A close requested during the lookup stays pending; the confirmation
    /// delay still runs and ends in `CLOSED` either way.
    pub fn resolved(&mut self, member: Member) -> Result<(), TransitionError> {
        let ScanState::OpenResolving(expected) = &self.state else {
            return Err(self.illegal("apply a resolution"));
        };
        if *expected != member.member_id {
            return Err(TransitionError::MemberMismatch {
                expected: expected.clone(),
                got: member.member_id,
            });
        }
        self.selected_id = Some(member.member_id.clone());
        self.enter(ScanState::Resolved(member));
        Ok(())
    }

    /// `OPEN_RESOLVING → OPEN_ERROR`. A close requested during the lookup is
    /// applied right after the error state has been entered.
    pub fn not_found(&mut self) -> Result<(), TransitionError> {
        let ScanState::OpenResolving(id) = &self.state else {
            return Err(self.illegal("report a missing member"));
        };
        let id = id.clone();
        self.enter(ScanState::OpenError(id));
        if let Some(reason) = self.pending_close.take() {
            self.close(reason);
        }
        Ok(())
    }

    /// `OPEN_ERROR → OPEN_WAITING` once the message has been shown.
    pub fn error_elapsed(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.state, ScanState::OpenError(_)) {
            return Err(self.illegal("dismiss an error"));
        }
        self.enter(ScanState::OpenWaiting);
        Ok(())
    }

    /// `RESOLVED → CLOSED` after the confirmation delay.
    pub fn confirm_elapsed(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.state, ScanState::Resolved(_)) {
            return Err(self.illegal("finish a confirmation"));
        }
        let reason = self.pending_close.take().unwrap_or(CloseReason::Resolved);
        self.close(reason);
        Ok(())
    }

    /// User toggle or camera stop. Immediate from `OPEN_WAITING` and
    /// `OPEN_ERROR`; deferred from `OPEN_RESOLVING` and `RESOLVED`.
    pub fn request_close(&mut self, reason: CloseReason) -> Result<CloseOutcome, TransitionError> {
        match self.state {
            ScanState::Closed => Err(self.illegal("close")),
            ScanState::OpenWaiting | ScanState::OpenError(_) => {
                self.close(reason);
                Ok(CloseOutcome::Closed)
            }
            ScanState::OpenResolving(_) | ScanState::Resolved(_) => {
                debug!(reason = ?reason, state = %self.state.kind(), "close deferred");
                // The first reason sticks.
                self.pending_close.get_or_insert(reason);
                Ok(CloseOutcome::Deferred)
            }
        }
    }

    /// The status line shown under the video panel. An open panel whose
    /// camera is not streaming yet reads the same as a closed one.
    pub fn status_line(&self, camera_active: bool) -> String {
        match &self.state {
            ScanState::OpenWaiting | ScanState::OpenResolving(_) if camera_active => {
                "Camera is active, looking...".to_string()
            }
            ScanState::Closed | ScanState::OpenWaiting | ScanState::OpenResolving(_) => {
                "Camera is not active.".to_string()
            }
            ScanState::OpenError(id) => format!("Error: Member ID '{id}' not found."),
            ScanState::Resolved(member) => format!("Member Found: {}. Loading...", member.name),
        }
    }
}

/// The state machine as shared between the scanner controller and its poller.
#[derive(Debug, Clone, Default)]
pub struct SharedStateMachine(Arc<Mutex<ScanStateMachine>>);

impl SharedStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ScanStateMachine> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::member;

    fn id(s: &str) -> MemberId {
        MemberId::parse(s).unwrap()
    }

    fn kinds(m: &ScanStateMachine) -> Vec<(StateKind, StateKind)> {
        m.history().map(|t| (t.from, t.to)).collect()
    }

    #[test]
    fn starts_closed_and_only_opens() {
        let mut m = ScanStateMachine::new();
        assert_eq!(m.kind(), StateKind::Closed);
        assert_eq!(m.status_line(true), "Camera is not active.");
        assert!(m.payload_taken(id("MEM-12AB34CD")).is_err());
        assert!(m.not_found().is_err());
        assert!(m.error_elapsed().is_err());
        assert!(m.confirm_elapsed().is_err());
        assert!(m.request_close(CloseReason::UserRequest).is_err());
        assert_eq!(m.kind(), StateKind::Closed);

        m.open().unwrap();
        assert_eq!(m.kind(), StateKind::OpenWaiting);
        assert_eq!(m.status_line(true), "Camera is active, looking...");
        assert_eq!(m.status_line(false), "Camera is not active.");
        assert!(m.open().is_err());
    }

    #[test]
    fn registered_member_resolves_then_closes() {
        let mut m = ScanStateMachine::new();
        m.open().unwrap();
        m.payload_taken(id("MEM-ABCDEF12")).unwrap();
        m.resolved(member("MEM-ABCDEF12", "Adam Smith")).unwrap();
        assert_eq!(m.status_line(true), "Member Found: Adam Smith. Loading...");
        assert_eq!(m.selected_id().unwrap().as_str(), "MEM-ABCDEF12");
        m.confirm_elapsed().unwrap();

        assert_eq!(
            kinds(&m),
            vec![
                (StateKind::Closed, StateKind::OpenWaiting),
                (StateKind::OpenWaiting, StateKind::OpenResolving),
                (StateKind::OpenResolving, StateKind::Resolved),
                (StateKind::Resolved, StateKind::Closed),
            ]
        );
        assert_eq!(m.last_close(), Some(&CloseReason::Resolved));
    }

    #[test]
    fn unknown_member_errors_then_waits_again() {
        let mut m = ScanStateMachine::new();
        m.open().unwrap();
        m.payload_taken(id("MEM-00000000")).unwrap();
        m.not_found().unwrap();
        assert_eq!(m.status_line(false), "Error: Member ID 'MEM-00000000' not found.");
        assert!(m.selected_id().is_none());
        m.error_elapsed().unwrap();
        assert_eq!(m.kind(), StateKind::OpenWaiting);
    }

    #[test]
    fn resolution_must_match_the_id_being_resolved() {
        let mut m = ScanStateMachine::new();
        m.open().unwrap();
        m.payload_taken(id("MEM-12AB34CD")).unwrap();
        let err = m.resolved(member("MEM-ABCDEF12", "Adam Smith")).unwrap_err();
        assert!(matches!(err, TransitionError::MemberMismatch { .. }));
        assert_eq!(m.kind(), StateKind::OpenResolving);
    }

    #[test]
    fn close_while_waiting_or_in_error_is_immediate() {
        let mut m = ScanStateMachine::new();
        m.open().unwrap();
        assert_eq!(
            m.request_close(CloseReason::CameraStopped).unwrap(),
            CloseOutcome::Closed
        );
        assert_eq!(m.kind(), StateKind::Closed);
        assert_eq!(m.last_close(), Some(&CloseReason::CameraStopped));

        m.open().unwrap();
        assert!(m.last_close().is_none());
        m.payload_taken(id("MEM-00000000")).unwrap();
        m.not_found().unwrap();
        m.request_close(CloseReason::UserRequest).unwrap();
        assert_eq!(m.kind(), StateKind::Closed);
    }

    #[test]
    fn close_during_resolving_waits_for_the_outcome() {
        let mut m = ScanStateMachine::new();
        m.open().unwrap();
        m.payload_taken(id("MEM-00000000")).unwrap();
        assert_eq!(
            m.request_close(CloseReason::CameraFailed("unplugged".into())).unwrap(),
            CloseOutcome::Deferred
        );
        assert_eq!(m.kind(), StateKind::OpenResolving);
        assert!(m.pending_close().is_some());

        m.not_found().unwrap();
        assert_eq!(
            &kinds(&m)[1..],
            &[
                (StateKind::OpenWaiting, StateKind::OpenResolving),
                (StateKind::OpenResolving, StateKind::OpenError),
                (StateKind::OpenError, StateKind::Closed),
            ]
        );
        assert_eq!(
            m.last_close(),
            Some(&CloseReason::CameraFailed("unplugged".into()))
        );
        assert!(m.pending_close().is_none());
    }

    #[test]
    fn deferred_close_keeps_the_resolution() {
        let mut m = ScanStateMachine::new();
        m.open().unwrap();
        m.payload_taken(id("MEM-12AB34CD")).unwrap();
        m.request_close(CloseReason::UserRequest).unwrap();
        m.resolved(member("MEM-12AB34CD", "Jane Doe")).unwrap();
        assert_eq!(m.kind(), StateKind::Resolved);
        assert_eq!(
            m.request_close(CloseReason::CameraStopped).unwrap(),
            CloseOutcome::Deferred
        );
        m.confirm_elapsed().unwrap();
        assert_eq!(m.kind(), StateKind::Closed);
        assert_eq!(m.last_close(), Some(&CloseReason::UserRequest));
        assert_eq!(m.selected_id().unwrap().as_str(), "MEM-12AB34CD");
    }

    #[test]
    fn selection_survives_later_sessions() {
        let mut m = ScanStateMachine::new();
        m.open().unwrap();
        m.payload_taken(id("MEM-12AB34CD")).unwrap();
        m.resolved(member("MEM-12AB34CD", "Jane Doe")).unwrap();
        m.confirm_elapsed().unwrap();

        m.open().unwrap();
        m.payload_taken(id("MEM-00000000")).unwrap();
        m.not_found().unwrap();
        m.request_close(CloseReason::UserRequest).unwrap();
        assert_eq!(m.selected_id().unwrap().as_str(), "MEM-12AB34CD");
    }

    #[test]
    fn history_is_bounded() {
        let mut m = ScanStateMachine::new();
        for _ in 0..40 {
            m.open().unwrap();
            m.request_close(CloseReason::UserRequest).unwrap();
        }
        assert_eq!(m.history().count(), HISTORY_LEN);
        let last = m.history().last().unwrap();
        assert_eq!((last.from, last.to), (StateKind::OpenWaiting, StateKind::Closed));
    }

    #[test]
    fn shared_machine_recovers_from_poison() {
        let shared = SharedStateMachine::new();
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.0.lock().unwrap();
            panic!("poison");
        })
        .join();
        shared.lock().open().unwrap();
        assert!(shared.lock().is_open());
    }
}
