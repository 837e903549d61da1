pub mod poller;
pub mod state;

pub use poller::{PollTiming, ScanPoller};
pub use state::{
    CloseOutcome, CloseReason, ScanState, ScanStateMachine, SharedStateMachine, StateKind,
    Transition, TransitionError,
};
