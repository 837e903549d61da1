//! Member scanning pipeline: QR decoding of live frames, the hand-off slot
//! between capture and polling, the scan state machine, and the member
//! registry it resolves against.

pub mod capture;
pub mod controller;
pub mod db;
pub mod detect;
pub mod index;
pub mod registry;
pub mod session;
pub mod slot;

pub use controller::{Scanner, ScannerError, ScannerSnapshot};
pub use db::MemberDb;
pub use registry::{Member, MemberRegistry, RegistryError};
