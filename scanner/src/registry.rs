use member_scan_common::member_id::MemberId;
use serde::Serialize;

/// A registry record as the scanner sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub member_id: MemberId,
    pub name: String,
    pub dob: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub department: Option<String>,
    pub member_since: String,
    pub next_renewal_date: String,
}

impl Member {
    /// The `"<name> (<member_id>)"` form used by the member picker.
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.name, self.member_id)
    }
}

/// The lookup surface of the member store.
///
/// Implementations are synchronous; async callers run them on the blocking pool.
pub trait MemberRegistry: Send + Sync + 'static {
    fn lookup(&self, id: &MemberId) -> Result<Option<Member>, RegistryError>;

    /// All members, ordered by name.
    fn list(&self) -> Result<Vec<Member>, RegistryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry holds a malformed member id '{0}'")]
    CorruptId(String),
    #[error("registry task failed: {0}")]
    Task(String),
}
