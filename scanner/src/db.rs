use member_scan_common::member_id::MemberId;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::registry::{Member, MemberRegistry, RegistryError};

const MEMBER_COLUMNS: &str = "member_id, name, dob, email, phone, address, department,
                              member_since, next_renewal_date";

/// SQLite-backed member store.
///
/// Shares the `members` table layout with the management screens, so the
/// scanner can point at the same database file. WAL mode lets those screens
/// keep writing while the scanner reads.
pub struct MemberDb {
    conn: Mutex<Connection>,
}

impl MemberDb {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn, &path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self, RegistryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS members (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                member_id         TEXT UNIQUE NOT NULL,
                name              TEXT NOT NULL,
                dob               TEXT NOT NULL,
                email             TEXT,
                phone             TEXT,
                address           TEXT,
                department        TEXT,
                member_since      TEXT NOT NULL,
                next_renewal_date TEXT NOT NULL,
                profile_pic       BLOB
            );",
        )?;
        info!(path = label, "member database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a member record. Used for seeding; editing lives in the
    /// management screens.
    pub fn insert_member(&self, member: &Member) -> Result<(), RegistryError> {
        self.conn().execute(
            "INSERT INTO members (member_id, name, dob, email, phone, address, department,
                                  member_since, next_renewal_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                member.member_id.as_str(),
                member.name,
                member.dob,
                member.email,
                member.phone,
                member.address,
                member.department,
                member.member_since,
                member.next_renewal_date,
            ],
        )?;
        debug!(member_id = %member.member_id, name = member.name, "inserted member");
        Ok(())
    }

    pub fn count(&self) -> Result<usize, RegistryError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn row_to_member(row: &Row<'_>) -> rusqlite::Result<Result<Member, RegistryError>> {
    let raw_id: String = row.get(0)?;
    let member_id = match MemberId::parse(&raw_id) {
        Ok(id) => id,
        Err(_) => return Ok(Err(RegistryError::CorruptId(raw_id))),
    };
    Ok(Ok(Member {
        member_id,
        name: row.get(1)?,
        dob: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        address: row.get(5)?,
        department: row.get(6)?,
        member_since: row.get(7)?,
        next_renewal_date: row.get(8)?,
    }))
}

impl MemberRegistry for MemberDb {
    fn lookup(&self, id: &MemberId) -> Result<Option<Member>, RegistryError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE member_id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id.as_str()], row_to_member)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<Member>, RegistryError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members ORDER BY name"
        ))?;
        let rows = stmt.query_map([], row_to_member)?;
        let mut members = Vec::new();
        for row in rows {
            // Rows with ids that can never be scanned are left out of the index.
            match row? {
                Ok(member) => members.push(member),
                Err(e) => debug!(error = %e, "skipping member with malformed id"),
            }
        }
        Ok(members)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn member(id: &str, name: &str) -> Member {
        Member {
            member_id: MemberId::parse(id).unwrap(),
            name: name.into(),
            dob: "1990-04-01".into(),
            email: Some(format!("{}@example.org", name.to_lowercase().replace(' ', "."))),
            phone: None,
            address: None,
            department: Some("Tech".into()),
            member_since: "2024-01-15".into(),
            next_renewal_date: "2025-01-15".into(),
        }
    }

    pub(crate) fn seeded_db() -> MemberDb {
        let db = MemberDb::open_in_memory().unwrap();
        db.insert_member(&member("MEM-12AB34CD", "Jane Doe")).unwrap();
        db.insert_member(&member("MEM-ABCDEF12", "Adam Smith")).unwrap();
        db
    }

    #[test]
    fn lookup_finds_registered_member() {
        let db = seeded_db();
        let found = db
            .lookup(&MemberId::parse("MEM-12AB34CD").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "Jane Doe");
        assert_eq!(found.department.as_deref(), Some("Tech"));
    }

    #[test]
    fn lookup_of_unknown_id_is_none() {
        let db = seeded_db();
        assert!(db
            .lookup(&MemberId::parse("MEM-00000000").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn list_is_ordered_by_name() {
        let db = seeded_db();
        let names: Vec<_> = db.list().unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Adam Smith", "Jane Doe"]);
        assert_eq!(db.count().unwrap(), 2);
    }

    #[test]
    fn duplicate_member_id_is_rejected() {
        let db = seeded_db();
        let err = db.insert_member(&member("MEM-12AB34CD", "Someone Else"));
        assert!(matches!(err, Err(RegistryError::Storage(_))));
    }

    #[test]
    fn malformed_stored_ids_are_skipped_by_list() {
        let db = seeded_db();
        db.conn()
            .execute(
                "INSERT INTO members (member_id, name, dob, member_since, next_renewal_date)
                 VALUES ('legacy-7', 'Old Record', '1970-01-01', '2000-01-01', '2001-01-01')",
                [],
            )
            .unwrap();
        assert_eq!(db.count().unwrap(), 3);
        assert_eq!(db.list().unwrap().len(), 2);
    }

    #[test]
    fn open_creates_file_backed_database() {
        let dir = std::env::temp_dir().join(format!("member-scan-db-{}", std::process::id()));
        let path = dir.join("members.db");
        {
            let db = MemberDb::open(&path).unwrap();
            db.insert_member(&member("MEM-0000FFFF", "File Backed")).unwrap();
        }
        let reopened = MemberDb::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_reports_unusable_parent_directory() {
        let blocker =
            std::env::temp_dir().join(format!("member-scan-blocker-{}", std::process::id()));
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = MemberDb::open(&blocker.join("members.db")).err().unwrap();
        assert!(matches!(err, RegistryError::Io(_)), "got {err:?}");
        let _ = std::fs::remove_file(&blocker);
    }
}
