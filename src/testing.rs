//! Fixtures shared by the unit tests
use crate::{db::Database, model::AuthUser};
use tempfile::TempDir;

/// empty JSON-file database in a fresh temporary directory
pub fn scratch() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_json(dir.path().join("database.json")).unwrap();
    (dir, db)
}

pub fn tester() -> AuthUser {
    AuthUser {
        id: "u1".to_owned(),
        name: "Tester".to_owned(),
        email: "tester@fhd.agency".to_owned(),
        role: "user".to_owned(),
    }
}

pub fn admin() -> AuthUser {
    AuthUser {
        id: "a1".to_owned(),
        name: "Administrator".to_owned(),
        email: "admin@fhd.agency".to_owned(),
        role: "admin".to_owned(),
    }
}
