/*
 * Copyright 2020 Actyx AG
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
use crate::{
    db::{decode, Database},
    error::{ServiceError, ServiceResult},
    model::{AuthUser, User},
    params,
};
use anyhow::Result;
use bcrypt::{hash, verify};
use tracing::{info, instrument};
use uuid::Uuid;

/// User accounts; authentication itself happens outside, this only stores and checks passwords
pub struct Users<'db> {
    db: &'db Database,
    bcrypt_cost: u32,
}

impl<'db> Users<'db> {
    pub fn new(db: &'db Database, bcrypt_cost: u32) -> Self {
        Self { db, bcrypt_cost }
    }

    /// Create the initial admin account unless one with this e-mail exists
    ///
    /// Returns the id of the created user.
    #[instrument(skip(self, password))]
    pub fn seed_admin(&self, email: &str, name: &str, password: &str) -> Result<Option<String>> {
        let existing = self
            .db
            .prepare("SELECT * FROM users WHERE email = ?")
            .get(params![email])?;
        if existing.is_some() {
            info!("admin user already exists");
            return Ok(None);
        }
        let id = Uuid::new_v4().to_string();
        let hashed = hash(password, self.bcrypt_cost)?;
        self.db
            .prepare(
                "INSERT INTO users (id, email, password, name, role, active, created_at)
                 VALUES (?, ?, ?, ?, 'admin', TRUE, datetime('now'))",
            )
            .run(params![id.as_str(), email, hashed, name])?;
        info!(%id, "admin user created");
        Ok(Some(id))
    }

    pub fn find_active(&self, user_id: &str) -> Result<Option<AuthUser>> {
        let row = self
            .db
            .prepare("SELECT id, name, email, role FROM users WHERE id = ? AND active = 1")
            .get(params![user_id])?;
        Ok(row.map(decode::<User>).transpose()?.map(|u| u.auth()))
    }

    /// the account shared logins act as
    pub fn first_active_admin(&self) -> Result<Option<AuthUser>> {
        let row = self
            .db
            .prepare("SELECT * FROM users WHERE role = ? AND active = 1 LIMIT 1")
            .get(params!["admin"])?;
        Ok(row.map(decode::<User>).transpose()?.map(|u| u.auth()))
    }

    #[instrument(skip(self, user, current, new), fields(user_id = %user.id))]
    pub fn change_password(&self, user: &AuthUser, current: &str, new: &str) -> ServiceResult<()> {
        if current.is_empty() || new.is_empty() {
            return Err(ServiceError::validation("current and new password required"));
        }
        let stored = self
            .db
            .prepare("SELECT * FROM users WHERE id = ?")
            .get(params![user.id.as_str()])?
            .ok_or_else(|| ServiceError::not_found(format!("user {}", user.id)))?;
        let stored = decode::<User>(stored)?;
        let matches = match stored.password.as_deref() {
            Some(hashed) => verify(current, hashed).map_err(anyhow::Error::from)?,
            None => false,
        };
        if !matches {
            return Err(ServiceError::Unauthorized {
                remaining_attempts: None,
            });
        }
        let hashed = hash(new, self.bcrypt_cost).map_err(anyhow::Error::from)?;
        self.db
            .prepare("UPDATE users SET password = ? WHERE id = ?")
            .run(params![hashed, user.id.as_str()])?;
        info!("password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch;

    #[test]
    fn seeding_is_idempotent() {
        let (_dir, db) = scratch();
        let users = Users::new(&db, 4);
        let id = users
            .seed_admin("admin@fhd.agency", "Administrator", "Admin@123")
            .unwrap()
            .unwrap();
        assert_eq!(users.seed_admin("admin@fhd.agency", "Administrator", "x").unwrap(), None);
        assert_eq!(db.with_document(|doc| doc.table("users").len()), 1);

        let admin = users.find_active(&id).unwrap().unwrap();
        assert_eq!(admin.name, "Administrator");
        assert!(admin.is_admin());
        assert_eq!(users.first_active_admin().unwrap(), Some(admin));
        assert_eq!(users.find_active("someone-else").unwrap(), None);

        let stored = db.with_document(|doc| doc.table("users")[0].clone());
        let hashed = stored["password"].as_str().unwrap();
        assert!(hashed.starts_with("$2"));
        assert!(bcrypt::verify("Admin@123", hashed).unwrap());
    }

    #[test]
    fn legacy_numeric_flags_count_as_active() {
        let (_dir, db) = scratch();
        db.prepare("INSERT INTO users (id, email, name, role, active) VALUES ('u7', 'a@b.c', 'Alt', 'user', 1)")
            .run(params![])
            .unwrap();
        db.prepare("INSERT INTO users (id, email, name, role, active) VALUES ('u8', 'd@e.f', 'Weg', 'user', FALSE)")
            .run(params![])
            .unwrap();
        let users = Users::new(&db, 4);
        assert_eq!(users.find_active("u7").unwrap().unwrap().name, "Alt");
        assert_eq!(users.find_active("u8").unwrap(), None);
    }

    #[test]
    fn password_change_needs_the_current_password() {
        let (_dir, db) = scratch();
        let users = Users::new(&db, 4);
        let id = users.seed_admin("admin@fhd.agency", "Administrator", "Admin@123").unwrap().unwrap();
        let admin = users.find_active(&id).unwrap().unwrap();

        assert!(matches!(
            users.change_password(&admin, "wrong", "Neu#2025"),
            Err(ServiceError::Unauthorized { .. })
        ));
        assert!(matches!(
            users.change_password(&admin, "", "Neu#2025"),
            Err(ServiceError::Validation(_))
        ));
        users.change_password(&admin, "Admin@123", "Neu#2025").unwrap();
        users.change_password(&admin, "Neu#2025", "Admin@123").unwrap();
    }
}
