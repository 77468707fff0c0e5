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
//! Settings read from a TOML file; every key is optional. The admin password may also
//! come from the environment, see [`PASSWORD_VARS`](constant.PASSWORD_VARS.html).
//!
//! ```toml
//! data_dir = "/var/lib/fhd"
//! backend = "sqlite"
//! offer_prefix = "FHD"
//! admin_password = "$2b$12$..."
//!
//! [seed_admin]
//! email = "admin@fhd.agency"
//!
//! [letterhead]
//! company_name = "Fashion Holding Düsseldorf"
//! ```

use crate::{admin::AdminSecret, db::Database, offer_number::DEFAULT_PREFIX, offers::Letterhead};
use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

/// Environment variables overriding `admin_password`, lowest precedence first
pub const PASSWORD_VARS: [&str; 2] = ["CALC_ADMIN_PASSWORD", "CALC_ADMIN_PASSWORD_HASH"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Json,
    Sqlite,
}

impl Backend {
    fn default_file(self) -> &'static str {
        match self {
            Backend::Json => "database.json",
            Backend::Sqlite => "database.sqlite",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedAdmin {
    pub email: String,
    pub name: String,
    pub password: String,
}

impl Default for SeedAdmin {
    fn default() -> Self {
        Self {
            email: "admin@fhd.agency".to_owned(),
            name: "Administrator".to_owned(),
            password: "Admin@123".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub backend: Backend,
    /// defaults to `database.json` or `database.sqlite` depending on the backend
    pub file_name: Option<String>,
    pub offer_prefix: String,
    #[serde(deserialize_with = "crate::model::lenient::text")]
    pub admin_password: Option<String>,
    pub seed_admin: SeedAdmin,
    pub letterhead: Letterhead,
    pub bcrypt_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backend: Backend::Json,
            file_name: None,
            offer_prefix: DEFAULT_PREFIX.to_owned(),
            admin_password: None,
            seed_admin: SeedAdmin::default(),
            letterhead: Letterhead::default(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    /// Defaults, overlaid by the TOML file if one is given, overlaid by the environment
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = match path {
            Some(path) => Figment::new().merge(Toml::file(path)),
            None => Figment::new(),
        };
        PASSWORD_VARS.iter().fold(figment, |figment, var| {
            figment.merge(Env::raw().only(&[*var]).map(|_| "admin_password".into()))
        })
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.is_file() {
                bail!("config file {} not found", path.display());
            }
        }
        let config = Self::figment(path)
            .extract()
            .with_context(|| match path {
                Some(path) => format!("reading config {}", path.display()),
                None => "reading config from the environment".to_owned(),
            })?;
        Ok(config)
    }

    /// Settings from TOML text alone, without looking at the environment
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Figment::new().merge(Toml::string(text)).extract()?)
    }

    pub fn database_path(&self) -> PathBuf {
        let file = self
            .file_name
            .as_deref()
            .unwrap_or_else(|| self.backend.default_file());
        self.data_dir.join(file)
    }

    pub fn open_database(&self) -> Result<Database> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data directory {}", self.data_dir.display()))?;
        let path = self.database_path();
        info!(path = %path.display(), backend = ?self.backend, "opening database");
        match self.backend {
            Backend::Json => Database::open_json(&path),
            Backend::Sqlite => Database::open_sqlite(&path.to_string_lossy()),
        }
    }

    pub fn admin_secret(&self) -> AdminSecret {
        AdminSecret::from_config(self.admin_password.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn empty_file_means_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.database_path(), PathBuf::from("data/database.json"));
        assert_eq!(config.admin_secret(), AdminSecret::Unset);
    }

    #[test]
    fn partial_sections_keep_their_defaults() {
        let config = Config::parse(
            r#"
            backend = "sqlite"
            offer_prefix = "XY"
            admin_password = "$2b$04$abcdefghijklmnopqrstuv"

            [seed_admin]
            email = "chef@example.com"

            [letterhead]
            company_name = "Muster AG"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Sqlite);
        assert_eq!(config.database_path(), PathBuf::from("data/database.sqlite"));
        assert_eq!(config.offer_prefix, "XY");
        assert_eq!(config.seed_admin.email, "chef@example.com");
        assert_eq!(config.seed_admin.name, "Administrator");
        assert_eq!(config.letterhead.company_name, "Muster AG");
        assert_eq!(config.letterhead.signature, "Fashion Holding Düsseldorf GmbH");
        assert!(matches!(config.admin_secret(), AdminSecret::Hash(_)));

        assert!(Config::parse("backend = \"mysql\"").is_err());
    }

    #[test]
    fn environment_overrides_admin_password() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("fhd.toml", "admin_password = \"from-file\"\noffer_prefix = \"XY\"")?;
            let path = Path::new("fhd.toml");
            let config = Config::load(Some(path)).unwrap();
            assert_eq!(config.admin_secret(), AdminSecret::Plain("from-file".to_owned()));

            jail.set_env("CALC_ADMIN_PASSWORD", "plain");
            let config = Config::load(Some(path)).unwrap();
            assert_eq!(config.admin_secret(), AdminSecret::Plain("plain".to_owned()));
            assert_eq!(config.offer_prefix, "XY");

            // numeric passwords stay text
            jail.set_env("CALC_ADMIN_PASSWORD", "12345");
            let config = Config::load(None).unwrap();
            assert_eq!(config.admin_secret(), AdminSecret::Plain("12345".to_owned()));

            // the hash wins over the plain password
            jail.set_env("CALC_ADMIN_PASSWORD_HASH", "$2b$04$abcdefghijklmnopqrstuv");
            let config = Config::load(Some(path)).unwrap();
            assert!(matches!(config.admin_secret(), AdminSecret::Hash(_)));

            assert!(Config::load(Some(Path::new("missing.toml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn opens_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        for backend in &[Backend::Json, Backend::Sqlite] {
            let config = Config {
                data_dir: dir.path().join("nested"),
                backend: *backend,
                ..Config::default()
            };
            let db = config.open_database().unwrap();
            db.prepare("INSERT INTO users (id, name) VALUES (?, ?)")
                .run(params!["u1", "Tester"])
                .unwrap();
            drop(db);
            let db = config.open_database().unwrap();
            assert_eq!(db.with_document(|doc| doc.table("users").len()), 1);
            assert!(config.database_path().exists());
        }
    }
}
