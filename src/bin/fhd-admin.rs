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
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use fhd_calc_store::{admin::Admin, model::AuthUser, users::Users, Config, Database};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Maintenance commands for the calculation store
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML settings file, defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the initial admin account if it does not exist yet
    Seed,
    /// Print a page of the activity log
    Logs {
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Print the whole database, deleted rows included
    Export,
}

fn main() -> Result<()> {
    // set up logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let db = config.open_database()?;

    match cli.command {
        Command::Seed => {
            let seed = &config.seed_admin;
            let created = Users::new(&db, config.bcrypt_cost).seed_admin(&seed.email, &seed.name, &seed.password)?;
            println!("{}", serde_json::json!({ "created": created.is_some(), "id": created }));
        }
        Command::Logs { limit, offset } => {
            let page = Admin::new(&db).logs(&acting_admin(&db, &config)?, Some(limit), Some(offset))?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Export => {
            let export = Admin::new(&db).export(&acting_admin(&db, &config)?)?;
            println!("{}", serde_json::to_string_pretty(&export)?);
        }
    }
    Ok(())
}

fn acting_admin(db: &Database, config: &Config) -> Result<AuthUser> {
    Users::new(db, config.bcrypt_cost)
        .first_active_admin()?
        .ok_or_else(|| anyhow!("no active admin account, run `fhd-admin seed` first"))
}
