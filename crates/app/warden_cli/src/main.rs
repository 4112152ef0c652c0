//! `warden`: operator commands for the Warden auth core.

pub use self::error::{Error, Result};
mod error;

use std::io::BufRead;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands, DbArgs};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use warden_core::auth::password::hash_password;
use warden_core::config::AuthConfig;
use warden_core::models::Password;
use warden_core::session::{PgSessionStore, SessionStore};

mod cli;
mod logging;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    match args.command {
        Commands::Migrate(db) => {
            let pool = connect(&db).await?;
            info!("running database migrations");
            warden_core::migrate::migrate(&pool).await?;
            info!("migrations complete");
        }
        Commands::SweepSessions(db) => {
            let pool = connect(&db).await?;
            let deleted = PgSessionStore::new(pool).delete_expired().await?;
            info!(deleted, "expired sessions swept");
            println!("{deleted}");
        }
        Commands::HashPassword { cost, skip_policy } => {
            let password = read_password()?;
            if !skip_policy {
                Password::parse(&password)?;
            }
            println!("{}", hash_password(&password, cost)?);
        }
        Commands::Config => {
            let config = AuthConfig::from_env()?;
            println!("{config:#?}");
        }
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}

async fn connect(db: &DbArgs) -> Result<PgPool> {
    info!(max_connections = db.max_connections, "connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&db.database_url)
        .await?;
    Ok(pool)
}

/// First line of stdin without its line ending.
fn read_password() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(Error::Custom("no password on stdin".into()));
    }
    Ok(password)
}
