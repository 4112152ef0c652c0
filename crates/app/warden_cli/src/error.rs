use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Auth(#[from] warden_core::AuthError),

    #[error(transparent)]
    Config(#[from] warden_core::config::ConfigError),

    #[error("Database: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Migration: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
