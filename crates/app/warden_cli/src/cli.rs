use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Warden operator tools", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the embedded database migrations
    Migrate(DbArgs),

    /// Delete sessions that are both expired and revoked
    SweepSessions(DbArgs),

    /// Read a password from stdin and print its bcrypt hash
    HashPassword {
        /// bcrypt cost; out-of-range values fall back to the default
        #[arg(long, env = "WARDEN_BCRYPT_COST", default_value_t = warden_core::auth::password::DEFAULT_COST)]
        cost: u32,

        /// Accept passwords that fail the password policy
        #[arg(long, default_value_t = false)]
        skip_policy: bool,
    },

    /// Print the effective configuration with secrets redacted
    Config,

    /// Print version
    Version,
}

/// Database connection options.
#[derive(Args, Debug)]
pub struct DbArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost:5432/warden")]
    pub database_url: String,

    /// Maximum number of database connections in the pool
    #[arg(long, default_value_t = 2)]
    pub max_connections: u32,
}
