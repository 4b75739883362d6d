//! CLI surface lowering into runtime configuration.

use std::path::PathBuf;

use clap::Parser;
use mfly_common::config::{
    DEFAULT_PORT, DEFAULT_SNAPSHOT_DIR, DEFAULT_SNAPSHOT_FILE, RuntimeConfig, UpstreamAddr,
};
use mfly_common::error::MflyResult;

/// Redis-wire-compatible in-memory key/value server.
#[derive(Debug, Parser)]
#[command(name = "mfly-server", version)]
pub struct Cli {
    /// RESP listener port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Mirror the given primary, announced as "<host> <port>".
    #[arg(long, value_name = "HOST PORT")]
    pub replicaof: Option<String>,

    /// Directory holding the boot snapshot.
    #[arg(long, default_value = DEFAULT_SNAPSHOT_DIR)]
    pub dir: PathBuf,

    /// Snapshot file name inside the snapshot directory.
    #[arg(long, default_value = DEFAULT_SNAPSHOT_FILE)]
    pub dbfilename: String,
}

impl Cli {
    /// Lowers parsed flags into the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns `MflyError::InvalidConfig` when `--replicaof` is not `"<host> <port>"`.
    pub fn into_config(self) -> MflyResult<RuntimeConfig> {
        let replica_of = self
            .replicaof
            .as_deref()
            .map(str::parse::<UpstreamAddr>)
            .transpose()?;
        Ok(RuntimeConfig {
            port: self.port,
            replica_of,
            dir: self.dir,
            dbfilename: self.dbfilename,
        })
    }
}

/// Parses process arguments into the runtime configuration.
///
/// # Errors
///
/// Returns `MflyError::InvalidConfig` for semantically invalid flag values.
pub fn parse_config() -> MflyResult<RuntimeConfig> {
    Cli::parse().into_config()
}
