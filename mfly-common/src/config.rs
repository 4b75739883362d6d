//! Runtime configuration shared by module bootstrap code.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::MflyError;

/// Default RESP listener port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default snapshot directory.
pub const DEFAULT_SNAPSHOT_DIR: &str = "./";
/// Default snapshot file name.
pub const DEFAULT_SNAPSHOT_FILE: &str = "dump.rdb";

/// Address of the primary a replica attaches to, as announced by `--replicaof "<host> <port>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAddr {
    /// Primary host name or address.
    pub host: String,
    /// Primary RESP port.
    pub port: u16,
}

impl UpstreamAddr {
    /// Returns the `host:port` form used to dial the primary.
    #[must_use]
    pub fn dial_target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for UpstreamAddr {
    type Err = MflyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.split_whitespace();
        let (Some(host), Some(port_raw), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(MflyError::InvalidConfig(format!(
                "replicaof must be \"<host> <port>\", got {raw:?}"
            )));
        };
        let port = port_raw.parse::<u16>().map_err(|_| {
            MflyError::InvalidConfig(format!("replicaof port is not a valid port: {port_raw:?}"))
        })?;
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }
}

/// Bootstrap configuration used by `mfly-server` during process startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Main RESP listener port.
    pub port: u16,
    /// Primary address when this process runs as a replica.
    pub replica_of: Option<UpstreamAddr>,
    /// Directory holding the boot snapshot.
    pub dir: PathBuf,
    /// Snapshot file name inside `dir`.
    pub dbfilename: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            replica_of: None,
            dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            dbfilename: DEFAULT_SNAPSHOT_FILE.to_owned(),
        }
    }
}

impl RuntimeConfig {
    /// Returns whether this process mirrors a primary.
    #[must_use]
    pub fn is_replica(&self) -> bool {
        self.replica_of.is_some()
    }

    /// Returns the full path of the boot snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.dbfilename)
    }
}
