//! Operating mode selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which subsystems a process runs. Read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// HTTP API only.
    ServerOnly,
    /// Queue consumers only.
    WorkerOnly,
    /// Both, started concurrently.
    #[default]
    Combined,
}

impl OperatingMode {
    pub const ALL: [OperatingMode; 3] = [
        OperatingMode::ServerOnly,
        OperatingMode::WorkerOnly,
        OperatingMode::Combined,
    ];

    /// Whether the Server Composer runs in this mode.
    pub fn runs_server(self) -> bool {
        matches!(self, OperatingMode::ServerOnly | OperatingMode::Combined)
    }

    /// Whether the Worker Bootstrapper runs in this mode.
    pub fn runs_workers(self) -> bool {
        matches!(self, OperatingMode::WorkerOnly | OperatingMode::Combined)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::ServerOnly => "server_only",
            OperatingMode::WorkerOnly => "worker_only",
            OperatingMode::Combined => "combined",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised mode string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operating mode `{0}` (expected server_only, worker_only or combined)")]
pub struct UnknownMode(pub String);

impl FromStr for OperatingMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server_only" => Ok(OperatingMode::ServerOnly),
            "worker_only" => Ok(OperatingMode::WorkerOnly),
            "combined" => Ok(OperatingMode::Combined),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}
