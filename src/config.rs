//! Node configuration.
//!
//! Settings come from a TOML file merged with `TURNLOG_`-prefixed
//! environment variables; anything left at its zero value that the node
//! cannot run without is filled in at startup.

use core::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use error_stack::{Report, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use rand::Rng;
use serde::Deserialize;

#[derive(Debug)]
pub struct ConfigError;

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to load configuration")
    }
}

impl core::error::Error for ConfigError {}

/// Which store backend to open at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Disk,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Unique identifier of this node. Zero means "pick one at random".
    pub pid: u64,
    /// Value proposed when a prepare round binds no value at all.
    pub v_default: String,
    /// Base URLs of every node in the ensemble, this one included.
    pub nodes: Vec<String>,
    /// Responses needed to advance a phase. Zero means majority.
    pub quorum: usize,
    pub port: u16,
    pub listener_ip: String,
    /// In manual mode phases never advance on their own; each response
    /// names the follow-up request the caller should issue.
    pub manual_mode: bool,
    /// Whether the periodic seek loop runs (automatic mode only).
    pub seek_active: bool,
    /// Seconds before a silent peer is given up on.
    pub timeout: u64,
    /// Seconds between seek passes.
    pub seek_timeout: u64,
    /// Seconds waited before an automatic phase advance.
    pub wait_before_automatic_request: u64,
    /// Probability of reviving each dangling proposal per seek pass.
    pub pr_proposals: f64,
    /// Probability of querying each peer per seek pass.
    pub pr_nodes: f64,
    /// Size hint for external test harnesses; unused by the node itself.
    pub number_of_tids: u64,
    pub db_type: StoreKind,
    pub db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pid: 0,
            v_default: String::new(),
            nodes: Vec::new(),
            quorum: 0,
            port: 8080,
            listener_ip: "0.0.0.0".to_owned(),
            manual_mode: false,
            seek_active: true,
            timeout: 0,
            seek_timeout: 0,
            wait_before_automatic_request: 0,
            pr_proposals: 0.5,
            pr_nodes: 0.5,
            number_of_tids: 0,
            db_type: StoreKind::Memory,
            db_path: PathBuf::from("./turnlog-db"),
        }
    }
}

impl Settings {
    /// Load settings from the given TOML file (if any) and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file or an override fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, Report<ConfigError>> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file_exact(path));
        }
        let mut settings: Self = figment
            .merge(Env::prefixed("TURNLOG_"))
            .extract()
            .change_context(ConfigError)?;
        settings.fill_runtime_defaults();
        Ok(settings)
    }

    /// Fill in the fields that may be left out of the file.
    pub fn fill_runtime_defaults(&mut self) {
        if self.pid == 0 {
            self.pid = rand::rng().random_range(1..10_000);
        }
        if self.v_default.is_empty() {
            self.v_default = format!("paxos@{}", self.pid);
        }
        if self.timeout == 0 {
            self.timeout = 2;
        }
        if self.seek_timeout == 0 {
            self.seek_timeout = 5;
        }
        if self.quorum == 0 {
            self.quorum = self.nodes.len() / 2 + 1;
        }
    }

    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    #[must_use]
    pub fn seek_interval(&self) -> Duration {
        Duration::from_secs(self.seek_timeout)
    }

    #[must_use]
    pub fn phase_delay(&self) -> Duration {
        Duration::from_secs(self.wait_before_automatic_request)
    }

    #[must_use]
    pub fn mode(&self) -> &'static str {
        if self.manual_mode { "manual" } else { "automatic" }
    }
}
