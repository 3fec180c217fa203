//! Process-wide deployment settings, fixed at start-up.

use std::path::PathBuf;

use serde::Serialize;

use crate::policy::DeploymentMode;
use crate::profile::DistroProfile;

pub const DEFAULT_LOG_FILE: &str = "/var/log/stack-deploy/deploy.log";

/// Immutable configuration threaded through every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployConfig {
    /// Target platform
    pub profile: DistroProfile,
    /// Unattended or interactive recovery
    pub mode: DeploymentMode,
    /// Echo command output on the terminal
    pub verbose: bool,
    /// Deployment log file
    pub log_file: PathBuf,
}

impl DeployConfig {
    pub fn new(profile: DistroProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = log_file.into();
        self
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            profile: DistroProfile::default(),
            mode: DeploymentMode::UNATTENDED,
            verbose: false,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}
