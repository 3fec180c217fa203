//! Graded failure handling.
//!
//! [`ErrorPolicy::evaluate`] turns the exit status of an operation into an
//! [`Outcome`]. It never terminates the process: a [`Outcome::FatalFailure`]
//! travels back to the entry point, which owns the decision to exit.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::log::LogSink;
use crate::prompt::{parse_yes_no, Prompt};

/// Response level requested by the caller of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fail silently
    Ignore,
    /// Report and continue
    Notice,
    /// Report loudly and continue
    #[serde(alias = "warn")]
    Warning,
    /// Abort, or ask the operator when someone is there to answer
    #[default]
    Error,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Ignore => "ignore",
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies the failing operation; doubles as the process exit status on
/// fatal escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OperationCode {
    Exec = 2,
    Chdir = 3,
    Sed = 4,
    Append = 5,
    SetIni = 6,
    Mkdir = 7,
    Rm = 8,
    Chown = 9,
    Chgrp = 10,
    Chmod = 11,
    Ln = 12,
    Cp = 13,
    Mv = 14,
    Unzip = 15,
    Wget = 16,
    Curl = 17,
    PmsAction = 18,
    PackageAction = 19,
    ServiceConfig = 20,
    ServiceAction = 21,
}

impl OperationCode {
    pub const ALL: [OperationCode; 20] = [
        OperationCode::Exec,
        OperationCode::Chdir,
        OperationCode::Sed,
        OperationCode::Append,
        OperationCode::SetIni,
        OperationCode::Mkdir,
        OperationCode::Rm,
        OperationCode::Chown,
        OperationCode::Chgrp,
        OperationCode::Chmod,
        OperationCode::Ln,
        OperationCode::Cp,
        OperationCode::Mv,
        OperationCode::Unzip,
        OperationCode::Wget,
        OperationCode::Curl,
        OperationCode::PmsAction,
        OperationCode::PackageAction,
        OperationCode::ServiceConfig,
        OperationCode::ServiceAction,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperationCode::Exec => "exec",
            OperationCode::Chdir => "chdir",
            OperationCode::Sed => "sed",
            OperationCode::Append => "append",
            OperationCode::SetIni => "setIni",
            OperationCode::Mkdir => "mkdir",
            OperationCode::Rm => "rm",
            OperationCode::Chown => "chown",
            OperationCode::Chgrp => "chgrp",
            OperationCode::Chmod => "chmod",
            OperationCode::Ln => "ln",
            OperationCode::Cp => "cp",
            OperationCode::Mv => "mv",
            OperationCode::Unzip => "unzip",
            OperationCode::Wget => "wget",
            OperationCode::Curl => "curl",
            OperationCode::PmsAction => "pmsAction",
            OperationCode::PackageAction => "packageAction",
            OperationCode::ServiceConfig => "serviceConfig",
            OperationCode::ServiceAction => "serviceAction",
        }
    }
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Whether a human is available to answer recovery prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMode {
    pub auto_deploy: bool,
}

impl DeploymentMode {
    pub const UNATTENDED: DeploymentMode = DeploymentMode { auto_deploy: true };
    pub const INTERACTIVE: DeploymentMode = DeploymentMode { auto_deploy: false };
}

impl Default for DeploymentMode {
    fn default() -> Self {
        Self::UNATTENDED
    }
}

/// Normalised command status: 0 is success, anything else failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus(pub i32);

impl CommandStatus {
    pub fn success(self) -> bool {
        self.0 == 0
    }
}

impl From<i32> for CommandStatus {
    fn from(status: i32) -> Self {
        CommandStatus(status)
    }
}

impl From<bool> for CommandStatus {
    fn from(ok: bool) -> Self {
        CommandStatus(if ok { 0 } else { 1 })
    }
}

/// Result of evaluating one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The operation failed but the deployment goes on
    RecoverableFailure,
    /// The deployment must stop with `code` as exit status
    FatalFailure { code: OperationCode },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::FatalFailure { .. })
    }
}

pub const CONTINUE_QUESTION: &str = "Do you want to continue the execution. If yes, then try to fix this error by hands before continuing, otherwise errors may occurs later in the process? (yes/no)";

/// Maps command statuses to outcomes, asking the operator when allowed.
pub struct ErrorPolicy {
    mode: DeploymentMode,
    log: Arc<dyn LogSink>,
    prompt: Box<dyn Prompt>,
}

impl ErrorPolicy {
    pub fn new(mode: DeploymentMode, log: Arc<dyn LogSink>, prompt: Box<dyn Prompt>) -> Self {
        Self { mode, log, prompt }
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    /// Decide what a command status means for the deployment.
    pub fn evaluate(
        &self,
        status: impl Into<CommandStatus>,
        code: OperationCode,
        severity: Severity,
    ) -> Outcome {
        let status = status.into();
        if status.success() {
            return Outcome::Success;
        }

        tracing::debug!(operation = %code, status = status.0, %severity, "operation failed");

        match severity {
            Severity::Ignore => Outcome::RecoverableFailure,
            Severity::Notice | Severity::Warning => {
                self.log.report(
                    severity,
                    &format!(
                        "An error occurred but the script continues its process. Check the log to see what was the error: {}",
                        self.log.location()
                    ),
                );
                Outcome::RecoverableFailure
            }
            Severity::Error if self.mode.auto_deploy => Outcome::FatalFailure { code },
            Severity::Error => {
                self.log.report(
                    Severity::Error,
                    &format!(
                        "A non-recoverable error happened. Check the log to see what was the error: {}",
                        self.log.location()
                    ),
                );
                if self.confirm_continue() {
                    Outcome::RecoverableFailure
                } else {
                    Outcome::FatalFailure { code }
                }
            }
        }
    }

    fn confirm_continue(&self) -> bool {
        let answer = match self.prompt.ask(CONTINUE_QUESTION) {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!(%err, "could not read operator answer, aborting");
                return false;
            }
        };
        self.log.command(&format!("[USER-INPUT]: {answer}"));

        // Undecided answers abort
        parse_yes_no(&answer).unwrap_or(false)
    }
}
