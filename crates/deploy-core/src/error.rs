use thiserror::Error;

use crate::command::BuildError;
use crate::policy::OperationCode;

/// A failure that must stop the deployment.
///
/// Recoverable failures are not errors: operations return `Ok(false)` for them.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("{code} failed: {command}")]
    Fatal { code: OperationCode, command: String },
    #[error("{code} cannot run: {source}")]
    Unsupported {
        code: OperationCode,
        #[source]
        source: BuildError,
    },
}

impl OperationError {
    pub fn code(&self) -> OperationCode {
        match self {
            OperationError::Fatal { code, .. } | OperationError::Unsupported { code, .. } => *code,
        }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        self.code().code()
    }
}
