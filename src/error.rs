//! Error types for the snippet sandbox host.
//!
//! These cover failures of the host itself. Failures of a snippet are never
//! errors at this level; they are reported inside an
//! [`ExecutionOutcome`](crate::sandbox::outcome::ExecutionOutcome).

use thiserror::Error;

/// Errors that can occur while setting up or serving the sandbox.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The operating system refused to lower a resource ceiling.
    #[error("failed to install {resource} limit: {source}")]
    LimitInstall {
        /// The resource that was being limited (e.g. `"RLIMIT_CPU"`).
        resource: &'static str,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Process limits were already installed and cannot change.
    #[error("process resource limits are already installed")]
    LimitsAlreadyInstalled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Check if this error came from the OS rejecting a limit.
    pub fn is_limit_install(&self) -> bool {
        matches!(self, SandboxError::LimitInstall { .. })
    }

    /// Check if this error is a repeated limit installation.
    pub fn is_already_installed(&self) -> bool {
        matches!(self, SandboxError::LimitsAlreadyInstalled)
    }
}

/// Result type alias for sandbox host operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_install_message_names_resource() {
        let err = SandboxError::LimitInstall {
            resource: "RLIMIT_AS",
            source: std::io::Error::from_raw_os_error(libc::EPERM),
        };
        let text = err.to_string();
        assert!(text.starts_with("failed to install RLIMIT_AS limit"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_helpers() {
        let again = SandboxError::LimitsAlreadyInstalled;
        assert!(again.is_already_installed());
        assert!(!again.is_limit_install());

        let config = SandboxError::Config("timeout must be positive".to_string());
        assert_eq!(
            config.to_string(),
            "configuration error: timeout must be positive"
        );
        assert!(!config.is_already_installed());
    }
}
