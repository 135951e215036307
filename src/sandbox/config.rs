//! Sandbox configuration with builder pattern.

use std::time::Duration;

use crate::error::{Result, SandboxError};
use crate::interp::{Limits, Value};
use crate::sandbox::deadline::DeadlineScope;
use crate::sandbox::limits::installed_limits;

/// Configuration for the snippet sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock budget of one execution.
    pub timeout: Duration,
    /// Which calling contexts get a wall-clock deadline.
    pub deadline_scope: DeadlineScope,
    /// Maximum depth of nested snippet function calls.
    pub recursion_limit: usize,
    /// Maximum element count of any collection a snippet builds.
    pub max_collection_len: usize,
    /// Maximum string length, in bytes.
    pub max_string_len: usize,
    /// Maximum size of an integer produced by `**` or `<<`, in bits.
    pub max_int_bits: u64,
    /// Maximum digits converted between `int` and `str`.
    pub max_str_digits: usize,
    /// Capture cap for each of stdout and stderr, in bytes.
    pub max_output_bytes: usize,
    /// Stack size of the thread the interpreter runs on.
    pub stack_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            timeout: Duration::from_secs(5),
            deadline_scope: DeadlineScope::Everywhere,
            recursion_limit: limits.recursion_limit,
            max_collection_len: limits.max_collection_len,
            max_string_len: limits.max_string_len,
            max_int_bits: limits.max_int_bits,
            max_str_digits: limits.max_str_digits,
            max_output_bytes: 1024 * 1024, // 1MB
            stack_size: 16 * 1024 * 1024,  // 16MB
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// The guards handed to each interpreter.
    pub fn interpreter_limits(&self) -> Limits {
        Limits {
            recursion_limit: self.recursion_limit,
            max_collection_len: self.max_collection_len,
            max_string_len: self.max_string_len,
            max_int_bits: self.max_int_bits,
            max_str_digits: self.max_str_digits,
        }
    }

    /// Reject settings no execution could run under.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(SandboxError::Config("timeout must be positive".to_string()));
        }
        if self.recursion_limit == 0 {
            return Err(SandboxError::Config(
                "recursion limit must be positive".to_string(),
            ));
        }
        // Each snippet call level costs several interpreter frames.
        let needed = self.recursion_limit.saturating_mul(32 * 1024);
        if self.stack_size < needed {
            return Err(SandboxError::Config(format!(
                "stack size {} is too small for recursion limit {} (need at least {})",
                self.stack_size, self.recursion_limit, needed
            )));
        }
        if let Some(memory_bytes) = installed_limits().and_then(|l| l.memory_bytes) {
            self.fits_memory(memory_bytes, 1)?;
        }
        Ok(())
    }

    /// Worst-case bytes one execution may hold: its thread stack, one
    /// collection at the cap, one string at the cap and both output buffers.
    pub fn execution_footprint(&self) -> u64 {
        let collection = self
            .max_collection_len
            .saturating_mul(std::mem::size_of::<Value>());
        [
            self.stack_size,
            collection,
            self.max_string_len,
            self.max_output_bytes.saturating_mul(2),
        ]
        .iter()
        .fold(0u64, |acc, n| acc.saturating_add(*n as u64))
    }

    /// Reject settings under which `concurrent` executions could outgrow an
    /// address-space ceiling of `memory_bytes`.
    pub fn fits_memory(&self, memory_bytes: u64, concurrent: usize) -> Result<()> {
        let needed = self.execution_footprint().saturating_mul(concurrent.max(1) as u64);
        if needed > memory_bytes {
            return Err(SandboxError::Config(format!(
                "{} concurrent executions may need {} bytes, above the memory limit of {} bytes; \
                 lower the collection or string caps",
                concurrent, needed, memory_bytes
            )));
        }
        Ok(())
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    timeout: Option<Duration>,
    deadline_scope: Option<DeadlineScope>,
    recursion_limit: Option<usize>,
    max_collection_len: Option<usize>,
    max_string_len: Option<usize>,
    max_int_bits: Option<u64>,
    max_str_digits: Option<usize>,
    max_output_bytes: Option<usize>,
    stack_size: Option<usize>,
}

impl SandboxConfigBuilder {
    /// Set the wall-clock timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set which contexts get a wall-clock deadline.
    pub fn deadline_scope(mut self, scope: DeadlineScope) -> Self {
        self.deadline_scope = Some(scope);
        self
    }

    pub fn recursion_limit(mut self, depth: usize) -> Self {
        self.recursion_limit = Some(depth);
        self
    }

    pub fn max_collection_len(mut self, len: usize) -> Self {
        self.max_collection_len = Some(len);
        self
    }

    pub fn max_string_len(mut self, len: usize) -> Self {
        self.max_string_len = Some(len);
        self
    }

    pub fn max_int_bits(mut self, bits: u64) -> Self {
        self.max_int_bits = Some(bits);
        self
    }

    pub fn max_str_digits(mut self, digits: usize) -> Self {
        self.max_str_digits = Some(digits);
        self
    }

    /// Set the per-stream capture cap.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Set the interpreter thread's stack size.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            timeout: self.timeout.unwrap_or(default.timeout),
            deadline_scope: self.deadline_scope.unwrap_or(default.deadline_scope),
            recursion_limit: self.recursion_limit.unwrap_or(default.recursion_limit),
            max_collection_len: self.max_collection_len.unwrap_or(default.max_collection_len),
            max_string_len: self.max_string_len.unwrap_or(default.max_string_len),
            max_int_bits: self.max_int_bits.unwrap_or(default.max_int_bits),
            max_str_digits: self.max_str_digits.unwrap_or(default.max_str_digits),
            max_output_bytes: self.max_output_bytes.unwrap_or(default.max_output_bytes),
            stack_size: self.stack_size.unwrap_or(default.stack_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.deadline_scope, DeadlineScope::Everywhere);
        assert_eq!(config.max_str_digits, 4300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(2))
            .deadline_scope(DeadlineScope::PrimaryThread)
            .recursion_limit(50)
            .max_output_bytes(64)
            .build();

        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.deadline_scope, DeadlineScope::PrimaryThread);
        assert_eq!(config.interpreter_limits().recursion_limit, 50);
        assert_eq!(config.max_output_bytes, 64);
        assert_eq!(config.stack_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_validation() {
        let zero = SandboxConfig::builder().timeout(Duration::ZERO).build();
        assert!(matches!(zero.validate(), Err(SandboxError::Config(_))));

        let shallow = SandboxConfig::builder()
            .recursion_limit(10_000)
            .stack_size(1024 * 1024)
            .build();
        assert!(shallow.validate().is_err());
    }

    #[test]
    fn test_default_caps_fit_default_memory_limit() {
        let config = SandboxConfig::default();
        let ceiling = crate::sandbox::limits::DEFAULT_MEMORY_BYTES;
        assert!(config.fits_memory(ceiling, 1).is_ok());
        assert!(config.execution_footprint() < ceiling / 2);

        let huge = SandboxConfig::builder().max_collection_len(10_000_000).build();
        assert!(matches!(
            huge.fits_memory(ceiling, 1),
            Err(SandboxError::Config(_))
        ));
    }
}
