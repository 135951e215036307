//! Process-wide resource ceilings.
//!
//! Limits are lowered once, before the service starts accepting work, and
//! apply to every thread in the process. A ceiling of `None` leaves that
//! resource untouched.

use std::sync::Mutex;

use crate::error::{Result, SandboxError};

/// Default CPU-time ceiling, in seconds.
pub const DEFAULT_CPU_SECONDS: u64 = 5;

/// Default address-space ceiling, in bytes (256 MiB).
pub const DEFAULT_MEMORY_BYTES: u64 = 256 * 1024 * 1024;

/// Malloc arenas allowed before the address-space ceiling goes on.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
const MALLOC_ARENA_MAX: libc::c_int = 2;

static INSTALLED: Mutex<Option<ResourceLimits>> = Mutex::new(None);

/// CPU-time and address-space ceilings for the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// `RLIMIT_CPU`, soft and hard, in seconds.
    pub cpu_seconds: Option<u64>,
    /// `RLIMIT_AS`, soft and hard, in bytes.
    pub memory_bytes: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_seconds: Some(DEFAULT_CPU_SECONDS),
            memory_bytes: Some(DEFAULT_MEMORY_BYTES),
        }
    }
}

impl ResourceLimits {
    /// No ceilings at all.
    pub fn unlimited() -> Self {
        Self {
            cpu_seconds: None,
            memory_bytes: None,
        }
    }

    /// The soft ceilings currently in force, as reported by `getrlimit`.
    /// Unlimited resources read as `None`.
    #[cfg(unix)]
    pub fn current() -> Result<Self> {
        Ok(Self {
            cpu_seconds: read_limit(libc::RLIMIT_CPU as libc::c_int, "RLIMIT_CPU")?,
            memory_bytes: read_limit(libc::RLIMIT_AS as libc::c_int, "RLIMIT_AS")?,
        })
    }

    #[cfg(not(unix))]
    pub fn current() -> Result<Self> {
        Ok(Self::unlimited())
    }

    fn validate(&self) -> Result<()> {
        if self.cpu_seconds == Some(0) {
            return Err(SandboxError::Config(
                "CPU ceiling must be at least one second".to_string(),
            ));
        }
        if matches!(self.memory_bytes, Some(bytes) if bytes < 16 * 1024 * 1024) {
            return Err(SandboxError::Config(
                "address-space ceiling must be at least 16 MiB".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lower the process ceilings. Succeeds at most once per process.
pub fn install_limits(limits: &ResourceLimits) -> Result<()> {
    install_into(&INSTALLED, limits, apply_rlimits)
}

/// The ceilings recorded by the successful [`install_limits`] call, if any.
pub fn installed_limits() -> Option<ResourceLimits> {
    *INSTALLED.lock().unwrap_or_else(|e| e.into_inner())
}

fn install_into(
    slot: &Mutex<Option<ResourceLimits>>,
    limits: &ResourceLimits,
    apply: impl FnOnce(&ResourceLimits) -> Result<()>,
) -> Result<()> {
    let mut installed = slot.lock().unwrap_or_else(|e| e.into_inner());
    if installed.is_some() {
        return Err(SandboxError::LimitsAlreadyInstalled);
    }
    limits.validate()?;
    apply(limits)?;
    *installed = Some(*limits);
    Ok(())
}

#[cfg(unix)]
fn set_limit(resource: libc::c_int, name: &'static str, value: u64) -> Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // SAFETY: `limit` is a valid rlimit for the duration of the call.
    let rc = unsafe { libc::setrlimit(resource as _, &limit) };
    if rc != 0 {
        return Err(SandboxError::LimitInstall {
            resource: name,
            source: std::io::Error::last_os_error(),
        });
    }
    tracing::debug!(resource = name, value, "resource ceiling lowered");
    Ok(())
}

#[cfg(unix)]
fn read_limit(resource: libc::c_int, name: &'static str) -> Result<Option<u64>> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid, writable rlimit.
    let rc = unsafe { libc::getrlimit(resource as _, &mut limit) };
    if rc != 0 {
        return Err(SandboxError::LimitInstall {
            resource: name,
            source: std::io::Error::last_os_error(),
        });
    }
    if limit.rlim_cur == libc::RLIM_INFINITY {
        Ok(None)
    } else {
        Ok(Some(limit.rlim_cur as u64))
    }
}

#[cfg(unix)]
fn apply_rlimits(limits: &ResourceLimits) -> Result<()> {
    if let Some(seconds) = limits.cpu_seconds {
        set_limit(libc::RLIMIT_CPU as libc::c_int, "RLIMIT_CPU", seconds)?;
    }
    if let Some(bytes) = limits.memory_bytes {
        cap_malloc_arenas();
        #[cfg(any(target_os = "linux", target_os = "android"))]
        set_limit(libc::RLIMIT_AS as libc::c_int, "RLIMIT_AS", bytes)?;
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        tracing::warn!(bytes, "address-space ceiling is not enforced on this platform");
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_rlimits(_limits: &ResourceLimits) -> Result<()> {
    Err(SandboxError::Config(
        "process resource limits require a Unix host".to_string(),
    ))
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn cap_malloc_arenas() {
    // SAFETY: mallopt only adjusts allocator tuning parameters.
    let ok = unsafe { libc::mallopt(libc::M_ARENA_MAX, MALLOC_ARENA_MAX) };
    if ok == 0 {
        tracing::warn!("could not cap malloc arenas");
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn cap_malloc_arenas() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.cpu_seconds, Some(5));
        assert_eq!(limits.memory_bytes, Some(256 * 1024 * 1024));
    }

    #[test]
    fn test_second_install_is_rejected() {
        let slot = Mutex::new(None);
        let limits = ResourceLimits::default();
        let mut applied = 0;

        install_into(&slot, &limits, |_| {
            applied += 1;
            Ok(())
        })
        .unwrap();
        let again = install_into(&slot, &ResourceLimits::unlimited(), |_| Ok(()));

        assert!(matches!(again, Err(SandboxError::LimitsAlreadyInstalled)));
        assert_eq!(applied, 1);
        assert_eq!(*slot.lock().unwrap(), Some(limits));
    }

    #[test]
    fn test_refused_install_records_nothing() {
        let slot = Mutex::new(None);
        let result = install_into(&slot, &ResourceLimits::default(), |_| {
            Err(SandboxError::LimitInstall {
                resource: "RLIMIT_CPU",
                source: std::io::Error::from_raw_os_error(libc::EPERM),
            })
        });

        assert!(matches!(result, Err(SandboxError::LimitInstall { .. })));
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn test_invalid_limits_are_config_errors() {
        let slot = Mutex::new(None);
        let zero_cpu = ResourceLimits {
            cpu_seconds: Some(0),
            memory_bytes: None,
        };
        let tiny = ResourceLimits {
            cpu_seconds: None,
            memory_bytes: Some(1024),
        };
        assert!(matches!(
            install_into(&slot, &zero_cpu, |_| Ok(())),
            Err(SandboxError::Config(_))
        ));
        assert!(matches!(
            install_into(&slot, &tiny, |_| Ok(())),
            Err(SandboxError::Config(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_current_reads_without_error() {
        assert!(ResourceLimits::current().is_ok());
    }
}
