//! Per-call wall-clock deadlines.
//!
//! The interpreter polls its deadline cooperatively, so any thread can be
//! interrupted. [`DeadlineScope`] decides which calling contexts get one.

use std::cell::Cell;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::error::SandboxError;

static ARMED: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static PRIMARY: Cell<bool> = const { Cell::new(false) };
}

/// Which calling contexts support wall-clock interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadlineScope {
    /// Every thread gets a deadline.
    #[default]
    Everywhere,
    /// Only a thread registered with [`designate_primary_thread`] gets a
    /// deadline; elsewhere the CPU ceiling is the only bound.
    PrimaryThread,
}

impl fmt::Display for DeadlineScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlineScope::Everywhere => f.write_str("everywhere"),
            DeadlineScope::PrimaryThread => f.write_str("primary-thread"),
        }
    }
}

impl FromStr for DeadlineScope {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "everywhere" | "all" => Ok(DeadlineScope::Everywhere),
            "primary-thread" | "primary_thread" | "primary" => Ok(DeadlineScope::PrimaryThread),
            other => Err(SandboxError::Config(format!(
                "unknown deadline scope '{}' (expected 'everywhere' or 'primary-thread')",
                other
            ))),
        }
    }
}

/// Register the current thread as the one that supports interruption under
/// [`DeadlineScope::PrimaryThread`].
pub fn designate_primary_thread() {
    PRIMARY.with(|p| p.set(true));
}

fn is_primary_thread() -> bool {
    PRIMARY.with(Cell::get)
}

/// Whether the calling context can have a wall-clock deadline armed.
pub fn supports_wall_clock_interrupt(scope: DeadlineScope) -> bool {
    match scope {
        DeadlineScope::Everywhere => true,
        DeadlineScope::PrimaryThread => is_primary_thread(),
    }
}

/// Number of deadlines armed right now, across all threads.
pub fn armed_deadlines() -> usize {
    ARMED.load(Ordering::SeqCst)
}

/// An armed deadline. Dropping the guard disarms it.
#[derive(Debug)]
pub struct DeadlineGuard {
    expires_at: Option<Instant>,
    timeout: Duration,
}

impl DeadlineGuard {
    /// Arm a deadline `timeout` from now if the calling context supports
    /// it, otherwise return a guard with no deadline.
    pub fn arm(scope: DeadlineScope, timeout: Duration) -> Self {
        let expires_at = if supports_wall_clock_interrupt(scope) {
            Instant::now().checked_add(timeout)
        } else {
            tracing::debug!(%scope, "no wall-clock deadline for this context");
            None
        };
        if expires_at.is_some() {
            ARMED.fetch_add(1, Ordering::SeqCst);
        }
        Self {
            expires_at,
            timeout,
        }
    }

    /// The instant the deadline passes, if one is armed.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn is_armed(&self) -> bool {
        self.expires_at.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn disarm(&mut self) {
        if self.expires_at.take().is_some() {
            ARMED.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_everywhere_arms_on_any_thread() {
        let guard = std::thread::spawn(|| {
            DeadlineGuard::arm(DeadlineScope::Everywhere, Duration::from_secs(5)).is_armed()
        })
        .join()
        .unwrap();
        assert!(guard);
    }

    #[test]
    fn test_primary_thread_scope() {
        let off_primary = std::thread::spawn(|| {
            supports_wall_clock_interrupt(DeadlineScope::PrimaryThread)
        })
        .join()
        .unwrap();
        assert!(!off_primary);

        let on_primary = std::thread::spawn(|| {
            designate_primary_thread();
            let guard = DeadlineGuard::arm(DeadlineScope::PrimaryThread, Duration::from_secs(1));
            guard.is_armed()
        })
        .join()
        .unwrap();
        assert!(on_primary);
    }

    #[test]
    fn test_disarm() {
        let mut guard = DeadlineGuard::arm(DeadlineScope::Everywhere, Duration::from_secs(5));
        assert!(guard.expires_at().is_some());
        guard.disarm();
        guard.disarm();
        assert!(!guard.is_armed());
        assert_eq!(guard.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("everywhere".parse::<DeadlineScope>().unwrap(), DeadlineScope::Everywhere);
        assert_eq!(
            "Primary-Thread".parse::<DeadlineScope>().unwrap(),
            DeadlineScope::PrimaryThread
        );
        assert!("sometimes".parse::<DeadlineScope>().is_err());
        assert_eq!(DeadlineScope::PrimaryThread.to_string(), "primary-thread");
    }
}
