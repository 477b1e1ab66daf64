//! Bounded-time reachability probing.
//!
//! Before a staging folder is handed to a transfer client, the scheduler checks that the
//! folder (or the closest existing ancestor, if the folder is yet to be created) exists and
//! is readable and writable. On network filesystems that check can block indefinitely, so
//! it runs on a detached low-priority worker thread and the caller waits at most the
//! requested timeout.
//!
//! A worker that overruns is abandoned, not cancelled. It keeps running until the blocked
//! call returns and its result is discarded. Repeated probes of a permanently stuck path
//! therefore accumulate abandoned threads.

use crate::constants::{DEFAULT_PROBE_TIMEOUT, MIN_PROBE_TIMEOUT};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityProbe {
    target: PathBuf,
    timeout: Duration,
    reachable: bool,
    resolved_ancestor: Option<PathBuf>,
}

impl ReachabilityProbe {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Timeout actually applied, after raising it to the floor.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    /// The existing node whose permissions were evaluated, if the worker finished in time.
    pub fn resolved_ancestor(&self) -> Option<&Path> {
        self.resolved_ancestor.as_deref()
    }
}

/// What the worker reports back to the waiting caller.
#[derive(Debug, Default)]
struct WorkerOutcome {
    reachable: bool,
    resolved_ancestor: Option<PathBuf>,
}

/// Filesystem reachability prober
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessibilityProber;

impl AccessibilityProber {
    /// Returns whether `path`, or its nearest existing ancestor, is readable and writable.
    ///
    /// Waits at most `max(timeout, 1s)`. Any error, and any worker that does not finish in
    /// time, yields `false`.
    pub fn is_accessible(path: &Path, timeout: Duration) -> bool {
        Self::probe(path, timeout).is_reachable()
    }

    /// [`AccessibilityProber::is_accessible`] with the default timeout.
    pub fn is_accessible_default(path: &Path) -> bool {
        Self::is_accessible(path, DEFAULT_PROBE_TIMEOUT)
    }

    /// Runs a probe and returns the full outcome.
    pub fn probe(path: &Path, timeout: Duration) -> ReachabilityProbe {
        Self::probe_with(path, timeout, check_nearest_existing)
    }

    /// Raises `requested` to the minimum probe timeout.
    pub fn effective_timeout(requested: Duration) -> Duration {
        if requested < MIN_PROBE_TIMEOUT {
            tracing::debug!(
                "Provided timeout {:?} is too short for network devices, using {:?}",
                requested,
                MIN_PROBE_TIMEOUT
            );
            MIN_PROBE_TIMEOUT
        } else {
            requested
        }
    }

    fn probe_with<F>(path: &Path, timeout: Duration, check: F) -> ReachabilityProbe
    where
        F: FnOnce(&Path) -> WorkerOutcome + Send + 'static,
    {
        let timeout = Self::effective_timeout(timeout);
        let unreachable_probe = |target: PathBuf| ReachabilityProbe {
            target,
            timeout,
            reachable: false,
            resolved_ancestor: None,
        };

        let target = match std::path::absolute(path) {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!("Cannot resolve '{}': {}", path.display(), e);
                return unreachable_probe(path.to_path_buf());
            }
        };
        tracing::debug!("Performing accessibility check for '{}'", target.display());

        let (sender, receiver) = mpsc::sync_channel(1);
        let worker_target = target.clone();
        let spawned = thread::Builder::new()
            .name("access-probe".into())
            .spawn(move || {
                lower_current_thread_priority();
                let outcome = check(&worker_target);
                // The caller may have stopped waiting; a closed channel is expected then.
                let _ = sender.send(outcome);
            });
        if let Err(e) = spawned {
            tracing::warn!("Failed to start accessibility worker: {}", e);
            return unreachable_probe(target);
        }

        let outcome = match receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Accessibility check for '{}' did not finish within {:?}, abandoning worker",
                    target.display(),
                    timeout
                );
                WorkerOutcome::default()
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!(
                    "Accessibility worker for '{}' stopped without a result",
                    target.display()
                );
                WorkerOutcome::default()
            }
        };

        tracing::debug!(
            "Returning result '{}' for '{}'",
            if outcome.reachable {
                "Accessible"
            } else {
                "NOT Accessible"
            },
            target.display()
        );
        ReachabilityProbe {
            target,
            timeout,
            reachable: outcome.reachable,
            resolved_ancestor: outcome.resolved_ancestor,
        }
    }
}

/// Walks up from `path` to the first existing node and evaluates its permissions.
fn check_nearest_existing(path: &Path) -> WorkerOutcome {
    check_nearest_existing_with(path, has_read_write_access)
}

fn check_nearest_existing_with(path: &Path, has_access: impl Fn(&Path) -> bool) -> WorkerOutcome {
    let mut current = Some(path);
    while let Some(candidate) = current {
        match fs::metadata(candidate) {
            Ok(_) => {
                let reachable = has_access(candidate);
                tracing::debug!(
                    "'{}' exists, read/write access: {}",
                    candidate.display(),
                    reachable
                );
                return WorkerOutcome {
                    reachable,
                    resolved_ancestor: Some(candidate.to_path_buf()),
                };
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(
                    "'{}' does not exist, checking parent",
                    candidate.display()
                );
                current = candidate.parent();
            }
            Err(e) => {
                tracing::debug!("Cannot inspect '{}': {}", candidate.display(), e);
                return WorkerOutcome::default();
            }
        }
    }
    tracing::debug!("No existing ancestor of '{}'", path.display());
    WorkerOutcome::default()
}

#[cfg(unix)]
fn has_read_write_access(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn has_read_write_access(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| !metadata.permissions().readonly())
        .unwrap_or(false)
}

/// Moves the calling worker thread to the lowest scheduling priority.
#[cfg(target_os = "linux")]
fn lower_current_thread_priority() {
    // On Linux, PRIO_PROCESS with id 0 applies to the calling thread only.
    // SAFETY: plain syscall without pointer arguments.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, 19) };
    if rc != 0 {
        tracing::trace!("Could not lower accessibility worker priority");
    }
}

#[cfg(not(target_os = "linux"))]
fn lower_current_thread_priority() {}
