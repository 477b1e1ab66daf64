//! Folder access-control guard.
//!
//! A staging folder is locked (owner only, mode `700`) while the server works on it and
//! opened (mode `2770`, group inherits) when a transfer client needs access. Ownership and
//! permission changes are recursive and run through small shell scripts, so they can use
//! the platform's own `chown`/`chmod`/`chgrp`.
//!
//! # Failure policy
//!
//! - Every operation requires an existing directory and otherwise returns `false` without
//!   side effects.
//! - `lock` falls back to a `.locked` marker file if the platform has no shell support or
//!   the script fails. The marker is advisory only.
//! - `open` and `change_group` have no fallback. On failure they return `false` and the
//!   folder must be treated as unprotected.
//!
//! # Scripts
//!
//! One script file per operation kind is shared by all callers. It is rewritten on every
//! call through a temp file and an atomic rename, so a concurrent caller never runs a
//! partially written script.

use crate::constants::{CHGRP_SCRIPT_NAME, LOCK_MARKER_FILENAME, LOCK_SCRIPT_NAME, OPEN_SCRIPT_NAME};
use crate::{StagingError, StagingResult, StagingSettings};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::Arc;

const LOCK_SCRIPT: &str = r#"#!/bin/sh
set -e
echo "Changing owner of $1 to $(whoami)"
chown -R "$(whoami)" "$1"
echo "Changing access of $1 to 700"
chmod -R 700 "$1"
"#;

const OPEN_SCRIPT: &str = r#"#!/bin/sh
set -e
echo "Changing access of $1 to 2770"
chmod -R 2770 "$1"
"#;

const CHGRP_SCRIPT: &str = r#"#!/bin/sh
set -e
echo "Changing group of $1 to $2"
chgrp -R "$2" "$1"
"#;

/// A numeric or symbolic OS group identifier.
///
/// Accepts ASCII letters, digits, `.`, `_` and `-`, and must not start with `-` so it can
/// never be read as a command-line option.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId(String);

impl GroupId {
    pub fn parse(input: &str) -> StagingResult<Self> {
        let trimmed = input.trim();
        let valid = !trimmed.is_empty()
            && !trimmed.starts_with('-')
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(StagingError::InvalidInput(format!(
                "invalid group identifier '{input}'"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for GroupId {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One guard command applied to a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOperation {
    /// Owner becomes the current user, permissions become `700`, recursively.
    Lock,
    /// Permissions become `2770`, recursively.
    Open,
    /// Group becomes the given identifier, recursively.
    ChangeGroup(GroupId),
}

impl GuardOperation {
    pub fn name(&self) -> &'static str {
        match self {
            GuardOperation::Lock => "lock",
            GuardOperation::Open => "open",
            GuardOperation::ChangeGroup(_) => "chgrp",
        }
    }

    pub fn script_name(&self) -> &'static str {
        match self {
            GuardOperation::Lock => LOCK_SCRIPT_NAME,
            GuardOperation::Open => OPEN_SCRIPT_NAME,
            GuardOperation::ChangeGroup(_) => CHGRP_SCRIPT_NAME,
        }
    }

    pub fn script(&self) -> &'static str {
        match self {
            GuardOperation::Lock => LOCK_SCRIPT,
            GuardOperation::Open => OPEN_SCRIPT,
            GuardOperation::ChangeGroup(_) => CHGRP_SCRIPT,
        }
    }

    /// Script arguments: the directory, then the group for [`GuardOperation::ChangeGroup`].
    pub fn arguments(&self, directory: &Path) -> Vec<OsString> {
        let mut args = vec![directory.as_os_str().to_os_string()];
        if let GuardOperation::ChangeGroup(group) = self {
            args.push(OsString::from(group.as_str()));
        }
        args
    }
}

/// Carries out guard operations for one platform family.
pub trait GuardExecutor: Send + Sync + std::fmt::Debug {
    fn execute(&self, operation: &GuardOperation, directory: &Path) -> StagingResult<()>;
}

/// POSIX executor: runs `sh <script> <directory> [<group>]`.
#[derive(Debug, Clone)]
pub struct ShellScriptExecutor {
    script_dir: PathBuf,
}

impl ShellScriptExecutor {
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
        }
    }

    /// Writes the script for `operation` and returns its path.
    pub fn materialize(&self, operation: &GuardOperation) -> StagingResult<PathBuf> {
        let path = self.script_dir.join(operation.script_name());
        let write_error = |source| StagingError::ScriptWrite {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.script_dir).map_err(write_error)?;
        let mut staged = tempfile::NamedTempFile::new_in(&self.script_dir).map_err(write_error)?;
        staged
            .write_all(operation.script().as_bytes())
            .map_err(write_error)?;
        staged.flush().map_err(write_error)?;
        staged.persist(&path).map_err(|e| write_error(e.error))?;

        tracing::debug!("Wrote {} script to '{}'", operation.name(), path.display());
        Ok(path)
    }

    fn run(&self, script: &Path, args: &[OsString]) -> StagingResult<()> {
        // `output` drains stdout and stderr concurrently before reaping the child.
        let output = Command::new("sh")
            .arg(script)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(StagingError::ScriptLaunch)?;

        let stdout = meaningful_lines(&output.stdout);
        let stderr = meaningful_lines(&output.stderr);
        tracing::debug!("Script finished execution with {}", output.status);
        if !stdout.is_empty() {
            tracing::debug!("StdOut: {}", stdout);
        }
        if !stderr.is_empty() {
            tracing::warn!("StdErr: {}", stderr);
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(StagingError::ScriptFailed {
                status: output.status.to_string(),
                stderr,
            })
        }
    }
}

impl GuardExecutor for ShellScriptExecutor {
    fn execute(&self, operation: &GuardOperation, directory: &Path) -> StagingResult<()> {
        let script = self.materialize(operation)?;
        self.run(&script, &operation.arguments(directory))
    }
}

/// Executor for platforms without POSIX shell tooling. Every operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedPlatformExecutor;

impl GuardExecutor for UnsupportedPlatformExecutor {
    fn execute(&self, _operation: &GuardOperation, _directory: &Path) -> StagingResult<()> {
        Err(StagingError::UnsupportedPlatform)
    }
}

/// Applies guard operations to staging folders.
#[derive(Debug, Clone)]
pub struct FolderGuard {
    executor: Arc<dyn GuardExecutor>,
}

impl FolderGuard {
    /// Creates a guard with the executor for the current platform.
    pub fn new(settings: &StagingSettings) -> Self {
        if cfg!(unix) {
            Self::with_executor(Arc::new(ShellScriptExecutor::new(settings.script_dir())))
        } else {
            Self::with_executor(Arc::new(UnsupportedPlatformExecutor))
        }
    }

    pub fn with_executor(executor: Arc<dyn GuardExecutor>) -> Self {
        Self { executor }
    }

    /// Restricts `directory` to the current user, or writes the `.locked` marker if that is
    /// not possible.
    pub fn lock(&self, directory: &Path) -> bool {
        self.apply(directory, &GuardOperation::Lock)
    }

    /// Grants group access to `directory` with the set-group-ID bit.
    pub fn open(&self, directory: &Path) -> bool {
        self.apply(directory, &GuardOperation::Open)
    }

    /// Re-groups `directory` to `group` (numeric or symbolic).
    pub fn change_group(&self, directory: &Path, group: &str) -> bool {
        match GroupId::parse(group) {
            Ok(group) => self.apply(directory, &GuardOperation::ChangeGroup(group)),
            Err(e) => {
                tracing::error!("Cannot change group of '{}': {}", directory.display(), e);
                false
            }
        }
    }

    /// Applies `operation` to `directory` following the failure policy of the operation.
    pub fn apply(&self, directory: &Path, operation: &GuardOperation) -> bool {
        if !directory.is_dir() {
            tracing::error!(
                "Provided argument ({}) must be a directory",
                directory.display()
            );
            return false;
        }

        let error = match self.executor.execute(operation, directory) {
            Ok(()) => {
                tracing::debug!(
                    "Applied {} to '{}'",
                    operation.name(),
                    directory.display()
                );
                return true;
            }
            Err(e) => e,
        };

        match operation {
            GuardOperation::Lock => {
                tracing::warn!(
                    "Locking '{}' via script failed ({}), falling back to marker file",
                    directory.display(),
                    error
                );
                write_lock_marker(directory)
            }
            GuardOperation::Open | GuardOperation::ChangeGroup(_) => {
                tracing::error!(
                    "Setting permissions ({}) for '{}' is not supported or has failed: {}",
                    operation.name(),
                    directory.display(),
                    error
                );
                false
            }
        }
    }
}

fn write_lock_marker(directory: &Path) -> bool {
    let marker = directory.join(LOCK_MARKER_FILENAME);
    tracing::debug!("Try to create lock '{}'", marker.display());
    let touched = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)
        .map_err(StagingError::LockMarker);
    match touched {
        Ok(_) => true,
        Err(e) => {
            tracing::error!("Failed to lock folder '{}': {}", directory.display(), e);
            false
        }
    }
}

/// Joins output lines that carry more than one visible character.
fn meaningful_lines(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .lines()
        .filter(|line| line.trim().len() > 1)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct FailingExecutor;

    impl GuardExecutor for FailingExecutor {
        fn execute(&self, _: &GuardOperation, _: &Path) -> StagingResult<()> {
            Err(StagingError::ScriptFailed {
                status: "exit status: 1".into(),
                stderr: "permission denied".into(),
            })
        }
    }

    fn staging_dir(temp: &TempDir) -> PathBuf {
        let dir = temp.path().join("staging");
        fs::create_dir_all(dir.join("data")).unwrap();
        fs::write(dir.join("data/file.txt"), "payload").unwrap();
        dir
    }

    #[test]
    fn group_id_accepts_numeric_and_symbolic() {
        assert_eq!(GroupId::parse("1001").unwrap().as_str(), "1001");
        assert_eq!(GroupId::parse(" staff ").unwrap().as_str(), "staff");
        assert_eq!(
            "data-managers".parse::<GroupId>().unwrap().to_string(),
            "data-managers"
        );
    }

    #[test]
    fn group_id_rejects_unsafe_values() {
        for input in ["", "   ", "-R", "a b", "grp;rm", "$(id)"] {
            assert!(GroupId::parse(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn operation_arguments_put_directory_first() {
        let dir = Path::new("/srv/staging/42");
        assert_eq!(GuardOperation::Lock.arguments(dir), vec![OsString::from(dir)]);
        let chgrp = GuardOperation::ChangeGroup(GroupId::parse("staff").unwrap());
        assert_eq!(
            chgrp.arguments(dir),
            vec![OsString::from(dir), OsString::from("staff")]
        );
    }

    #[test]
    fn lock_rejects_non_directory_without_side_effects() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let guard = FolderGuard::with_executor(Arc::new(UnsupportedPlatformExecutor));

        assert!(!guard.lock(&file));
        assert!(!guard.open(&file));
        assert!(!guard.change_group(&file, "staff"));
        assert!(!temp.path().join(LOCK_MARKER_FILENAME).exists());
        assert_eq!(fs::read_to_string(&file).unwrap(), "x");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn lock_rejects_missing_directory() {
        let temp = TempDir::new().unwrap();
        let guard = FolderGuard::with_executor(Arc::new(UnsupportedPlatformExecutor));
        assert!(!guard.lock(&temp.path().join("missing")));
        assert!(!temp.path().join("missing").exists());
    }

    #[test]
    fn unsupported_platform_only_lock_has_an_effect() {
        let temp = TempDir::new().unwrap();
        let dir = staging_dir(&temp);
        let guard = FolderGuard::with_executor(Arc::new(UnsupportedPlatformExecutor));

        assert!(guard.lock(&dir));
        assert!(dir.join(LOCK_MARKER_FILENAME).is_file());

        fs::remove_file(dir.join(LOCK_MARKER_FILENAME)).unwrap();
        assert!(!guard.open(&dir));
        assert!(!guard.change_group(&dir, "staff"));
        assert!(!dir.join(LOCK_MARKER_FILENAME).exists());
    }

    #[test]
    fn failed_script_falls_back_to_marker_for_lock_only() {
        let temp = TempDir::new().unwrap();
        let dir = staging_dir(&temp);
        let guard = FolderGuard::with_executor(Arc::new(FailingExecutor));

        assert!(guard.lock(&dir));
        assert!(dir.join(LOCK_MARKER_FILENAME).is_file());
        assert!(!guard.open(&dir));
    }

    #[test]
    fn invalid_group_is_rejected_before_execution() {
        let temp = TempDir::new().unwrap();
        let dir = staging_dir(&temp);
        let guard = FolderGuard::with_executor(Arc::new(ShellScriptExecutor::new(
            temp.path().join("scripts"),
        )));

        assert!(!guard.change_group(&dir, "not a group"));
        assert!(!temp.path().join("scripts").exists());
    }

    #[test]
    fn scripts_are_overwritten_in_place() {
        let temp = TempDir::new().unwrap();
        let executor = ShellScriptExecutor::new(temp.path().join("scripts"));

        let first = executor.materialize(&GuardOperation::Open).unwrap();
        let second = executor.materialize(&GuardOperation::Open).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.file_name().unwrap(), OPEN_SCRIPT_NAME);
        assert_eq!(fs::read_to_string(&first).unwrap(), OPEN_SCRIPT);
        assert_eq!(fs::read_dir(temp.path().join("scripts")).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn lock_then_open_changes_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dir = staging_dir(&temp);
        let guard = FolderGuard::with_executor(Arc::new(ShellScriptExecutor::new(
            temp.path().join("scripts"),
        )));

        assert!(guard.lock(&dir));
        let mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o700);
        assert!(!dir.join(LOCK_MARKER_FILENAME).exists());

        assert!(guard.open(&dir));
        let mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o2770);
        let nested = fs::metadata(dir.join("data")).unwrap().permissions().mode();
        assert_eq!(nested & 0o2770, 0o2770);
    }

    #[cfg(unix)]
    #[test]
    fn change_group_to_own_group_succeeds() {
        let temp = TempDir::new().unwrap();
        let dir = staging_dir(&temp);
        let settings = StagingSettings::default().with_script_dir(temp.path().join("scripts"));
        let guard = FolderGuard::new(&settings);

        // SAFETY: getegid has no preconditions.
        let gid = unsafe { libc::getegid() };
        assert!(guard.change_group(&dir, &gid.to_string()));
        assert!(temp.path().join("scripts").join(CHGRP_SCRIPT_NAME).is_file());
    }

    #[cfg(unix)]
    #[test]
    fn unknown_group_reports_false() {
        let temp = TempDir::new().unwrap();
        let dir = staging_dir(&temp);
        let guard = FolderGuard::with_executor(Arc::new(ShellScriptExecutor::new(
            temp.path().join("scripts"),
        )));

        assert!(!guard.change_group(&dir, "no-such-group-for-staging-tests"));
    }
}
