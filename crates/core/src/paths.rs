//! File name sanitising and path helpers for staging locations.

use crate::constants::{MAX_SAFE_NAME_LENGTH, TMP_PLACEHOLDER};
use crate::{StagingError, StagingResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Turns `name` into a string usable as a single file name.
///
/// ASCII letters, digits, `_`, `-`, `.` and `#` are kept, as are `/` and `\` when
/// `keep_dir_separators` is set. Every other character becomes `#` followed by the
/// uppercase hexadecimal value of each of its UTF-16 code units, so characters outside the
/// Basic Multilingual Plane produce two groups. Only the last 64 characters of the result
/// are kept.
pub fn to_file_system_safe_name(name: &str, keep_dir_separators: bool) -> String {
    let mut safe = String::with_capacity(name.len() * 2);
    for c in name.chars() {
        let valid = c.is_ascii_alphanumeric()
            || matches!(c, '_' | '-' | '.' | '#')
            || (keep_dir_separators && matches!(c, '/' | '\\'));
        if valid {
            safe.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                safe.push('#');
                safe.push_str(&format!("{:X}", unit));
            }
        }
    }

    let length = safe.chars().count();
    if length > MAX_SAFE_NAME_LENGTH {
        safe.chars().skip(length - MAX_SAFE_NAME_LENGTH).collect()
    } else {
        safe
    }
}

/// Creates a symbolic link at `link` pointing to `target`.
///
/// # Errors
///
/// Returns `SymbolicLink` if the link cannot be created, or `UnsupportedPlatform`
/// outside unix.
pub fn create_symbolic_link(target: &Path, link: &Path) -> StagingResult<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link).map_err(StagingError::SymbolicLink)?;
        tracing::debug!(
            "Linked '{}' -> '{}'",
            link.display(),
            target.display()
        );
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = (target, link);
        Err(StagingError::UnsupportedPlatform)
    }
}

/// Expands `$tmp` in `template` to the OS temp directory and creates the resulting
/// directory if it does not exist yet.
///
/// The substituted temp directory always starts with `/`, so a Windows-style
/// `C:\Temp` expands to `/C:\Temp`.
pub fn prepare_path(template: &str) -> StagingResult<PathBuf> {
    if template.trim().is_empty() {
        return Err(StagingError::InvalidInput(
            "path template must not be empty".into(),
        ));
    }

    let path = PathBuf::from(expand_placeholders(template, &std::env::temp_dir()));
    if !path.exists() {
        tracing::debug!("Creating directory '{}'", path.display());
        fs::create_dir_all(&path).map_err(StagingError::FolderCreation)?;
    } else if !path.is_dir() {
        return Err(StagingError::NotADirectory(path));
    }
    Ok(path)
}

fn expand_placeholders(template: &str, temp_dir: &Path) -> String {
    let mut tmp = temp_dir.to_string_lossy().into_owned();
    if !tmp.starts_with('/') {
        tmp.insert(0, '/');
    }
    template.replace(TMP_PLACEHOLDER, &tmp)
}
