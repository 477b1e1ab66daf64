//! Constants used throughout the staging core crate.
//!
//! This module contains folder names, marker file names and script names so the on-disk
//! layout produced by this crate is defined in one place.

use std::time::Duration;

/// Sub-folder of a staging folder holding the transferred payload.
pub const STAGING_DATA_FOLDER_NAME: &str = "data";

/// Sub-folder of a staging folder holding generated output (bundles, extracted metadata).
pub const STAGING_GENERATED_FOLDER_NAME: &str = "generated";

/// Sub-folder of a staging folder holding transfer settings.
pub const STAGING_SETTINGS_FOLDER_NAME: &str = "settings";

/// Marker file signalling that a staging folder is scheduled for removal.
pub const STAGING_DELETED_FILENAME: &str = "deleted";

/// Marker file written by the lock fallback on platforms without shell support.
pub const LOCK_MARKER_FILENAME: &str = ".locked";

/// Script file names materialised into the script directory, one per guard operation.
pub const LOCK_SCRIPT_NAME: &str = "lockFolder.sh";
pub const OPEN_SCRIPT_NAME: &str = "openFolder.sh";
pub const CHGRP_SCRIPT_NAME: &str = "chgrpFolder.sh";

/// Lowest accepted probe timeout. Network filesystems need at least this long to fail.
pub const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Probe timeout used when the caller does not supply one.
pub const DEFAULT_PROBE_TIMEOUT: Duration = MIN_PROBE_TIMEOUT;

/// Development fallback for the global secret. Rejected in production mode.
pub const DEFAULT_GLOBAL_SECRET: &str = "qr2I9Hyp0CBhUUXj";

/// Maximum length of names produced by [`crate::paths::to_file_system_safe_name`].
pub const MAX_SAFE_NAME_LENGTH: usize = 64;

/// Placeholder replaced by the OS temp directory in configured paths.
pub const TMP_PLACEHOLDER: &str = "$tmp";
