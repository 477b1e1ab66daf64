//! # Staging Core
//!
//! Safety primitives for handing filesystem folders to external transfer clients:
//! - Bounded-time reachability probing of possibly stale network mounts
//! - Folder lock/open/re-group guard with a marker-file fallback
//! - Staging folder layout and download bundling
//! - Settings resolution and the shared secret cipher
//!
//! **No scheduling concerns**: ingest/download job orchestration and persistence live in the
//! services that use this crate.

pub mod config;
pub mod constants;
pub mod guard;
pub mod paths;
pub mod prober;
pub mod staging;

mod error;

pub use config::StagingSettings;
pub use error::{StagingError, StagingResult};
pub use guard::{
    FolderGuard, GroupId, GuardExecutor, GuardOperation, ShellScriptExecutor,
    UnsupportedPlatformExecutor,
};
pub use paths::{create_symbolic_link, prepare_path, to_file_system_safe_name};
pub use prober::{AccessibilityProber, ReachabilityProbe};
pub use staging::StagingFolder;

pub use staging_cipher::{string_to_sha1, CipherError, CipherFormat, SecretCipher};
pub use staging_files::{ArchiveCodec, ArchiveError};
