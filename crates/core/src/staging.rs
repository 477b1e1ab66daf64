//! Staging folder layout and the download bundling step.
//!
//! ```text
//! <root>/
//!   data/        payload exchanged with the transfer client
//!   generated/   server-generated content (bundles are built here)
//!   settings/    transfer settings
//!   deleted      marker, present once the folder is scheduled for removal
//! ```

use crate::constants::{
    STAGING_DATA_FOLDER_NAME, STAGING_DELETED_FILENAME, STAGING_GENERATED_FOLDER_NAME,
    STAGING_SETTINGS_FOLDER_NAME,
};
use crate::{StagingError, StagingResult};
use staging_cipher::string_to_sha1;
use staging_files::ArchiveCodec;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// A staging folder on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingFolder {
    root: PathBuf,
}

impl StagingFolder {
    /// Creates `root` and its sub-folders. Existing folders are kept.
    pub fn create(root: impl Into<PathBuf>) -> StagingResult<Self> {
        let folder = Self::open(root);
        for dir in [folder.data_dir(), folder.generated_dir(), folder.settings_dir()] {
            fs::create_dir_all(&dir).map_err(StagingError::FolderCreation)?;
        }
        tracing::debug!("Created staging folder '{}'", folder.root.display());
        Ok(folder)
    }

    /// Wraps an existing folder without touching the filesystem.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(STAGING_DATA_FOLDER_NAME)
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.root.join(STAGING_GENERATED_FOLDER_NAME)
    }

    pub fn settings_dir(&self) -> PathBuf {
        self.root.join(STAGING_SETTINGS_FOLDER_NAME)
    }

    pub fn deleted_marker(&self) -> PathBuf {
        self.root.join(STAGING_DELETED_FILENAME)
    }

    /// Flags the folder for removal by writing the `deleted` marker.
    pub fn mark_deleted(&self) -> StagingResult<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.deleted_marker())
            .map_err(StagingError::MarkerWrite)?;
        tracing::info!("Marked staging folder '{}' as deleted", self.root.display());
        Ok(())
    }

    pub fn is_marked_deleted(&self) -> bool {
        self.deleted_marker().is_file()
    }

    /// Replaces the content of `data/` with a single zip archive of that content.
    ///
    /// The archive is named after the double SHA-1 of `object_id`, built in `generated/`
    /// and moved into the emptied `data/` folder. Returns the final archive path.
    pub fn bundle_data(&self, object_id: &str) -> StagingResult<PathBuf> {
        let data_dir = self.data_dir();
        if !data_dir.is_dir() {
            return Err(StagingError::NotADirectory(data_dir));
        }
        let generated_dir = self.generated_dir();
        fs::create_dir_all(&generated_dir).map_err(StagingError::FolderCreation)?;

        let archive_name = format!("{}.zip", string_to_sha1(object_id));
        let staged_archive = generated_dir.join(&archive_name);
        tracing::debug!(
            "Bundling '{}' into '{}'",
            data_dir.display(),
            staged_archive.display()
        );
        ArchiveCodec::pack_directory(&data_dir, &staged_archive)?;

        clear_directory(&data_dir)?;
        let bundle = data_dir.join(&archive_name);
        move_file(&staged_archive, &bundle)?;
        tracing::info!("Bundled data of object '{}' to '{}'", object_id, bundle.display());
        Ok(bundle)
    }
}

fn clear_directory(directory: &Path) -> StagingResult<()> {
    for entry in fs::read_dir(directory).map_err(StagingError::DataCleanup)? {
        let path = entry.map_err(StagingError::DataCleanup)?.path();
        let removed = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(StagingError::DataCleanup)?;
    }
    Ok(())
}

/// Renames `from` to `to`, copying across filesystems if needed.
fn move_file(from: &Path, to: &Path) -> StagingResult<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(StagingError::BundleMove)?;
    fs::remove_file(from).map_err(StagingError::BundleMove)
}
