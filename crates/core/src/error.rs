use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to write guard script {}: {source}", .path.display())]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch guard script: {0}")]
    ScriptLaunch(std::io::Error),
    #[error("guard script exited with {status}: {stderr}")]
    ScriptFailed { status: String, stderr: String },
    #[error("operation is not supported on this platform")]
    UnsupportedPlatform,
    #[error("failed to create lock marker: {0}")]
    LockMarker(std::io::Error),
    #[error("failed to create staging folder: {0}")]
    FolderCreation(std::io::Error),
    #[error("failed to write staging marker: {0}")]
    MarkerWrite(std::io::Error),
    #[error("failed to clear staging data: {0}")]
    DataCleanup(std::io::Error),
    #[error("failed to move bundle: {0}")]
    BundleMove(std::io::Error),
    #[error("failed to create symbolic link: {0}")]
    SymbolicLink(std::io::Error),
    #[error("refusing to use the development global secret in production mode")]
    DefaultSecretInProduction,

    #[error("archive error: {0}")]
    Archive(#[from] staging_files::ArchiveError),
    #[error("cipher error: {0}")]
    Cipher(#[from] staging_cipher::CipherError),
}

pub type StagingResult<T> = std::result::Result<T, StagingError>;
