//! Staging archive codec
//!
//! This crate packs staging content into a single zip archive and unpacks uploaded archives
//! into staging folders.
//!
//! ## Design Principles
//!
//! - Entry names are relative to one declared base path and always use `/` separators
//! - Every directory is written as its own entry, so empty directories survive a round trip
//! - File content is streamed in fixed-size chunks; whole files are never buffered
//! - Packing is all-or-nothing: any I/O failure aborts and is returned to the caller
//! - Unpacking is best-effort: failures are logged and partial output may remain on disk
//!
//! ## Example Usage
//!
//! ```no_run
//! use staging_files::ArchiveCodec;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! ArchiveCodec::pack_directory(Path::new("staging/data"), Path::new("bundle.zip"))?;
//! ArchiveCodec::unpack(Path::new("bundle.zip"), Path::new("restored"), true);
//! # Ok(())
//! # }
//! ```

mod archive;

pub use archive::{entry_name, ArchiveCodec, CHUNK_SIZE};

/// Errors that can occur while building or reading an archive
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A source path or destination could not be used
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// I/O error while reading sources or writing the archive
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The zip container could not be written or parsed
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;
