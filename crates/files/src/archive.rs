//! Zip packing and unpacking of staging content
//!
//! [`ArchiveCodec`] turns a directory tree into a single zip file and back. It is used to
//! bundle download content into one file and to expand archives uploaded by transfer
//! clients.
//!
//! # Entry naming
//!
//! Each entry name is derived by removing the declared base path as a literal prefix from
//! the source path, dropping one leading separator, and converting `\` to `/`. All sources
//! of one packing call must live below that base path; names of sources outside it are not
//! meaningful and are not detected.
//!
//! # Failure model
//!
//! - Packing returns an error on the first I/O failure and removes the partial archive.
//! - Symbolic links are never followed. They are skipped with a warning, so every entry
//!   stays below the base path.
//! - Unpacking never returns an error. Failures are logged and reported as `false`;
//!   entries extracted before the failure stay on disk.

use crate::{ArchiveError, ArchiveResult};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Size of the buffer used to stream file content into the archive.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Computes the archive entry name of `path` relative to `base_path`.
///
/// Directory entries get their trailing `/` added by the caller.
pub fn entry_name(path: &Path, base_path: &Path) -> String {
    let full = path.to_string_lossy();
    let base = base_path.to_string_lossy();
    let stripped = full.strip_prefix(base.as_ref()).unwrap_or(&full);
    let stripped = stripped.strip_prefix(MAIN_SEPARATOR).unwrap_or(stripped);
    stripped.replace('\\', "/")
}

/// Stateless zip codec for staging folders
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveCodec;

impl ArchiveCodec {
    /// Packs `sources` (files or directories) into `destination`.
    ///
    /// Directories are added recursively. Each directory is written as an empty entry before
    /// its children, so empty directories are preserved. Symbolic links are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError` if any source cannot be read or the archive cannot be written.
    /// The partially written archive is removed in that case.
    pub fn pack(sources: &[PathBuf], base_path: &Path, destination: &Path) -> ArchiveResult<()> {
        tracing::debug!(
            "Packing {} source(s) relative to '{}' into '{}'",
            sources.len(),
            base_path.display(),
            destination.display()
        );

        let result = Self::write_archive(sources, base_path, destination);
        if let Err(e) = &result {
            tracing::error!(
                "Aborting packing of '{}': {}",
                destination.display(),
                e
            );
            if destination.exists() {
                if let Err(remove_error) = fs::remove_file(destination) {
                    tracing::warn!(
                        "Failed to remove partial archive '{}': {}",
                        destination.display(),
                        remove_error
                    );
                }
            }
        }
        result
    }

    /// Packs the content of `directory` into `destination`, relative to `directory` itself.
    ///
    /// The directory is canonicalised first, so entry names never contain the directory's
    /// own name.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError` if `directory` is not a readable directory or packing fails.
    pub fn pack_directory(directory: &Path, destination: &Path) -> ArchiveResult<()> {
        if !directory.is_dir() {
            return Err(ArchiveError::InvalidPath(format!(
                "Path is not a directory: {}",
                directory.display()
            )));
        }
        let base = directory.canonicalize().map_err(|e| {
            ArchiveError::InvalidPath(format!(
                "Cannot canonicalize path {}: {}",
                directory.display(),
                e
            ))
        })?;

        tracing::info!("Packing directory '{}'", base.display());
        let sources = sorted_children(&base)?;
        Self::pack(&sources, &base, destination)
    }

    /// Packs the direct children of `directory` whose names end with one of `extensions`.
    ///
    /// Matching ignores case. An empty extension list selects every child. Returns `false`
    /// if packing failed; the cause is logged.
    pub fn pack_directory_filtered(
        destination: &Path,
        directory: &Path,
        extensions: &[&str],
    ) -> bool {
        let children = match sorted_children(directory) {
            Ok(children) => children,
            Err(e) => {
                tracing::error!("Failed to list '{}': {}", directory.display(), e);
                return false;
            }
        };

        let extensions: Vec<String> = extensions.iter().map(|e| e.to_lowercase()).collect();
        let selected: Vec<PathBuf> = children
            .into_iter()
            .filter(|child| {
                if extensions.is_empty() {
                    return true;
                }
                let name = child
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                extensions.iter().any(|ext| name.ends_with(ext.as_str()))
            })
            .collect();

        tracing::debug!(
            "Selected files for '{}': {:?}",
            destination.display(),
            selected
                .iter()
                .filter_map(|p| p.file_name())
                .collect::<Vec<_>>()
        );

        match Self::pack(&selected, directory, destination) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error while packing files: {}", e);
                false
            }
        }
    }

    /// Packs a single file into `<target_dir>/<file name>.zip` and returns the archive path.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError` if `source_file` has no file name or packing fails.
    pub fn pack_single_file(target_dir: &Path, source_file: &Path) -> ArchiveResult<PathBuf> {
        let file_name = source_file.file_name().ok_or_else(|| {
            ArchiveError::InvalidPath(format!("No file name in {}", source_file.display()))
        })?;
        let base = source_file.parent().unwrap_or_else(|| Path::new(""));

        let mut archive_name = file_name.to_os_string();
        archive_name.push(".zip");
        let destination = target_dir.join(archive_name);

        Self::pack(&[source_file.to_path_buf()], base, &destination)?;
        Ok(destination)
    }

    /// Extracts `archive` into `destination`, creating it if necessary.
    ///
    /// When `delete_source` is set, the archive is removed after extraction succeeded and
    /// its handle was closed. Returns `false` if extraction failed; partially extracted
    /// content is left in place.
    pub fn unpack(archive: &Path, destination: &Path, delete_source: bool) -> bool {
        let extracted = match Self::extract_all(archive, destination) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    "Error while unpacking '{}' into '{}': {}",
                    archive.display(),
                    destination.display(),
                    e
                );
                return false;
            }
        };
        tracing::debug!(
            "Extracted {} entries from '{}'",
            extracted,
            archive.display()
        );

        if delete_source && archive.exists() {
            if let Err(e) = fs::remove_file(archive) {
                tracing::error!("Error deleting '{}': {}", archive.display(), e);
            }
        }
        true
    }

    /// Extracts `archive` into the directory that contains it.
    pub fn unpack_in_place(archive: &Path, delete_source: bool) -> bool {
        let absolute = match std::path::absolute(archive) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Cannot resolve '{}': {}", archive.display(), e);
                return false;
            }
        };
        let Some(parent) = absolute.parent() else {
            tracing::error!("Archive '{}' has no parent directory", absolute.display());
            return false;
        };
        Self::unpack(&absolute, parent, delete_source)
    }

    fn write_archive(sources: &[PathBuf], base_path: &Path, destination: &Path) -> ArchiveResult<()> {
        let file = File::create(destination).map_err(|e| io_context(e, "create", destination))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let mut buffer = vec![0u8; CHUNK_SIZE];

        write_entries(&mut writer, sources, base_path, &mut buffer)?;

        let mut inner = writer.finish()?;
        inner.flush()?;
        Ok(())
    }

    fn extract_all(archive: &Path, destination: &Path) -> ArchiveResult<usize> {
        if fs::metadata(destination).is_err() {
            fs::create_dir_all(destination)
                .map_err(|e| io_context(e, "create directory", destination))?;
            tracing::debug!("Created directory '{}'", destination.display());
        }

        let file = File::open(archive).map_err(|e| io_context(e, "open", archive))?;
        let mut zip = ZipArchive::new(BufReader::new(file))?;
        let mut extracted = 0;

        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            let Some(relative) = entry.enclosed_name() else {
                tracing::warn!("Skipping entry with unsafe name '{}'", entry.name());
                continue;
            };
            let target = destination.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|e| io_context(e, "create directory", &target))?;
                tracing::trace!("Created directory '{}'", target.display());
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| io_context(e, "create directory", parent))?;
                }
                tracing::debug!("Extracting '{}'", target.display());
                let out = File::create(&target).map_err(|e| io_context(e, "create", &target))?;
                let mut out = BufWriter::with_capacity(CHUNK_SIZE, out);
                io::copy(&mut entry, &mut out)?;
                out.flush()?;
            }
            extracted += 1;
        }

        Ok(extracted)
    }
}

fn write_entries<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    sources: &[PathBuf],
    base_path: &Path,
    buffer: &mut [u8],
) -> ArchiveResult<()> {
    tracing::debug!("Adding {} entries to archive", sources.len());

    for source in sources {
        let name = entry_name(source, base_path);
        let file_type = fs::symlink_metadata(source)
            .map_err(|e| io_context(e, "inspect", source))?
            .file_type();

        if file_type.is_symlink() {
            tracing::warn!("Skipping symbolic link '{}'", source.display());
            continue;
        }

        if file_type.is_dir() {
            // The base directory itself has no entry of its own.
            if name.is_empty() {
                tracing::debug!("Adding children of base directory '{}'", source.display());
            } else {
                tracing::debug!("Adding directory entry '{}/'", name);
                writer.add_directory(format!("{name}/"), entry_options())?;
            }

            let children = sorted_children(source)?;
            if children.is_empty() {
                tracing::debug!("Skipping recursion into empty directory '{}'", name);
            } else {
                write_entries(writer, &children, base_path, buffer)?;
            }
        } else {
            tracing::debug!("Adding file entry '{}'", name);
            let mut input = File::open(source).map_err(|e| io_context(e, "open", source))?;
            let size = input.metadata()?.len();
            writer.start_file(name, entry_options().large_file(size >= u64::from(u32::MAX)))?;

            loop {
                let read = input
                    .read(buffer)
                    .map_err(|e| io_context(e, "read", source))?;
                if read == 0 {
                    break;
                }
                writer.write_all(&buffer[..read])?;
            }
        }
    }

    Ok(())
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Lists the entries of `directory` as full paths, sorted by name.
fn sorted_children(directory: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(directory).map_err(|e| io_context(e, "list", directory))? {
        children.push(entry?.path());
    }
    children.sort();
    Ok(children)
}

fn io_context(e: io::Error, action: &str, path: &Path) -> ArchiveError {
    ArchiveError::Io(io::Error::new(
        e.kind(),
        format!("Failed to {} {}: {}", action, path.display(), e),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Relative path (with `/` suffix for directories) to file content.
    fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
        fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Option<Vec<u8>>>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                let relative = path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                if path.is_dir() {
                    out.insert(format!("{relative}/"), None);
                    walk(root, &path, out);
                } else {
                    out.insert(relative, Some(fs::read(&path).unwrap()));
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(root, root, &mut out);
        out
    }

    fn entry_names(archive: &Path) -> Vec<String> {
        let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_entry_name_strips_base_and_separator() {
        let base = Path::new("/srv/staging/root");
        assert_eq!(
            entry_name(Path::new("/srv/staging/root/a/b.txt"), base),
            "a/b.txt"
        );
        assert_eq!(entry_name(Path::new("/srv/staging/root/empty"), base), "empty");
    }

    #[test]
    fn test_empty_directory_survives_roundtrip() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("a.txt"), "hi").unwrap();

        let archive = temp.path().join("out.zip");
        ArchiveCodec::pack(
            &[root.join("a.txt"), root.join("empty")],
            &root,
            &archive,
        )
        .unwrap();

        let dest = temp.path().join("dest");
        assert!(ArchiveCodec::unpack(&archive, &dest, false));

        let restored = snapshot(&dest);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("a.txt"), Some(&Some(b"hi".to_vec())));
        assert_eq!(restored.get("empty/"), Some(&None));
    }

    #[test]
    fn test_nested_tree_roundtrip() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir_all(root.join("docs/drafts")).unwrap();
        fs::create_dir_all(root.join("raw/empty/deeper")).unwrap();
        fs::create_dir_all(root.join("blank")).unwrap();
        fs::write(root.join("docs/readme.md"), "# Readme\n").unwrap();
        fs::write(root.join("docs/drafts/v1.txt"), "draft").unwrap();
        fs::write(root.join("zero.bin"), b"").unwrap();
        let large: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(root.join("raw/large.bin"), &large).unwrap();

        let archive = temp.path().join("tree.zip");
        ArchiveCodec::pack_directory(&root, &archive).unwrap();

        let dest = temp.path().join("restored");
        assert!(ArchiveCodec::unpack(&archive, &dest, false));

        assert_eq!(snapshot(&dest), snapshot(&root));
    }

    #[test]
    fn test_entries_use_forward_slashes_and_directory_suffix() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("sub/inner")).unwrap();
        fs::write(root.join("sub/inner/file.txt"), "x").unwrap();

        let archive = temp.path().join("names.zip");
        ArchiveCodec::pack_directory(&root, &archive).unwrap();

        assert_eq!(
            entry_names(&archive),
            vec!["sub/", "sub/inner/", "sub/inner/file.txt"]
        );
    }

    #[test]
    fn test_pack_missing_source_fails_and_removes_archive() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("broken.zip");

        let result = ArchiveCodec::pack(
            &[temp.path().join("does-not-exist.txt")],
            temp.path(),
            &archive,
        );

        assert!(matches!(result, Err(ArchiveError::Io(_))));
        assert!(!archive.exists());
    }

    #[test]
    fn test_pack_directory_rejects_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        let result = ArchiveCodec::pack_directory(&file, &temp.path().join("out.zip"));
        assert!(matches!(result, Err(ArchiveError::InvalidPath(_))));
    }

    #[test]
    fn test_unpack_corrupt_archive_returns_false() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("corrupt.zip");
        fs::write(&archive, b"this is not a zip file").unwrap();

        assert!(!ArchiveCodec::unpack(&archive, &temp.path().join("out"), true));
        // The source is only deleted after a successful extraction.
        assert!(archive.exists());
    }

    #[test]
    fn test_unpack_deletes_source_on_success() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), "hi").unwrap();

        let archive = temp.path().join("upload.zip");
        ArchiveCodec::pack_directory(&root, &archive).unwrap();

        let dest = temp.path().join("dest");
        assert!(ArchiveCodec::unpack(&archive, &dest, true));
        assert!(!archive.exists());
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"hi");
    }

    #[test]
    fn test_unpack_in_place_extracts_next_to_archive() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("nested/n.txt"), "n").unwrap();

        let upload_dir = temp.path().join("upload");
        fs::create_dir_all(&upload_dir).unwrap();
        let archive = upload_dir.join("in.zip");
        ArchiveCodec::pack_directory(&root, &archive).unwrap();

        assert!(ArchiveCodec::unpack_in_place(&archive, false));
        assert_eq!(fs::read(upload_dir.join("nested/n.txt")).unwrap(), b"n");
        assert!(archive.exists());
    }

    #[test]
    fn test_unpack_skips_entries_escaping_destination() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.zip");
        {
            let mut writer = ZipWriter::new(File::create(&archive).unwrap());
            writer
                .start_file("../escaped.txt", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"nope").unwrap();
            writer
                .start_file("safe.txt", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"ok").unwrap();
            writer.finish().unwrap();
        }

        let dest = temp.path().join("inner");
        assert!(ArchiveCodec::unpack(&archive, &dest, false));
        assert!(!temp.path().join("escaped.txt").exists());
        assert_eq!(fs::read(dest.join("safe.txt")).unwrap(), b"ok");
    }

    #[test]
    fn test_pack_of_base_directory_has_no_root_entry() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("a.txt"), "hi").unwrap();

        let archive = temp.path().join("base.zip");
        ArchiveCodec::pack(&[root.clone()], &root, &archive).unwrap();

        assert_eq!(entry_names(&archive), vec!["a.txt", "empty/"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_pack_skips_symbolic_links() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("server-secret.txt");
        fs::write(&outside, "TOP-SECRET").unwrap();
        let outside_dir = temp.path().join("server-tree");
        fs::create_dir_all(&outside_dir).unwrap();
        fs::write(outside_dir.join("inner.txt"), "private").unwrap();

        let root = temp.path().join("data");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), "hi").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();
        std::os::unix::fs::symlink(&outside_dir, root.join("tree")).unwrap();

        let archive = temp.path().join("linked.zip");
        ArchiveCodec::pack_directory(&root, &archive).unwrap();
        assert_eq!(entry_names(&archive), vec!["a.txt"]);

        let dest = temp.path().join("out");
        assert!(ArchiveCodec::unpack(&archive, &dest, false));
        assert!(!dest.join("link").exists());
        assert!(!dest.join("tree").exists());
    }

    #[test]
    fn test_pack_directory_filtered_selects_extensions() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("logs");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.LOG"), "a").unwrap();
        fs::write(dir.join("b.log"), "b").unwrap();
        fs::write(dir.join("c.txt"), "c").unwrap();

        let archive = temp.path().join("logs.zip");
        assert!(ArchiveCodec::pack_directory_filtered(&archive, &dir, &[".log"]));
        assert_eq!(entry_names(&archive), vec!["a.LOG", "b.log"]);

        let everything = temp.path().join("all.zip");
        assert!(ArchiveCodec::pack_directory_filtered(&everything, &dir, &[]));
        assert_eq!(entry_names(&everything).len(), 3);
    }

    #[test]
    fn test_pack_directory_filtered_missing_directory_returns_false() {
        let temp = TempDir::new().unwrap();
        assert!(!ArchiveCodec::pack_directory_filtered(
            &temp.path().join("x.zip"),
            &temp.path().join("missing"),
            &[]
        ));
    }

    #[test]
    fn test_pack_single_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("report.csv");
        fs::write(&source, "a,b\n1,2\n").unwrap();
        let target = temp.path().join("out");
        fs::create_dir_all(&target).unwrap();

        let archive = ArchiveCodec::pack_single_file(&target, &source).unwrap();

        assert_eq!(archive, target.join("report.csv.zip"));
        assert_eq!(entry_names(&archive), vec!["report.csv"]);
    }
}
