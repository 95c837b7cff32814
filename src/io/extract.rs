//! Archive installation.
//!
//! Unpacks a package archive (a zstd- or gzip-compressed tarball) into the
//! install root. Two modes: direct extraction to final paths, and staging
//! extraction where payload files land with a `.new` suffix for a later
//! atomic swap. The caller observes every extracted entry through a
//! callback and journals the physical path before the next entry is
//! written.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use zstd::stream::Decoder as ZstdDecoder;

use crate::core::package::{parse_manifest, Package, PackageError, MANIFEST_ENTRY};

/// Suffix staged payload files carry until the swap phase renames them.
pub const STAGING_SUFFIX: &str = ".new";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("archive entry '{0}' escapes the install root")]
    PathTraversal(String),

    #[error("archive has no {MANIFEST_ENTRY} manifest entry")]
    MissingManifest,

    #[error(transparent)]
    Manifest(#[from] PackageError),
}

/// How extracted payload lands on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Every entry is written to its final path.
    Direct,
    /// Regular files and symlinks get a [`STAGING_SUFFIX`]; directories are
    /// created at their final names. No renames happen here.
    Staging,
}

/// Compressed tar flavors basalt accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarZst,
    TarGz,
    Tar,
}

/// Detect the archive format from the file name. The native `.pkg`
/// extension is zstd-compressed tar.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat, ExtractError> {
    let name = path.to_string_lossy().to_lowercase();
    if name.ends_with(".pkg") || name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        Ok(ArchiveFormat::TarZst)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Ok(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar") {
        Ok(ArchiveFormat::Tar)
    } else {
        Err(ExtractError::UnsupportedFormat(name))
    }
}

fn with_reader<T>(
    archive_path: &Path,
    f: impl FnOnce(&mut dyn Read) -> Result<T, ExtractError>,
) -> Result<T, ExtractError> {
    let file = BufReader::new(File::open(archive_path)?);
    match detect_format(archive_path)? {
        ArchiveFormat::TarZst => f(&mut ZstdDecoder::new(file)?),
        ArchiveFormat::TarGz => f(&mut flate2::read::GzDecoder::new(file)),
        ArchiveFormat::Tar => {
            let mut file = file;
            f(&mut file)
        }
    }
}

/// Read and parse the package manifest from an archive without unpacking
/// any payload.
pub fn read_manifest(archive_path: &Path) -> Result<Package, ExtractError> {
    with_reader(archive_path, |reader| {
        let mut archive = tar::Archive::new(reader);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?;
            if path.as_os_str() == MANIFEST_ENTRY {
                let mut content = String::new();
                entry.read_to_string(&mut content)?;
                return Ok(parse_manifest(&content)?);
            }
        }
        Err(ExtractError::MissingManifest)
    })
}

/// List the payload paths an archive would install, each with a single
/// leading `/`. Nothing is unpacked. Pre-transaction hooks match against
/// this listing before any file is written.
pub fn list_files(archive_path: &Path) -> Result<Vec<String>, ExtractError> {
    with_reader(archive_path, |reader| {
        let mut archive = tar::Archive::new(reader);
        let mut files = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            let entry_path = entry.path()?.into_owned();
            if let Some(relative) = payload_path(&entry_path)? {
                files.push(format!("/{}", relative.display()));
            }
        }
        Ok(files)
    })
}

/// Extract an archive into `root`.
///
/// For every extracted entry, `on_entry(physical_path, manifest_path)` runs
/// after the entry is on disk; `manifest_path` is the archive-relative path
/// with a single leading `/`. The callback's error aborts the extraction.
///
/// Metadata sentinels at the archive root (the manifest and scriptlet
/// entries) carry no payload and are skipped.
pub fn extract_archive<F>(
    archive_path: &Path,
    root: &Path,
    mode: ExtractMode,
    mut on_entry: F,
) -> Result<(), ExtractError>
where
    F: FnMut(&Path, &str) -> std::io::Result<()>,
{
    std::fs::create_dir_all(root)?;
    let root = root.canonicalize()?;

    with_reader(archive_path, |reader| {
        let mut archive = tar::Archive::new(reader);
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        #[cfg(unix)]
        {
            archive.set_unpack_xattrs(true);
            // chown requires privileges; as plain user the modes still land
            archive.set_preserve_ownerships(rustix::process::geteuid().is_root());
        }

        for entry in archive.entries()? {
            let mut entry = entry?;
            let entry_path = entry.path()?.into_owned();

            let Some(relative) = payload_path(&entry_path)? else {
                continue;
            };

            let manifest_path = format!("/{}", relative.display());
            let is_dir = entry.header().entry_type().is_dir();

            let mut physical = root.join(&relative);
            if mode == ExtractMode::Staging && !is_dir {
                physical = staged_name(&physical);
            }

            if let Some(parent) = physical.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&physical)?;

            on_entry(&physical, &manifest_path)?;
        }
        Ok(())
    })
}

/// Validate an entry path and return its root-relative form, or `None` for
/// metadata sentinels. Absolute paths and any `..` traversal are rejected.
fn payload_path(entry_path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let mut clean = PathBuf::new();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ExtractError::PathTraversal(
                    entry_path.display().to_string(),
                ))
            }
        }
    }

    if clean.as_os_str().is_empty() {
        return Ok(None);
    }

    // Root-level dotfile entries are reserved metadata (manifest,
    // scriptlet), never payload.
    if clean.components().count() == 1
        && clean.to_string_lossy().starts_with('.')
    {
        return Ok(None);
    }

    Ok(Some(clean))
}

/// `<final>` -> `<final>.new`.
pub fn staged_name(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(STAGING_SUFFIX);
    PathBuf::from(os)
}

/// Inverse of [`staged_name`] for paths produced in staging mode.
pub fn final_name(staged: &Path) -> Option<PathBuf> {
    let s = staged.to_string_lossy();
    s.strip_suffix(STAGING_SUFFIX).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const MANIFEST: &str = "pkgname = demo\npkgver = 1.0-1\narch = x86_64\n";

    /// Build a small zstd-compressed package archive on disk.
    fn build_archive(dir: &Path, entries: &[(&str, &str, u32)]) -> PathBuf {
        let path = dir.join("demo-1.0-1-x86_64.pkg");
        let file = File::create(&path).unwrap();
        let encoder = zstd::stream::Encoder::new(file, 0).unwrap().auto_finish();
        let mut builder = tar::Builder::new(encoder);

        let mut add_file = |name: &str, content: &str, mode: u32| {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(mode);
            header.set_uid(0);
            header.set_gid(0);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        };

        add_file(MANIFEST_ENTRY, MANIFEST, 0o644);
        for (name, content, mode) in entries {
            add_file(name, content, *mode);
        }
        builder.into_inner().unwrap();
        path
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format(Path::new("a-1.0-1-x86_64.pkg")).unwrap(),
            ArchiveFormat::TarZst
        );
        assert_eq!(
            detect_format(Path::new("a.tar.gz")).unwrap(),
            ArchiveFormat::TarGz
        );
        assert_eq!(detect_format(Path::new("a.tar")).unwrap(), ArchiveFormat::Tar);
        assert!(detect_format(Path::new("a.rpm")).is_err());
    }

    #[test]
    fn test_read_manifest() {
        let dir = tempdir().unwrap();
        let archive = build_archive(dir.path(), &[("usr/bin/demo", "#!/bin/sh\n", 0o755)]);

        let pkg = read_manifest(&archive).unwrap();
        assert_eq!(pkg.name, "demo");
        assert_eq!(pkg.version, "1.0-1");
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bare.tar");
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder.append_data(&mut header, "usr/empty", &[][..]).unwrap();
        builder.into_inner().unwrap().flush().unwrap();

        assert!(matches!(
            read_manifest(&path),
            Err(ExtractError::MissingManifest)
        ));
    }

    #[test]
    fn test_direct_extraction() {
        let dir = tempdir().unwrap();
        let archive = build_archive(
            dir.path(),
            &[
                ("usr/bin/demo", "#!/bin/sh\necho demo\n", 0o755),
                ("usr/share/demo/data", "payload\n", 0o644),
            ],
        );
        let root = dir.path().join("root");

        let mut seen = Vec::new();
        extract_archive(&archive, &root, ExtractMode::Direct, |physical, manifest| {
            seen.push((physical.to_path_buf(), manifest.to_string()));
            Ok(())
        })
        .unwrap();

        assert!(root.join("usr/bin/demo").exists());
        assert_eq!(
            std::fs::read_to_string(root.join("usr/share/demo/data")).unwrap(),
            "payload\n"
        );
        // the manifest sentinel is not payload
        assert!(!root.join(MANIFEST_ENTRY).exists());
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, "/usr/bin/demo");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(root.join("usr/bin/demo"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_staging_extraction() {
        let dir = tempdir().unwrap();
        let archive = build_archive(dir.path(), &[("usr/bin/demo", "v2\n", 0o755)]);
        let root = dir.path().join("root");

        let mut staged = Vec::new();
        extract_archive(&archive, &root, ExtractMode::Staging, |physical, manifest| {
            staged.push((physical.to_path_buf(), manifest.to_string()));
            Ok(())
        })
        .unwrap();

        // payload carries the suffix, the manifest path does not
        assert!(root.join("usr/bin/demo.new").exists());
        assert!(!root.join("usr/bin/demo").exists());
        assert_eq!(staged[0].1, "/usr/bin/demo");
        assert_eq!(
            final_name(&staged[0].0),
            Some(root.join("usr/bin/demo"))
        );
    }

    #[test]
    fn test_list_files() {
        let dir = tempdir().unwrap();
        let archive = build_archive(
            dir.path(),
            &[
                ("usr/bin/demo", "x", 0o755),
                ("usr/share/demo/data", "y", 0o644),
            ],
        );

        let files = list_files(&archive).unwrap();
        assert_eq!(files, vec!["/usr/bin/demo", "/usr/share/demo/data"]);
        // nothing was unpacked
        assert!(!dir.path().join("usr").exists());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("evil.tar");
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        let content = b"owned";
        // `Builder::append_data` validates paths and rejects `..`, so the
        // traversal attempt is written straight into the name field to
        // simulate a maliciously crafted archive.
        let name = b"usr/../../escape";
        header.as_mut_bytes()[..name.len()].copy_from_slice(name);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder.append(&header, &content[..]).unwrap();
        builder.into_inner().unwrap().flush().unwrap();

        let root = dir.path().join("root");
        let result = extract_archive(&path, &root, ExtractMode::Direct, |_, _| Ok(()));
        assert!(matches!(result, Err(ExtractError::PathTraversal(_))));
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn test_callback_error_aborts() {
        let dir = tempdir().unwrap();
        let archive = build_archive(
            dir.path(),
            &[("usr/bin/a", "a", 0o755), ("usr/bin/b", "b", 0o755)],
        );
        let root = dir.path().join("root");

        let mut calls = 0;
        let result = extract_archive(&archive, &root, ExtractMode::Direct, |_, _| {
            calls += 1;
            Err(std::io::Error::other("journal full"))
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
        // extraction stopped after the failing entry
        assert!(!root.join("usr/bin/b").exists());
    }

    #[test]
    fn test_symlink_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("links.tar");
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);

        let mut header = tar::Header::new_gnu();
        let content = b"real";
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder
            .append_data(&mut header, "usr/lib/libdemo.so.1", &content[..])
            .unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_uid(0);
        link.set_gid(0);
        link.set_cksum();
        builder
            .append_link(&mut link, "usr/lib/libdemo.so", "libdemo.so.1")
            .unwrap();
        builder.into_inner().unwrap().flush().unwrap();

        let root = dir.path().join("root");
        extract_archive(&path, &root, ExtractMode::Direct, |_, _| Ok(())).unwrap();

        let link_path = root.join("usr/lib/libdemo.so");
        assert!(link_path.is_symlink());
        assert_eq!(
            std::fs::read_link(&link_path).unwrap(),
            PathBuf::from("libdemo.so.1")
        );
    }
}
