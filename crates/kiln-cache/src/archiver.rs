//! Packing mount directories into a tar archive and back.
//!
//! Entry names are mount paths relative to an archive root. Relative mounts
//! are taken as already relative to the root; absolute mounts must live
//! under it. Unpacking into the same root puts every entry back where it
//! was packed from.

use crate::compression::{compress, decompress};
use crate::types::ArchiveKind;
use kiln_core::{Error, Result};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Create an archive of `mounts`, resolved against `root`.
///
/// The whole archive is built in memory; nothing is returned unless every
/// mount was packed.
pub fn create_archive(mounts: &[PathBuf], root: &Path, kind: ArchiveKind) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for mount in mounts {
        let (source, name) = resolve_mount(mount, root)?;
        let metadata = std::fs::symlink_metadata(&source).map_err(|e| Error::SourceUnreadable {
            path: source.clone(),
            source: e,
        })?;

        let appended = if metadata.is_dir() {
            builder.append_dir_all(&name, &source)
        } else {
            builder.append_path_with_name(&source, &name)
        };
        appended.map_err(|e| Error::SourceUnreadable {
            path: source.clone(),
            source: e,
        })?;
    }

    let tarball = builder
        .into_inner()
        .map_err(|e| Error::Internal(format!("Failed to finish tar: {}", e)))?;
    compress(tarball, kind)
}

/// Extract an archive under `dest`, returning the number of entries
/// written.
///
/// The stream is checked end to end before anything is written, so a
/// truncated or undecodable archive leaves `dest` untouched. Entries whose
/// path escapes `dest` are skipped.
pub fn extract_archive(data: &[u8], kind: ArchiveKind, dest: &Path) -> Result<usize> {
    let tarball = decompress(data, kind)?;
    verify_entries(&tarball)?;

    std::fs::create_dir_all(dest).map_err(|e| Error::DestinationUnwritable {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let mut archive = tar::Archive::new(&*tarball);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);

    // Directories are finished last so restrictive modes do not block their
    // own contents.
    let mut directories = Vec::new();
    let mut count = 0;
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if entry.header().entry_type().is_dir() {
            directories.push(entry);
        } else if unpack_entry(&mut entry, dest)? {
            count += 1;
        }
    }

    directories.sort_by(|a, b| b.path_bytes().cmp(&a.path_bytes()));
    for mut dir in directories {
        if unpack_entry(&mut dir, dest)? {
            count += 1;
        }
    }

    Ok(count)
}

/// Read every entry through to the end, failing on short or unreadable data.
fn verify_entries(tarball: &[u8]) -> Result<()> {
    let mut archive = tar::Archive::new(tarball);
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let expected = entry.size();
        let read = io::copy(&mut entry, &mut io::sink()).map_err(corrupt)?;
        if read != expected {
            let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            return Err(Error::CorruptArchive(format!(
                "entry {} is truncated: {} of {} bytes",
                path, read, expected
            )));
        }
    }
    Ok(())
}

/// Unpack one entry, returning false when it was skipped.
fn unpack_entry<R: Read>(entry: &mut tar::Entry<'_, R>, dest: &Path) -> Result<bool> {
    let path = dest.join(entry.path().map_err(corrupt)?);
    let written = entry
        .unpack_in(dest)
        .map_err(|e| Error::DestinationUnwritable { path, source: e })?;
    if !written {
        warn!(
            entry = %String::from_utf8_lossy(&entry.path_bytes()),
            "Skipped archive entry outside the destination"
        );
    }
    Ok(written)
}

fn corrupt(e: std::io::Error) -> Error {
    Error::CorruptArchive(e.to_string())
}

/// Map a mount to its location on disk and its name inside the archive.
fn resolve_mount(mount: &Path, root: &Path) -> Result<(PathBuf, PathBuf)> {
    if mount.components().any(|c| c == Component::ParentDir) {
        return Err(Error::Configuration(format!(
            "mount {} must not contain '..'",
            mount.display()
        )));
    }

    if mount.is_absolute() {
        let name = mount.strip_prefix(root).map_err(|_| {
            Error::Configuration(format!(
                "mount {} is outside the archive root {}",
                mount.display(),
                root.display()
            ))
        })?;
        let name = if name.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            name.to_path_buf()
        };
        Ok((mount.to_path_buf(), name))
    } else {
        Ok((root.join(mount), mount.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn mode(path: &Path) -> u32 {
        fs::symlink_metadata(path).unwrap().permissions().mode() & 0o777
    }

    fn sample_tree(root: &Path) {
        write(&root.join("deps/a.txt"), "alpha");
        write(&root.join("deps/nested/b.txt"), "beta");
        write(&root.join("target/bin/tool"), "#!/bin/sh\necho hi\n");
        fs::set_permissions(
            root.join("target/bin/tool"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        fs::set_permissions(
            root.join("deps/nested/b.txt"),
            fs::Permissions::from_mode(0o600),
        )
        .unwrap();
        std::os::unix::fs::symlink("a.txt", root.join("deps/link")).unwrap();
    }

    fn assert_same_tree(src: &Path, dst: &Path) {
        assert_eq!(fs::read_to_string(dst.join("deps/a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dst.join("deps/nested/b.txt")).unwrap(), "beta");
        assert_eq!(
            fs::read_to_string(dst.join("target/bin/tool")).unwrap(),
            "#!/bin/sh\necho hi\n"
        );
        for file in ["deps/a.txt", "deps/nested/b.txt", "target/bin/tool"] {
            assert_eq!(mode(&src.join(file)), mode(&dst.join(file)), "{file}");
        }
        let link = dst.join("deps/link");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("a.txt"));
    }

    fn roundtrip(kind: ArchiveKind) {
        let src = tempfile::tempdir().unwrap();
        sample_tree(src.path());
        let mounts = vec![PathBuf::from("deps"), PathBuf::from("target")];

        let archive = create_archive(&mounts, src.path(), kind).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let entries = extract_archive(&archive, kind, dst.path()).unwrap();
        assert!(entries >= 7);
        assert_same_tree(src.path(), dst.path());
    }

    #[test]
    fn test_tar_roundtrip() {
        roundtrip(ArchiveKind::Tar);
    }

    #[test]
    fn test_gzip_roundtrip() {
        roundtrip(ArchiveKind::Gzip);
    }

    #[test]
    fn test_absolute_mount_is_stored_relative_to_root() {
        let src = tempfile::tempdir().unwrap();
        sample_tree(src.path());
        let mounts = vec![src.path().join("deps")];

        let archive = create_archive(&mounts, src.path(), ArchiveKind::Tar).unwrap();
        let mut reader = tar::Archive::new(archive.as_slice());
        let names: Vec<PathBuf> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().into_owned())
            .collect();
        assert!(names.contains(&PathBuf::from("deps/a.txt")));
        assert!(names.iter().all(|n| n.is_relative()));
    }

    #[test]
    fn test_missing_mount_is_unreadable() {
        let src = tempfile::tempdir().unwrap();
        write(&src.path().join("deps/a.txt"), "alpha");
        let mounts = vec![PathBuf::from("deps"), PathBuf::from("missing")];

        let err = create_archive(&mounts, src.path(), ArchiveKind::Gzip).unwrap_err();
        match err {
            Error::SourceUnreadable { path, .. } => assert!(path.ends_with("missing")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_mount_outside_root_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let err =
            create_archive(&[other.path().to_path_buf()], root.path(), ArchiveKind::Tar).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_parent_components_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let err =
            create_archive(&[PathBuf::from("../escape")], root.path(), ArchiveKind::Tar).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dst = tempfile::tempdir().unwrap();
        for kind in [ArchiveKind::Tar, ArchiveKind::Gzip] {
            let err = extract_archive(b"definitely not an archive", kind, dst.path()).unwrap_err();
            assert!(matches!(err, Error::CorruptArchive(_)), "{kind}");
        }
        assert_eq!(fs::read_dir(dst.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_truncated_tar_is_corrupt_and_writes_nothing() {
        let src = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        fs::create_dir_all(src.path().join("deps")).unwrap();
        fs::write(src.path().join("deps/big.bin"), &payload).unwrap();
        let archive =
            create_archive(&[PathBuf::from("deps")], src.path(), ArchiveKind::Tar).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let err =
            extract_archive(&archive[..archive.len() / 2], ArchiveKind::Tar, dst.path()).unwrap_err();
        match err {
            Error::CorruptArchive(message) => assert!(message.contains("big.bin"), "{message}"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dst.path().join("deps/big.bin").exists());
        assert_eq!(fs::read_dir(dst.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_blocked_destination_is_unwritable() {
        let src = tempfile::tempdir().unwrap();
        write(&src.path().join("deps/a.txt"), "alpha");
        let archive =
            create_archive(&[PathBuf::from("deps")], src.path(), ArchiveKind::Gzip).unwrap();

        let dst = tempfile::tempdir().unwrap();
        fs::write(dst.path().join("deps"), "a regular file").unwrap();
        let err = extract_archive(&archive, ArchiveKind::Gzip, dst.path()).unwrap_err();
        match err {
            Error::DestinationUnwritable { path, .. } => {
                assert!(path.ends_with("deps/a.txt"), "{}", path.display())
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_escaping_entry_is_skipped_and_not_counted() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder
            .append_data(&mut header, "deps/ok.txt", &b"ok"[..])
            .unwrap();

        let mut header = tar::Header::new_gnu();
        let name = b"../evil.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(4);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &b"evil"[..]).unwrap();
        let tarball = builder.into_inner().unwrap();

        let outer = tempfile::tempdir().unwrap();
        let dst = outer.path().join("restore");
        let entries = extract_archive(&tarball, ArchiveKind::Tar, &dst).unwrap();

        assert_eq!(entries, 1);
        assert_eq!(fs::read_to_string(dst.join("deps/ok.txt")).unwrap(), "ok");
        assert!(!outer.path().join("evil.txt").exists());
    }

    #[test]
    fn test_extract_overwrites_existing_files_only() {
        let src = tempfile::tempdir().unwrap();
        write(&src.path().join("deps/a.txt"), "fresh");
        let archive =
            create_archive(&[PathBuf::from("deps")], src.path(), ArchiveKind::Gzip).unwrap();

        let dst = tempfile::tempdir().unwrap();
        write(&dst.path().join("deps/a.txt"), "stale");
        write(&dst.path().join("deps/untouched.txt"), "keep");
        write(&dst.path().join("other/file.txt"), "keep");

        extract_archive(&archive, ArchiveKind::Gzip, dst.path()).unwrap();
        assert_eq!(fs::read_to_string(dst.path().join("deps/a.txt")).unwrap(), "fresh");
        assert_eq!(fs::read_to_string(dst.path().join("deps/untouched.txt")).unwrap(), "keep");
        assert_eq!(fs::read_to_string(dst.path().join("other/file.txt")).unwrap(), "keep");
    }
}
