//! Tar archives for host/container transfers.
//!
//! Extraction is two-pass. [`unpack_within`] first walks every entry and
//! checks that its path, and any link target, resolves inside the destination
//! root. Only when the whole archive passes does the second pass write files,
//! so a rejected archive leaves nothing behind.
//!
//! Paths are walked component by component and may not pass through a
//! symlink, whether it is already on disk or planted by an earlier entry of
//! the same archive.

use crate::error::{Result, TaskError};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};

/// Pack a host file or directory.
///
/// A file is stored under its own name; a directory's contents are stored
/// relative to the directory itself. Symlinks inside a directory are packed
/// as symlinks.
pub fn pack_path(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut archive = Builder::new(Vec::new());
    // Links are stored as links, never as the files they point at.
    archive.follow_symlinks(false);
    if path.is_file() {
        let mut file = std::fs::File::open(path)?;
        let file_name = path.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid file name")
        })?;
        archive.append_file(file_name, &mut file)?;
    } else {
        archive.append_dir_all(".", path)?;
    }
    archive.into_inner()
}

/// Pack a single in-memory file.
pub fn pack_file(name: &str, contents: &[u8], mode: u32) -> std::io::Result<Vec<u8>> {
    let mut header = Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_entry_type(EntryType::Regular);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();

    let mut archive = Builder::new(Vec::new());
    archive.append_data(&mut header, name, contents)?;
    archive.into_inner()
}

/// Read the first regular file in an archive as UTF-8 (lossy).
pub fn first_file_contents(data: &[u8]) -> std::io::Result<Option<String>> {
    use std::io::Read;
    let mut archive = Archive::new(Cursor::new(data));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
        }
    }
    Ok(None)
}

/// Resolve `relative` under `root`.
///
/// Rejects absolute paths, any `..` that would climb above `root`, and any
/// walk through a symlink already on disk below `root`.
pub fn resolve_within(root: &Path, relative: &Path) -> Result<PathBuf> {
    resolve_entry(root, relative, &HashSet::new()).map(|r| root.join(r))
}

/// Whether `path` exists on disk as a symlink (without following it).
fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

/// Resolve an archive path under `root`, rejecting it if it climbs above the
/// root or walks through a link: one planted earlier in the same archive
/// (`links`) or one already on disk.
fn resolve_entry(root: &Path, relative: &Path, links: &HashSet<PathBuf>) -> Result<PathBuf> {
    let reject = || TaskError::PathTraversal {
        path: relative.to_path_buf(),
    };
    let mut current = PathBuf::new();
    for component in relative.components() {
        if !current.as_os_str().is_empty()
            && (links.contains(&current) || is_symlink(&root.join(&current)))
        {
            return Err(reject());
        }
        match component {
            Component::Normal(part) => current.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !current.pop() {
                    return Err(reject());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(reject()),
        }
    }
    Ok(current)
}

/// Check one link entry's target.
fn check_link(
    root: &Path,
    entry_path: &Path,
    kind: EntryType,
    target: &Path,
    links: &HashSet<PathBuf>,
) -> Result<()> {
    let reject = || TaskError::PathTraversal {
        path: entry_path.to_path_buf(),
    };
    if target.is_absolute() {
        return Err(reject());
    }
    let base = if kind.is_symlink() {
        entry_path.parent().unwrap_or(Path::new(""))
    } else {
        Path::new("")
    };
    resolve_entry(root, &base.join(target), links).map_err(|_| reject())?;
    Ok(())
}

/// Validate every entry of `data` against `root` without writing anything.
///
/// Links may point anywhere inside the root, but no later entry or link
/// target may pass through one, and no entry may replace one.
pub fn validate_entries(data: &[u8], root: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = Archive::new(Cursor::new(data));
    let mut links = HashSet::new();
    let mut targets = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?.into_owned();
        let relative = resolve_entry(root, &path, &links)?;
        if links.contains(&relative) || is_symlink(&root.join(&relative)) {
            return Err(TaskError::PathTraversal { path });
        }
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            if let Some(link) = entry.link_name()? {
                check_link(root, &path, kind, &link, &links)?;
            }
            links.insert(relative.clone());
        }
        targets.push(root.join(relative));
    }
    Ok(targets)
}

/// Fail unless `resolved`, with every symlink followed, still lies under
/// `root`. `relative` is the path as requested, for the error.
pub fn ensure_real_within(root: &Path, resolved: &Path, relative: &Path) -> Result<PathBuf> {
    let real_root = root.canonicalize()?;
    let real = resolved.canonicalize()?;
    if real.starts_with(&real_root) {
        Ok(real)
    } else {
        Err(TaskError::PathTraversal {
            path: relative.to_path_buf(),
        })
    }
}

/// Extract `data` into `root`, rejecting the whole archive if any entry
/// escapes it. Returns the paths written.
pub fn unpack_within(data: &[u8], root: &Path) -> Result<Vec<PathBuf>> {
    let targets = validate_entries(data, root)?;
    std::fs::create_dir_all(root)?;

    let mut archive = Archive::new(Cursor::new(data));
    archive.set_overwrite(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        entry.unpack_in(root)?;
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an archive with raw entry names, bypassing `tar`'s own checks.
    fn raw_archive(entries: &[(&str, EntryType, &[u8], Option<&str>)]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (name, kind, body, link) in entries {
            let mut header = Header::new_gnu();
            {
                let gnu = header.as_gnu_mut().unwrap();
                gnu.name[..name.len()].copy_from_slice(name.as_bytes());
                if let Some(link) = link {
                    gnu.linkname[..link.len()].copy_from_slice(link.as_bytes());
                }
            }
            header.set_entry_type(*kind);
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *body).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn resolve_within_accepts_nested_paths() {
        let root = Path::new("/dest");
        assert_eq!(
            resolve_within(root, Path::new("a/./b/../c.txt")).unwrap(),
            PathBuf::from("/dest/a/c.txt")
        );
    }

    #[test]
    fn resolve_within_rejects_escapes() {
        let root = Path::new("/dest");
        for bad in ["../evil", "a/../../evil", "/etc/passwd"] {
            let err = resolve_within(root, Path::new(bad)).unwrap_err();
            assert!(err.to_string().contains(bad), "{bad}: {err}");
        }
    }

    #[test]
    fn zip_slip_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a").join("b");
        let data = raw_archive(&[
            ("ok.txt", EntryType::Regular, b"fine", None),
            ("../../evil", EntryType::Regular, b"pwned", None),
        ]);

        let err = unpack_within(&data, &root).unwrap_err();
        assert!(matches!(err, TaskError::PathTraversal { ref path } if path == Path::new("../../evil")));
        assert!(err.to_string().contains("../../evil"));
        assert!(!root.join("ok.txt").exists());
        assert!(!dir.path().join("evil").exists());
    }

    #[test]
    fn symlink_escaping_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = raw_archive(&[("link", EntryType::Symlink, b"", Some("../../etc"))]);
        let err = unpack_within(&data, dir.path()).unwrap_err();
        assert!(err.to_string().contains("link"));

        let data = raw_archive(&[("abs", EntryType::Symlink, b"", Some("/etc/passwd"))]);
        assert!(unpack_within(&data, dir.path()).is_err());
    }

    #[test]
    fn entries_through_an_earlier_link_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dest");

        // `a` -> `.` makes `a/..` the parent of the root on disk.
        let data = raw_archive(&[
            ("a", EntryType::Symlink, b"", Some(".")),
            ("a/b", EntryType::Symlink, b"", Some("..")),
        ]);
        let err = unpack_within(&data, &root).unwrap_err();
        assert!(err.to_string().contains("a/b"), "{err}");
        assert!(std::fs::symlink_metadata(root.join("a")).is_err());
        assert!(std::fs::symlink_metadata(root.join("b")).is_err());

        let data = raw_archive(&[
            ("a", EntryType::Symlink, b"", Some(".")),
            ("c", EntryType::Symlink, b"", Some("a/..")),
        ]);
        assert!(unpack_within(&data, &root).is_err());

        let data = raw_archive(&[
            ("a", EntryType::Symlink, b"", Some(".")),
            ("a", EntryType::Regular, b"replaced", None),
        ]);
        assert!(unpack_within(&data, &root).is_err());
    }

    #[test]
    fn links_inside_the_root_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let data = raw_archive(&[
            ("docs/readme.txt", EntryType::Regular, b"hi", None),
            ("latest", EntryType::Symlink, b"", Some("docs")),
        ]);
        let written = unpack_within(&data, dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("latest").join("readme.txt")).unwrap(),
            "hi"
        );
    }

    #[cfg(unix)]
    #[test]
    fn existing_symlinks_on_disk_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dest");
        std::fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink("..", root.join("up")).unwrap();

        let data = raw_archive(&[("up/evil", EntryType::Regular, b"pwned", None)]);
        let err = unpack_within(&data, &root).unwrap_err();
        assert!(err.to_string().contains("up/evil"), "{err}");
        assert!(!dir.path().join("evil").exists());

        let err = ensure_real_within(&root, &root.join("up"), Path::new("up")).unwrap_err();
        assert!(matches!(err, TaskError::PathTraversal { .. }));
        assert!(ensure_real_within(&root, &root, Path::new(".")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn pack_path_keeps_symlinks_as_links() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "host only").unwrap();
        let src = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), src.path().join("s"))
            .unwrap();

        let data = pack_path(src.path()).unwrap();
        let mut archive = Archive::new(Cursor::new(&data[..]));
        let mut saw_link = false;
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            if entry.path().unwrap().ends_with("s") {
                assert!(entry.header().entry_type().is_symlink());
                saw_link = true;
            }
        }
        assert!(saw_link);
        assert_eq!(first_file_contents(&data).unwrap(), None);
    }

    #[test]
    fn pack_and_unpack_directory() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub").join("x.txt"), "hello").unwrap();

        let data = pack_path(src.path()).unwrap();
        let dest = tempfile::tempdir().unwrap();
        unpack_within(&data, dest.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.path().join("sub").join("x.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn pack_file_round_trips_contents() {
        let data = pack_file("notes.txt", b"line one\n", 0o600).unwrap();
        assert_eq!(
            first_file_contents(&data).unwrap().as_deref(),
            Some("line one\n")
        );
    }
}
