//! Unpacks image archives and applies layer tarballs onto a filesystem tree.
//!
//! Layers are applied with overlay semantics: `.wh.<name>` deletes `<name>` from the
//! tree built so far and `.wh..wh..opq` empties its directory. Symlinks keep their
//! recorded targets so the captured tree can be copied into a fresh image as is, but
//! paths are always resolved as if `dest_root` were `/`, so no entry can reach outside it.

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::GzDecoder;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar_rs as tar;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";
const MAX_SYMLINK_HOPS: usize = 40;

/// Keeps archive paths inside the destination root.
fn normalize_tar_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in p.components() {
        match comp {
            Component::Normal(c) => out.push(c),
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    out
}

enum Step {
    Name(OsString),
    Up,
}

fn push_steps(pending: &mut Vec<Step>, path: &Path) {
    for comp in path.components().rev() {
        match comp {
            Component::Normal(c) => pending.push(Step::Name(c.to_os_string())),
            Component::ParentDir => pending.push(Step::Up),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
}

/// Resolves the directory `rel_dir` under `dest_root`, following symlinks already
/// in the tree with `dest_root` acting as `/`. Returns a path relative to the root
/// none of whose existing components is a symlink.
fn resolve_dir_in_root(dest_root: &Path, rel_dir: &Path) -> Result<PathBuf> {
    let mut resolved = PathBuf::new();
    let mut pending = Vec::new();
    push_steps(&mut pending, rel_dir);
    let mut hops = 0;

    while let Some(step) = pending.pop() {
        let name = match step {
            Step::Up => {
                resolved.pop();
                continue;
            }
            Step::Name(name) => name,
        };

        let candidate = dest_root.join(&resolved).join(&name);
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    bail!("Too many levels of symlinks under {}", dest_root.display());
                }
                let target = fs::read_link(&candidate)
                    .with_context(|| format!("Failed to read symlink: {}", candidate.display()))?;
                if target.has_root() {
                    resolved = PathBuf::new();
                }
                push_steps(&mut pending, &target);
            }
            _ => resolved.push(name),
        }
    }

    Ok(resolved)
}

/// Maps a normalized archive path to its location under `dest_root`. Only the
/// parent is resolved; the final component itself is never followed.
fn resolve_in_root(dest_root: &Path, rel_path: &Path) -> Result<PathBuf> {
    let parent = resolve_dir_in_root(dest_root, rel_path.parent().unwrap_or(Path::new("")))?;
    let mut dest = dest_root.join(parent);
    if let Some(name) = rel_path.file_name() {
        dest.push(name);
    }
    Ok(dest)
}

fn remove_path(path: &Path) {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).ok();
        }
        Ok(_) => {
            fs::remove_file(path).ok();
        }
        Err(_) => {}
    }
}

/// Applies a whiteout marker. Returns `true` when `rel_path` was a marker.
fn apply_whiteout(rel_path: &Path, dest_root: &Path) -> Result<bool> {
    let Some(file_name) = rel_path.file_name().and_then(|n| n.to_str()) else {
        return Ok(false);
    };
    if file_name != OPAQUE_MARKER && !file_name.starts_with(WHITEOUT_PREFIX) {
        return Ok(false);
    }
    let parent = dest_root.join(resolve_dir_in_root(
        dest_root,
        rel_path.parent().unwrap_or(Path::new("")),
    )?);

    if file_name == OPAQUE_MARKER {
        if parent.is_dir() {
            log::debug!("Opaque directory marker, clearing: {}", parent.display());
            for entry in fs::read_dir(&parent)? {
                remove_path(&entry?.path());
            }
        }
        return Ok(true);
    }

    if let Some(deleted) = file_name.strip_prefix(WHITEOUT_PREFIX) {
        let deleted_path = parent.join(deleted);
        log::debug!("Whiteout marker, deleting: {}", deleted_path.display());
        remove_path(&deleted_path);
        return Ok(true);
    }

    Ok(false)
}

fn open_archive(tar_path: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let mut magic_bytes = [0u8; 2];
    let mut reader = BufReader::new(
        File::open(tar_path)
            .with_context(|| format!("Failed to open tar file: {}", tar_path.display()))?,
    );
    reader
        .read_exact(&mut magic_bytes)
        .context("Failed to read magic bytes from tar file")?;

    let file = File::open(tar_path)?;
    let archive: tar::Archive<Box<dyn Read>> = if magic_bytes == [0x1f, 0x8b] {
        tar::Archive::new(Box::new(GzDecoder::new(file)))
    } else {
        tar::Archive::new(Box::new(file))
    };

    Ok(archive)
}

struct PendingHardlink {
    dest: PathBuf,
    target: PathBuf,
}

impl PendingHardlink {
    /// Links (or copies) the target into place. Targets that are not regular files
    /// once resolved inside the root are skipped.
    fn apply(&self, dest_root: &Path) -> Result<()> {
        let target = resolve_in_root(dest_root, &self.target)?;
        let dest = resolve_in_root(dest_root, &self.dest)?;
        let is_file = fs::symlink_metadata(&target)
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            log::warn!(
                "Skipping broken hardlink: {} -> {}",
                self.dest.display(),
                self.target.display()
            );
            return Ok(());
        }

        remove_path(&dest);
        if let Err(e) = fs::hard_link(&target, &dest) {
            log::debug!("hardlink failed ({}), falling back to copy", e);
            fs::copy(&target, &dest).with_context(|| {
                format!("Failed to copy {} to {}", target.display(), dest.display())
            })?;
        }

        Ok(())
    }
}

/// Extracts a tar archive (plain or gzipped) into `dest_root`, honoring whiteouts.
pub fn extract_tar(tar_path: &Path, dest_root: &Path) -> Result<()> {
    let mut archive = open_archive(tar_path)?;
    let mut pending_hardlinks = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result.context("Failed to read tar entry")?;
        let rel_path = normalize_tar_path(&entry.path().context("Failed to get entry path")?);

        if rel_path.as_os_str().is_empty() || apply_whiteout(&rel_path, dest_root)? {
            continue;
        }

        let dest = resolve_in_root(dest_root, &rel_path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let header = entry.header();
        let entry_type = header.entry_type();
        #[cfg(unix)]
        let mode = header.mode().ok();

        match entry_type {
            tar::EntryType::Directory => {
                if fs::symlink_metadata(&dest).map(|m| !m.is_dir()).unwrap_or(false) {
                    remove_path(&dest);
                }
                fs::create_dir_all(&dest)
                    .with_context(|| format!("Failed to create directory: {}", dest.display()))?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    // Owner must keep write access so later layers can add files
                    let safe_mode = mode.unwrap_or(0o755) | 0o700;
                    let _ = fs::set_permissions(&dest, fs::Permissions::from_mode(safe_mode));
                }
            }
            tar::EntryType::Regular => {
                remove_path(&dest);
                let mut out_file = File::create(&dest)
                    .with_context(|| format!("Failed to create file: {}", dest.display()))?;
                std::io::copy(&mut entry, &mut out_file)
                    .with_context(|| format!("Failed to write file: {}", dest.display()))?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Some(mode) = mode {
                        // Keep files readable by the owner for the later COPY
                        let perms = fs::Permissions::from_mode(mode | 0o400);
                        let _ = fs::set_permissions(&dest, perms);
                    }
                }
            }
            tar::EntryType::Symlink => {
                let link_name = header
                    .link_name()
                    .context("Failed to get symlink target")?
                    .ok_or_else(|| anyhow!("Symlink without target: {}", rel_path.display()))?;
                remove_path(&dest);

                #[cfg(unix)]
                {
                    std::os::unix::fs::symlink(&link_name, &dest).with_context(|| {
                        format!(
                            "Failed to create symlink {} -> {}",
                            dest.display(),
                            link_name.display()
                        )
                    })?;
                }

                #[cfg(not(unix))]
                {
                    log::warn!("Symlinks are not supported on this platform: {}", dest.display());
                }
            }
            tar::EntryType::Link => {
                let link_name = header
                    .link_name()
                    .context("Failed to get hardlink target")?
                    .ok_or_else(|| anyhow!("Hardlink without target: {}", rel_path.display()))?;

                pending_hardlinks.push(PendingHardlink {
                    dest: rel_path,
                    target: normalize_tar_path(&link_name),
                });
            }
            other => {
                log::debug!("Skipping unsupported entry type {:?}: {}", other, rel_path.display());
            }
        }
    }

    // Hardlink targets may appear later in the archive than the link itself
    for link in &pending_hardlinks {
        link.apply(dest_root)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn append_file(builder: &mut tar::Builder<File>, path: &str, content: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, path, content).unwrap();
    }

    fn append_link(
        builder: &mut tar::Builder<File>,
        kind: tar::EntryType,
        path: &str,
        target: impl AsRef<Path>,
    ) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(kind);
        header.set_size(0);
        header.set_mode(0o777);
        builder.append_link(&mut header, path, target).unwrap();
    }

    fn write_layer(dir: &Path, name: &str, build: impl FnOnce(&mut tar::Builder<File>)) -> PathBuf {
        let path = dir.join(name);
        let mut builder = tar::Builder::new(File::create(&path).unwrap());
        build(&mut builder);
        builder.finish().unwrap();
        path
    }

    #[test]
    fn test_normalize_tar_path() {
        assert_eq!(normalize_tar_path(Path::new("./a/b")), PathBuf::from("a/b"));
        assert_eq!(normalize_tar_path(Path::new("/etc/passwd")), PathBuf::from("etc/passwd"));
        assert_eq!(normalize_tar_path(Path::new("../../x")), PathBuf::from("x"));
        assert_eq!(normalize_tar_path(Path::new("a/../b")), PathBuf::from("b"));
    }

    #[test]
    fn test_layers_apply_whiteouts() {
        let work = TempDir::new().unwrap();
        let rootfs = work.path().join("rootfs");
        fs::create_dir_all(&rootfs).unwrap();

        let base = write_layer(work.path(), "base.tar", |b| {
            append_file(b, "etc/keep.conf", b"keep");
            append_file(b, "etc/drop.conf", b"drop");
            append_file(b, "var/cache/a", b"a");
            append_file(b, "var/cache/b", b"b");
        });
        let upper = write_layer(work.path(), "upper.tar", |b| {
            append_file(b, "etc/.wh.drop.conf", b"");
            append_file(b, "var/cache/.wh..wh..opq", b"");
            append_file(b, "var/cache/c", b"c");
            append_file(b, "etc/keep.conf", b"updated");
        });

        extract_tar(&base, &rootfs).unwrap();
        extract_tar(&upper, &rootfs).unwrap();

        assert_eq!(fs::read_to_string(rootfs.join("etc/keep.conf")).unwrap(), "updated");
        assert!(!rootfs.join("etc/drop.conf").exists());
        assert!(!rootfs.join("etc/.wh.drop.conf").exists());
        assert!(!rootfs.join("var/cache/a").exists());
        assert!(!rootfs.join("var/cache/b").exists());
        assert_eq!(fs::read_to_string(rootfs.join("var/cache/c")).unwrap(), "c");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_keeps_recorded_target() {
        let work = TempDir::new().unwrap();
        let rootfs = work.path().join("rootfs");
        fs::create_dir_all(&rootfs).unwrap();

        let layer = write_layer(work.path(), "layer.tar", |b| {
            append_file(b, "bin/busybox", b"#!");
            append_link(b, tar::EntryType::Symlink, "bin/sh", "busybox");
        });

        extract_tar(&layer, &rootfs).unwrap();
        assert_eq!(
            fs::read_link(rootfs.join("bin/sh")).unwrap(),
            PathBuf::from("busybox")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_parent_stays_inside_root() {
        let work = TempDir::new().unwrap();
        let rootfs = work.path().join("rootfs");
        let outside = work.path().join("outside");
        fs::create_dir_all(&rootfs).unwrap();
        fs::create_dir_all(&outside).unwrap();

        let layer = write_layer(work.path(), "layer.tar", |b| {
            append_link(b, tar::EntryType::Symlink, "etc", &outside);
            append_file(b, "etc/pwned", b"x");
            append_link(b, tar::EntryType::Symlink, "up", "../outside");
            append_file(b, "up/also", b"y");
        });

        extract_tar(&layer, &rootfs).unwrap();

        assert!(!outside.join("pwned").exists());
        assert!(!outside.join("also").exists());
        assert_eq!(fs::read_link(rootfs.join("etc")).unwrap(), outside);
        let redirected = rootfs.join(normalize_tar_path(&outside));
        assert_eq!(fs::read_to_string(redirected.join("pwned")).unwrap(), "x");
        assert_eq!(fs::read_to_string(rootfs.join("outside/also")).unwrap(), "y");
    }

    #[cfg(unix)]
    #[test]
    fn test_whiteout_under_symlink_stays_inside_root() {
        let work = TempDir::new().unwrap();
        let rootfs = work.path().join("rootfs");
        let outside = work.path().join("outside");
        fs::create_dir_all(&rootfs).unwrap();
        fs::create_dir_all(outside.join("cache")).unwrap();
        fs::write(outside.join("victim"), "keep").unwrap();
        fs::write(outside.join("cache/entry"), "keep").unwrap();

        let layer = write_layer(work.path(), "layer.tar", |b| {
            append_link(b, tar::EntryType::Symlink, "etc", &outside);
            append_file(b, "etc/.wh.victim", b"");
            append_file(b, "etc/cache/.wh..wh..opq", b"");
        });

        extract_tar(&layer, &rootfs).unwrap();

        assert_eq!(fs::read_to_string(outside.join("victim")).unwrap(), "keep");
        assert_eq!(fs::read_to_string(outside.join("cache/entry")).unwrap(), "keep");
    }

    #[cfg(unix)]
    #[test]
    fn test_hardlink_through_symlink_is_skipped() {
        let work = TempDir::new().unwrap();
        let rootfs = work.path().join("rootfs");
        let outside = work.path().join("outside");
        fs::create_dir_all(&rootfs).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret"), "host").unwrap();

        let layer = write_layer(work.path(), "layer.tar", |b| {
            append_link(b, tar::EntryType::Symlink, "etc", &outside);
            append_link(b, tar::EntryType::Link, "stolen", "etc/secret");
        });

        extract_tar(&layer, &rootfs).unwrap();

        assert!(!rootfs.join("stolen").exists());
    }

    #[test]
    fn test_hardlink_resolves_inside_root() {
        let work = TempDir::new().unwrap();
        let rootfs = work.path().join("rootfs");
        fs::create_dir_all(&rootfs).unwrap();

        let layer = write_layer(work.path(), "layer.tar", |b| {
            append_link(b, tar::EntryType::Link, "bin/b", "bin/a");
            append_file(b, "bin/a", b"tool");
        });

        extract_tar(&layer, &rootfs).unwrap();

        assert_eq!(fs::read_to_string(rootfs.join("bin/b")).unwrap(), "tool");
    }

    #[test]
    fn test_gzip_layer() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let work = TempDir::new().unwrap();
        let path = work.path().join("layer.tar.gz");
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "hi.txt", &b"hi"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let rootfs = work.path().join("rootfs");
        fs::create_dir_all(&rootfs).unwrap();
        extract_tar(&path, &rootfs).unwrap();
        assert_eq!(fs::read_to_string(rootfs.join("hi.txt")).unwrap(), "hi");
    }

    #[test]
    fn test_missing_archive_fails() {
        let work = TempDir::new().unwrap();
        assert!(extract_tar(&work.path().join("absent.tar"), work.path()).is_err());
    }
}
