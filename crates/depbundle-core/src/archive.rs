//! Deterministic bundle assembly.
//!
//! ## Archive layout
//!
//! ```text
//! app/                 application source at the requested revision
//! gomod/pkg/mod/...    one directory per package manager with a populated
//! npm/...              dependency cache
//! ```
//!
//! Entries are written in lexicographic path order with every piece of
//! metadata that varies between machines or runs zeroed, so the same inputs
//! always produce the same bytes.

use crate::canonical::{canonical_packages, deep_sort};
use crate::content_manifest::build_content_manifest;
use crate::error::{Error, Result};
use crate::packages::PackagesData;
use crate::paths::{RequestBundleDir, SOURCE_DIR_NAME};
use crate::pkg_managers::PackageManagerKind;
use crate::request::ArchiveInfo;
use depbundle_util::fs::{atomic_write, walk_sorted, EntryKind};
use depbundle_util::hash::blake3_file;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tar::{EntryType, Header};
use tracing::{debug, info};

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;
const EXECUTABLE_MODE: u32 = 0o755;

/// One archive member and where its bytes come from.
#[derive(Debug)]
struct Member {
    archive_path: String,
    source: PathBuf,
    kind: EntryKind,
    len: u64,
}

/// Collect `dir` as archive members below `prefix/`, including `prefix/`
/// itself.
fn collect(dir: &Path, prefix: &str, members: &mut Vec<Member>) -> io::Result<()> {
    members.push(Member {
        archive_path: format!("{prefix}/"),
        source: dir.to_path_buf(),
        kind: EntryKind::Dir,
        len: 0,
    });
    for entry in walk_sorted(dir)? {
        let archive_path = match entry.kind {
            EntryKind::Dir => format!("{prefix}/{}/", entry.relative),
            EntryKind::File { .. } => format!("{prefix}/{}", entry.relative),
        };
        members.push(Member {
            archive_path,
            source: entry.path,
            kind: entry.kind,
            len: entry.len,
        });
    }
    Ok(())
}

fn header_for(member: &Member) -> Header {
    let mut header = Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    match member.kind {
        EntryKind::Dir => {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(DIR_MODE);
            header.set_size(0);
        }
        EntryKind::File { executable } => {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(if executable { EXECUTABLE_MODE } else { FILE_MODE });
            header.set_size(member.len);
        }
    }
    header
}

/// Write the bundle of `bundle` to `dest`.
///
/// The source tree must exist. Dependency cache directories of `kinds` that
/// were never populated (an auto-detected manager that was skipped) are left
/// out.
pub fn assemble_archive(
    bundle: &RequestBundleDir,
    kinds: &[PackageManagerKind],
    dest: &Path,
) -> Result<ArchiveInfo> {
    let source_dir = bundle.source_dir();
    if !source_dir.is_dir() {
        return Err(Error::ContentFetch(format!(
            "The application source of request {} is missing",
            bundle.request_id()
        )));
    }

    let mut members = Vec::new();
    collect(&source_dir, SOURCE_DIR_NAME, &mut members)?;
    for kind in kinds {
        let deps_dir = bundle.deps_dir(*kind);
        if deps_dir.is_dir() {
            collect(&deps_dir, kind.as_str(), &mut members)?;
        } else {
            debug!(request_id = bundle.request_id(), pm = %kind, "no dependency cache to bundle");
        }
    }
    members.sort_by(|a, b| a.archive_path.cmp(&b.archive_path));
    members.dedup_by(|a, b| a.archive_path == b.archive_path);

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = dest.with_file_name(format!(
        ".{}.partial",
        dest.file_name().and_then(|n| n.to_str()).unwrap_or("archive")
    ));
    if let Err(e) = write_members(&members, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    fs::rename(&temp, dest)?;

    let digest = blake3_file(dest)?;
    info!(
        request_id = bundle.request_id(),
        entries = members.len(),
        digest = %digest,
        "archive assembled"
    );

    Ok(ArchiveInfo {
        path: dest.to_path_buf(),
        digest,
    })
}

fn write_members(members: &[Member], path: &Path) -> io::Result<()> {
    let file = BufWriter::new(File::create(path)?);
    // GzEncoder's default header carries no file name and a zero mtime
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for member in members {
        let mut header = header_for(member);
        match member.kind {
            EntryKind::Dir => {
                builder.append_data(&mut header, &member.archive_path, io::empty())?;
            }
            EntryKind::File { .. } => {
                let file = File::open(&member.source)?;
                builder.append_data(&mut header, &member.archive_path, file)?;
            }
        }
    }

    let encoder = builder.into_inner()?;
    let mut file = encoder.finish()?;
    io::Write::flush(&mut file)?;
    file.into_inner()
        .map_err(|e| e.into_error())?
        .sync_all()
}

/// Write the canonical package listing and the content manifest next to
/// the archive.
pub fn write_metadata(bundle: &RequestBundleDir, packages: &PackagesData) -> Result<()> {
    let canonical = canonical_packages(packages.packages().to_vec());

    let document = serde_json::json!({ "packages": canonical });
    write_json(&bundle.packages_metadata_path(), &deep_sort(document))?;

    let manifest = build_content_manifest(&canonical);
    write_json(&bundle.content_manifest_path(), &manifest)?;
    Ok(())
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let mut content = serde_json::to_string_pretty(value)
        .map_err(|e| Error::store(format!("Failed to serialize {}: {e}", path.display())))?;
    content.push('\n');
    atomic_write(path, content.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{Dependency, PackageInfo, PackageType};
    use flate2::read::GzDecoder;
    use tempfile::tempdir;

    fn populate(bundle: &RequestBundleDir) {
        let src = bundle.source_dir();
        fs::create_dir_all(src.join("cmd")).unwrap();
        fs::write(src.join("go.mod"), "module example.com/app\n").unwrap();
        fs::write(src.join("cmd/main.go"), "package main\n").unwrap();
        fs::write(src.join("cmd-tool"), "#!/bin/sh\n").unwrap();

        let cache = bundle
            .deps_dir(PackageManagerKind::Gomod)
            .join("pkg/mod/cache/download/golang.org/x/text/@v");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("v0.3.0.zip"), b"zipbytes").unwrap();
    }

    fn entries(path: &Path) -> Vec<(String, u32, u64)> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let header = e.header();
                (
                    e.path().unwrap().to_string_lossy().to_string(),
                    header.mode().unwrap(),
                    header.mtime().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_layout_and_order() {
        let dir = tempdir().unwrap();
        let bundle = RequestBundleDir::new(dir.path(), 1);
        populate(&bundle);

        let info = assemble_archive(
            &bundle,
            &[PackageManagerKind::Gomod],
            &bundle.archive_path(),
        )
        .unwrap();
        assert_eq!(info.path, bundle.archive_path());
        assert_eq!(info.digest.len(), 64);

        let listed = entries(&info.path);
        let paths: Vec<&str> = listed.iter().map(|(p, _, _)| p.as_str()).collect();
        assert_eq!(paths[0], "app/");
        // full-path order puts "cmd-tool" before "cmd/"
        assert_eq!(&paths[1..5], &["app/cmd-tool", "app/cmd/", "app/cmd/main.go", "app/go.mod"]);
        assert!(paths.contains(&"gomod/pkg/mod/cache/download/golang.org/x/text/@v/v0.3.0.zip"));

        let mut sorted = paths.clone();
        sorted.sort_unstable();
        assert_eq!(paths, sorted);
        assert!(listed.iter().all(|(_, _, mtime)| *mtime == 0));
    }

    #[test]
    fn test_byte_identical_across_runs() {
        let dir = tempdir().unwrap();
        let bundle = RequestBundleDir::new(dir.path(), 1);
        populate(&bundle);

        let first = assemble_archive(&bundle, &[PackageManagerKind::Gomod], &dir.path().join("a.tar.gz")).unwrap();
        // Touch a file so its on-disk mtime changes; the archive must not
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(bundle.source_dir().join("go.mod"), "module example.com/app\n").unwrap();
        let second = assemble_archive(&bundle, &[PackageManagerKind::Gomod], &dir.path().join("b.tar.gz")).unwrap();

        assert_eq!(first.digest, second.digest);
        assert_eq!(fs::read(&first.path).unwrap(), fs::read(&second.path).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_modes_normalized_and_symlinks_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let bundle = RequestBundleDir::new(dir.path(), 1);
        populate(&bundle);
        let src = bundle.source_dir();
        fs::set_permissions(src.join("cmd-tool"), fs::Permissions::from_mode(0o700)).unwrap();
        fs::set_permissions(src.join("go.mod"), fs::Permissions::from_mode(0o600)).unwrap();
        std::os::unix::fs::symlink("/etc/passwd", src.join("passwd")).unwrap();

        let info = assemble_archive(&bundle, &[], &bundle.archive_path()).unwrap();
        let listed = entries(&info.path);

        let mode = |name: &str| listed.iter().find(|(p, _, _)| p == name).unwrap().1;
        assert_eq!(mode("app/cmd-tool"), 0o755);
        assert_eq!(mode("app/go.mod"), 0o644);
        assert_eq!(mode("app/cmd/"), 0o755);
        assert!(!listed.iter().any(|(p, _, _)| p == "app/passwd"));
        assert!(!listed.iter().any(|(p, _, _)| p.starts_with("gomod/")));
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir = tempdir().unwrap();
        let bundle = RequestBundleDir::new(dir.path(), 5);
        let err = assemble_archive(&bundle, &[], &bundle.archive_path()).unwrap_err();
        assert!(matches!(err, Error::ContentFetch(_)));
        assert!(!bundle.archive_path().exists());
    }

    #[test]
    fn test_write_metadata_is_canonical() {
        let dir = tempdir().unwrap();
        let bundle = RequestBundleDir::new(dir.path(), 2);

        let mut data = PackagesData::new();
        data.add_package(
            PackageInfo {
                name: "web".to_string(),
                kind: PackageType::Npm,
                version: "1.0.0".to_string(),
                dev: None,
            },
            ".",
            vec![
                Dependency::new("zod", PackageType::Npm, "3.0.0"),
                Dependency::new("async", PackageType::Npm, "3.2.0"),
                Dependency::new("async", PackageType::Npm, "3.2.0"),
            ],
        )
        .unwrap();
        data.add_package(
            PackageInfo {
                name: "example.com/api".to_string(),
                kind: PackageType::Gomod,
                version: "v1.0.0".to_string(),
                dev: None,
            },
            ".",
            vec![],
        )
        .unwrap();

        write_metadata(&bundle, &data).unwrap();

        let document: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(bundle.packages_metadata_path()).unwrap())
                .unwrap();
        let packages = document["packages"].as_array().unwrap();
        assert_eq!(packages[0]["type"], "gomod");
        let deps: Vec<&str> = packages[1]["dependencies"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(deps, vec!["async", "zod"]);

        let first = fs::read(bundle.content_manifest_path()).unwrap();
        write_metadata(&bundle, &data).unwrap();
        assert_eq!(first, fs::read(bundle.content_manifest_path()).unwrap());
    }
}
