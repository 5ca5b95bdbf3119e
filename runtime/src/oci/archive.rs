//! Layer archive codec.
//!
//! Converts between gzip-compressed tar streams and in-memory file maps.
//! Deletions travel through the archive as whiteout entries: an empty file whose
//! base name carries the `.wh.` prefix.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Component, Path};

use fhir_templates_core::error::{ArtifactError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header};

use crate::overlay::FileSet;

/// Base-name prefix marking a deleted path.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Opaque-directory marker; not produced by this engine and ignored on read.
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Decompress a tar+gzip layer into a file set.
///
/// Whiteout entries become tombstones for the de-prefixed path. Directory,
/// symlink and hard-link entries are skipped.
pub fn extract(data: &[u8], layer: &str) -> Result<FileSet> {
    let archive_error = |message: String| ArtifactError::Archive {
        layer: layer.to_string(),
        message,
    };

    let mut archive = Archive::new(GzDecoder::new(data));
    let mut files = FileSet::new();

    let entries = archive
        .entries()
        .map_err(|e| archive_error(format!("Failed to read archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| archive_error(format!("Failed to read archive entry: {}", e)))?;

        let entry_type = entry.header().entry_type();
        if !matches!(entry_type, EntryType::Regular | EntryType::Continuous) {
            if entry_type.is_symlink() || entry_type.is_hard_link() {
                tracing::debug!(layer, "Skipping link entry");
            }
            continue;
        }

        let raw_path = entry
            .path()
            .map_err(|e| archive_error(format!("Invalid entry path: {}", e)))?
            .into_owned();
        let path = normalize_path(&raw_path)
            .ok_or_else(|| archive_error(format!("Unsafe entry path: {}", raw_path.display())))?;

        if let Some(target) = whiteout_target(&path) {
            files.insert_tombstone(target);
            continue;
        }
        if base_name(&path) == OPAQUE_WHITEOUT {
            continue;
        }

        // The header size is untrusted: grow the buffer with the data actually read.
        let declared = entry.size();
        let mut content = Vec::new();
        (&mut entry)
            .take(declared)
            .read_to_end(&mut content)
            .map_err(|e| archive_error(format!("Failed to read {}: {}", path, e)))?;
        if content.len() as u64 != declared {
            return Err(archive_error(format!(
                "Entry {} declares {} bytes but the layer holds {}",
                path,
                declared,
                content.len()
            )));
        }
        files.insert_file(path, content);
    }

    tracing::debug!(layer, entries = files.len(), "Extracted layer archive");
    Ok(files)
}

/// Compress a path → bytes map into a tar+gzip layer.
///
/// Entries are written in path order with fixed mode and mtime, so identical
/// input always yields identical bytes (and digest). Paths whose base name
/// carries the whiteout prefix are rejected, since they would read back as
/// deletions.
pub fn archive(files: &BTreeMap<String, Vec<u8>>, layer: &str) -> Result<Vec<u8>> {
    archive_with_deletions(files, &BTreeSet::new(), layer)
}

/// Like [`archive`], additionally writing a whiteout entry for each path in
/// `deleted`.
pub fn archive_with_deletions(
    files: &BTreeMap<String, Vec<u8>>,
    deleted: &BTreeSet<String>,
    layer: &str,
) -> Result<Vec<u8>> {
    let archive_error = |message: String| ArtifactError::Archive {
        layer: layer.to_string(),
        message,
    };

    let mut entries: BTreeMap<String, &[u8]> = BTreeMap::new();
    for (path, content) in files {
        if base_name(path).starts_with(WHITEOUT_PREFIX) {
            return Err(archive_error(format!(
                "{} uses the reserved whiteout prefix {}",
                path, WHITEOUT_PREFIX
            )));
        }
        entries.insert(path.clone(), content.as_slice());
    }
    for path in deleted {
        entries.insert(whiteout_path(path), &[]);
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for (path, content) in entries {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();

        builder
            .append_data(&mut header, &path, content)
            .map_err(|e| archive_error(format!("Failed to add {} to archive: {}", path, e)))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| archive_error(format!("Failed to finalize archive: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| archive_error(format!("Failed to finalize compression: {}", e)))
}

/// Archive-level marker for a deletion of `path`.
pub fn whiteout_path(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, name)) => format!("{}/{}{}", dir, WHITEOUT_PREFIX, name),
        None => format!("{}{}", WHITEOUT_PREFIX, path),
    }
}

/// Path a whiteout entry deletes, or `None` if `path` is not a whiteout.
pub fn whiteout_target(path: &str) -> Option<String> {
    let name = base_name(path);
    if name == OPAQUE_WHITEOUT {
        return None;
    }
    let target = name.strip_prefix(WHITEOUT_PREFIX)?;
    if target.is_empty() {
        return None;
    }
    Some(match path.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, target),
        None => target.to_string(),
    })
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Relative, `/`-separated form of an entry path; `None` for paths escaping the root.
fn normalize_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_vec()))
            .collect()
    }

    #[test]
    fn test_archive_extract_roundtrip() {
        let input = files(&[
            ("ADT_A01.liquid", b"{{ msh }}"),
            ("Resource/_Patient.liquid", b"patient"),
            ("empty.liquid", b""),
        ]);
        let data = archive(&input, "test").unwrap();
        let extracted = extract(&data, "test").unwrap();

        assert_eq!(extracted.len(), 3);
        for (path, content) in &input {
            assert_eq!(extracted.get(path), Some(content.as_slice()));
        }
        assert!(!extracted.has_tombstones());
    }

    #[test]
    fn test_archive_is_deterministic() {
        let input = files(&[("a", b"1"), ("b/c", b"2")]);
        assert_eq!(archive(&input, "x").unwrap(), archive(&input, "x").unwrap());
    }

    #[test]
    fn test_extract_whiteout_becomes_tombstone() {
        let input = files(&[("keep.liquid", b"k")]);
        let deleted = BTreeSet::from([
            "gone.liquid".to_string(),
            "Resource/_Old.liquid".to_string(),
        ]);
        let data = archive_with_deletions(&input, &deleted, "test").unwrap();
        let extracted = extract(&data, "test").unwrap();

        assert!(extracted.is_tombstone("gone.liquid"));
        assert!(extracted.is_tombstone("Resource/_Old.liquid"));
        assert!(!extracted.contains(".wh.gone.liquid"));
        assert_eq!(extracted.get("keep.liquid"), Some(&b"k"[..]));
    }

    #[test]
    fn test_extract_skips_directories_and_links() {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);

        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_cksum();
        builder.append_data(&mut dir, "Resource/", std::io::empty()).unwrap();

        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        builder.append_link(&mut link, "link.liquid", "target.liquid").unwrap();

        let mut hard = Header::new_gnu();
        hard.set_entry_type(EntryType::Link);
        hard.set_size(0);
        hard.set_mode(0o644);
        builder.append_link(&mut hard, "hard.liquid", "target.liquid").unwrap();

        let mut file = Header::new_gnu();
        file.set_size(1);
        file.set_mode(0o644);
        file.set_cksum();
        builder
            .append_data(&mut file, "Resource/target.liquid", &b"t"[..])
            .unwrap();

        let data = builder.into_inner().unwrap().finish().unwrap();
        let extracted = extract(&data, "test").unwrap();

        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted.get("Resource/target.liquid"), Some(&b"t"[..]));
    }

    #[test]
    fn test_extract_garbage_is_archive_error() {
        let err = extract(b"definitely not gzip", "bad-layer").unwrap_err();
        match err {
            ArtifactError::Archive { layer, .. } => assert_eq!(layer, "bad-layer"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_extract_truncated_is_archive_error() {
        let noise: Vec<u8> = (0..8192u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        let input = files(&[("a.liquid", &noise)]);
        let data = archive(&input, "test").unwrap();
        let truncated = &data[..data.len() / 2];
        assert!(matches!(
            extract(truncated, "test"),
            Err(ArtifactError::Archive { .. })
        ));
    }

    #[test]
    fn test_archive_rejects_whiteout_named_files() {
        for path in [".wh.a.liquid", "Resource/.wh._Old.liquid", ".wh..wh..opq"] {
            let input = files(&[("ok.liquid", b"ok"), (path, b"content")]);
            match archive(&input, "named").unwrap_err() {
                ArtifactError::Archive { layer, message } => {
                    assert_eq!(layer, "named");
                    assert!(message.contains(path), "{message}");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
        // Prefix only matters on the base name.
        let input = files(&[(".wh.dir/a.liquid", b"a")]);
        let extracted = extract(&archive(&input, "test").unwrap(), "test").unwrap();
        assert_eq!(extracted.get(".wh.dir/a.liquid"), Some(&b"a"[..]));
    }

    #[test]
    fn test_extract_rejects_forged_entry_size() {
        let mut header = Header::new_gnu();
        header.set_path("huge.liquid").unwrap();
        header.set_entry_type(EntryType::Regular);
        header.set_size(1 << 46);
        header.set_mode(0o644);
        header.set_cksum();

        let mut raw = header.as_bytes().to_vec();
        raw.extend_from_slice(&[b'x'; 512]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut encoder, &raw).unwrap();
        let data = encoder.finish().unwrap();

        match extract(&data, "evil").unwrap_err() {
            ArtifactError::Archive { layer, .. } => assert_eq!(layer, "evil"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_whiteout_path() {
        assert_eq!(whiteout_path("a.liquid"), ".wh.a.liquid");
        assert_eq!(whiteout_path("dir/sub/a.liquid"), "dir/sub/.wh.a.liquid");
    }

    #[test]
    fn test_whiteout_target() {
        assert_eq!(whiteout_target(".wh.a.liquid"), Some("a.liquid".to_string()));
        assert_eq!(
            whiteout_target("dir/.wh.a.liquid"),
            Some("dir/a.liquid".to_string())
        );
        assert_eq!(whiteout_target("dir/a.liquid"), None);
        assert_eq!(whiteout_target(".wh..wh..opq"), None);
        assert_eq!(whiteout_target(".wh."), None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("./dir/a.liquid")),
            Some("dir/a.liquid".to_string())
        );
        assert_eq!(normalize_path(Path::new("../escape")), None);
        assert_eq!(normalize_path(Path::new("/abs")), None);
    }
}
