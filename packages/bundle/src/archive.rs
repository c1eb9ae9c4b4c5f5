//! Packing and unpacking of bundle archives (gzip-compressed tar).

use std::io::Read;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use blockframe_protocol::BundleFile;

use crate::error::{Error, Result};

/// Unpack a bundle archive into an ordered list of files.
///
/// Every entry must be a regular UTF-8 file with a relative path free of
/// `.`/`..` components. Directory entries are skipped. Files are returned
/// sorted by name so the same archive always yields the same bundle.
pub fn unpack(block_id: &str, archive: &[u8]) -> Result<Vec<BundleFile>> {
    let fail = |message: String| Error::fetch_failed(block_id, message);

    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let entries = tar
        .entries()
        .map_err(|e| fail(format!("read archive entries: {}", e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| fail(format!("read archive entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| fail(format!("read entry path: {}", e)))?
            .into_owned();

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            continue;
        }
        if !entry_type.is_file() {
            return Err(fail(format!("unsupported entry type for {:?}", path)));
        }

        let name = archive_name(&path).map_err(fail)?;
        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| fail(format!("read {}: {}", name, e)))?;
        files.push(BundleFile { name, content });
    }

    if files.is_empty() {
        return Err(Error::not_found(block_id, "archive contains no files"));
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Build a bundle archive from files. Entries are written in name order with
/// zeroed timestamps and ownership.
pub fn pack(files: &[BundleFile]) -> Result<Vec<u8>> {
    let fail = |message: String| Error::fetch_failed("<pack>", message);

    let mut sorted: Vec<&BundleFile> = files.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);
    for file in sorted {
        archive_name(Path::new(&file.name)).map_err(fail)?;
        let bytes = file.content.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder
            .append_data(&mut header, &file.name, bytes)
            .map_err(|e| fail(format!("append {}: {}", file.name, e)))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| fail(format!("finish tar: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| fail(format!("finish gzip: {}", e)))
}

fn archive_name(path: &Path) -> std::result::Result<String, String> {
    if path.as_os_str().is_empty() {
        return Err("empty archive path".to_string());
    }
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| format!("non UTF-8 archive path: {:?}", path))?
                    .to_string(),
            ),
            Component::CurDir if parts.is_empty() => {}
            _ => return Err(format!("archive path not allowed: {:?}", path)),
        }
    }
    if parts.is_empty() {
        return Err(format!("archive path not allowed: {:?}", path));
    }
    Ok(parts.join("/"))
}
