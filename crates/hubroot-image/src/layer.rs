//! Filesystem layer extraction.
//!
//! Layers are unpacked one after another into the same directory. A file
//! written by a later layer replaces the one at the same path from an
//! earlier layer; there is no content merge and whiteout entries
//! (`.wh.*`) are extracted as ordinary files.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use hubroot_common::error::{HubrootError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Summary of one unpacked archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLayer {
    /// Size of the archive on disk, in bytes.
    pub size_bytes: u64,
    /// Whether the archive was gzip-compressed.
    pub compressed: bool,
}

/// Unpacks a tar archive into `target`, overwriting existing files.
///
/// Registry blobs are gzip-compressed tars; uncompressed tars are also
/// accepted and told apart by their leading bytes. Permissions and
/// modification times are preserved. Entries that would land outside
/// `target` are skipped by the tar reader.
///
/// # Errors
///
/// Returns `HubrootError::Extraction` if the archive cannot be opened, is
/// corrupt, or contains an entry that cannot be written.
pub fn extract_archive(archive_path: &Path, target: &Path) -> Result<ExtractedLayer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );

    let extraction_error = |source| HubrootError::Extraction {
        archive: archive_path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(target).map_err(|e| HubrootError::Filesystem {
        path: target.to_path_buf(),
        source: e,
    })?;

    let mut file = File::open(archive_path).map_err(extraction_error)?;
    let size_bytes = file.metadata().map_err(extraction_error)?.len();
    let compressed = is_gzip(&mut file).map_err(extraction_error)?;

    let reader = BufReader::new(file);
    let unpacked = if compressed {
        unpack(tar::Archive::new(flate2::read::GzDecoder::new(reader)), target)
    } else {
        unpack(tar::Archive::new(reader), target)
    };
    unpacked.map_err(extraction_error)?;

    tracing::debug!(size = size_bytes, compressed, "layer extracted");
    Ok(ExtractedLayer {
        size_bytes,
        compressed,
    })
}

fn unpack<R: Read>(mut archive: tar::Archive<R>, target: &Path) -> std::io::Result<()> {
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(false);
    archive.unpack(target)
}

/// Sniffs the gzip magic and rewinds the file.
fn is_gzip(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0_u8; 2];
    let read = file.read(&mut magic)?;
    let _ = file.seek(SeekFrom::Start(0))?;
    Ok(read == magic.len() && magic == GZIP_MAGIC)
}
