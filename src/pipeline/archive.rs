//! Zip archiving of the finished output tree.
//!
//! Runs after the batch is finalized, never concurrently with conversion.
//! Archive failure is reported but does not invalidate the output tree,
//! which is already complete on disk by the time this runs.

use crate::error::PdfmillError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Create `zip_path` containing every file under `root`, with paths stored
/// relative to `root`.
///
/// # Errors
/// [`PdfmillError::ArchiveFailed`] for any I/O or zip-format error.
pub async fn archive_tree(root: &Path, zip_path: &Path) -> Result<(), PdfmillError> {
    let root = root.to_path_buf();
    let zip_path = zip_path.to_path_buf();
    tokio::task::spawn_blocking(move || archive_blocking(&root, &zip_path))
        .await
        .map_err(|e| PdfmillError::Internal(format!("archive task panicked: {e}")))?
}

fn archive_blocking(root: &Path, zip_path: &Path) -> Result<(), PdfmillError> {
    let fail = |detail: String| PdfmillError::ArchiveFailed {
        path: zip_path.to_path_buf(),
        detail,
    };

    let files = collect_files(root).map_err(|e| fail(e.to_string()))?;
    debug!("archiving {} files from {}", files.len(), root.display());

    let file = std::fs::File::create(zip_path).map_err(|e| fail(format!("create: {e}")))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut buf = Vec::new();
    for path in &files {
        let rel = path
            .strip_prefix(root)
            .map_err(|e| fail(e.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        writer
            .start_file(rel.as_str(), options)
            .map_err(|e| fail(format!("{rel}: {e}")))?;

        buf.clear();
        std::fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut buf))
            .map_err(|e| fail(format!("read {}: {e}", path.display())))?;
        writer
            .write_all(&buf)
            .map_err(|e| fail(format!("write {rel}: {e}")))?;
    }

    writer.finish().map_err(|e| fail(format!("finish: {e}")))?;
    info!("archive written: {}", zip_path.display());
    Ok(())
}

/// Every regular file under `root`, sorted for a reproducible entry order.
fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn archive_round_trips_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        std::fs::create_dir_all(root.join("doc/assets")).unwrap();
        std::fs::write(root.join("doc/doc.md"), "# hi\n").unwrap();
        std::fs::write(root.join("doc/assets/image_000.png"), b"png").unwrap();

        let zip_path = dir.path().join("out.zip");
        archive_tree(&root, &zip_path).await.unwrap();

        let file = std::fs::File::open(&zip_path).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["doc/assets/image_000.png", "doc/doc.md"]);

        let mut md = String::new();
        zip.by_name("doc/doc.md")
            .unwrap()
            .read_to_string(&mut md)
            .unwrap();
        assert_eq!(md, "# hi\n");
    }

    #[tokio::test]
    async fn missing_root_is_archive_failed() {
        let dir = tempfile::tempdir().unwrap();
        let err = archive_tree(&dir.path().join("nope"), &dir.path().join("o.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, PdfmillError::ArchiveFailed { .. }));
    }
}
