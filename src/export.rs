//! Packing an exported post and its images into a ZIP archive.

use chrono::{DateTime, Local};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::images::UploadedImage;
use crate::session::ExportRequest;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("image path must start with /")]
    InvalidImagePath,
    #[error("failed to read image {path}: {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("failed to write archive: {0}")]
    Io(#[from] std::io::Error),
}

/// A finished export, ready to hand to the client.
#[derive(Debug)]
pub struct ExportArchive {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Point every uploaded image's URL in `content` at `{image_path}/{filename}`.
pub fn rewrite_image_paths(content: &str, images: &[UploadedImage], image_path: &str) -> String {
    let dir = image_path.trim_end_matches('/');
    let mut content = content.to_string();
    for image in images.iter().filter(|i| !i.url.is_empty()) {
        content = content.replace(&image.url, &format!("{}/{}", dir, image.filename));
    }
    content
}

/// Map an upload URL such as `/uploads/2024-05-01/x.png` onto `upload_root`.
///
/// Anything that would climb out of the root gives `None`.
fn upload_source(url: &str, upload_root: &Path) -> Option<PathBuf> {
    let relative = url.trim_start_matches('/');
    let relative = relative.strip_prefix("uploads/").unwrap_or(relative);
    if relative.is_empty() || relative.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return None;
    }
    Some(upload_root.join(relative))
}

fn archive_entry_name(filename: &str) -> Option<&str> {
    let name = filename.rsplit(['/', '\\']).next()?;
    (!name.is_empty() && name != "..").then_some(name)
}

/// Build the export archive at the current local time.
pub fn build_archive(request: &ExportRequest, upload_root: &Path) -> Result<ExportArchive, ExportError> {
    build_archive_at(request, upload_root, Local::now())
}

/// Build the export archive: the rewritten Markdown plus every image that
/// still exists under `upload_root`, stored under the image path.
pub fn build_archive_at(
    request: &ExportRequest,
    upload_root: &Path,
    now: DateTime<Local>,
) -> Result<ExportArchive, ExportError> {
    if !request.image_path.starts_with('/') {
        return Err(ExportError::InvalidImagePath);
    }

    let stamp = now.format("%Y%m%d_%H%M%S");
    let content = rewrite_image_paths(&request.content, &request.images, &request.image_path);
    let image_dir = request.image_path.trim_matches('/');

    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    zip.start_file(format!("export_{}.md", stamp), options)?;
    zip.write_all(content.as_bytes())?;

    for image in &request.images {
        let Some(name) = archive_entry_name(&image.filename) else {
            warn!(filename = %image.filename, "skipping image with unusable filename");
            continue;
        };
        let Some(source) = upload_source(&image.url, upload_root) else {
            warn!(url = %image.url, "skipping image outside the upload directory");
            continue;
        };
        if !source.is_file() {
            warn!(path = %source.display(), "skipping missing image");
            continue;
        }

        let data = std::fs::read(&source).map_err(|e| ExportError::ReadImage {
            path: source.clone(),
            source: e,
        })?;
        let entry = if image_dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", image_dir, name)
        };
        debug!(%entry, bytes = data.len(), "adding image to export");
        zip.start_file(entry, options)?;
        zip.write_all(&data)?;
    }

    let bytes = zip.finish()?.into_inner();
    Ok(ExportArchive {
        filename: format!("markdown_export_{}.zip", stamp),
        bytes,
    })
}
