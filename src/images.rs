use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Path setting used when the user leaves the image path field blank.
pub const DEFAULT_IMAGE_PATH: &str = "/image";

/// An image the upload endpoint accepted, as the editor tracks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub url: String,
    pub filename: String,
}

/// Derive the exported location of an uploaded image.
///
/// The filename is the last `/` segment of `original_url`. The setting is
/// normalized to a single leading `/` without a trailing one, so `"image"`,
/// `"/image"` and `"/image/"` all give `/image/<filename>`.
pub fn final_image_path(original_url: &str, path_setting: &str) -> String {
    let filename = original_url.rsplit('/').next().unwrap_or_default();

    let setting = if path_setting.is_empty() {
        DEFAULT_IMAGE_PATH
    } else {
        path_setting
    };

    let dir = setting.trim_matches('/');
    if dir.is_empty() {
        format!("/{}", filename)
    } else {
        format!("/{}/{}", dir, filename)
    }
}

/// Lowercased extension of an upload, if it is one we accept.
pub fn allowed_extension(filename: &str, allowed: &[String]) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)).then_some(ext)
}

const NAME_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Twelve random alphanumeric characters plus the extension.
pub fn generate_filename(extension: &str) -> String {
    let id = Uuid::new_v4();
    let bytes = id.as_bytes();
    // bytes 6 and 8 carry the v4 version and variant bits
    let random = bytes[..6].iter().chain(&bytes[10..]);

    let mut name: String = random
        .map(|b| NAME_ALPHABET[*b as usize % NAME_ALPHABET.len()] as char)
        .collect();
    name.push('.');
    name.push_str(extension);
    name
}
