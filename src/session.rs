use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::frontmatter::{serialize_front_matter, PostMetadata};
use crate::images::{UploadedImage, DEFAULT_IMAGE_PATH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlogFramework {
    /// Plain export, no front matter.
    #[default]
    None,
    Astro,
}

/// Body of `POST /export`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub images: Vec<UploadedImage>,
    #[serde(default = "default_image_path")]
    pub image_path: String,
}

fn default_image_path() -> String {
    DEFAULT_IMAGE_PATH.to_string()
}

/// Everything the editor shell tracks for one post being written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSession {
    pub metadata: PostMetadata,
    pub uploaded_images: Vec<UploadedImage>,
    /// Sidebar image path setting; drives the cover image's exported path.
    pub image_path_setting: String,
    pub framework: BlogFramework,
}

impl Default for EditorSession {
    fn default() -> Self {
        Self {
            metadata: PostMetadata::default(),
            uploaded_images: Vec::new(),
            image_path_setting: DEFAULT_IMAGE_PATH.to_string(),
            framework: BlogFramework::None,
        }
    }
}

impl EditorSession {
    /// Load a session from YAML (or JSON, which YAML accepts).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read session file {}", path.as_ref().display()))?;
        let mut session: EditorSession =
            serde_yaml::from_str(&content).context("Failed to parse session file")?;
        session.refresh_cover_path();
        Ok(session)
    }

    pub fn record_upload(&mut self, image: UploadedImage) {
        self.uploaded_images.push(image);
    }

    pub fn set_image_path_setting(&mut self, setting: &str) {
        self.image_path_setting = setting.to_string();
        self.refresh_cover_path();
    }

    pub fn select_cover_image(&mut self, url: &str) {
        self.metadata.image_original_path = url.to_string();
        self.refresh_cover_path();
    }

    /// Replace the tags with the non-empty, trimmed tag inputs.
    pub fn set_tags_from_inputs<I, S>(&mut self, inputs: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.metadata.tags = inputs
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    fn refresh_cover_path(&mut self) {
        let setting = self.image_path_setting.clone();
        self.metadata.refresh_image_path(&setting);
    }

    /// Build the export payload for `content`.
    ///
    /// `export_image_path` is where the archive puts images (blank means the
    /// default) and must start with `/`. With the Astro framework the front
    /// matter is prepended.
    pub fn export_request(&mut self, content: &str, export_image_path: &str) -> Result<ExportRequest> {
        let image_path = if export_image_path.is_empty() {
            DEFAULT_IMAGE_PATH
        } else {
            export_image_path
        };
        if !image_path.starts_with('/') {
            bail!("Image path must start with /");
        }

        self.refresh_cover_path();

        let content = match self.framework {
            BlogFramework::Astro => {
                format!("{}\n{}", serialize_front_matter(&self.metadata), content)
            }
            BlogFramework::None => content.to_string(),
        };

        Ok(ExportRequest {
            content,
            images: self.uploaded_images.clone(),
            image_path: image_path.to_string(),
        })
    }
}
