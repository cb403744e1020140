use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::images::final_image_path;

/// Post metadata edited in the sidebar form and written as front matter on export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostMetadata {
    pub title: String,
    pub published: String,
    pub description: String,
    /// Upload URL of the cover image, shown in the form.
    pub image_original_path: String,
    /// Exported cover path. Derived by [`PostMetadata::refresh_image_path`], never read from input.
    #[serde(skip_deserializing)]
    pub image_final_path: String,
    pub tags: Vec<String>,
    pub category: String,
    pub draft: bool,
    pub lang: String,
}

impl Default for PostMetadata {
    fn default() -> Self {
        Self {
            title: String::new(),
            published: String::new(),
            description: String::new(),
            image_original_path: String::new(),
            image_final_path: String::new(),
            tags: Vec::new(),
            category: "astro".to_string(),
            draft: false,
            lang: "zh-CN".to_string(),
        }
    }
}

/// Front matter as found in an existing post. `image` holds the exported path.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFrontMatter {
    title: Option<String>,
    published: Option<serde_yaml::Value>,
    description: Option<String>,
    image: Option<String>,
    tags: Vec<String>,
    category: Option<String>,
    draft: Option<bool>,
    lang: Option<String>,
}

impl PostMetadata {
    /// Re-derive the exported cover path from the upload URL and path setting.
    pub fn refresh_image_path(&mut self, path_setting: &str) {
        self.image_final_path = if self.image_original_path.is_empty() {
            String::new()
        } else {
            final_image_path(&self.image_original_path, path_setting)
        };
    }

    /// Re-derive the cover path, then render the front matter block.
    ///
    /// A blank setting means the default image directory.
    pub fn front_matter_block(&mut self, path_setting: &str) -> String {
        self.refresh_image_path(path_setting);
        serialize_front_matter(self)
    }

    /// Read metadata back from a `---` fenced block at the top of `content`.
    ///
    /// Blocks written by [`serialize_front_matter`] are read line by line so
    /// values like `[WIP] notes` or `@home` survive; anything else goes
    /// through YAML. Content without a front-matter block yields the defaults.
    pub fn from_front_matter(content: &str) -> Result<Self> {
        let mut lines = content.lines();

        match lines.next() {
            Some(first) if first.trim() == "---" => {}
            _ => return Ok(PostMetadata::default()),
        }

        let mut block = Vec::new();
        for line in lines {
            if line.trim() == "---" {
                break;
            }
            block.push(line);
        }
        if block.is_empty() {
            return Ok(PostMetadata::default());
        }

        match read_flat_block(&block) {
            Some(meta) => Ok(meta),
            None => read_yaml_block(&block.join("\n")),
        }
    }
}

/// Parse one `key: value` line per field, as the serializer writes them.
///
/// Returns `None` for nested or multi-line YAML.
fn read_flat_block(block: &[&str]) -> Option<PostMetadata> {
    let mut meta = PostMetadata::default();

    for line in block {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with(char::is_whitespace) || line.starts_with('-') {
            return None;
        }
        let (key, value) = line.split_once(':')?;
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return None;
        }
        let value = value.trim();

        match key {
            "title" => meta.title = unquote(value),
            "published" => meta.published = unquote(value),
            "description" => meta.description = unquote(value),
            "image" => {
                meta.image_original_path = unquote(value);
                meta.image_final_path = meta.image_original_path.clone();
            }
            "tags" => {
                let inner = value.strip_prefix('[')?.strip_suffix(']')?;
                meta.tags = inner
                    .split(',')
                    .map(|t| unescape_value(unquote_raw(t.trim())))
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            "category" => meta.category = unquote(value),
            "draft" => meta.draft = value.eq_ignore_ascii_case("true"),
            "lang" => meta.lang = unquote(value),
            _ => {}
        }
    }
    Some(meta)
}

fn read_yaml_block(yaml: &str) -> Result<PostMetadata> {
    let raw: RawFrontMatter = serde_yaml::from_str(yaml)
        .context("Failed to parse front matter")?;

    let mut meta = PostMetadata::default();
    meta.title = raw.title.unwrap_or_default();
    meta.published = match raw.published {
        Some(serde_yaml::Value::String(s)) => s,
        Some(serde_yaml::Value::Null) | None => String::new(),
        Some(other) => serde_yaml::to_string(&other)
            .context("Failed to read published date")?
            .trim()
            .to_string(),
    };
    meta.description = raw.description.unwrap_or_default();
    if let Some(image) = raw.image {
        meta.image_original_path = image.clone();
        meta.image_final_path = image;
    }
    meta.tags = raw.tags;
    if let Some(category) = raw.category {
        meta.category = category;
    }
    meta.draft = raw.draft.unwrap_or(false);
    if let Some(lang) = raw.lang {
        meta.lang = lang;
    }
    Ok(meta)
}

/// Strip one pair of matching outer quotes.
fn unquote_raw(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn unquote(value: &str) -> String {
    unescape_value(unquote_raw(value))
}

/// Undo [`escape_value`].
fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '"' | '{' | '}') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}

/// Backslash-escape `"`, `{` and `}`.
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '"' | '{' | '}') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Escape, and single-quote when the raw value carries `"`, `:` or `#`.
fn scalar(value: &str) -> String {
    if value.contains(['"', ':', '#']) {
        format!("'{}'", escape_value(value))
    } else {
        escape_value(value)
    }
}

fn quoted(value: &str) -> String {
    format!("'{}'", escape_value(value))
}

/// Render the metadata as a `---` fenced block.
///
/// Fields are emitted in a fixed order and empty ones are skipped, except
/// `draft` and `lang` which are always present. The closing marker has no
/// trailing newline; callers join it to the body with `\n`.
pub fn serialize_front_matter(meta: &PostMetadata) -> String {
    let mut out = String::from("---\n");

    if !meta.title.is_empty() {
        out.push_str(&format!("title: {}\n", scalar(&meta.title)));
    }
    if !meta.published.is_empty() {
        out.push_str(&format!("published: {}\n", scalar(&meta.published)));
    }
    if !meta.description.is_empty() {
        out.push_str(&format!("description: {}\n", scalar(&meta.description)));
    }
    if !meta.image_final_path.is_empty() {
        out.push_str(&format!("image: {}\n", quoted(&meta.image_final_path)));
    }
    if !meta.tags.is_empty() {
        let tags: Vec<String> = meta.tags.iter().map(|t| escape_value(t)).collect();
        out.push_str(&format!("tags: [{}]\n", tags.join(",")));
    }
    if !meta.category.is_empty() {
        out.push_str(&format!("category: {}\n", quoted(&meta.category)));
    }
    out.push_str(&format!("draft: {}\n", meta.draft));
    out.push_str(&format!("lang: {}\n", quoted(&meta.lang)));

    out.push_str("---");
    out
}
