//! Quill: the link and front-matter core of a browser blog-post editor,
//! plus the HTTP backend the editor talks to.
//!
//! The editor shell calls three pure-ish entry points:
//! [`links::LinkResolver::rewrite_urls_in_text`],
//! [`frontmatter::serialize_front_matter`] and
//! [`images::final_image_path`]. Everything else supports them.

pub mod config;
pub mod export;
pub mod frontmatter;
pub mod images;
pub mod links;
pub mod logging;
pub mod server;
pub mod session;
pub mod title;
