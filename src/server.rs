//! HTTP endpoints the browser editor talks to.

use anyhow::{Context, Result};
use chrono::Local;
use futures_util::{TryFutureExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use warp::http::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use warp::http::StatusCode;
use warp::hyper::body::Buf;
use warp::multipart::{FormData, Part};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::config::Config;
use crate::export::{build_archive, ExportError};
use crate::frontmatter::PostMetadata;
use crate::images::{allowed_extension, generate_filename};
use crate::links::LinkResolver;
use crate::session::ExportRequest;
use crate::title::{is_http_url, HttpTitleLookup, TitleLookup};

const JSON_BODY_LIMIT: u64 = 16 * 1024 * 1024;
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    lookup: Arc<dyn TitleLookup>,
    resolver: LinkResolver,
}

impl AppState {
    pub fn new(config: Config, lookup: Arc<dyn TitleLookup>) -> Self {
        Self {
            config: Arc::new(config),
            resolver: LinkResolver::new(Arc::clone(&lookup)),
            lookup,
        }
    }

    fn upload_root(&self) -> PathBuf {
        self.config.upload_root()
    }
}

#[derive(Debug, Deserialize)]
struct TitleBody {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RewriteBody {
    #[serde(default)]
    text: String,
    #[serde(default)]
    selection: Option<String>,
}

#[derive(Debug, Serialize)]
struct RewriteReply {
    html: String,
    intercepted: bool,
}

#[derive(Debug, Deserialize)]
struct FrontMatterBody {
    #[serde(default)]
    metadata: PostMetadata,
    #[serde(default)]
    image_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadReply {
    success: bool,
    url: String,
    filename: String,
}

#[derive(Debug, Serialize)]
struct ErrorReply {
    error: String,
}

fn error_reply(status: StatusCode, message: impl Into<String>) -> Response {
    warp::reply::with_status(
        warp::reply::json(&ErrorReply {
            error: message.into(),
        }),
        status,
    )
    .into_response()
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// All routes, with CORS, request tracing and JSON error replies.
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let get_title_route = warp::path("get_title")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(JSON_BODY_LIMIT))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(get_title);

    let rewrite_route = warp::path("rewrite_links")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(JSON_BODY_LIMIT))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(rewrite_links);

    let front_matter_route = warp::path("front_matter")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(JSON_BODY_LIMIT))
        .and(warp::body::json())
        .and_then(front_matter);

    let upload_route = warp::path("upload_image")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::multipart::form().max_length(state.config.max_upload_bytes + MULTIPART_OVERHEAD))
        .and(with_state(state.clone()))
        .and_then(upload_image);

    let export_route = warp::path("export")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(JSON_BODY_LIMIT))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(export);

    let uploads_route = warp::path("uploads")
        .and(warp::get())
        .and(warp::fs::dir(state.upload_root()));

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST"]);

    get_title_route
        .or(rewrite_route)
        .or(front_matter_route)
        .or(upload_route)
        .or(export_route)
        .or(uploads_route)
        .with(cors)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

async fn get_title(body: TitleBody, state: AppState) -> Result<Response, Rejection> {
    let url = body.url.unwrap_or_default();
    let url = url.trim();
    if url.is_empty() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "URL must not be empty"));
    }
    if !is_http_url(url) {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "URL must start with http:// or https://",
        ));
    }

    match state.lookup.fetch_title(url).await {
        Ok(title) => Ok(warp::reply::json(&serde_json::json!({ "title": title })).into_response()),
        Err(e) => {
            warn!(%url, error = %e, "title lookup failed");
            Ok(error_reply(StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}

async fn rewrite_links(body: RewriteBody, state: AppState) -> Result<Response, Rejection> {
    let selection = body.selection.unwrap_or_default();
    let reply = match state.resolver.rewrite_paste(&body.text, &selection).await {
        Some(html) => RewriteReply {
            html,
            intercepted: true,
        },
        None => RewriteReply {
            html: body.text,
            intercepted: false,
        },
    };
    Ok(warp::reply::json(&reply).into_response())
}

async fn front_matter(body: FrontMatterBody) -> Result<Response, Rejection> {
    let mut metadata = body.metadata;
    let block = metadata.front_matter_block(body.image_path.as_deref().unwrap_or(""));
    Ok(warp::reply::json(&serde_json::json!({ "front_matter": block })).into_response())
}

async fn read_part(part: Part) -> Result<Vec<u8>, warp::Error> {
    part.stream()
        .try_fold(Vec::new(), |mut data, chunk| async move {
            data.extend_from_slice(chunk.chunk());
            Ok(data)
        })
        .await
}

async fn upload_image(form: FormData, state: AppState) -> Result<Response, Rejection> {
    let mut form = form;
    let mut upload: Option<(String, Vec<u8>)> = None;

    loop {
        let part = match form.try_next().await {
            Ok(Some(part)) => part,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "malformed upload");
                return Ok(error_reply(StatusCode::BAD_REQUEST, "Malformed upload"));
            }
        };
        if part.name() != "image" {
            continue;
        }
        let filename = part.filename().unwrap_or_default().to_string();
        match read_part(part).await {
            Ok(data) => upload = Some((filename, data)),
            Err(e) => {
                warn!(error = %e, "failed to read upload");
                return Ok(error_reply(StatusCode::BAD_REQUEST, "Malformed upload"));
            }
        }
        break;
    }

    let Some((original_name, data)) = upload else {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "No file uploaded"));
    };
    if original_name.is_empty() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "No file selected"));
    }

    let max = state.config.max_upload_bytes;
    if data.len() as u64 > max {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            format!("File exceeds the {}MB limit", max / (1024 * 1024)),
        ));
    }

    let Some(ext) = allowed_extension(&original_name, &state.config.allowed_extensions) else {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "Unsupported file type"));
    };

    let today = Local::now().format("%Y-%m-%d").to_string();
    let filename = generate_filename(&ext);
    let dir = state.upload_root().join(&today);
    let path = dir.join(&filename);

    let saved = tokio::fs::create_dir_all(&dir)
        .and_then(|_| tokio::fs::write(&path, &data))
        .await;
    if let Err(e) = saved {
        error!(path = %path.display(), error = %e, "failed to store upload");
        return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Upload failed"));
    }

    info!(path = %path.display(), bytes = data.len(), "stored upload");
    Ok(warp::reply::json(&UploadReply {
        success: true,
        url: format!("/uploads/{}/{}", today, filename),
        filename,
    })
    .into_response())
}

async fn export(request: ExportRequest, state: AppState) -> Result<Response, Rejection> {
    let upload_root = state.upload_root();
    let built = tokio::task::spawn_blocking(move || build_archive(&request, &upload_root)).await;

    let archive = match built {
        Ok(Ok(archive)) => archive,
        Ok(Err(ExportError::InvalidImagePath)) => {
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                ExportError::InvalidImagePath.to_string(),
            ));
        }
        Ok(Err(e)) => {
            error!(error = %e, "export failed");
            return Ok(error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Export failed: {}", e),
            ));
        }
        Err(e) => {
            error!(error = %e, "export task failed");
            return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Export failed"));
        }
    };

    info!(file = %archive.filename, bytes = archive.bytes.len(), "export ready");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", archive.filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let mut res = Response::new(archive.bytes.into());
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    res.headers_mut().insert(CONTENT_DISPOSITION, disposition);
    Ok(res)
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid request body")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported content type")
    } else if err.find::<warp::cors::CorsForbidden>().is_some() {
        (StatusCode::FORBIDDEN, "Origin not allowed")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        error!(?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };
    Ok(error_reply(status, message))
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: Config) -> Result<()> {
    std::fs::create_dir_all(config.upload_root())
        .context("Failed to create upload directory")?;

    let addr: std::net::IpAddr = config.host.parse()
        .context("Invalid host address")?;
    let port = config.port;

    let lookup: Arc<dyn TitleLookup> = Arc::new(match &config.user_agent {
        Some(agent) => HttpTitleLookup::with_user_agent(config.title_timeout(), agent),
        None => HttpTitleLookup::new(config.title_timeout()),
    });
    let state = AppState::new(config, lookup);

    info!(%addr, port, "quill server listening");
    warp::serve(routes(state)).run((addr, port)).await;

    Ok(())
}
