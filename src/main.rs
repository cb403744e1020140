use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use quill::config::Config;
use quill::frontmatter::PostMetadata;
use quill::links::LinkResolver;
use quill::session::EditorSession;
use quill::title::{HttpTitleLookup, RemoteTitleLookup, TitleLookup};
use quill::{export, images, logging, server};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Link titles, front matter and exports for a browser blog editor")]
#[command(version)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the editor backend
    Serve {
        /// Path to config file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
    },
    /// Turn URLs in pasted text into titled links
    Links {
        /// File holding the pasted text (stdin when omitted)
        input: Option<PathBuf>,

        /// Text currently selected in the editor
        #[arg(short, long, default_value = "")]
        selection: String,

        /// Resolve titles through a running quill server instead of fetching pages
        #[arg(long)]
        service: Option<String>,

        /// Path to config file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Print the front matter block for post metadata
    FrontMatter {
        /// Metadata as YAML/JSON, or a post starting with a front matter block
        metadata: PathBuf,

        /// Image path setting used to derive the cover image path
        #[arg(short, long)]
        image_path: Option<String>,
    },
    /// Print the exported path of an uploaded image
    ImagePath {
        /// Upload URL of the image
        url: String,

        /// Image path setting
        #[arg(default_value = "/image")]
        setting: String,
    },
    /// Export a post and its images as a ZIP archive
    Export {
        /// Session file (YAML/JSON) with metadata, uploads and settings
        #[arg(short, long)]
        session: PathBuf,

        /// Post content (HTML from the editor)
        #[arg(short = 'i', long)]
        content: PathBuf,

        /// Directory to write the archive into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Image directory inside the archive (defaults to config)
        #[arg(long)]
        image_path: Option<String>,

        /// Path to config file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let outcome = match cli.command {
        Commands::Serve { config, port, host } => serve(config, port, host).await,
        Commands::Links { input, selection, service, config } => {
            rewrite_links(input, selection, service, config).await
        }
        Commands::FrontMatter { metadata, image_path } => print_front_matter(&metadata, image_path),
        Commands::ImagePath { url, setting } => {
            println!("{}", images::final_image_path(&url, &setting));
            Ok(())
        }
        Commands::Export { session, content, output, image_path, config } => {
            export_post(session, content, output, image_path, config)
        }
    };

    if let Err(e) = outcome {
        eprintln!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }

    Ok(())
}

async fn serve(config_path: PathBuf, port: Option<u16>, host: Option<String>) -> Result<()> {
    let mut config = Config::load(&config_path)
        .context("Failed to load configuration")?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(host) = host {
        config.host = host;
    }

    println!(
        r#"
   ◜ q u i l l ◝
"#
    );
    println!("{}", "Starting server...".green().bold());
    println!("{}", format!("Uploads: {}", config.upload_root().display()).blue());
    println!("{}", format!("URL: http://{}:{}", config.host, config.port).blue());
    println!("{}", "Press Ctrl+C to stop".yellow());

    server::serve(config).await
}

async fn rewrite_links(
    input: Option<PathBuf>,
    selection: String,
    service: Option<String>,
    config_path: PathBuf,
) -> Result<()> {
    let text = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            text
        }
    };

    let lookup: Arc<dyn TitleLookup> = match service {
        Some(base) => Arc::new(RemoteTitleLookup::new(&base)),
        None => {
            let config = Config::load(&config_path)
                .context("Failed to load configuration")?;
            match &config.user_agent {
                Some(agent) => Arc::new(HttpTitleLookup::with_user_agent(config.title_timeout(), agent)),
                None => Arc::new(HttpTitleLookup::new(config.title_timeout())),
            }
        }
    };

    let resolver = LinkResolver::new(lookup);
    match resolver.rewrite_paste(&text, &selection).await {
        Some(html) => println!("{}", html),
        None => {
            eprintln!("{}", "No URLs found; text left unchanged.".yellow());
            print!("{}", text);
        }
    }
    Ok(())
}

fn load_metadata(path: &Path) -> Result<PostMetadata> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim_start().starts_with("---") {
        PostMetadata::from_front_matter(content.trim_start())
    } else {
        serde_yaml::from_str(&content).context("Failed to parse metadata file")
    }
}

/// The cover path is always re-derived; a missing setting means the default.
fn render_front_matter(path: &Path, image_path: Option<&str>) -> Result<String> {
    let mut metadata = load_metadata(path)?;
    Ok(metadata.front_matter_block(image_path.unwrap_or("")))
}

fn print_front_matter(path: &Path, image_path: Option<String>) -> Result<()> {
    println!("{}", render_front_matter(path, image_path.as_deref())?);
    Ok(())
}

fn export_post(
    session_path: PathBuf,
    content_path: PathBuf,
    output: PathBuf,
    image_path: Option<String>,
    config_path: PathBuf,
) -> Result<()> {
    let config = Config::load(&config_path)
        .context("Failed to load configuration")?;
    let mut session = EditorSession::load(&session_path)?;
    let content = std::fs::read_to_string(&content_path)
        .with_context(|| format!("Failed to read {}", content_path.display()))?;

    let image_path = image_path.unwrap_or_else(|| config.image_path.clone());
    let request = session.export_request(&content, &image_path)?;
    let archive = export::build_archive(&request, &config.upload_root())
        .context("Failed to build export archive")?;

    std::fs::create_dir_all(&output)
        .context("Failed to create output directory")?;
    let archive_path = output.join(&archive.filename);
    std::fs::write(&archive_path, &archive.bytes)
        .context("Failed to write export archive")?;

    println!("{}", "Export complete!".green().bold());
    println!("{}: {}", "Images".white().bold(), request.images.len().to_string().cyan());
    println!("{}: {}", "Archive".white().bold(), archive_path.display().to_string().cyan());
    Ok(())
}
