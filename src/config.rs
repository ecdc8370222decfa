use crate::errors::ErrorCodeOverride;
use anyhow::{Context, Result};
use clap::Parser;
use std::{collections::HashMap, env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Mount prefix for the filestore routes (e.g. `/filestore`).
    pub context_path: String,
    /// Permanent storage root; one directory per fileId.
    pub upload_dir: PathBuf,
    /// Thumbnail cache root; one directory per fileId.
    pub thumbnail_dir: PathBuf,
    /// Root for per-upload staging directories.
    pub tmp_base_dir: PathBuf,
    /// Metadata table ("collection") name.
    pub collection: String,
    /// Thumbnail width ceiling; 0 means unlimited.
    pub thumbnail_max_width: u32,
    /// Thumbnail height ceiling; 0 means unlimited.
    pub thumbnail_max_height: u32,
    /// Allowed `[width, height]` pairs; empty means unrestricted.
    pub thumbnail_frames: Vec<[u32; 2]>,
    /// Source image substituted when a fileId has no stored image.
    pub placeholder_image: PathBuf,
    /// When false (default), all pipeline errors render as HTTP 404.
    pub pretty_error: bool,
    /// Error name -> bare string token; presence selects the legacy body.
    pub legacy_error_strings: HashMap<String, String>,
    /// Error name -> {message, code, status} overrides.
    pub error_codes: HashMap<String, ErrorCodeOverride>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File-storage microservice")]
pub struct Args {
    /// Host to bind to (overrides FILESTORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILESTORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides FILESTORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Mount prefix for filestore routes (overrides FILESTORE_CONTEXT_PATH)
    #[arg(long)]
    pub context_path: Option<String>,

    /// Permanent upload directory (overrides FILESTORE_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Thumbnail cache directory (overrides FILESTORE_THUMBNAIL_DIR,
    /// defaults to the upload directory)
    #[arg(long)]
    pub thumbnail_dir: Option<PathBuf>,

    /// Staging root for in-flight uploads (overrides FILESTORE_TMP_DIR)
    #[arg(long)]
    pub tmp_base_dir: Option<PathBuf>,

    /// Metadata table name (overrides FILESTORE_COLLECTION)
    #[arg(long)]
    pub collection: Option<String>,

    /// Maximum thumbnail width, 0 = unlimited (overrides
    /// FILESTORE_THUMBNAIL_MAX_WIDTH)
    #[arg(long)]
    pub thumbnail_max_width: Option<u32>,

    /// Maximum thumbnail height, 0 = unlimited (overrides
    /// FILESTORE_THUMBNAIL_MAX_HEIGHT)
    #[arg(long)]
    pub thumbnail_max_height: Option<u32>,

    /// Allowed thumbnail frames as JSON, e.g. "[[512,200],[512,288]]"
    /// (overrides FILESTORE_THUMBNAIL_FRAMES)
    #[arg(long)]
    pub thumbnail_frames: Option<String>,

    /// Placeholder image path (overrides FILESTORE_PLACEHOLDER_IMAGE)
    #[arg(long)]
    pub placeholder_image: Option<PathBuf>,

    /// Use each error's own HTTP status instead of the uniform 404
    /// (overrides FILESTORE_PRETTY_ERROR)
    #[arg(long)]
    pub pretty_error: bool,

    /// Legacy error strings as a JSON map, e.g.
    /// '{"FileIdNotFoundError":"FILE_NOT_FOUND"}'
    /// (overrides FILESTORE_LEGACY_ERROR_STRINGS)
    #[arg(long)]
    pub legacy_error_strings: Option<String>,

    /// Error code overrides as a JSON map of
    /// name -> {message, code, status} (overrides FILESTORE_ERROR_CODES)
    #[arg(long)]
    pub error_codes: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        Self::resolve(args)
    }

    fn resolve(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("FILESTORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("FILESTORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing FILESTORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 7979,
            Err(err) => return Err(err).context("reading FILESTORE_PORT"),
        };
        let env_db = env::var("FILESTORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/filestore.db".into());
        let env_context = env::var("FILESTORE_CONTEXT_PATH").unwrap_or_else(|_| "/filestore".into());
        let env_upload =
            env::var("FILESTORE_UPLOAD_DIR").unwrap_or_else(|_| "./data/files".into());
        let env_thumbnail = env::var("FILESTORE_THUMBNAIL_DIR").ok();
        let env_tmp = env::var("FILESTORE_TMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("filestore"));
        let env_collection = env::var("FILESTORE_COLLECTION").unwrap_or_else(|_| "files".into());
        let env_max_width = parse_env_u32("FILESTORE_THUMBNAIL_MAX_WIDTH", 800)?;
        let env_max_height = parse_env_u32("FILESTORE_THUMBNAIL_MAX_HEIGHT", 450)?;
        let env_frames = env::var("FILESTORE_THUMBNAIL_FRAMES").ok();
        let env_placeholder =
            env::var("FILESTORE_PLACEHOLDER_IMAGE").unwrap_or_else(|_| "./data/no-image.png".into());
        let env_pretty = matches!(
            env::var("FILESTORE_PRETTY_ERROR").as_deref(),
            Ok("1") | Ok("true")
        );
        let env_legacy = env::var("FILESTORE_LEGACY_ERROR_STRINGS").ok();
        let env_error_codes = env::var("FILESTORE_ERROR_CODES").ok();

        // --- Merge ---
        let upload_dir = args.upload_dir.unwrap_or_else(|| PathBuf::from(env_upload));
        let thumbnail_dir = args
            .thumbnail_dir
            .or_else(|| env_thumbnail.map(PathBuf::from))
            .unwrap_or_else(|| upload_dir.clone());

        let frames_json = args.thumbnail_frames.or(env_frames);
        let thumbnail_frames = match frames_json {
            Some(raw) => parse_frames(&raw)?,
            None => Vec::new(),
        };

        let legacy_json = args.legacy_error_strings.or(env_legacy);
        let legacy_error_strings: HashMap<String, String> = match legacy_json {
            Some(raw) => {
                serde_json::from_str(&raw).context("parsing legacy error string mappings")?
            }
            None => HashMap::new(),
        };

        let codes_json = args.error_codes.or(env_error_codes);
        let error_codes: HashMap<String, ErrorCodeOverride> = match codes_json {
            Some(raw) => serde_json::from_str(&raw).context("parsing error code overrides")?,
            None => HashMap::new(),
        };

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            context_path: args.context_path.unwrap_or(env_context),
            upload_dir,
            thumbnail_dir,
            tmp_base_dir: args.tmp_base_dir.unwrap_or(env_tmp),
            collection: args.collection.unwrap_or(env_collection),
            thumbnail_max_width: args.thumbnail_max_width.unwrap_or(env_max_width),
            thumbnail_max_height: args.thumbnail_max_height.unwrap_or(env_max_height),
            thumbnail_frames,
            placeholder_image: args
                .placeholder_image
                .unwrap_or_else(|| PathBuf::from(env_placeholder)),
            pretty_error: args.pretty_error || env_pretty,
            legacy_error_strings,
            error_codes,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u32>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Parse a frame whitelist. Malformed pairs are dropped rather than
/// rejected; only positive integer pairs survive.
fn parse_frames(raw: &str) -> Result<Vec<[u32; 2]>> {
    let frames: Vec<Vec<u32>> =
        serde_json::from_str(raw).context("parsing thumbnail frame list")?;
    Ok(frames
        .into_iter()
        .filter(|pair| pair.len() == 2 && pair[0] > 0 && pair[1] > 0)
        .map(|pair| [pair[0], pair[1]])
        .collect())
}
