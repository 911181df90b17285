//! CLI binary for doc2md.
//!
//! `doc2md serve` (the default) runs the HTTP service; `doc2md convert`
//! pushes a single file or URL through the same pipeline and prints the
//! Markdown. Every setting can come from a flag, a `DOC2MD_*` variable or
//! a `.env` file, in that order of precedence.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use doc2md::server::{self, shutdown_signal};
use doc2md::{
    ConversionPipeline, ConversionRequest, Device, EngineBackend, EngineCell, EngineConfig,
    LogFormat, LoggingConfig, ServiceConfig,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Start the service on the default port (8000)
  doc2md

  # Start on another port with two GPU workers
  doc2md serve --port 9000 --device cuda --workers 2

  # Convert a local file to stdout
  doc2md convert report.docx

  # Convert a URL into a file
  doc2md convert https://arxiv.org/pdf/1706.03762 -o attention.md

  # Use a vision model instead of docling (requires the `vlm` feature)
  doc2md serve --engine vlm --vlm-endpoint https://api.openai.com/v1

ENDPOINTS:
  GET  /health                            Liveness probe
  GET  /api/v1/supported-formats          Allowed extensions and size limit
  POST /api/v1/convert/file               Multipart upload (field "file") -> JSON
  POST /api/v1/convert/url                {"url": "..."} -> JSON
  POST /api/v1/convert/file/download      Multipart upload -> .md attachment
  POST /api/v1/convert/url/download       {"url": "..."} -> .md attachment

ENVIRONMENT:
  Every option below has a DOC2MD_* variable (shown in each option's help).
  A .env file in the working directory is read on startup; --env-file
  points at another one. RUST_LOG overrides --log-level.

SETUP:
  1. Install the engine:   pip install docling
  2. Run the service:      doc2md
  3. Convert something:    curl -F file=@report.pdf localhost:8000/api/v1/convert/file
"#;

/// Convert PDF, DOCX, PPTX, XLSX and HTML documents to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md",
    version,
    about = "Convert PDF, DOCX, PPTX, XLSX and HTML documents to Markdown",
    long_about = "Document-to-Markdown conversion service. Documents arrive as uploads or \
URLs, are handed to a layout-aware conversion engine (docling by default) and come back as \
Markdown in a JSON body or as a downloadable .md file.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Convert one document and print or save the Markdown.
    Convert {
        /// Local file path or HTTP/HTTPS URL.
        input: String,

        /// Write Markdown to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Service settings. Unset options keep the library defaults.
#[derive(Args, Debug)]
struct Settings {
    /// Service name reported by /health. Default: Doc2MD.
    #[arg(long, global = true, env = "DOC2MD_APP_NAME")]
    app_name: Option<String>,

    /// Version reported by /health. Default: the crate version.
    #[arg(long, global = true, env = "DOC2MD_APP_VERSION")]
    app_version: Option<String>,

    /// Bind address. Default: 0.0.0.0.
    #[arg(long, global = true, env = "DOC2MD_HOST")]
    host: Option<String>,

    /// Bind port. Default: 8000.
    #[arg(long, global = true, env = "DOC2MD_PORT")]
    port: Option<u16>,

    /// Largest accepted upload in bytes. Default: 104857600 (100 MiB).
    #[arg(long, global = true, env = "DOC2MD_MAX_FILE_SIZE")]
    max_file_size: Option<u64>,

    /// Scratch directory for uploads. Default: ./tmp/uploads.
    #[arg(long, global = true, env = "DOC2MD_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Scratch directory for downloaded documents. Default: ./tmp/temp.
    #[arg(long, global = true, env = "DOC2MD_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Download timeout for URL inputs, in seconds. Default: 30.
    #[arg(long, global = true, env = "DOC2MD_DOWNLOAD_TIMEOUT")]
    download_timeout: Option<u64>,

    /// Largest accepted download in bytes. Default: 104857600 (100 MiB).
    #[arg(long, global = true, env = "DOC2MD_MAX_DOWNLOAD_SIZE")]
    max_download_size: Option<u64>,

    /// Comma-separated extension allow-list, e.g. `.pdf,.docx`.
    #[arg(
        long,
        global = true,
        env = "DOC2MD_SUPPORTED_EXTENSIONS",
        value_delimiter = ','
    )]
    supported_extensions: Option<Vec<String>>,

    /// Log filter used when RUST_LOG is unset. Default: info.
    #[arg(long, global = true, env = "DOC2MD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Also append logs to this file.
    #[arg(long, global = true, env = "DOC2MD_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log format on stderr: compact or json. Default: compact.
    #[arg(long, global = true, env = "DOC2MD_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Conversion backend: docling or vlm. Default: docling.
    #[arg(long, global = true, env = "DOC2MD_ENGINE")]
    engine: Option<EngineBackend>,

    /// Device: cpu, cuda, cuda:N, mps or auto. Default: cpu.
    #[arg(
        long,
        global = true,
        env = "DOC2MD_DEVICE",
        long_help = "Compute device for the engine.\n\
          Unavailable accelerators fall back to cpu with a warning; `auto` picks\n\
          cuda, then mps, then cpu."
    )]
    device: Option<Device>,

    /// Enable OCR (true/false). Default: true.
    #[arg(
        long,
        global = true,
        env = "DOC2MD_OCR",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    ocr: Option<bool>,

    /// Conversions allowed to run at once. Default: 1.
    #[arg(long, global = true, env = "DOC2MD_WORKERS")]
    workers: Option<usize>,

    /// Per-document conversion timeout in seconds. Default: none.
    #[arg(long, global = true, env = "DOC2MD_CONVERSION_TIMEOUT")]
    conversion_timeout: Option<u64>,

    /// docling executable. Default: `docling` on PATH.
    #[arg(long, global = true, env = "DOC2MD_DOCLING_PATH")]
    docling_path: Option<PathBuf>,

    /// OpenAI-compatible base URL for the vlm engine.
    #[arg(long, global = true, env = "DOC2MD_VLM_ENDPOINT")]
    vlm_endpoint: Option<String>,

    /// Vision model ID for the vlm engine. Default: gpt-4.1-nano.
    #[arg(long, global = true, env = "DOC2MD_VLM_MODEL")]
    vlm_model: Option<String>,

    /// Bearer token for the vlm endpoint.
    #[arg(long, global = true, env = "DOC2MD_VLM_API_KEY", hide_env_values = true)]
    vlm_api_key: Option<String>,

    /// Concurrent page requests per document. Default: 4.
    #[arg(long, global = true, env = "DOC2MD_VLM_CONCURRENCY")]
    vlm_concurrency: Option<usize>,

    /// Retries per page on transient API failures. Default: 3.
    #[arg(long, global = true, env = "DOC2MD_VLM_MAX_RETRIES")]
    vlm_max_retries: Option<u32>,

    /// Max output tokens per page. Default: 4096.
    #[arg(long, global = true, env = "DOC2MD_VLM_MAX_TOKENS")]
    vlm_max_tokens: Option<usize>,

    /// Sampling temperature. Default: 0.1.
    #[arg(long, global = true, env = "DOC2MD_VLM_TEMPERATURE")]
    vlm_temperature: Option<f32>,

    /// Directory holding libpdfium. Default: system library search path.
    #[arg(long, global = true, env = "DOC2MD_PDFIUM_LIB_DIR")]
    pdfium_lib_dir: Option<PathBuf>,
}

impl Settings {
    fn into_config(self) -> Result<ServiceConfig> {
        let mut engine = EngineConfig::default();
        if let Some(backend) = self.engine {
            engine.backend = backend;
        }
        if let Some(device) = self.device {
            engine.device = device;
        }
        if let Some(ocr) = self.ocr {
            engine.ocr = ocr;
        }
        if let Some(workers) = self.workers {
            engine.workers = workers;
        }
        engine.conversion_timeout_secs = self.conversion_timeout;
        if let Some(path) = self.docling_path {
            engine.docling_path = path;
        }

        let vlm = &mut engine.vlm;
        vlm.endpoint = self.vlm_endpoint.or(vlm.endpoint.take());
        vlm.api_key = self.vlm_api_key.or(vlm.api_key.take());
        vlm.pdfium_library_dir = self.pdfium_lib_dir.or(vlm.pdfium_library_dir.take());
        if let Some(model) = self.vlm_model {
            vlm.model = model;
        }
        if let Some(n) = self.vlm_concurrency {
            vlm.concurrency = n;
        }
        if let Some(n) = self.vlm_max_retries {
            vlm.max_retries = n;
        }
        if let Some(n) = self.vlm_max_tokens {
            vlm.max_tokens = n;
        }
        if let Some(t) = self.vlm_temperature {
            vlm.temperature = t;
        }

        let mut logging = LoggingConfig::default();
        if let Some(level) = self.log_level {
            logging.level = level;
        }
        logging.file = self.log_file;
        if let Some(format) = self.log_format {
            logging.format = format;
        }

        let mut builder = ServiceConfig::builder().engine(engine).logging(logging);
        if let Some(v) = self.app_name {
            builder = builder.app_name(v);
        }
        if let Some(v) = self.app_version {
            builder = builder.app_version(v);
        }
        if let Some(v) = self.host {
            builder = builder.host(v);
        }
        if let Some(v) = self.port {
            builder = builder.port(v);
        }
        if let Some(v) = self.max_file_size {
            builder = builder.max_file_size(v);
        }
        if let Some(v) = self.upload_dir {
            builder = builder.upload_dir(v);
        }
        if let Some(v) = self.temp_dir {
            builder = builder.temp_dir(v);
        }
        if let Some(v) = self.download_timeout {
            builder = builder.download_timeout_secs(v);
        }
        if let Some(v) = self.max_download_size {
            builder = builder.max_download_size(v);
        }
        if let Some(v) = self.supported_extensions {
            builder = builder.supported_extensions(v);
        }

        builder.build().context("Invalid configuration")
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

/// `--env-file` has to be honoured before clap reads `env = ...` defaults,
/// so it is picked out of the raw arguments first.
fn load_env_file() -> Result<()> {
    let mut args = std::env::args_os().skip(1);
    let mut explicit: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        let arg = arg.to_string_lossy().into_owned();
        if arg == "--env-file" {
            explicit = args.next().map(PathBuf::from);
        } else if let Some(path) = arg.strip_prefix("--env-file=") {
            explicit = Some(PathBuf::from(path));
        }
    }

    match explicit {
        Some(path) => {
            dotenvy::from_path(&path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file()?;
    let cli = Cli::parse();
    let config = cli.settings.into_config()?;

    // Keep the guard alive until exit so buffered file logs are flushed.
    let _log_guard =
        doc2md::telemetry::init(&config.logging).context("Failed to initialise logging")?;
    if let Some(path) = &cli.env_file {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(config, shutdown_signal())
            .await
            .context("Service stopped with an error"),
        Command::Convert { input, output } => convert_one(config, input, output).await,
    }
}

// ── One-shot conversion ──────────────────────────────────────────────────────

async fn convert_one(config: ServiceConfig, input: String, output: Option<PathBuf>) -> Result<()> {
    let config = Arc::new(config);
    let engine = Arc::new(EngineCell::from_config(config.engine.clone()));
    let pipeline = ConversionPipeline::new(Arc::clone(&config), engine)?;
    pipeline
        .prepare()
        .await
        .context("Failed to prepare scratch directories")?;

    let request = if input.starts_with("http://") || input.starts_with("https://") {
        ConversionRequest::Url { url: input.clone() }
    } else {
        ConversionRequest::from_local_file(Path::new(&input), &config)
            .await
            .with_context(|| format!("Cannot convert {input}"))?
    };

    let started = Instant::now();
    let result = pipeline.run(request).await.context("Conversion failed")?;

    match output {
        Some(path) => {
            write_atomic(&path, &result.markdown).await?;
            eprintln!(
                "{}  {}  {}ms  →  {}",
                green("✔"),
                result.filename,
                started.elapsed().as_millis(),
                bold(&path.display().to_string()),
            );
            eprintln!(
                "   {}",
                dim(&format!("{} bytes of Markdown", result.markdown.len()))
            );
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(result.markdown.as_bytes())
                .context("Failed to write to stdout")?;
            stdout.flush().context("Failed to flush stdout")?;
        }
    }
    Ok(())
}

/// Write to `<path>.md.tmp`, then rename over `path`.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("md.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move output into {}", path.display()))?;
    Ok(())
}
