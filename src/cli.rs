use crate::{
    config::Config,
    convert::Converter,
    engine::{Engine, python::PythonEngine},
    postprocess::Postprocessor,
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "quack-ocr")]
#[command(about = "HTTP front door for Docling PDF-to-markdown conversion")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Path to config TOML. Falls back to $QUACK_OCR_CONFIG, then ./quack-ocr.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service (default).
    Serve {
        #[arg(long)]
        host: Option<IpAddr>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check that the configured Python can import Docling.
    Doctor {},
    /// Convert one PDF without starting the server.
    Convert {
        #[arg(long)]
        input: PathBuf,
        /// Run with OCR regardless of the configured default profile.
        #[arg(long, conflicts_with = "no_ocr")]
        ocr: bool,
        /// Run without OCR regardless of the configured default profile.
        #[arg(long)]
        no_ocr: bool,
        /// Write markdown here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let mut cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    cfg.apply_env()?;

    let _guard = init_logging(&args, &cfg)?;

    match args.cmd {
        None => serve(cfg),
        Some(Command::Serve { host, port }) => {
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            serve(cfg)
        }
        Some(Command::Doctor {}) => doctor(&cfg),
        Some(Command::Convert {
            input,
            ocr,
            no_ocr,
            output,
        }) => {
            let flag = match (ocr, no_ocr) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            convert(&cfg, &input, flag, output.as_deref())
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("QUACK_OCR_CONFIG") {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    let default = PathBuf::from("quack-ocr.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if cfg.logging.write_to_file && !cfg.logging.file_path.is_empty() {
        let path = Path::new(&cfg.logging.file_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn serve(cfg: Config) -> Result<()> {
    let engine: Arc<dyn Engine> = Arc::new(PythonEngine::new(&cfg)?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "building tokio runtime")?;
    let result = runtime.block_on(crate::server::serve(cfg, engine));
    // Conversions cut off by the drain limit still hold blocking threads.
    runtime.shutdown_background();
    result
}

fn doctor(cfg: &Config) -> Result<()> {
    let engine = PythonEngine::new(cfg)?;
    info!("python_exe={}", engine.python_exe().display());
    let diag = engine.doctor()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "checked_at": now_rfc3339(),
            "diag": diag,
        }))?
    );
    if !diag.ok {
        return Err(anyhow!(
            "docling is not usable: {}",
            diag.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

fn convert(cfg: &Config, input: &Path, ocr: Option<bool>, output: Option<&Path>) -> Result<()> {
    let temp_dir = cfg.temp_dir();
    ensure_dir(&temp_dir)?;
    let engine: Arc<dyn Engine> = Arc::new(PythonEngine::new(cfg)?);
    let converter = Converter::new(engine, temp_dir, Postprocessor::new(&cfg.postprocess)?);

    let markdown = converter.convert_file(input, &cfg.convert_options(ocr))?;
    match output {
        Some(path) => {
            std::fs::write(path, &markdown)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => print!("{markdown}"),
    }
    Ok(())
}
