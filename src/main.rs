/*!
 * b2lift CLI - Command Line Interface
 */

use b2lift::{
    api::HttpB2Api,
    config::{LogLevel, UploaderConfig},
    error::{Result, UploadError, EXIT_SUCCESS},
    logging,
    upload::{UploadRequest, UploadSource, Uploader},
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const KEY_ID_ENV: &str = "B2_APPLICATION_KEY_ID";
const KEY_ENV: &str = "B2_APPLICATION_KEY";

#[derive(Parser)]
#[command(name = "b2lift")]
#[command(version, about = "Upload buffers, files and streams to Backblaze B2", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file, or stdin with `-`
    Upload(UploadArgs),

    /// Manage configuration files
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(clap::Args)]
struct UploadArgs {
    /// Destination bucket id
    #[arg(long, value_name = "ID")]
    bucket_id: String,

    /// Name of the file in the bucket
    #[arg(long, value_name = "NAME")]
    file_name: String,

    /// Content type (default: b2/x-auto)
    #[arg(long, value_name = "TYPE")]
    content_type: Option<String>,

    /// Part size in bytes for large files
    #[arg(long, value_name = "BYTES")]
    part_size: Option<u64>,

    /// Size at or above which the large-file protocol is used
    #[arg(long, value_name = "BYTES")]
    threshold: Option<u64>,

    /// Parts uploaded at once
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// File to upload, or `-` for stdin
    #[arg(value_name = "SOURCE")]
    source: String,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a configuration file with every default spelled out
    Init {
        /// Destination path
        #[arg(default_value = "b2lift.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Upload(args) => upload(args),
        Commands::Config(ConfigCommands::Init { path, force }) => init_config(&path, force),
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(UploadError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    UploaderConfig::default().to_file(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn upload(args: UploadArgs) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => UploaderConfig::from_file(path)?,
        None => UploaderConfig::default(),
    };

    if let Some(level) = args.log_level {
        config.logging.level = level.into();
    }
    if args.log_file.is_some() {
        config.logging.file = args.log_file.clone();
    }
    config.logging.verbose |= args.verbose;
    logging::init_logging(&config.logging)?;

    let key_id = std::env::var(KEY_ID_ENV)
        .map_err(|_| UploadError::Config(format!("{} is not set", KEY_ID_ENV)))?;
    let key = std::env::var(KEY_ENV)
        .map_err(|_| UploadError::Config(format!("{} is not set", KEY_ENV)))?;

    let api = HttpB2Api::builder(key_id, key)
        .api_base(config.api_base.clone())
        .request_timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .build()?;

    let runtime = tokio::runtime::Runtime::new()?;
    let source = if args.source == "-" {
        let _guard = runtime.enter();
        UploadSource::Stream(Box::new(tokio::io::stdin()))
    } else {
        UploadSource::File(PathBuf::from(&args.source))
    };

    let mut request = UploadRequest::new(args.bucket_id, args.file_name, source);
    if let Some(part_size) = args.part_size {
        request = request.part_size(part_size);
    }
    if let Some(threshold) = args.threshold {
        request = request.large_file_threshold(threshold);
    }
    if let Some(concurrency) = args.concurrency {
        request = request.concurrency(concurrency);
    }
    if let Some(content_type) = args.content_type {
        request = request.content_type(content_type);
    }

    let response = runtime.block_on(async {
        let uploader = Uploader::builder(Arc::new(api)).config(&config).build();
        uploader.upload(request).await
    })?;

    let rendered = serde_json::to_string_pretty(&response)
        .map_err(|e| UploadError::Config(format!("Failed to render response: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}
