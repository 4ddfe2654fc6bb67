//! vianlp-service: entity, pattern and table extraction for Italian PDFs
//!
//! Spawned as a subprocess: reads one JSON request per stdin line and writes
//! one JSON response per stdout line. Logs go to stderr or a log file.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use vianlp_core::{
    make_device, BertEntityRecognizer, DisabledRecognizer, EntityRecognizer, Extractor,
};
use vianlp_service::config::{default_config_path, load_config, Config};
use vianlp_service::{write_response, Response, Server, READY_MESSAGE, STARTING_MESSAGE};

#[derive(Parser)]
#[command(name = "vianlp-service")]
#[command(about = "Extract entities, pattern matches and tables from Italian PDFs over stdin/stdout")]
#[command(version)]
struct Args {
    /// Config file (default: <config dir>/vianlp/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// NER model: Hugging Face id or local directory
    #[arg(long)]
    model: Option<String>,

    /// Page worker threads (0 = available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Skip named entity recognition
    #[arg(long)]
    no_ner: bool,

    /// Skip table detection
    #[arg(long)]
    no_tables: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Don't write lifecycle notices to stdout
    #[arg(long)]
    quiet: bool,
}

fn main() {
    let args = Args::parse();
    let mut config = read_config(args.config.as_deref());

    let log_file = args.log_file.clone().or_else(|| config.log_file());
    if let Err(e) = init_logging(log_file.as_deref()) {
        eprintln!("{e:#}. Logging to stderr.");
        init_logging(None).ok();
    }

    config.apply_env();
    apply_args(&mut config, &args);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let code = match run(&config, &mut out) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run<W: Write>(config: &Config, out: &mut W) -> Result<()> {
    let announce = config.announce();
    if announce {
        Server::announce(out, STARTING_MESSAGE)?;
    }

    let extractor = match build_extractor(config) {
        Ok(extractor) => extractor,
        Err(e) => {
            let message = format!("Error initializing service: {e:#}");
            write_response(out, &Response::error(message.clone(), None)).ok();
            anyhow::bail!(message);
        }
    };

    if announce {
        Server::announce(out, READY_MESSAGE)?;
    }
    tracing::info!(
        recognizer = extractor.recognizer_name(),
        workers = extractor.workers(),
        "NLP service ready"
    );

    let stdin = std::io::stdin();
    let mut server = Server::new(extractor);
    server.serve(stdin.lock(), out)?;
    Ok(())
}

fn build_extractor(config: &Config) -> Result<Extractor> {
    let recognizer: Box<dyn EntityRecognizer> = if config.ner_enabled() {
        let source = config.model_source();
        tracing::info!("Loading NER model {}", source);
        let device = make_device();
        Box::new(
            BertEntityRecognizer::from_pretrained(&source, &device)
                .with_context(|| format!("Failed to load NER model {source}"))?,
        )
    } else {
        tracing::info!("Named entity recognition disabled");
        Box::new(DisabledRecognizer)
    };

    Extractor::new(recognizer, config.extractor_options())
}

fn read_config(explicit: Option<&Path>) -> Config {
    let config_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Ok(path) => path,
            Err(err) => {
                eprintln!("{err:#}. Using defaults.");
                return Config::default();
            }
        },
    };

    match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "Failed to load config from {}: {:#}. Using defaults.",
                config_path.display(),
                err
            );
            Config::default()
        }
    }
}

/// Command-line flags win over the config file and the environment
fn apply_args(config: &mut Config, args: &Args) {
    if let Some(model) = &args.model {
        config.set_model(model);
    }
    if let Some(workers) = args.workers {
        config.extraction.get_or_insert_with(Default::default).workers = Some(workers);
    }
    if args.no_ner {
        config.model.get_or_insert_with(Default::default).enabled = Some(false);
    }
    if args.no_tables {
        config.extraction.get_or_insert_with(Default::default).tables = Some(false);
    }
    if args.quiet {
        config.service.get_or_insert_with(Default::default).announce = Some(false);
    }
    if let Some(log_file) = &args.log_file {
        config.service.get_or_insert_with(Default::default).log_file = Some(log_file.clone());
    }
}

/// Set up tracing on stderr, or appending to `log_file` without colours.
/// stdout is reserved for protocol lines.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}")),
    }
}
