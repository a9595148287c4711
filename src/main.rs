use anyhow::{Context, Result, bail};
use clap::Parser;
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use subflow::cli::{Cli, Commands, ConfigAction, TranscribeArgs};
use subflow::config::Config;
use subflow::defaults::gpu_backend;
use subflow::error::SubflowError;
use subflow::ipc::protocol::ProgressEvent;
use subflow::ipc::worker::{WorkerArgs, run_worker};
use subflow::logging::{LogOptions, init_tracing};
use subflow::pipeline::types::TranscriptionRequest;
use subflow::service::TranscriptionService;
use subflow::stt::whisper::model_installed;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(LogOptions {
        verbosity: cli.verbosity(),
        json: cli.log_json,
    });
    tracing::debug!(version = %subflow::version_string(), "subflow starting");

    match cli.command {
        Commands::Transcribe(args) => {
            handle_transcribe(args, cli.config.as_deref(), cli.quiet).await?;
        }
        Commands::Backends => {
            handle_backends(cli.config.as_deref())?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Worker(worker) => {
            let args = WorkerArgs::from(worker);
            let code =
                tokio::task::spawn_blocking(move || run_worker(&args, std::io::stdout())).await?;
            std::process::exit(code);
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path, if it exists
/// 3. Built-in defaults
///
/// Environment variable overrides are applied last.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides()?)
}

async fn handle_transcribe(
    args: TranscribeArgs,
    config_path: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(backend) = &args.backend {
        config.engine.backend = Some(backend.to_lowercase());
    }
    if let Some(timeout) = args.timeout {
        config.pipeline.timeout_secs = timeout;
    }

    let model_size = args
        .model_size
        .unwrap_or(config.pipeline.default_model_size);
    let chunk_duration = args
        .chunk_duration
        .unwrap_or(config.pipeline.chunk_duration_secs);
    let request =
        TranscriptionRequest::new(args.url.clone(), model_size).with_chunk_duration(chunk_duration);

    let service = TranscriptionService::new(config)?;
    let final_text = if args.in_process {
        run_in_process(&service, &request, args.stream, quiet).await?
    } else {
        run_isolated(&service, &request, args.stream, quiet).await?
    };

    if args.stream {
        return Ok(());
    }
    let Some(text) = final_text else {
        bail!(SubflowError::Cancelled);
    };
    if text.trim().is_empty() {
        bail!(SubflowError::EmptyTranscription);
    }

    match &args.output {
        Some(path) => {
            std::fs::write(path, &text).with_context(|| format!("writing {}", path.display()))?;
            if !quiet {
                eprintln!("{} {}", "Saved".green(), path.display());
            }
        }
        None => print!("{}", text),
    }
    Ok(())
}

/// Run through a worker process, cancelling it on Ctrl-C.
///
/// Returns the final text, or `None` if the run was cancelled.
async fn run_isolated(
    service: &TranscriptionService,
    request: &TranscriptionRequest,
    stream: bool,
    quiet: bool,
) -> Result<Option<String>> {
    let mut handle = service.stream(request)?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut final_text = None;
    let mut failure = None;

    loop {
        tokio::select! {
            event = handle.next() => {
                let Some(event) = event else { break };
                show_event(&event, stream, quiet)?;
                match event {
                    ProgressEvent::Completed { final_text: text, .. } => final_text = Some(text),
                    ProgressEvent::Error { message } => failure = Some(message),
                    _ => {}
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("{}", "Cancelling...".yellow());
                handle.cancel();
            }
        }
    }

    let stats = handle.finish().await;
    tracing::debug!(?stats, "Relay stats");

    if let Some(message) = failure {
        bail!(message);
    }
    Ok(final_text)
}

/// Run on a blocking thread of this process, cancelling on Ctrl-C.
async fn run_in_process(
    service: &TranscriptionService,
    request: &TranscriptionRequest,
    stream: bool,
    quiet: bool,
) -> Result<Option<String>> {
    let (mut events, task) = service.stream_in_process(request);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                show_event(&event, stream, quiet)?;
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("{}", "Cancelling...".yellow());
                events.close();
            }
        }
    }

    match task.await? {
        Ok(summary) => Ok(Some(summary.final_text)),
        Err(SubflowError::Cancelled) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// JSON line on stdout when streaming, coloured progress on stderr otherwise.
fn show_event(event: &ProgressEvent, stream: bool, quiet: bool) -> Result<()> {
    if stream {
        println!("{}", event.to_json()?);
    } else {
        report_progress(event, quiet);
    }
    Ok(())
}

fn report_progress(event: &ProgressEvent, quiet: bool) {
    if quiet {
        return;
    }
    let mut stderr = std::io::stderr().lock();
    let written = match event {
        ProgressEvent::Status { message } => writeln!(stderr, "{}", message.dimmed()),
        ProgressEvent::Progress { percent, message } => {
            writeln!(stderr, "{} {}", format!("[{:>3.0}%]", percent).cyan(), message)
        }
        ProgressEvent::ProcessingChunk {
            index,
            total,
            start,
            end,
            percent,
        } => writeln!(
            stderr,
            "{} Transcribing chunk {}/{} ({:.0}s-{:.0}s)",
            format!("[{:>3.0}%]", percent).cyan(),
            index + 1,
            total,
            start,
            end
        ),
        ProgressEvent::ChunkError { index, message } => writeln!(
            stderr,
            "{} chunk {} skipped: {}",
            "warning:".yellow(),
            index + 1,
            message
        ),
        // Reported once, as the command's error
        ProgressEvent::Error { .. }
        | ProgressEvent::SegmentCompleted { .. }
        | ProgressEvent::ChunkCompleted { .. }
        | ProgressEvent::Completed { .. } => Ok(()),
    };
    if let Err(e) = written {
        tracing::debug!(error = %e, "Failed to write progress");
    }
}

fn handle_backends(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let models_dir = config.engine.models_dir.clone();
    let default_size = config.pipeline.default_model_size;
    let service = TranscriptionService::new(config)?;

    println!("Inference backends (in preference order):");
    for (kind, usable) in service.backend_report() {
        let state = if usable {
            "usable".green().to_string()
        } else {
            "unavailable".red().to_string()
        };
        println!("  {:<12} {}", kind.to_string(), state);
    }
    println!(
        "  {} {}",
        "GPU support:".dimmed(),
        gpu_backend().unwrap_or("none (CPU only build)")
    );
    let installed = if model_installed(&models_dir, default_size) {
        "installed".green().to_string()
    } else {
        "missing".yellow().to_string()
    };
    println!(
        "  {} {} in {} ({})",
        "Default model:".dimmed(),
        default_size,
        models_dir.display(),
        installed
    );

    match service.probe() {
        Ok(adapter) => {
            println!("Selected: {}", adapter.kind().to_string().green());
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}
