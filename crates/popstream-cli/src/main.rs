//! popstream - stream a popup optimization run to the terminal

mod config;
mod render;

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use popstream_client::{ConnectionPhase, SessionEvent, SessionOutcome, StreamSession};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use render::Renderer;

/// popstream - stream a popup optimization run
#[derive(Parser, Debug)]
#[command(name = "popstream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optimization endpoint (default: http://localhost:8000/optimize)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Popup configuration as inline JSON
    #[arg(short, long, conflicts_with = "payload_file")]
    payload: Option<String>,

    /// Read the popup configuration from a JSON file
    #[arg(short = 'f', long)]
    payload_file: Option<PathBuf>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Automatic retries before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print the final session snapshot as JSON instead of the transcript
    #[arg(long)]
    json: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("popstream=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let payload = read_payload(&args)?;

    let mut session_config = config::Config::load().session_config();
    if let Some(endpoint) = args.endpoint {
        session_config.endpoint = endpoint;
    }
    if let Some(ms) = args.timeout_ms {
        session_config.request_timeout = Duration::from_millis(ms);
    }
    if let Some(max_retries) = args.max_retries {
        session_config.retry.max_retries = max_retries;
    }

    let session = Arc::new(StreamSession::http(session_config)?);

    {
        let handle = session.handle();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n[Cancelled]");
                handle.cancel();
            }
        });
    }

    let interactive = !args.json && io::stdin().is_terminal();
    let mut renderer = Renderer::new();
    let mut outcome = run(&session, Some(payload), &mut renderer, args.json).await?;

    while outcome == SessionOutcome::Exhausted && interactive && confirm_retry()? {
        outcome = run(&session, None, &mut renderer, args.json).await?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    } else {
        renderer.finish_line(&mut io::stdout())?;
    }

    if outcome != SessionOutcome::Completed {
        std::process::exit(1);
    }
    Ok(())
}

fn read_payload(args: &Args) -> anyhow::Result<serde_json::Value> {
    let text = match (&args.payload, &args.payload_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file {}", path.display()))?,
        (None, None) => return Ok(serde_json::json!({})),
    };
    serde_json::from_str(&text).context("Payload is not valid JSON")
}

/// Start a run (or retry the remembered payload when `payload` is `None`)
/// and render its progress until it finishes.
async fn run(
    session: &Arc<StreamSession>,
    payload: Option<serde_json::Value>,
    renderer: &mut Renderer,
    quiet: bool,
) -> anyhow::Result<SessionOutcome> {
    let mut receiver = session.subscribe();
    let handle = session.handle();

    let mut task = {
        let session = Arc::clone(session);
        tokio::spawn(async move {
            match payload {
                Some(payload) => session.start(payload).await,
                None => session
                    .retry_connection()
                    .await
                    .unwrap_or(SessionOutcome::Cancelled),
            }
        })
    };

    let mut stdout = io::stdout();
    // notifications are sent before the run task ends, so draining them first
    // leaves nothing behind once the task is joined
    let outcome = loop {
        tokio::select! {
            biased;
            event = receiver.recv() => match event {
                Ok(SessionEvent::MessagesChanged { count }) if !quiet => {
                    if count == 0 {
                        renderer.restart(&mut stdout)?;
                    }
                    renderer.render(&handle.messages(), &mut stdout)?;
                }
                Ok(SessionEvent::ConnectionChanged { phase, state }) if !quiet => match phase {
                    ConnectionPhase::Retrying => {
                        renderer.finish_line(&mut stdout)?;
                        let max = session.config().retry.max_retries;
                        eprintln!("[Connection lost, retry {}/{}...]", state.retry_count, max);
                    }
                    ConnectionPhase::Streaming if state.retry_count > 0 => {
                        eprintln!("[Reconnected]");
                    }
                    _ => {}
                },
                Ok(SessionEvent::Failed { error }) if !quiet => {
                    renderer.finish_line(&mut stdout)?;
                    eprintln!("{}: {}", error.category.title(), error.message);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Renderer skipped {} notifications", skipped);
                }
                Err(RecvError::Closed) => break task.await?,
            },
            joined = &mut task => break joined?,
        }
    };

    if !quiet {
        renderer.render(&handle.messages(), &mut stdout)?;
    }
    Ok(outcome)
}

fn confirm_retry() -> io::Result<bool> {
    eprint!("Retries exhausted. Try again? [y/N] ");
    io::stderr().flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(false);
    }
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
