#![warn(missing_docs)]
//! # tally binary
//!
//! Console operator front end for the remote object counter. Presentation
//! only: every line printed here is a pure rendering of the runtime's
//! status view.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tally_app::{
    AppError, RuntimeConfig, SessionRuntime, UreqTransport, project_runtime_status,
    read_video_file, unix_now_ms,
};
use tally_core::Mode;
use tally_session::SessionState;
use tally_ui::StatusView;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TICK_SLEEP: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(name = "tally", version = tally_app::APP_VERSION)]
#[command(about = "Remote object-counting client")]
struct Cli {
    /// Backend base address.
    #[arg(long, env = "TALLY_BACKEND_URL", default_value = tally_app::DEFAULT_BACKEND_URL)]
    backend_url: String,

    /// Live-data poll interval in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    poll_interval_ms: u64,

    /// Health probe interval in milliseconds.
    #[arg(long, default_value_t = 15_000)]
    health_interval_ms: u64,

    /// Stop the session after this many consecutive poll failures.
    #[arg(long)]
    max_poll_failures: Option<u32>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Probe backend reachability once.
    Health,
    /// Run a live webcam counting session.
    Webcam {
        /// Session length in seconds.
        #[arg(long, default_value_t = 30)]
        duration_secs: u64,
    },
    /// Upload a video file for single-shot analysis.
    Video {
        /// Path of the video file to upload.
        file: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(error) = run(cli) {
        eprintln!("tally: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let config = RuntimeConfig {
        base_url: cli.backend_url,
        poll_interval_ms: cli.poll_interval_ms,
        health_interval_ms: cli.health_interval_ms,
        max_consecutive_poll_failures: cli.max_poll_failures,
    };
    let transport = Arc::new(UreqTransport::new(REQUEST_TIMEOUT));
    let mut runtime = SessionRuntime::new(&config, transport)?;

    runtime.tick(unix_now_ms())?;
    let view = project_runtime_status(&runtime);
    println!("tally {} | server: {}", view.version, view.server);

    match cli.command {
        CliCommand::Health => Ok(()),
        CliCommand::Webcam { duration_secs } => run_webcam(&mut runtime, duration_secs),
        CliCommand::Video { file } => run_video(&mut runtime, &file),
    }
}

fn run_webcam(runtime: &mut SessionRuntime, duration_secs: u64) -> Result<(), AppError> {
    let now = unix_now_ms();
    runtime.select_mode(Mode::Webcam, now)?;
    runtime.start_webcam(now)?;
    drain_notices(runtime);

    if runtime.machine().state() != SessionState::Active {
        return Ok(());
    }
    if let Some(feed) = project_runtime_status(runtime).feed_url {
        println!("live feed: {feed}");
    }

    let deadline = unix_now_ms().saturating_add(duration_secs.saturating_mul(1_000));
    let mut last_count = None;

    while unix_now_ms() < deadline {
        runtime.tick(unix_now_ms())?;
        drain_notices(runtime);

        let view = project_runtime_status(runtime);
        if last_count != Some(view.count) {
            render_count(&view);
            last_count = Some(view.count);
        }

        std::thread::sleep(TICK_SLEEP);
    }

    runtime.stop_webcam(unix_now_ms())?;
    drain_notices(runtime);
    render_count(&project_runtime_status(runtime));
    Ok(())
}

fn run_video(runtime: &mut SessionRuntime, path: &std::path::Path) -> Result<(), AppError> {
    let file = read_video_file(path)?;
    println!("uploading {} ({} bytes)", file.file_name, file.len());

    let now = unix_now_ms();
    runtime.select_mode(Mode::Video, now)?;
    runtime.select_file(file, now)?;
    runtime.upload_video(unix_now_ms())?;

    drain_notices(runtime);
    render_count(&project_runtime_status(runtime));
    Ok(())
}

fn drain_notices(runtime: &mut SessionRuntime) {
    if let Some(notice) = runtime.take_notice() {
        println!("note: {notice}");
    }
}

fn render_count(view: &StatusView) {
    println!("total: {}", view.count);
    for line in &view.summary {
        println!("  {line}");
    }
}
