//! framequery CLI
//!
//! Index a video, then ask questions about it.
//!
//! ## Commands
//!
//! - `framequery index <video>` - Sample, embed and persist a video
//! - `framequery ask <question>` - Answer a question about the indexed video
//! - `framequery retrieve <question>` - Show the best-matching frame only
//! - `framequery chat` - Interactive question answering with chat memory
//! - `framequery info` - Show the active snapshot

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use framequery_lib::core::CoreError;

mod app;
mod commands;

use commands::{ask, chat, index, info, retrieve};

/// framequery - ask questions about a video
#[derive(Parser)]
#[command(name = "framequery")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Directory holding the snapshot and keyframes
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a video file, replacing the current snapshot
    Index {
        /// Path to the video file
        video: PathBuf,

        /// Keep every Nth decoded frame
        #[arg(long, conflicts_with = "fps")]
        every_n_frames: Option<u32>,

        /// Keep this many frames per second of video
        #[arg(long)]
        fps: Option<f64>,
    },

    /// Answer a question about the indexed video
    Ask {
        question: String,

        /// Print the answer as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the frame that best matches a question
    Retrieve {
        question: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive question answering with chat memory
    Chat,

    /// Show the active snapshot
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let options = app::AppOptions {
        settings_path: cli.settings,
        data_dir: cli.data_dir,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Index {
            video,
            every_n_frames,
            fps,
        } => index::run(&options, &video, every_n_frames, fps).await,
        Commands::Ask { question, json } => ask::run(&options, &question, json).await,
        Commands::Retrieve { question, json } => retrieve::run(&options, &question, json).await,
        Commands::Chat => chat::run(&options).await,
        Commands::Info { json } => info::run(&options, json).await,
    }
}

/// Prints `error[<kind>]: <message>` for pipeline errors
fn report_error(error: &anyhow::Error) {
    match error.downcast_ref::<CoreError>() {
        Some(core) => eprintln!("error[{}]: {}", core.kind(), core),
        None => eprintln!("error: {:#}", error),
    }
}
