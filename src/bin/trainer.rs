//! Training pipeline entry point.
//!
//! ```text
//! trainer --mode auto --limit 100
//! trainer --mode demo --synthetic --limit 10 --json
//! trainer --info
//! ```

use clap::Parser;
use dotenv::dotenv;
use review_responder::capability::CapabilityDetector;
use review_responder::config::Settings;
use review_responder::mode::RequestedMode;
use review_responder::orchestrator::{Orchestrator, RunRequest};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fine-tune the review reply model", long_about = None)]
struct Args {
    /// auto, demo, light or full
    #[arg(long, default_value = "auto")]
    mode: RequestedMode,
    /// Maximum number of reviews to acquire
    #[arg(long, default_value_t = 100)]
    limit: usize,
    /// Skip the remote dataset and use synthetic reviews
    #[arg(long)]
    synthetic: bool,
    /// Training epochs for real engines
    #[arg(long, default_value_t = 1)]
    epochs: usize,
    /// Print detected capabilities and exit
    #[arg(long)]
    info: bool,
    /// Only log warnings and errors
    #[arg(long)]
    quiet: bool,
    /// Artifact directory
    #[arg(long)]
    output: Option<PathBuf>,
    /// Write the converted dataset as JSON (default DATA_DIR/training_data.json)
    #[arg(long)]
    snapshot: Option<Option<PathBuf>>,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv().ok();
    let args = Args::parse();
    let level = if args.quiet { Level::WARN } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let settings = Settings::from_env();
    let detector = Arc::new(CapabilityDetector::from_config(&settings.training));

    if args.info {
        println!("{}", detector.detect().await);
        return ExitCode::SUCCESS;
    }

    if !args.quiet {
        println!("🤖 Review reply trainer v{}", settings.api.version);
        println!("{}", "=".repeat(50));
    }

    let orchestrator = match Orchestrator::new(&settings, detector) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("❌ init: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let request = RunRequest {
        mode: args.mode,
        limit: args.limit,
        prefer_synthetic: args.synthetic,
        epochs: args.epochs,
        output_dir: args.output,
        snapshot: args
            .snapshot
            .map(|path| path.unwrap_or_else(|| settings.default_snapshot_path())),
    };

    match orchestrator.run(&request).await {
        Ok(result) => {
            if args.json {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("❌ report: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                println!("{}", result.summary());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {}: {}", e.stage(), e);
            ExitCode::FAILURE
        }
    }
}
