//! Headless simulation of a working day.
//!
//! Drives a small cast through a scripted sequence of triggers and prints
//! every outcome and notification, one per line.
//!
//! ```bash
//! cargo run -p troupe-sim -- --turns 60 --save day.json
//! ```
//!
//! Uses the Anthropic API when `ANTHROPIC_API_KEY` is set and scripted lines
//! otherwise.

mod sim;

use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use troupe_core::{AnthropicGenerator, EngineConfig, Generator, ScriptedGenerator};

use sim::{parse_config_from_args, run_simulation};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config = parse_config_from_args(&args);
    let engine_config = EngineConfig::from_env()?;

    let generator: Arc<dyn Generator> = match AnthropicGenerator::from_env() {
        Ok(generator) => Arc::new(generator),
        Err(e) => {
            eprintln!("[INFO] {e}; using scripted lines");
            Arc::new(ScriptedGenerator::default())
        }
    };

    run_simulation(config, engine_config, generator).await?;
    Ok(())
}

fn print_help() {
    println!("troupe-sim - simulate a working day");
    println!();
    println!("USAGE:");
    println!("    troupe-sim [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --turns <n>      Number of triggers to run (default 40)");
    println!("    --load <path>    Resume from a saved store snapshot");
    println!("    --save <path>    Save the store snapshot when done");
    println!("    -h, --help       Print this help");
    println!();
    println!("ENVIRONMENT:");
    println!("    ANTHROPIC_API_KEY   Generate lines with the Anthropic API");
    println!("    TROUPE_*            Engine settings, see EngineConfig::from_env");
    println!("    RUST_LOG            Log filter, e.g. troupe_core=debug");
}
