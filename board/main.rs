/// Read-only viewer for training runs.
///
/// Serves the runs found under a log directory: scalar curves, the
/// hyperparameter text and the visualization frames written by the trainer.
///
/// Run with:
///   cargo run --bin board -- --logdir logs/
/// Then open http://127.0.0.1:6006

mod handlers;
mod query;
mod render;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use tiny_http::Server;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "board", about = "Browse phyre-steve training runs")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:6006")]
    addr: String,
    /// Directory holding one subdirectory per run.
    #[arg(long, default_value = "logs/")]
    logdir: PathBuf,
    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    phyre_steve::logging::init_tracing(args.verbose);

    let server = Server::http(&args.addr)
        .map_err(|e| anyhow!("failed to bind {}: {}", args.addr, e))?;
    let logdir = Arc::new(args.logdir);
    info!(addr = %args.addr, logdir = %logdir.display(), "board listening");

    // One thread per request so a slow frame download does not stall the page.
    for request in server.incoming_requests() {
        let logdir = Arc::clone(&logdir);
        std::thread::spawn(move || routes::dispatch(request, &logdir));
    }
    Ok(())
}
