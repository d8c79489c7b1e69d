use clap::Parser;
use jobline_demos::{exit_code, handlers, init_tracing, serve, WorkerArgs};
use jobline_worker::FnHandler;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "json-worker")]
#[command(about = "Jobline worker that summarizes JSON documents", long_about = None)]
struct Cli {
    #[command(flatten)]
    worker: WorkerArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    exit_code(serve(&cli.worker, FnHandler::new(handlers::summarize_json)).await)
}
