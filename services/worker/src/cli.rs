use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use candidate_docs::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Candidate Document Revalidation",
    about = "Run and inspect the candidate document revalidation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the status API and the periodic revalidation loop (default command).
    /// Manual cycles are triggered through `POST /api/v1/revalidation/run[/{candidate_id}]`.
    Serve(ServeArgs),
    /// Seed an in-memory store and walk through one cycle end to end
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
    }
}
