// Entrypoint for the CLI application.
// - Keeps `main` small: parse arguments, set up logging, build the config
//   and hand everything to `cli::run`.
// - Returns `anyhow::Result` so fatal errors print their message and exit 1.

use clap::Parser;
use otx_search::cli::{self, Cli};
use otx_search::config::Config;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for JSON/CSV output.
    // RUST_LOG overrides the level picked by -v/-q.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(cli.log_level()).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = Config::from_env()?.with_timeout(cli.timeout());
    cli::run(&cli, &config)?;
    Ok(())
}
