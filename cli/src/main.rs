//! Sandbox Image CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sandbox_image_cli::commands::{dispatch, Cli};
use sandbox_image_core::TemplateError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = tokio::select! {
        result = dispatch(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            std::process::exit(0);
        }
    };

    if let Err(e) = result {
        match e.downcast_ref::<TemplateError>() {
            Some(err) => eprintln!("Error ({}): {err}", err.kind()),
            None => eprintln!("Error: {e}"),
        }
        std::process::exit(1);
    }
}
