//! dockersource entry point.

use dockersource_core::WrapperConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = WrapperConfig::from_env();

    // stdout belongs to docker or to the generated output
    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    let code = dockersource_cli::commands::run(argv, config).await;
    std::process::exit(code);
}
